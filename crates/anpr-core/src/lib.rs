#[cfg(target_os = "android")]
pub mod android;
pub mod error;
pub mod frame;
pub mod traits;
pub mod types;

#[cfg(target_os = "android")]
pub use android::HardwareBuffer;
pub use error::{AnprError, Result};
pub use frame::MemoryFrame;
pub use traits::{NativeFrame, NativeHandle, PlaneLock, PlaneRef, RawPlane};
pub use types::*;
