pub mod buffer;
pub mod context;
pub mod device;
pub mod dispatch;
pub mod import;
pub mod pipeline;
pub mod processor;
pub mod retrieve;
pub mod software;

pub use buffer::DeviceBuffer;
pub use context::{find_compute_queue_family, is_device_suitable, DeviceConfig, DeviceContext};
pub use device::{FenceStatus, GpuDevice, NativeMemoryProperties};
pub use dispatch::{dispatch_grid, DispatchExecutor, DEFAULT_DISPATCH_TIMEOUT, WORKGROUP_SIZE};
pub use import::{BufferImporter, ImportedPlanes};
pub use pipeline::{load_spirv, ComputePipeline, FrameConstants, PipelineFactory, ShaderAsset};
pub use processor::{GpuConfig, GpuPreprocessor, GpuResourceSet};
pub use retrieve::{MappedMemory, ResultRetriever};
pub use software::{FailurePoint, ObjectKind, SoftwareDevice};
