//! `AHardwareBuffer` frames from the Android camera pipeline.
//!
//! The NDK symbols live in `libandroid.so`, which every app process already
//! links, so they are declared directly instead of going through a loader.

use std::ffi::c_void;
use std::ptr;

use crate::error::{AnprError, Result};
use crate::traits::{NativeFrame, NativeHandle, RawPlane};
use crate::types::{FrameDescription, PixelFormat};

const AHARDWAREBUFFER_USAGE_CPU_READ_RARELY: u64 = 2;

#[repr(C)]
#[derive(Default)]
struct AHardwareBufferDesc {
    width: u32,
    height: u32,
    layers: u32,
    format: u32,
    usage: u64,
    stride: u32,
    rfu0: u32,
    rfu1: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct AHardwareBufferPlane {
    data: *mut c_void,
    pixel_stride: u32,
    row_stride: u32,
}

#[repr(C)]
struct AHardwareBufferPlanes {
    plane_count: u32,
    planes: [AHardwareBufferPlane; 4],
}

#[link(name = "android")]
extern "C" {
    fn AHardwareBuffer_describe(buffer: *const c_void, out_desc: *mut AHardwareBufferDesc);
    fn AHardwareBuffer_lockPlanes(
        buffer: *mut c_void,
        usage: u64,
        fence: i32,
        rect: *const c_void,
        out_planes: *mut AHardwareBufferPlanes,
    ) -> i32;
    fn AHardwareBuffer_unlock(buffer: *mut c_void, fence: *mut i32) -> i32;
}

/// Borrowed `AHardwareBuffer*` handed over by the camera runtime.
pub struct HardwareBuffer {
    handle: NativeHandle,
    description: FrameDescription,
    orientation: Option<String>,
}

// SAFETY: AHardwareBuffer is reference counted and thread safe; we only call
// describe/lock/unlock on it.
unsafe impl Send for HardwareBuffer {}
unsafe impl Sync for HardwareBuffer {}

impl HardwareBuffer {
    /// Wrap a buffer pointer obtained from the host.
    ///
    /// # Safety
    /// `ptr` must be a valid `AHardwareBuffer*` that outlives the returned
    /// value. The wrapper neither acquires nor releases a reference.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Result<Self> {
        if ptr.is_null() {
            return Err(AnprError::InvalidInput("null AHardwareBuffer".into()));
        }
        let mut desc = AHardwareBufferDesc::default();
        AHardwareBuffer_describe(ptr, &mut desc);

        tracing::debug!(
            width = desc.width,
            height = desc.height,
            layers = desc.layers,
            format = desc.format,
            usage = desc.usage,
            stride = desc.stride,
            "described AHardwareBuffer"
        );

        let description = FrameDescription::new(
            desc.width,
            desc.height,
            desc.stride.max(desc.width),
            PixelFormat::from_raw(desc.format),
        );
        description.validate()?;

        Ok(Self {
            handle: NativeHandle::from_ptr(ptr),
            description,
            orientation: None,
        })
    }

    pub fn with_orientation(mut self, orientation: impl Into<String>) -> Self {
        self.orientation = Some(orientation.into());
        self
    }
}

// SAFETY: plane pointers come from AHardwareBuffer_lockPlanes and stay
// mapped until AHardwareBuffer_unlock.
unsafe impl NativeFrame for HardwareBuffer {
    fn description(&self) -> FrameDescription {
        self.description
    }

    fn handle(&self) -> NativeHandle {
        self.handle
    }

    fn lock_planes(&self) -> Result<Vec<RawPlane>> {
        let mut out = AHardwareBufferPlanes {
            plane_count: 0,
            planes: [AHardwareBufferPlane {
                data: ptr::null_mut(),
                pixel_stride: 0,
                row_stride: 0,
            }; 4],
        };
        let rc = unsafe {
            AHardwareBuffer_lockPlanes(
                self.handle.as_ptr(),
                AHARDWAREBUFFER_USAGE_CPU_READ_RARELY,
                -1,
                ptr::null(),
                &mut out,
            )
        };
        if rc != 0 {
            return Err(AnprError::Lock(format!(
                "AHardwareBuffer_lockPlanes returned {rc}"
            )));
        }

        let desc = self.description;
        let planes = out.planes[..out.plane_count.min(4) as usize]
            .iter()
            .enumerate()
            .map(|(i, plane)| {
                let (cols, rows) = if i > 0 && desc.format.is_subsampled() {
                    (desc.width / 2, desc.height / 2)
                } else {
                    (desc.width, desc.height)
                };
                let len = plane.row_stride as usize * rows.saturating_sub(1) as usize
                    + cols as usize * plane.pixel_stride.max(1) as usize;
                RawPlane {
                    data: plane.data as *const u8,
                    len,
                    row_stride: plane.row_stride,
                    pixel_stride: plane.pixel_stride,
                }
            })
            .collect();
        Ok(planes)
    }

    fn unlock_planes(&self) -> Result<()> {
        let rc = unsafe { AHardwareBuffer_unlock(self.handle.as_ptr(), ptr::null_mut()) };
        if rc != 0 {
            return Err(AnprError::Lock(format!("AHardwareBuffer_unlock returned {rc}")));
        }
        Ok(())
    }

    fn orientation(&self) -> Option<&str> {
        self.orientation.as_deref()
    }
}
