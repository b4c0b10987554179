use std::ffi::c_void;

use crate::error::{AnprError, Result};
use crate::types::FrameDescription;

/// Raw platform handle of a native frame buffer (e.g. `AHardwareBuffer*`).
///
/// Stored as `usize` so it can cross crate and thread boundaries; the engine
/// never dereferences it, only forwards it to the GPU import path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub usize);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        NativeHandle(ptr as usize)
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// One CPU-mapped plane as returned by a platform lock call.
#[derive(Debug, Clone, Copy)]
pub struct RawPlane {
    pub data: *const u8,
    /// Readable bytes starting at `data`.
    pub len: usize,
    pub row_stride: u32,
    pub pixel_stride: u32,
}

/// A camera frame owned by the host runtime.
///
/// The engine only reads through it: GPU import uses [`handle`](Self::handle),
/// the CPU path brackets reads with [`lock_planes`](Self::lock_planes) /
/// [`unlock_planes`](Self::unlock_planes) via [`PlaneLock`].
///
/// # Safety
/// Pointers returned by `lock_planes` must stay valid for `len` bytes until
/// the matching `unlock_planes` call.
pub unsafe trait NativeFrame: Send + Sync {
    fn description(&self) -> FrameDescription;

    fn handle(&self) -> NativeHandle;

    /// Map every plane for CPU reads.
    fn lock_planes(&self) -> Result<Vec<RawPlane>>;

    fn unlock_planes(&self) -> Result<()>;

    /// Orientation reported by the camera. Informational only.
    fn orientation(&self) -> Option<&str> {
        None
    }
}

/// Borrowed view of one locked plane.
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    pub data: &'a [u8],
    pub row_stride: u32,
    pub pixel_stride: u32,
}

/// Scoped CPU lock on a [`NativeFrame`]. Unlocks exactly once, on drop.
pub struct PlaneLock<'a, F: NativeFrame + ?Sized> {
    frame: &'a F,
    planes: Vec<RawPlane>,
}

impl<'a, F: NativeFrame + ?Sized> PlaneLock<'a, F> {
    pub fn acquire(frame: &'a F) -> Result<Self> {
        let planes = frame.lock_planes()?;
        let lock = Self { frame, planes };
        if lock.planes.is_empty() {
            // Dropping `lock` releases the platform lock before we bail.
            return Err(AnprError::Lock("lock returned no planes".into()));
        }
        tracing::trace!(planes = lock.planes.len(), "native frame locked");
        Ok(lock)
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, index: usize) -> Option<PlaneRef<'_>> {
        let raw = self.planes.get(index)?;
        if raw.data.is_null() {
            return None;
        }
        // SAFETY: the NativeFrame contract keeps `data` valid for `len` bytes
        // until unlock, which only happens when `self` is dropped.
        let data = unsafe { std::slice::from_raw_parts(raw.data, raw.len) };
        Some(PlaneRef {
            data,
            row_stride: raw.row_stride,
            pixel_stride: raw.pixel_stride,
        })
    }
}

impl<F: NativeFrame + ?Sized> Drop for PlaneLock<'_, F> {
    fn drop(&mut self) {
        if let Err(e) = self.frame.unlock_planes() {
            tracing::warn!(error = %e, "failed to unlock native frame");
        }
    }
}
