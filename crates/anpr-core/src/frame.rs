use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::error::{AnprError, Result};
use crate::traits::{NativeFrame, NativeHandle, RawPlane};
use crate::types::{FrameDescription, PixelFormat};

/// A frame whose planes live in ordinary heap memory.
///
/// Used for raw frames read from disk and as the host stand-in in tests. It
/// counts lock/unlock calls and can be told to refuse locking, which is how a
/// busy hardware buffer behaves.
pub struct MemoryFrame {
    description: FrameDescription,
    planes: Vec<Vec<u8>>,
    orientation: Option<String>,
    refuse_lock: AtomicBool,
    locks: AtomicUsize,
    unlocks: AtomicUsize,
}

impl MemoryFrame {
    /// Build a frame from explicit planes. Each plane must cover the size
    /// implied by the description's stride.
    pub fn new(description: FrameDescription, planes: Vec<Vec<u8>>) -> Result<Self> {
        description.validate()?;
        if planes.len() != description.plane_count as usize {
            return Err(AnprError::InvalidInput(format!(
                "expected {} planes, got {}",
                description.plane_count,
                planes.len()
            )));
        }
        for (i, (plane, expected)) in planes.iter().zip(description.plane_sizes()).enumerate() {
            if (plane.len() as u64) < expected {
                return Err(AnprError::InvalidInput(format!(
                    "plane {i} holds {} bytes, needs {expected}",
                    plane.len()
                )));
            }
        }

        Ok(Self {
            description,
            planes,
            orientation: None,
            refuse_lock: AtomicBool::new(false),
            locks: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
        })
    }

    /// Build a 4:2:0 frame from a luma plane; chroma is neutral grey.
    pub fn from_luma(width: u32, height: u32, row_stride: u32, luma: Vec<u8>) -> Result<Self> {
        let description = FrameDescription::new(width, height, row_stride, PixelFormat::Yuv420);
        let [_, chroma, _] = description.plane_sizes();
        let chroma = vec![128u8; chroma as usize];
        Self::new(description, vec![luma, chroma.clone(), chroma])
    }

    pub fn with_orientation(mut self, orientation: impl Into<String>) -> Self {
        self.orientation = Some(orientation.into());
        self
    }

    /// Make subsequent lock attempts fail.
    pub fn set_refuse_lock(&self, refuse: bool) {
        self.refuse_lock.store(refuse, Ordering::SeqCst);
    }

    pub fn planes(&self) -> &[Vec<u8>] {
        &self.planes
    }

    pub fn lock_count(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub fn unlock_count(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }
}

// SAFETY: plane pointers point into `self.planes`, which is never mutated
// after construction, so they outlive any lock.
unsafe impl NativeFrame for MemoryFrame {
    fn description(&self) -> FrameDescription {
        self.description
    }

    fn handle(&self) -> NativeHandle {
        NativeHandle::NULL
    }

    fn lock_planes(&self) -> Result<Vec<RawPlane>> {
        if self.refuse_lock.load(Ordering::SeqCst) {
            return Err(AnprError::Lock("buffer busy".into()));
        }
        self.locks.fetch_add(1, Ordering::SeqCst);

        let subsampled = self.description.format.is_subsampled();
        Ok(self
            .planes
            .iter()
            .enumerate()
            .map(|(i, plane)| RawPlane {
                data: plane.as_ptr(),
                len: plane.len(),
                row_stride: if i > 0 && subsampled {
                    self.description.row_stride / 2
                } else {
                    self.description.row_stride
                },
                pixel_stride: 1,
            })
            .collect())
    }

    fn unlock_planes(&self) -> Result<()> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn orientation(&self) -> Option<&str> {
        self.orientation.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::PlaneLock;

    #[test]
    fn lock_guard_unlocks_once() {
        let frame = MemoryFrame::from_luma(4, 2, 4, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        {
            let lock = PlaneLock::acquire(&frame).unwrap();
            let luma = lock.plane(0).unwrap();
            assert_eq!(luma.data, &[1, 2, 3, 4, 5, 6, 7, 8]);
            assert_eq!(luma.row_stride, 4);
            assert_eq!(lock.plane_count(), 3);
        }
        assert_eq!(frame.lock_count(), 1);
        assert_eq!(frame.unlock_count(), 1);
    }

    #[test]
    fn refused_lock_never_unlocks() {
        let frame = MemoryFrame::from_luma(4, 2, 4, vec![0; 8]).unwrap();
        frame.set_refuse_lock(true);
        assert!(matches!(PlaneLock::acquire(&frame), Err(AnprError::Lock(_))));
        assert_eq!(frame.unlock_count(), 0);
    }

    #[test]
    fn short_plane_is_rejected() {
        let err = MemoryFrame::from_luma(4, 2, 8, vec![0; 8]).err().unwrap();
        assert!(matches!(err, AnprError::InvalidInput(_)));
    }
}
