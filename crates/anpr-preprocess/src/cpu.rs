use rayon::prelude::*;

use anpr_core::{AnprError, Backend, NativeFrame, PlaneLock, ProcessedFrame, Result};

/// Luma extraction plus 90° clockwise rotation on the CPU.
///
/// Produces the same bytes as the GPU shader:
/// `out[x * height + (height - 1 - y)] = luma[y * stride + x]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuPlaneRotator;

impl CpuPlaneRotator {
    pub fn new() -> Self {
        Self
    }

    /// Rotate one strided 8-bit plane. Output rows are filled in parallel.
    ///
    /// A plane shorter than `stride * (height - 1) + width` is reported as a
    /// `Lock` error: the mapped region does not cover the frame.
    pub fn rotate_plane(plane: &[u8], stride: usize, width: usize, height: usize) -> Result<Vec<u8>> {
        if width == 0 || height == 0 {
            return Err(AnprError::InvalidInput(format!(
                "plane has zero extent ({width}x{height})"
            )));
        }
        if stride < width {
            return Err(AnprError::InvalidInput(format!(
                "row stride {stride} is smaller than width {width}"
            )));
        }
        let needed = stride * (height - 1) + width;
        if plane.len() < needed {
            return Err(AnprError::Lock(format!(
                "plane holds {} bytes, {width}x{height} at stride {stride} needs {needed}",
                plane.len()
            )));
        }

        let mut out = vec![0u8; width * height];
        out.par_chunks_mut(height).enumerate().for_each(|(x, row)| {
            for (j, px) in row.iter_mut().enumerate() {
                let y = height - 1 - j;
                *px = plane[y * stride + x];
            }
        });
        Ok(out)
    }

    /// Lock `frame`, rotate its luma plane, unlock.
    pub fn rotate_luma_plane(
        &self,
        frame: &dyn NativeFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        tracing::trace!(width, height, "locking");
        let lock = PlaneLock::acquire(frame)?;
        let luma = lock
            .plane(0)
            .ok_or_else(|| AnprError::Lock("luma plane not mapped".into()))?;
        if luma.pixel_stride > 1 {
            return Err(AnprError::Lock(format!(
                "luma plane is interleaved (pixel stride {})",
                luma.pixel_stride
            )));
        }

        tracing::trace!(row_stride = luma.row_stride, "transforming");
        let out = Self::rotate_plane(
            luma.data,
            luma.row_stride as usize,
            width as usize,
            height as usize,
        )?;
        tracing::trace!("unlocking");
        Ok(out)
    }

    pub fn process(&self, frame: &dyn NativeFrame) -> Result<ProcessedFrame> {
        let desc = frame.description();
        desc.validate()?;
        if let Some(orientation) = frame.orientation() {
            tracing::debug!(orientation, "frame orientation (not applied)");
        }
        let data = self.rotate_luma_plane(frame, desc.width, desc.height)?;
        Ok(ProcessedFrame {
            data,
            width: desc.height,
            height: desc.width,
            backend: Backend::Cpu,
        })
    }
}
