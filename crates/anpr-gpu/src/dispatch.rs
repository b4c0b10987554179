use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use anpr_core::{AnprError, Result};

use crate::device::{FenceStatus, GpuDevice};
use crate::pipeline::{ComputePipeline, FrameConstants};

/// Local workgroup edge of the luma-rotate shader.
pub const WORKGROUP_SIZE: u32 = 16;

/// Default bound on a single dispatch.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Workgroup counts covering a `width` × `height` image.
pub fn dispatch_grid(width: u32, height: u32) -> (u32, u32, u32) {
    (
        width.div_ceil(WORKGROUP_SIZE),
        height.div_ceil(WORKGROUP_SIZE),
        1,
    )
}

/// Command pool whose buffers can be reset individually.
pub struct CommandPool<D: GpuDevice> {
    device: Arc<D>,
    pool: vk::CommandPool,
}

impl<D: GpuDevice> CommandPool<D> {
    pub fn new(device: Arc<D>) -> Result<Self> {
        let queue_family = device.compute_queue_family()?;
        let pool = device.create_command_pool(queue_family)?;
        Ok(Self { device, pool })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }
}

impl<D: GpuDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        self.device.destroy_command_pool(self.pool);
    }
}

/// Per-dispatch command buffer and fence.
///
/// If the submission did not complete cleanly the device is idled before
/// either object is released.
struct Submission<'a, D: GpuDevice> {
    device: &'a D,
    pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    settled: bool,
}

impl<D: GpuDevice> Drop for Submission<'_, D> {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.device.wait_idle() {
                tracing::warn!(error = %e, "device idle after failed dispatch");
            }
        }
        if self.fence != vk::Fence::null() {
            self.device.destroy_fence(self.fence);
        }
        if self.command_buffer != vk::CommandBuffer::null() {
            self.device.free_command_buffer(self.pool, self.command_buffer);
        }
    }
}

/// Records and submits one luma-rotate dispatch and waits for it.
pub struct DispatchExecutor<D: GpuDevice> {
    device: Arc<D>,
    pool: CommandPool<D>,
    timeout: Duration,
}

impl<D: GpuDevice> DispatchExecutor<D> {
    pub fn new(device: Arc<D>, timeout: Duration) -> Result<Self> {
        let pool = CommandPool::new(device.clone())?;
        Ok(Self {
            device,
            pool,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the pipeline over a `width` × `height` frame with the given row
    /// stride and block until the GPU is done or the timeout expires.
    pub fn dispatch(
        &self,
        pipeline: &ComputePipeline<D>,
        descriptor_set: vk::DescriptorSet,
        width: u32,
        height: u32,
        stride: u32,
    ) -> Result<()> {
        let device = self.device.as_ref();
        let mut submission = Submission {
            device,
            pool: self.pool.handle(),
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            settled: true,
        };

        submission.command_buffer = device.allocate_command_buffer(self.pool.handle())?;
        let cmd = submission.command_buffer;

        let constants = FrameConstants {
            width,
            height,
            stride,
        };
        let (x, y, z) = dispatch_grid(width, height);

        device.begin_command_buffer(cmd)?;
        device.cmd_bind_pipeline(cmd, pipeline.pipeline());
        device.cmd_bind_descriptor_set(cmd, pipeline.layout(), descriptor_set);
        device.cmd_push_constants(cmd, pipeline.layout(), constants.as_bytes());
        device.cmd_dispatch(cmd, x, y, z);
        device.cmd_host_read_barrier(cmd);
        device.end_command_buffer(cmd)?;

        submission.fence = device.create_fence()?;

        tracing::trace!(groups_x = x, groups_y = y, "submitting dispatch");
        submission.settled = false;
        device
            .submit(cmd, submission.fence)
            .map_err(|e| AnprError::DispatchFailed(format!("queue submit: {e}")))?;

        match device.wait_for_fence(submission.fence, self.timeout) {
            Ok(FenceStatus::Signaled) => {
                submission.settled = true;
                tracing::trace!("dispatch complete");
                Ok(())
            }
            Ok(FenceStatus::TimedOut) => {
                tracing::error!(timeout_ms = self.timeout.as_millis() as u64, "dispatch timed out");
                Err(AnprError::DispatchTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
            Err(e) => Err(AnprError::DispatchFailed(format!("fence wait: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_covers_hd_frame() {
        assert_eq!(dispatch_grid(1280, 720), (80, 45, 1));
    }

    #[test]
    fn grid_rounds_up_partial_groups() {
        assert_eq!(dispatch_grid(1, 1), (1, 1, 1));
        assert_eq!(dispatch_grid(17, 16), (2, 1, 1));
        assert_eq!(dispatch_grid(1920, 1080), (120, 68, 1));
    }
}
