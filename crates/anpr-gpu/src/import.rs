use std::sync::Arc;

use ash::vk;

use anpr_core::{AnprError, NativeFrame, Result};

use crate::buffer::DeviceBuffer;
use crate::device::GpuDevice;

/// Luma, Cb and Cr storage buffers, each a dedicated import of the frame's
/// native memory. Lives for one call.
pub struct ImportedPlanes<D: GpuDevice> {
    planes: Vec<DeviceBuffer<D>>,
}

impl<D: GpuDevice> ImportedPlanes<D> {
    pub fn luma(&self) -> &DeviceBuffer<D> {
        &self.planes[0]
    }

    pub fn buffers(&self) -> [vk::Buffer; 3] {
        [
            self.planes[0].buffer(),
            self.planes[1].buffer(),
            self.planes[2].buffer(),
        ]
    }
}

/// Imports native frame memory into GPU storage buffers without copying.
pub struct BufferImporter<D: GpuDevice> {
    device: Arc<D>,
}

impl<D: GpuDevice> BufferImporter<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }

    /// Create the three plane buffers for `frame`.
    ///
    /// Plane sizes follow the frame's row stride (see
    /// [`FrameDescription::plane_sizes`](anpr_core::FrameDescription::plane_sizes)),
    /// rounded up to whole words because the shader reads planes as `uint`
    /// arrays. Buffers already created are released if a later plane fails.
    pub fn import_planes(&self, frame: &dyn NativeFrame) -> Result<ImportedPlanes<D>> {
        let desc = frame.description();
        desc.validate()?;

        let props = self.device.native_memory_properties(frame)?;
        tracing::trace!(
            allocation_size = props.allocation_size,
            memory_type_bits = props.memory_type_bits,
            "native buffer properties"
        );

        let mut planes = Vec::with_capacity(3);
        for (index, size) in desc.plane_sizes().into_iter().enumerate() {
            let size = padded_plane_size(size);
            if props.allocation_size < size {
                return Err(AnprError::Import(format!(
                    "plane {index} needs {size} bytes, native buffer holds {}",
                    props.allocation_size
                )));
            }
            planes.push(self.import_plane(
                frame,
                index,
                size,
                props.allocation_size,
                props.memory_type_bits,
            )?);
        }

        tracing::trace!(planes = planes.len(), "planes imported");
        Ok(ImportedPlanes { planes })
    }

    fn import_plane(
        &self,
        frame: &dyn NativeFrame,
        index: usize,
        size: u64,
        allocation_size: u64,
        native_type_bits: u32,
    ) -> Result<DeviceBuffer<D>> {
        let mut plane = DeviceBuffer::unbound(
            self.device.clone(),
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            true,
        )?;

        let requirements = self.device.buffer_memory_requirements(plane.buffer());
        let type_bits = requirements.memory_type_bits & native_type_bits;
        let memory_type = self
            .device
            .find_memory_type(type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .or_else(|| {
                self.device
                    .find_memory_type(type_bits, vk::MemoryPropertyFlags::empty())
            })
            .ok_or_else(|| {
                AnprError::Import(format!("no memory type compatible with plane {index}"))
            })?;

        let memory = self
            .device
            .import_native_memory(frame, plane.buffer(), allocation_size, memory_type)?;
        plane
            .bind(memory)
            .map_err(|e| AnprError::Import(format!("binding plane {index} failed: {e}")))?;

        Ok(plane)
    }
}

/// Bytes per shader word.
pub const WORD_SIZE: u64 = 4;

/// Storage buffer size for a plane of `size` bytes: whole words, so the last
/// `uint` the shader loads lies inside the buffer.
pub fn padded_plane_size(size: u64) -> u64 {
    size.next_multiple_of(WORD_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_buffers_cover_whole_words() {
        assert_eq!(padded_plane_size(1), 4);
        assert_eq!(padded_plane_size(15), 16);
        assert_eq!(padded_plane_size(16), 16);
        assert_eq!(padded_plane_size(1280 * 720), 1280 * 720);
    }
}
