use std::sync::Arc;

use ash::vk;

use anpr_core::{AnprError, Result};

use crate::device::GpuDevice;
use crate::retrieve::MappedMemory;

/// A `VkBuffer` together with the memory bound to it.
///
/// Destroying the buffer and freeing its memory happen on drop, so a buffer
/// built halfway (memory allocation failed, bind failed) still cleans up.
pub struct DeviceBuffer<D: GpuDevice> {
    device: Arc<D>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: u64,
}

impl<D: GpuDevice> DeviceBuffer<D> {
    /// A buffer with no memory bound yet.
    pub(crate) fn unbound(
        device: Arc<D>,
        size: u64,
        usage: vk::BufferUsageFlags,
        external: bool,
    ) -> Result<Self> {
        let buffer = device.create_buffer(size, usage, external)?;
        Ok(Self {
            device,
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        })
    }

    /// Take ownership of `memory` and bind it at offset 0.
    pub(crate) fn bind(&mut self, memory: vk::DeviceMemory) -> Result<()> {
        self.memory = memory;
        self.device.bind_buffer_memory(self.buffer, memory)
    }

    /// Host-visible, host-coherent storage buffer of at least `len` bytes,
    /// zero-filled.
    ///
    /// The shader merges output bytes into 32-bit words, so the underlying
    /// buffer is rounded up to a whole word. [`size`](Self::size) reports `len`.
    pub fn host_visible(device: Arc<D>, len: u64) -> Result<Self> {
        if len == 0 {
            return Err(AnprError::InvalidInput("zero-sized output buffer".into()));
        }
        let padded = len.div_ceil(4) * 4;
        let mut out = Self::unbound(
            device.clone(),
            padded,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            false,
        )?;

        let requirements = device.buffer_memory_requirements(out.buffer);
        let memory_type = device
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .ok_or_else(|| {
                AnprError::ResourceCreation("no host-visible coherent memory type".into())
            })?;
        let memory = device.allocate_memory(requirements.size.max(padded), memory_type)?;
        out.bind(memory)?;

        {
            let mut mapped = MappedMemory::map(device.as_ref(), memory, padded)?;
            mapped.as_mut_slice().fill(0);
        }

        out.size = len;
        Ok(out)
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Logical size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl<D: GpuDevice> Drop for DeviceBuffer<D> {
    fn drop(&mut self) {
        if self.buffer != vk::Buffer::null() {
            self.device.destroy_buffer(self.buffer);
        }
        if self.memory != vk::DeviceMemory::null() {
            self.device.free_memory(self.memory);
        }
    }
}

impl<D: GpuDevice> std::fmt::Debug for DeviceBuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("buffer", &self.buffer)
            .field("memory", &self.memory)
            .field("size", &self.size)
            .finish()
    }
}
