use std::sync::Arc;

use ash::vk;

use anpr_core::{AnprError, Result};

use crate::buffer::DeviceBuffer;
use crate::device::GpuDevice;

/// Host mapping of a memory object; unmapped on drop.
pub struct MappedMemory<'a, D: GpuDevice + ?Sized> {
    device: &'a D,
    memory: vk::DeviceMemory,
    ptr: *mut u8,
    len: usize,
}

impl<'a, D: GpuDevice + ?Sized> MappedMemory<'a, D> {
    pub fn map(device: &'a D, memory: vk::DeviceMemory, len: u64) -> Result<Self> {
        let ptr = device.map_memory(memory, len)?;
        if ptr.is_null() {
            device.unmap_memory(memory);
            return Err(AnprError::ResourceCreation("map returned a null pointer".into()));
        }
        Ok(Self {
            device,
            memory,
            ptr,
            len: len as usize,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the device mapped `len` bytes at `ptr` and they stay mapped
        // until drop.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes this the only view.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<D: GpuDevice + ?Sized> Drop for MappedMemory<'_, D> {
    fn drop(&mut self) {
        self.device.unmap_memory(self.memory);
    }
}

/// Copies the dispatch result out of host-visible memory.
pub struct ResultRetriever<D: GpuDevice> {
    device: Arc<D>,
}

impl<D: GpuDevice> ResultRetriever<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }

    /// Copy `width * height` bytes out of `output`.
    pub fn retrieve(&self, output: &DeviceBuffer<D>, width: u32, height: u32) -> Result<Vec<u8>> {
        let len = width as u64 * height as u64;
        if len > output.size() {
            return Err(AnprError::InvalidInput(format!(
                "readback of {len} bytes from a {}-byte buffer",
                output.size()
            )));
        }

        let mapped = MappedMemory::map(self.device.as_ref(), output.memory(), len)?;
        let data = mapped.as_slice().to_vec();
        tracing::trace!(bytes = data.len(), "output copied to host");
        Ok(data)
    }
}
