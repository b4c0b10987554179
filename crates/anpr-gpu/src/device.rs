use std::ffi::CStr;
use std::time::Duration;

use ash::vk;

use anpr_core::{NativeFrame, Result};

/// Memory properties the platform reports for a native frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeMemoryProperties {
    /// Size the dedicated import allocation must have.
    pub allocation_size: u64,
    /// Memory types the native buffer can be imported into.
    pub memory_type_bits: u32,
}

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// The Vulkan entry points the preprocessing components use.
///
/// Methods mirror the Vulkan calls of the same name. Handles are raw `ash`
/// handles and ownership is tracked by the RAII wrappers in this crate, never
/// by the device. [`DeviceContext`](crate::DeviceContext) forwards to a real
/// driver; [`SoftwareDevice`](crate::SoftwareDevice) emulates one on the CPU.
pub trait GpuDevice: Send + Sync + 'static {
    /// Index of the first queue family with compute support. Recomputed on
    /// every call.
    fn compute_queue_family(&self) -> Result<u32>;

    fn wait_idle(&self) -> Result<()>;

    // Pipeline objects.

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        push_constants: vk::PushConstantRange,
    ) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_pipeline_cache(&self) -> Result<vk::PipelineCache>;
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);

    fn create_compute_pipeline(
        &self,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn create_descriptor_pool(
        &self,
        storage_buffers: u32,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool>;
    /// Also frees every set allocated from the pool.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet>;
    /// Point bindings `0..buffers.len()` of `set` at whole buffers.
    fn write_storage_buffers(&self, set: vk::DescriptorSet, buffers: &[vk::Buffer]);

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);

    // Buffers and memory.

    /// `external` marks the buffer as backed by imported native memory.
    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        external: bool,
    ) -> Result<vk::Buffer>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32>;
    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> Result<vk::DeviceMemory>;

    fn native_memory_properties(&self, frame: &dyn NativeFrame) -> Result<NativeMemoryProperties>;
    /// Dedicated allocation for `buffer` that imports the frame's memory.
    fn import_native_memory(
        &self,
        frame: &dyn NativeFrame,
        buffer: vk::Buffer,
        allocation_size: u64,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory>;

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()>;
    fn free_memory(&self, memory: vk::DeviceMemory);

    fn map_memory(&self, memory: vk::DeviceMemory, size: u64) -> Result<*mut u8>;
    fn unmap_memory(&self, memory: vk::DeviceMemory);

    // Command recording and submission.

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer>;
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        data: &[u8],
    );
    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);
    /// Make compute shader writes visible to host reads once the fence
    /// signals.
    fn cmd_host_read_barrier(&self, command_buffer: vk::CommandBuffer);

    fn create_fence(&self) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn submit(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> Result<()>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<FenceStatus>;
}
