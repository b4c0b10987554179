//! CPU emulation of the Vulkan device.
//!
//! [`SoftwareDevice`] hands out opaque handles, keeps every live object in a
//! ledger and executes the luma-rotate kernel on the CPU when a command buffer
//! is submitted, invocation by invocation over the recorded dispatch grid.
//! Native frames are "imported" by snapshotting their locked planes into the
//! allocation, luma first.
//!
//! Tests use the ledger to prove that no per-call object survives a call and
//! the failure points to drive every error path.

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::time::Duration;

use ash::vk::{self, Handle};
use parking_lot::Mutex;

use anpr_core::{AnprError, NativeFrame, PlaneLock, Result};

use crate::device::{FenceStatus, GpuDevice, NativeMemoryProperties};
use crate::dispatch::WORKGROUP_SIZE;
use crate::import::padded_plane_size;
use crate::pipeline::FrameConstants;

const MEMORY_TYPE_FLAGS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw()
        | vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A bare SPIR-V header (magic, version 1.0, generator, bound, schema).
/// Enough for the software device, which never compiles the module.
pub fn spirv_header() -> Vec<u8> {
    [0x0723_0203u32, 0x0001_0000, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    PipelineCache,
    Pipeline,
    DescriptorPool,
    DescriptorSet,
    CommandPool,
    CommandBuffer,
    Buffer,
    Memory,
    Fence,
}

/// Operations a test can force to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    ComputeQueue,
    CreateShaderModule,
    CreateDescriptorSetLayout,
    CreatePipelineLayout,
    CreatePipelineCache,
    CreatePipeline,
    CreateDescriptorPool,
    AllocateDescriptorSet,
    CreateCommandPool,
    CreateBuffer,
    AllocateMemory,
    ImportMemory,
    BindMemory,
    MapMemory,
    AllocateCommandBuffer,
    CreateFence,
    Submit,
    /// The fence never signals within the timeout.
    FenceTimeout,
    /// The fence wait reports device loss.
    DeviceLost,
}

impl FailurePoint {
    fn error(self) -> AnprError {
        let msg = format!("injected failure: {self:?}");
        match self {
            FailurePoint::ComputeQueue => AnprError::NoComputeQueue,
            FailurePoint::CreateShaderModule => AnprError::ShaderLoad(msg),
            FailurePoint::ImportMemory => AnprError::Import(msg),
            FailurePoint::Submit | FailurePoint::DeviceLost => AnprError::DispatchFailed(msg),
            _ => AnprError::ResourceCreation(msg),
        }
    }
}

#[derive(Debug, Clone)]
enum Recorded {
    BindPipeline(u64),
    BindDescriptorSet(u64),
    PushConstants(Vec<u8>),
    Dispatch([u32; 3]),
    HostReadBarrier,
}

#[derive(Debug)]
enum Object {
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    PipelineCache,
    Pipeline,
    DescriptorPool,
    DescriptorSet { pool: u64, bindings: Vec<u64> },
    CommandPool,
    CommandBuffer { pool: u64, commands: Vec<Recorded>, recording: bool },
    Buffer { size: u64, memory: Option<u64> },
    Memory { bytes: Vec<u8>, mapped: bool },
    Fence { signaled: bool },
}

impl Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::ShaderModule => ObjectKind::ShaderModule,
            Object::DescriptorSetLayout => ObjectKind::DescriptorSetLayout,
            Object::PipelineLayout => ObjectKind::PipelineLayout,
            Object::PipelineCache => ObjectKind::PipelineCache,
            Object::Pipeline => ObjectKind::Pipeline,
            Object::DescriptorPool => ObjectKind::DescriptorPool,
            Object::DescriptorSet { .. } => ObjectKind::DescriptorSet,
            Object::CommandPool => ObjectKind::CommandPool,
            Object::CommandBuffer { .. } => ObjectKind::CommandBuffer,
            Object::Buffer { .. } => ObjectKind::Buffer,
            Object::Memory { .. } => ObjectKind::Memory,
            Object::Fence { .. } => ObjectKind::Fence,
        }
    }
}

#[derive(Default)]
struct Ledger {
    next_handle: u64,
    objects: HashMap<u64, Object>,
    failures: HashSet<FailurePoint>,
    dispatches: Vec<[u32; 3]>,
    host_barriers: usize,
    invalid_calls: usize,
    idles: usize,
}

impl Ledger {
    fn insert(&mut self, object: Object) -> u64 {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.objects.insert(handle, object);
        handle
    }

    fn check(&self, point: FailurePoint) -> Result<()> {
        if self.failures.contains(&point) {
            return Err(point.error());
        }
        Ok(())
    }

    fn remove(&mut self, handle: u64, kind: ObjectKind) {
        match self.objects.get(&handle).map(Object::kind) {
            Some(k) if k == kind => {
                self.objects.remove(&handle);
            }
            _ => self.invalid(format!("destroying unknown {kind:?} {handle:#x}")),
        }
    }

    fn contains(&self, handle: u64, kind: ObjectKind) -> bool {
        self.objects.get(&handle).map(Object::kind) == Some(kind)
    }

    fn invalid(&mut self, what: String) {
        tracing::warn!(what = %what, "invalid call on software device");
        self.invalid_calls += 1;
    }

    fn buffer_memory(&self, buffer: u64) -> Option<(u64, u64)> {
        match self.objects.get(&buffer) {
            Some(Object::Buffer {
                size,
                memory: Some(memory),
            }) => Some((*size, *memory)),
            _ => None,
        }
    }

    fn memory_bytes(&self, memory: u64) -> Option<&Vec<u8>> {
        match self.objects.get(&memory) {
            Some(Object::Memory { bytes, .. }) => Some(bytes),
            _ => None,
        }
    }

    fn execute(&mut self, commands: &[Recorded]) -> Result<()> {
        let mut pipeline = None;
        let mut set = None;
        let mut constants = None;
        let mut unguarded = 0usize;

        for command in commands {
            match command {
                Recorded::BindPipeline(p) => pipeline = Some(*p),
                Recorded::BindDescriptorSet(s) => set = Some(*s),
                Recorded::PushConstants(bytes) => {
                    constants = bytemuck::try_pod_read_unaligned::<FrameConstants>(bytes).ok()
                }
                Recorded::Dispatch(groups) => {
                    if !pipeline.is_some_and(|p| self.contains(p, ObjectKind::Pipeline)) {
                        return Err(AnprError::DispatchFailed("dispatch without a pipeline".into()));
                    }
                    let constants = constants.ok_or_else(|| {
                        AnprError::DispatchFailed("dispatch without push constants".into())
                    })?;
                    let bindings = match set.and_then(|s| self.objects.get(&s)) {
                        Some(Object::DescriptorSet { bindings, .. }) if bindings.len() == 4 => {
                            bindings.clone()
                        }
                        _ => {
                            return Err(AnprError::DispatchFailed(
                                "dispatch without a complete descriptor set".into(),
                            ))
                        }
                    };
                    self.dispatches.push(*groups);
                    self.run_luma_rotate(&bindings, constants, *groups)?;
                    unguarded += 1;
                }
                Recorded::HostReadBarrier => {
                    self.host_barriers += 1;
                    unguarded = 0;
                }
            }
        }
        if unguarded > 0 {
            return Err(AnprError::DispatchFailed(format!(
                "readback of {unguarded} dispatch without a host read barrier"
            )));
        }
        Ok(())
    }

    /// One emulated invocation per grid cell, exactly as the shader runs.
    fn run_luma_rotate(
        &mut self,
        bindings: &[u64],
        c: FrameConstants,
        groups: [u32; 3],
    ) -> Result<()> {
        let unbound = || AnprError::DispatchFailed("descriptor points at an unbound buffer".into());
        let (luma_size, luma_memory) = self.buffer_memory(bindings[0]).ok_or_else(unbound)?;
        let (out_size, out_memory) = self.buffer_memory(bindings[3]).ok_or_else(unbound)?;

        let luma = self.memory_bytes(luma_memory).ok_or_else(unbound)?;
        let input = luma[..(luma_size as usize).min(luma.len())].to_vec();

        let Some(Object::Memory { bytes: output, .. }) = self.objects.get_mut(&out_memory) else {
            return Err(unbound());
        };
        let out_len = (out_size as usize).min(output.len());
        let output = &mut output[..out_len];

        let mut out_of_bounds = 0usize;
        for y in 0..groups[1] * WORKGROUP_SIZE {
            for x in 0..groups[0] * WORKGROUP_SIZE {
                if x >= c.width || y >= c.height {
                    continue;
                }
                let src = y as usize * c.stride as usize + x as usize;
                // The shader loads the whole word holding `src`; that word
                // must lie inside the bound buffer.
                let word = src & !3;
                let value = match input.get(word..word + 4) {
                    Some(bytes) => bytes[src & 3],
                    None => {
                        out_of_bounds += 1;
                        0
                    }
                };
                let dst = x as usize * c.height as usize + (c.height - 1 - y) as usize;
                if let Some(out) = output.get_mut(dst) {
                    *out |= value;
                }
            }
        }
        if out_of_bounds > 0 {
            self.invalid(format!(
                "{out_of_bounds} luma word loads past the end of a {luma_size}-byte buffer"
            ));
        }
        Ok(())
    }
}

/// Vulkan device emulated on the CPU. See the module docs.
#[derive(Default)]
pub struct SoftwareDevice {
    ledger: Mutex<Ledger>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call at `point` fail until cleared.
    pub fn inject_failure(&self, point: FailurePoint) {
        self.ledger.lock().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.ledger.lock().failures.clear();
    }

    /// Number of objects currently alive.
    pub fn live_objects(&self) -> usize {
        self.ledger.lock().objects.len()
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.ledger
            .lock()
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .count()
    }

    /// Grids of every dispatch executed so far.
    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.ledger.lock().dispatches.clone()
    }

    /// Host read barriers executed by submitted command buffers.
    pub fn host_barriers(&self) -> usize {
        self.ledger.lock().host_barriers
    }

    /// Calls that referenced unknown handles (double frees, use after free).
    pub fn invalid_calls(&self) -> usize {
        self.ledger.lock().invalid_calls
    }

    pub fn idle_count(&self) -> usize {
        self.ledger.lock().idles
    }

    fn create(&self, point: FailurePoint, object: Object) -> Result<u64> {
        let mut ledger = self.ledger.lock();
        ledger.check(point)?;
        Ok(ledger.insert(object))
    }
}

impl GpuDevice for SoftwareDevice {
    fn compute_queue_family(&self) -> Result<u32> {
        self.ledger.lock().check(FailurePoint::ComputeQueue)?;
        Ok(0)
    }

    fn wait_idle(&self) -> Result<()> {
        self.ledger.lock().idles += 1;
        Ok(())
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        if code.first() != Some(&0x0723_0203) {
            return Err(AnprError::ShaderLoad("missing SPIR-V magic".into()));
        }
        self.create(FailurePoint::CreateShaderModule, Object::ShaderModule)
            .map(vk::ShaderModule::from_raw)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.ledger
            .lock()
            .remove(module.as_raw(), ObjectKind::ShaderModule);
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout> {
        if bindings.is_empty() {
            return Err(AnprError::ResourceCreation("empty descriptor set layout".into()));
        }
        self.create(FailurePoint::CreateDescriptorSetLayout, Object::DescriptorSetLayout)
            .map(vk::DescriptorSetLayout::from_raw)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.ledger
            .lock()
            .remove(layout.as_raw(), ObjectKind::DescriptorSetLayout);
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        _push_constants: vk::PushConstantRange,
    ) -> Result<vk::PipelineLayout> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::CreatePipelineLayout)?;
        if !ledger.contains(set_layout.as_raw(), ObjectKind::DescriptorSetLayout) {
            return Err(AnprError::ResourceCreation("unknown descriptor set layout".into()));
        }
        Ok(vk::PipelineLayout::from_raw(ledger.insert(Object::PipelineLayout)))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.ledger
            .lock()
            .remove(layout.as_raw(), ObjectKind::PipelineLayout);
    }

    fn create_pipeline_cache(&self) -> Result<vk::PipelineCache> {
        self.create(FailurePoint::CreatePipelineCache, Object::PipelineCache)
            .map(vk::PipelineCache::from_raw)
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.ledger
            .lock()
            .remove(cache.as_raw(), ObjectKind::PipelineCache);
    }

    fn create_compute_pipeline(
        &self,
        _cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> Result<vk::Pipeline> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::CreatePipeline)?;
        if !ledger.contains(layout.as_raw(), ObjectKind::PipelineLayout)
            || !ledger.contains(module.as_raw(), ObjectKind::ShaderModule)
        {
            return Err(AnprError::ResourceCreation("unknown layout or shader module".into()));
        }
        if entry_point.to_bytes() != b"main" {
            return Err(AnprError::ResourceCreation(format!(
                "no entry point {entry_point:?}"
            )));
        }
        Ok(vk::Pipeline::from_raw(ledger.insert(Object::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.ledger
            .lock()
            .remove(pipeline.as_raw(), ObjectKind::Pipeline);
    }

    fn create_descriptor_pool(
        &self,
        _storage_buffers: u32,
        _max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        self.create(FailurePoint::CreateDescriptorPool, Object::DescriptorPool)
            .map(vk::DescriptorPool::from_raw)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut ledger = self.ledger.lock();
        let raw = pool.as_raw();
        ledger
            .objects
            .retain(|_, o| !matches!(o, Object::DescriptorSet { pool, .. } if *pool == raw));
        ledger.remove(raw, ObjectKind::DescriptorPool);
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::AllocateDescriptorSet)?;
        if !ledger.contains(pool.as_raw(), ObjectKind::DescriptorPool)
            || !ledger.contains(layout.as_raw(), ObjectKind::DescriptorSetLayout)
        {
            return Err(AnprError::ResourceCreation("unknown pool or layout".into()));
        }
        let set = ledger.insert(Object::DescriptorSet {
            pool: pool.as_raw(),
            bindings: Vec::new(),
        });
        Ok(vk::DescriptorSet::from_raw(set))
    }

    fn write_storage_buffers(&self, set: vk::DescriptorSet, buffers: &[vk::Buffer]) {
        let mut ledger = self.ledger.lock();
        match ledger.objects.get_mut(&set.as_raw()) {
            Some(Object::DescriptorSet { bindings, .. }) => {
                *bindings = buffers.iter().map(|b| b.as_raw()).collect();
            }
            _ => ledger.invalid(format!("writing unknown descriptor set {:#x}", set.as_raw())),
        }
    }

    fn create_command_pool(&self, _queue_family: u32) -> Result<vk::CommandPool> {
        self.create(FailurePoint::CreateCommandPool, Object::CommandPool)
            .map(vk::CommandPool::from_raw)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut ledger = self.ledger.lock();
        let raw = pool.as_raw();
        ledger
            .objects
            .retain(|_, o| !matches!(o, Object::CommandBuffer { pool, .. } if *pool == raw));
        ledger.remove(raw, ObjectKind::CommandPool);
    }

    fn create_buffer(
        &self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        _external: bool,
    ) -> Result<vk::Buffer> {
        if size == 0 {
            return Err(AnprError::ResourceCreation("zero-sized buffer".into()));
        }
        self.create(FailurePoint::CreateBuffer, Object::Buffer { size, memory: None })
            .map(vk::Buffer::from_raw)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.ledger.lock().remove(buffer.as_raw(), ObjectKind::Buffer);
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = match self.ledger.lock().objects.get(&buffer.as_raw()) {
            Some(Object::Buffer { size, .. }) => *size,
            _ => 0,
        };
        vk::MemoryRequirements {
            size,
            alignment: 4,
            memory_type_bits: 1,
        }
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        (type_bits & 1 != 0 && MEMORY_TYPE_FLAGS.contains(flags)).then_some(0)
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> Result<vk::DeviceMemory> {
        if memory_type_index != 0 {
            return Err(AnprError::ResourceCreation(format!(
                "no memory type {memory_type_index}"
            )));
        }
        let object = Object::Memory {
            bytes: vec![0; size as usize],
            mapped: false,
        };
        self.create(FailurePoint::AllocateMemory, object)
            .map(vk::DeviceMemory::from_raw)
    }

    fn native_memory_properties(&self, frame: &dyn NativeFrame) -> Result<NativeMemoryProperties> {
        Ok(NativeMemoryProperties {
            allocation_size: frame
                .description()
                .plane_sizes()
                .into_iter()
                .map(padded_plane_size)
                .sum(),
            memory_type_bits: 1,
        })
    }

    fn import_native_memory(
        &self,
        frame: &dyn NativeFrame,
        buffer: vk::Buffer,
        allocation_size: u64,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory> {
        self.ledger.lock().check(FailurePoint::ImportMemory)?;
        let expected = self.native_memory_properties(frame)?.allocation_size;
        if allocation_size != expected || memory_type_index != 0 {
            return Err(AnprError::Import(format!(
                "dedicated import of {allocation_size} bytes (type {memory_type_index}) \
                 does not match the native buffer ({expected} bytes)"
            )));
        }

        let mut bytes = Vec::with_capacity(allocation_size as usize);
        {
            let lock = PlaneLock::acquire(frame)
                .map_err(|e| AnprError::Import(format!("native buffer unavailable: {e}")))?;
            for (index, size) in frame.description().plane_sizes().into_iter().enumerate() {
                let start = bytes.len();
                if let Some(plane) = lock.plane(index) {
                    let take = plane.data.len().min(size as usize);
                    bytes.extend_from_slice(&plane.data[..take]);
                }
                bytes.resize(start + padded_plane_size(size) as usize, 0);
            }
        }

        let mut ledger = self.ledger.lock();
        if !ledger.contains(buffer.as_raw(), ObjectKind::Buffer) {
            return Err(AnprError::Import("dedicated import for unknown buffer".into()));
        }
        let memory = ledger.insert(Object::Memory {
            bytes,
            mapped: false,
        });
        Ok(vk::DeviceMemory::from_raw(memory))
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::BindMemory)?;
        let available = match ledger.objects.get(&memory.as_raw()) {
            Some(Object::Memory { bytes, .. }) => bytes.len() as u64,
            _ => return Err(AnprError::ResourceCreation("binding unknown memory".into())),
        };
        match ledger.objects.get_mut(&buffer.as_raw()) {
            Some(Object::Buffer { size, memory: slot }) if slot.is_none() => {
                if available < *size {
                    return Err(AnprError::ResourceCreation(format!(
                        "{available} bytes of memory for a {size}-byte buffer"
                    )));
                }
                *slot = Some(memory.as_raw());
                Ok(())
            }
            _ => Err(AnprError::ResourceCreation(
                "binding to an unknown or already bound buffer".into(),
            )),
        }
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.ledger.lock().remove(memory.as_raw(), ObjectKind::Memory);
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: u64) -> Result<*mut u8> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::MapMemory)?;
        match ledger.objects.get_mut(&memory.as_raw()) {
            Some(Object::Memory { bytes, mapped }) if !*mapped && size <= bytes.len() as u64 => {
                *mapped = true;
                Ok(bytes.as_mut_ptr())
            }
            _ => Err(AnprError::ResourceCreation(
                "mapping unknown, mapped or too small memory".into(),
            )),
        }
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        let mut ledger = self.ledger.lock();
        match ledger.objects.get_mut(&memory.as_raw()) {
            Some(Object::Memory { mapped, .. }) if *mapped => *mapped = false,
            _ => ledger.invalid(format!("unmapping {:#x}", memory.as_raw())),
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::AllocateCommandBuffer)?;
        if !ledger.contains(pool.as_raw(), ObjectKind::CommandPool) {
            return Err(AnprError::ResourceCreation("unknown command pool".into()));
        }
        let cmd = ledger.insert(Object::CommandBuffer {
            pool: pool.as_raw(),
            commands: Vec::new(),
            recording: false,
        });
        Ok(vk::CommandBuffer::from_raw(cmd))
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        self.ledger
            .lock()
            .remove(command_buffer.as_raw(), ObjectKind::CommandBuffer);
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        match self.ledger.lock().objects.get_mut(&command_buffer.as_raw()) {
            Some(Object::CommandBuffer {
                commands,
                recording,
                ..
            }) => {
                commands.clear();
                *recording = true;
                Ok(())
            }
            _ => Err(AnprError::DispatchFailed("unknown command buffer".into())),
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        match self.ledger.lock().objects.get_mut(&command_buffer.as_raw()) {
            Some(Object::CommandBuffer { recording, .. }) if *recording => {
                *recording = false;
                Ok(())
            }
            _ => Err(AnprError::DispatchFailed(
                "ending a command buffer that is not recording".into(),
            )),
        }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(command_buffer, Recorded::BindPipeline(pipeline.as_raw()));
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record(command_buffer, Recorded::BindDescriptorSet(set.as_raw()));
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        data: &[u8],
    ) {
        self.record(command_buffer, Recorded::PushConstants(data.to_vec()));
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(command_buffer, Recorded::Dispatch([x, y, z]));
    }

    fn cmd_host_read_barrier(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, Recorded::HostReadBarrier);
    }

    fn create_fence(&self) -> Result<vk::Fence> {
        self.create(FailurePoint::CreateFence, Object::Fence { signaled: false })
            .map(vk::Fence::from_raw)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.ledger.lock().remove(fence.as_raw(), ObjectKind::Fence);
    }

    fn submit(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> Result<()> {
        let mut ledger = self.ledger.lock();
        ledger.check(FailurePoint::Submit)?;

        let commands = match ledger.objects.get(&command_buffer.as_raw()) {
            Some(Object::CommandBuffer {
                commands,
                recording: false,
                ..
            }) => commands.clone(),
            _ => {
                return Err(AnprError::DispatchFailed(
                    "submitting an unknown or unfinished command buffer".into(),
                ))
            }
        };
        if !ledger.contains(fence.as_raw(), ObjectKind::Fence) {
            return Err(AnprError::DispatchFailed("submitting with unknown fence".into()));
        }

        ledger.execute(&commands)?;

        let hang = ledger.failures.contains(&FailurePoint::FenceTimeout);
        if let Some(Object::Fence { signaled }) = ledger.objects.get_mut(&fence.as_raw()) {
            *signaled = !hang;
        }
        Ok(())
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: Duration) -> Result<FenceStatus> {
        let ledger = self.ledger.lock();
        ledger.check(FailurePoint::DeviceLost)?;
        match ledger.objects.get(&fence.as_raw()) {
            Some(Object::Fence { signaled: true }) => Ok(FenceStatus::Signaled),
            Some(Object::Fence { signaled: false }) => Ok(FenceStatus::TimedOut),
            _ => Err(AnprError::DispatchFailed("waiting on unknown fence".into())),
        }
    }
}

impl SoftwareDevice {
    fn record(&self, command_buffer: vk::CommandBuffer, command: Recorded) {
        let mut ledger = self.ledger.lock();
        match ledger.objects.get_mut(&command_buffer.as_raw()) {
            Some(Object::CommandBuffer {
                commands,
                recording: true,
                ..
            }) => commands.push(command),
            _ => ledger.invalid(format!("recording into {:#x}", command_buffer.as_raw())),
        }
    }
}
