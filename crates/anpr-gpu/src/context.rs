use std::ffi::{c_char, c_void, CStr, CString};
use std::time::Duration;

use ash::vk;
use serde::{Deserialize, Serialize};

use anpr_core::{AnprError, NativeFrame, Result};

use crate::device::{FenceStatus, GpuDevice, NativeMemoryProperties};

#[cfg(target_os = "android")]
const DEVICE_EXTENSIONS: &[&CStr] = &[
    c"VK_ANDROID_external_memory_android_hardware_buffer",
    c"VK_EXT_queue_family_foreign",
];
#[cfg(not(target_os = "android"))]
const DEVICE_EXTENSIONS: &[&CStr] = &[];

type GetAndroidHardwareBufferPropertiesFn = unsafe extern "system" fn(
    device: vk::Device,
    buffer: *const c_void,
    properties: *mut vk::AndroidHardwareBufferPropertiesANDROID<'static>,
) -> vk::Result;

/// Configuration for Vulkan device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Application name reported to the driver.
    pub application_name: String,
    /// Restrict selection to this physical device index.
    pub device_ordinal: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            application_name: "anpr".to_string(),
            device_ordinal: None,
        }
    }
}

/// First queue family that supports compute work.
pub fn find_compute_queue_family(families: &[vk::QueueFamilyProperties]) -> Result<u32> {
    families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
        .map(|i| i as u32)
        .ok_or(AnprError::NoComputeQueue)
}

/// A device qualifies when it has a compute queue and supports
/// `shaderStorageImageExtendedFormats`.
pub fn is_device_suitable(
    families: &[vk::QueueFamilyProperties],
    features: &vk::PhysicalDeviceFeatures,
) -> bool {
    find_compute_queue_family(families).is_ok()
        && features.shader_storage_image_extended_formats == vk::TRUE
}

/// Vulkan instance, logical device and compute queue.
///
/// Created once and shared behind an `Arc`; dropping it idles the device and
/// destroys the device before the instance.
pub struct DeviceContext {
    _entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    ahb_properties: Option<GetAndroidHardwareBufferPropertiesFn>,
    device_name: String,
}

impl DeviceContext {
    pub fn initialize(config: &DeviceConfig) -> Result<Self> {
        tracing::info!(
            application = %config.application_name,
            device = ?config.device_ordinal,
            "initializing Vulkan device"
        );

        // SAFETY: loads the system Vulkan loader; nothing else is assumed.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| AnprError::InstanceCreation(format!("loading Vulkan: {e}")))?;

        let app_name = CString::new(config.application_name.as_str())
            .map_err(|_| AnprError::Config("application name contains NUL".into()))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(1)
            .engine_name(c"anpr")
            .engine_version(1)
            .api_version(vk::API_VERSION_1_1);
        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);

        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(|e| AnprError::InstanceCreation(format!("vkCreateInstance: {e}")))?;

        match Self::open_device(&instance, config) {
            Ok((physical_device, device, queue_family, device_name)) => {
                let queue = unsafe { device.get_device_queue(queue_family, 0) };
                let memory_properties =
                    unsafe { instance.get_physical_device_memory_properties(physical_device) };
                let ahb_properties = Self::load_ahb_properties(&instance, &device);

                tracing::info!(
                    device = %device_name,
                    queue_family,
                    memory_types = memory_properties.memory_type_count,
                    native_import = ahb_properties.is_some(),
                    "Vulkan device ready"
                );

                Ok(Self {
                    _entry: entry,
                    instance,
                    physical_device,
                    device,
                    queue,
                    memory_properties,
                    ahb_properties,
                    device_name,
                })
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn open_device(
        instance: &ash::Instance,
        config: &DeviceConfig,
    ) -> Result<(vk::PhysicalDevice, ash::Device, u32, String)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| AnprError::NoSuitableDevice(format!("enumerating devices: {e}")))?;
        if devices.is_empty() {
            return Err(AnprError::NoSuitableDevice("no Vulkan devices present".into()));
        }

        let mut selected = None;
        for (index, &physical_device) in devices.iter().enumerate() {
            if config.device_ordinal.is_some_and(|want| want != index) {
                continue;
            }
            let properties = unsafe { instance.get_physical_device_properties(physical_device) };
            let name = properties
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|_| format!("device {index}"));
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
            let features = unsafe { instance.get_physical_device_features(physical_device) };

            if is_device_suitable(&families, &features) {
                selected = Some((physical_device, name));
                break;
            }
            tracing::debug!(device = %name, index, "device lacks compute or extended formats");
        }

        let (physical_device, name) = selected.ok_or_else(|| {
            AnprError::NoSuitableDevice(format!(
                "none of {} device(s) has a compute queue with shaderStorageImageExtendedFormats",
                devices.len()
            ))
        })?;

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family = find_compute_queue_family(&families)?;

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities);
        let features = vk::PhysicalDeviceFeatures::default().shader_storage_image_extended_formats(true);
        let extensions: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_info))
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| AnprError::DeviceCreation(format!("vkCreateDevice on {name}: {e}")))?;

        Ok((physical_device, device, queue_family, name))
    }

    fn load_ahb_properties(
        instance: &ash::Instance,
        device: &ash::Device,
    ) -> Option<GetAndroidHardwareBufferPropertiesFn> {
        let fn_ptr = unsafe {
            instance.get_device_proc_addr(
                device.handle(),
                c"vkGetAndroidHardwareBufferPropertiesANDROID".as_ptr(),
            )
        }?;
        // SAFETY: the loader returned the entry point for this exact name,
        // whose signature is fixed by VK_ANDROID_external_memory_android_hardware_buffer.
        Some(unsafe {
            std::mem::transmute::<unsafe extern "system" fn(), GetAndroidHardwareBufferPropertiesFn>(
                fn_ptr,
            )
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn create_error(what: &str, e: vk::Result) -> AnprError {
        AnprError::ResourceCreation(format!("{what}: {e}"))
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!(error = %e, "device wait idle failed during teardown");
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        tracing::debug!(device = %self.device_name, "Vulkan device destroyed");
    }
}

impl GpuDevice for DeviceContext {
    fn compute_queue_family(&self) -> Result<u32> {
        let families = unsafe {
            self.instance
                .get_physical_device_queue_family_properties(self.physical_device)
        };
        find_compute_queue_family(&families)
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| AnprError::DispatchFailed(format!("vkDeviceWaitIdle: {e}")))
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&info, None) }
            .map_err(|e| AnprError::ShaderLoad(format!("vkCreateShaderModule: {e}")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<vk::DescriptorSetLayout> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .map_err(|e| Self::create_error("vkCreateDescriptorSetLayout", e))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        push_constants: vk::PushConstantRange,
    ) -> Result<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(std::slice::from_ref(&set_layout))
            .push_constant_ranges(std::slice::from_ref(&push_constants));
        unsafe { self.device.create_pipeline_layout(&info, None) }
            .map_err(|e| Self::create_error("vkCreatePipelineLayout", e))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_pipeline_cache(&self) -> Result<vk::PipelineCache> {
        let info = vk::PipelineCacheCreateInfo::default();
        unsafe { self.device.create_pipeline_cache(&info, None) }
            .map_err(|e| Self::create_error("vkCreatePipelineCache", e))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) }
    }

    fn create_compute_pipeline(
        &self,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        module: vk::ShaderModule,
        entry_point: &CStr,
    ) -> Result<vk::Pipeline> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(entry_point);
        let info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);
        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(cache, std::slice::from_ref(&info), None)
        }
        .map_err(|(_, e)| Self::create_error("vkCreateComputePipelines", e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| AnprError::ResourceCreation("driver returned no pipeline".into()))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_descriptor_pool(
        &self,
        storage_buffers: u32,
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: storage_buffers,
        }];
        let info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&sizes)
            .max_sets(max_sets);
        unsafe { self.device.create_descriptor_pool(&info, None) }
            .map_err(|e| Self::create_error("vkCreateDescriptorPool", e))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(std::slice::from_ref(&layout));
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }
            .map_err(|e| Self::create_error("vkAllocateDescriptorSets", e))?;
        sets.into_iter()
            .next()
            .ok_or_else(|| AnprError::ResourceCreation("driver returned no descriptor set".into()))
    }

    fn write_storage_buffers(&self, set: vk::DescriptorSet, buffers: &[vk::Buffer]) {
        let infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|&buffer| {
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet<'_>> = infos
            .iter()
            .enumerate()
            .map(|(binding, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) }
    }

    fn create_command_pool(&self, queue_family: u32) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.device.create_command_pool(&info, None) }
            .map_err(|e| Self::create_error("vkCreateCommandPool", e))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        external: bool,
    ) -> Result<vk::Buffer> {
        let mut external_info = vk::ExternalMemoryBufferCreateInfo::default()
            .handle_types(vk::ExternalMemoryHandleTypeFlags::ANDROID_HARDWARE_BUFFER_ANDROID);
        let mut info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        if external {
            info = info.push_next(&mut external_info);
        }
        unsafe { self.device.create_buffer(&info, None) }
            .map_err(|e| Self::create_error("vkCreateBuffer", e))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Option<u32> {
        let props = &self.memory_properties;
        (0..props.memory_type_count).find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> Result<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&info, None) }
            .map_err(|e| Self::create_error("vkAllocateMemory", e))
    }

    fn native_memory_properties(&self, frame: &dyn NativeFrame) -> Result<NativeMemoryProperties> {
        let get_properties = self.ahb_properties.ok_or_else(|| {
            AnprError::Import("device cannot import Android hardware buffers".into())
        })?;
        let handle = frame.handle();
        if handle.is_null() {
            return Err(AnprError::Import("frame has no native buffer handle".into()));
        }

        let mut props = vk::AndroidHardwareBufferPropertiesANDROID::default();
        let rc = unsafe { get_properties(self.device.handle(), handle.as_ptr(), &mut props) };
        if rc != vk::Result::SUCCESS {
            return Err(AnprError::Import(format!(
                "vkGetAndroidHardwareBufferPropertiesANDROID: {rc}"
            )));
        }
        Ok(NativeMemoryProperties {
            allocation_size: props.allocation_size,
            memory_type_bits: props.memory_type_bits,
        })
    }

    fn import_native_memory(
        &self,
        frame: &dyn NativeFrame,
        buffer: vk::Buffer,
        allocation_size: u64,
        memory_type_index: u32,
    ) -> Result<vk::DeviceMemory> {
        let handle = frame.handle();
        if handle.is_null() {
            return Err(AnprError::Import("frame has no native buffer handle".into()));
        }
        let mut import_info =
            vk::ImportAndroidHardwareBufferInfoANDROID::default().buffer(handle.as_ptr().cast());
        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().buffer(buffer);
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(allocation_size)
            .memory_type_index(memory_type_index)
            .push_next(&mut import_info)
            .push_next(&mut dedicated_info);
        unsafe { self.device.allocate_memory(&info, None) }
            .map_err(|e| AnprError::Import(format!("importing native memory: {e}")))
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }
            .map_err(|e| Self::create_error("vkBindBufferMemory", e))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn map_memory(&self, memory: vk::DeviceMemory, size: u64) -> Result<*mut u8> {
        unsafe {
            self.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
        }
        .map(|ptr| ptr.cast::<u8>())
        .map_err(|e| Self::create_error("vkMapMemory", e))
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }
            .map_err(|e| Self::create_error("vkAllocateCommandBuffers", e))?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| AnprError::ResourceCreation("driver returned no command buffer".into()))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(pool, std::slice::from_ref(&command_buffer))
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &info) }
            .map_err(|e| AnprError::DispatchFailed(format!("vkBeginCommandBuffer: {e}")))
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
            .map_err(|e| AnprError::DispatchFailed(format!("vkEndCommandBuffer: {e}")))
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline)
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layout,
                0,
                std::slice::from_ref(&set),
                &[],
            )
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                command_buffer,
                layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                data,
            )
        }
    }

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(command_buffer, x, y, z) }
    }

    fn cmd_host_read_barrier(&self, command_buffer: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            )
        }
    }

    fn create_fence(&self) -> Result<vk::Fence> {
        let info = vk::FenceCreateInfo::default();
        unsafe { self.device.create_fence(&info, None) }
            .map_err(|e| Self::create_error("vkCreateFence", e))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn submit(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> Result<()> {
        let submit = vk::SubmitInfo::default().command_buffers(std::slice::from_ref(&command_buffer));
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), fence)
        }
        .map_err(|e| AnprError::DispatchFailed(format!("vkQueueSubmit: {e}")))
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<FenceStatus> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe {
            self.device
                .wait_for_fences(std::slice::from_ref(&fence), true, timeout_ns)
        } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(AnprError::DispatchFailed(format!("vkWaitForFences: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn compute_family_is_first_with_compute_bit() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        assert_eq!(find_compute_queue_family(&families).unwrap(), 1);
    }

    #[test]
    fn no_compute_family_is_an_error() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(matches!(
            find_compute_queue_family(&families),
            Err(AnprError::NoComputeQueue)
        ));
        assert!(matches!(find_compute_queue_family(&[]), Err(AnprError::NoComputeQueue)));
    }

    #[test]
    fn suitability_needs_compute_and_extended_formats() {
        let compute = [family(vk::QueueFlags::COMPUTE)];
        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        let with = vk::PhysicalDeviceFeatures {
            shader_storage_image_extended_formats: vk::TRUE,
            ..Default::default()
        };
        let without = vk::PhysicalDeviceFeatures::default();

        assert!(is_device_suitable(&compute, &with));
        assert!(!is_device_suitable(&compute, &without));
        assert!(!is_device_suitable(&graphics, &with));
    }

    #[test]
    fn device_config_defaults_from_empty_json() {
        let config: DeviceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.application_name, "anpr");
        assert_eq!(config.device_ordinal, None);
    }
}
