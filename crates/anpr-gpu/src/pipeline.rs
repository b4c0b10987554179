use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};

use anpr_core::{AnprError, Result};

use crate::device::GpuDevice;

/// Storage-buffer bindings: luma, Cb, Cr, output.
pub const BINDING_COUNT: u32 = 4;

const ENTRY_POINT: &std::ffi::CStr = c"main";
const SPIRV_MAGIC: u32 = 0x0723_0203;

const EMBEDDED_LUMA_ROTATE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/luma_rotate.spv"));

/// Push-constant block of the luma-rotate shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FrameConstants {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl FrameConstants {
    pub const SIZE: u32 = std::mem::size_of::<FrameConstants>() as u32;

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// The luma-rotate SPIR-V compiled into this crate by `build.rs`.
pub struct ShaderAsset;

impl ShaderAsset {
    /// Embedded SPIR-V, or `None` when the build had no shader compiler.
    pub fn embedded() -> Option<&'static [u8]> {
        let magic = EMBEDDED_LUMA_ROTATE
            .get(..4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        (magic == Some(SPIRV_MAGIC)).then_some(EMBEDDED_LUMA_ROTATE)
    }

    /// Write the embedded shader to `path`, creating parent directories.
    pub fn stage(path: &Path) -> Result<()> {
        let spirv = Self::embedded().ok_or_else(|| {
            AnprError::ShaderLoad("this build carries no compiled shader (glslc was unavailable)".into())
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, spirv)?;
        tracing::info!(path = %path.display(), bytes = spirv.len(), "staged compute shader");
        Ok(())
    }
}

/// Read and validate a SPIR-V file. Fails with `ShaderLoad` on a missing,
/// unreadable or malformed file.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| AnprError::ShaderLoad(format!("{}: {e}", path.display())))?;
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| AnprError::ShaderLoad(format!("{}: invalid SPIR-V: {e}", path.display())))
}

/// Descriptor-set layout, pipeline layout, pipeline cache and the compute
/// pipeline. Handles left null were never created; drop destroys the rest.
pub struct ComputePipeline<D: GpuDevice> {
    device: Arc<D>,
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    cache: vk::PipelineCache,
    pipeline: vk::Pipeline,
}

impl<D: GpuDevice> ComputePipeline<D> {
    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }
}

impl<D: GpuDevice> Drop for ComputePipeline<D> {
    fn drop(&mut self) {
        if self.pipeline != vk::Pipeline::null() {
            self.device.destroy_pipeline(self.pipeline);
        }
        if self.cache != vk::PipelineCache::null() {
            self.device.destroy_pipeline_cache(self.cache);
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(self.pipeline_layout);
        }
        if self.set_layout != vk::DescriptorSetLayout::null() {
            self.device.destroy_descriptor_set_layout(self.set_layout);
        }
    }
}

/// Shader module owned only while the pipeline is being built.
struct ShaderModule<'a, D: GpuDevice> {
    device: &'a D,
    module: vk::ShaderModule,
}

impl<D: GpuDevice> Drop for ShaderModule<'_, D> {
    fn drop(&mut self) {
        self.device.destroy_shader_module(self.module);
    }
}

pub struct PipelineFactory<D: GpuDevice> {
    device: Arc<D>,
}

impl<D: GpuDevice> PipelineFactory<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }

    /// Build the luma-rotate pipeline from the SPIR-V at `shader_path`.
    ///
    /// The shader is read before any GPU object exists, so a missing file
    /// leaves nothing behind.
    pub fn build(&self, shader_path: &Path) -> Result<ComputePipeline<D>> {
        let code = load_spirv(shader_path)?;
        tracing::debug!(
            path = %shader_path.display(),
            words = code.len(),
            "loaded compute shader"
        );

        let mut out = ComputePipeline {
            device: self.device.clone(),
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            cache: vk::PipelineCache::null(),
            pipeline: vk::Pipeline::null(),
        };

        let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = (0..BINDING_COUNT)
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        out.set_layout = self.device.create_descriptor_set_layout(&bindings)?;

        let push_constants = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(FrameConstants::SIZE);
        out.pipeline_layout = self
            .device
            .create_pipeline_layout(out.set_layout, push_constants)?;

        // Not persisted between runs.
        out.cache = self.device.create_pipeline_cache()?;

        let module = ShaderModule {
            device: self.device.as_ref(),
            module: self.device.create_shader_module(&code)?,
        };
        out.pipeline = self.device.create_compute_pipeline(
            out.cache,
            out.pipeline_layout,
            module.module,
            ENTRY_POINT,
        )?;
        drop(module);

        tracing::info!("compute pipeline ready");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_block_is_twelve_bytes() {
        assert_eq!(FrameConstants::SIZE, 12);
        let c = FrameConstants { width: 1, height: 2, stride: 3 };
        assert_eq!(c.as_bytes(), &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn missing_shader_is_shader_load() {
        let err = load_spirv(Path::new("/nonexistent/compute.spv")).unwrap_err();
        assert!(matches!(err, AnprError::ShaderLoad(_)));
    }

    #[test]
    fn garbage_shader_is_shader_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compute.spv");
        std::fs::write(&path, b"not spirv").unwrap();
        assert!(matches!(load_spirv(&path), Err(AnprError::ShaderLoad(_))));
    }

    #[test]
    fn staging_matches_embedded_asset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files/shaders/compute.spv");
        match ShaderAsset::embedded() {
            Some(spirv) => {
                ShaderAsset::stage(&path).unwrap();
                assert_eq!(std::fs::read(&path).unwrap(), spirv);
                assert!(load_spirv(&path).is_ok());
            }
            None => {
                assert!(matches!(ShaderAsset::stage(&path), Err(AnprError::ShaderLoad(_))));
                assert!(!path.exists());
            }
        }
    }
}
