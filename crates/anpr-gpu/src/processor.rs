use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::vk;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use anpr_core::{AnprError, Backend, NativeFrame, ProcessedFrame, Result};

use crate::buffer::DeviceBuffer;
use crate::context::{DeviceConfig, DeviceContext};
use crate::device::GpuDevice;
use crate::dispatch::{DispatchExecutor, DEFAULT_DISPATCH_TIMEOUT};
use crate::import::BufferImporter;
use crate::pipeline::{ComputePipeline, PipelineFactory, BINDING_COUNT};
use crate::retrieve::ResultRetriever;

/// Configuration for the GPU backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub device: DeviceConfig,
    /// Absolute path of the compiled luma-rotate shader. Unset by default;
    /// the host points it at its install location.
    pub shader_path: PathBuf,
    /// Upper bound on one dispatch, in milliseconds.
    pub dispatch_timeout_ms: u64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            shader_path: PathBuf::new(),
            dispatch_timeout_ms: DEFAULT_DISPATCH_TIMEOUT.as_millis() as u64,
        }
    }
}

impl GpuConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// The configured shader path. Fails with `ShaderLoad` when it is unset
    /// or relative; nothing is resolved against the working directory.
    pub fn checked_shader_path(&self) -> Result<&Path> {
        let path = self.shader_path.as_path();
        if path.as_os_str().is_empty() {
            return Err(AnprError::ShaderLoad("no shader path configured".into()));
        }
        if !path.is_absolute() {
            return Err(AnprError::ShaderLoad(format!(
                "shader path {} is not absolute",
                path.display()
            )));
        }
        Ok(path)
    }
}

/// Descriptor pool sized for one set of four storage buffers, and that set.
/// The set is rewritten on every call.
pub struct DescriptorArena<D: GpuDevice> {
    device: Arc<D>,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
}

impl<D: GpuDevice> DescriptorArena<D> {
    pub fn new(device: Arc<D>, layout: vk::DescriptorSetLayout) -> Result<Self> {
        let pool = device.create_descriptor_pool(BINDING_COUNT, 1)?;
        let mut arena = Self {
            device,
            pool,
            set: vk::DescriptorSet::null(),
        };
        arena.set = arena.device.allocate_descriptor_set(pool, layout)?;
        Ok(arena)
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Point bindings 0..=3 at luma, Cb, Cr and the output buffer.
    pub fn bind(&self, buffers: &[vk::Buffer; 4]) {
        self.device.write_storage_buffers(self.set, buffers);
    }
}

impl<D: GpuDevice> Drop for DescriptorArena<D> {
    fn drop(&mut self) {
        self.device.destroy_descriptor_pool(self.pool);
    }
}

/// Long-lived GPU objects, created together and reused across frames.
///
/// Fields drop in declaration order, which is the reverse of creation order;
/// the device is idled first.
pub struct GpuResourceSet<D: GpuDevice> {
    descriptors: DescriptorArena<D>,
    executor: DispatchExecutor<D>,
    pipeline: ComputePipeline<D>,
    device: Arc<D>,
}

impl<D: GpuDevice> GpuResourceSet<D> {
    /// Build every object or none: anything created before a failure is
    /// released by its own guard.
    pub fn new(device: Arc<D>, config: &GpuConfig) -> Result<Self> {
        let shader_path = config.checked_shader_path()?;
        let pipeline = PipelineFactory::new(device.clone()).build(shader_path)?;
        let executor = DispatchExecutor::new(device.clone(), config.dispatch_timeout())?;
        let descriptors = DescriptorArena::new(device.clone(), pipeline.set_layout())?;

        tracing::info!(
            shader = %shader_path.display(),
            timeout_ms = config.dispatch_timeout_ms,
            "GPU resources ready"
        );
        Ok(Self {
            descriptors,
            executor,
            pipeline,
            device,
        })
    }
}

impl<D: GpuDevice> Drop for GpuResourceSet<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!(error = %e, "device idle before teardown failed");
        }
        tracing::debug!("releasing GPU resources");
    }
}

/// Zero-copy GPU backend: import, dispatch, read back.
///
/// Calls are serialised; the resource set has one queue, one command pool and
/// one descriptor set.
pub struct GpuPreprocessor<D: GpuDevice> {
    resources: GpuResourceSet<D>,
    importer: BufferImporter<D>,
    retriever: ResultRetriever<D>,
    device: Arc<D>,
    call_lock: Mutex<()>,
}

impl GpuPreprocessor<DeviceContext> {
    /// Open the Vulkan device described by `config` and build the pipeline.
    pub fn vulkan(config: &GpuConfig) -> Result<Self> {
        config.checked_shader_path()?;
        let device = Arc::new(DeviceContext::initialize(&config.device)?);
        Self::new(device, config)
    }
}

impl<D: GpuDevice> GpuPreprocessor<D> {
    pub fn new(device: Arc<D>, config: &GpuConfig) -> Result<Self> {
        let resources = GpuResourceSet::new(device.clone(), config)?;
        Ok(Self {
            resources,
            importer: BufferImporter::new(device.clone()),
            retriever: ResultRetriever::new(device.clone()),
            device,
            call_lock: Mutex::new(()),
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Extract and rotate the luma plane of `frame` on the GPU.
    ///
    /// Imported planes and the output buffer are released before this
    /// returns, on success and on every error.
    pub fn process(&self, frame: &dyn NativeFrame) -> Result<ProcessedFrame> {
        let _serial = self.call_lock.lock();

        let desc = frame.description();
        desc.validate()?;
        if let Some(orientation) = frame.orientation() {
            tracing::debug!(orientation, "frame orientation (not applied)");
        }
        let start = Instant::now();

        tracing::trace!(
            width = desc.width,
            height = desc.height,
            stride = desc.row_stride,
            "importing"
        );
        let planes = self.importer.import_planes(frame)?;
        let output = DeviceBuffer::host_visible(self.device.clone(), desc.output_len() as u64)?;

        let [luma, cb, cr] = planes.buffers();
        self.resources
            .descriptors
            .bind(&[luma, cb, cr, output.buffer()]);

        tracing::trace!("dispatching");
        self.resources.executor.dispatch(
            &self.resources.pipeline,
            self.resources.descriptors.set(),
            desc.width,
            desc.height,
            desc.row_stride,
        )?;

        tracing::trace!("retrieving");
        let data = self.retriever.retrieve(&output, desc.width, desc.height)?;
        drop(output);
        drop(planes);

        tracing::debug!(
            width = desc.width,
            height = desc.height,
            elapsed_us = start.elapsed().as_micros() as u64,
            "GPU preprocess done"
        );
        Ok(ProcessedFrame {
            data,
            width: desc.height,
            height: desc.width,
            backend: Backend::Gpu,
        })
    }
}
