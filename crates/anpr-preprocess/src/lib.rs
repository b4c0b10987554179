pub mod cpu;

pub use cpu::CpuPlaneRotator;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use anpr_core::{Backend, NativeFrame, ProcessedFrame, Result};
use anpr_gpu::{GpuConfig, GpuDevice, GpuPreprocessor, SoftwareDevice};

/// Which backend the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// GPU when it can be brought up, CPU otherwise (and per failed frame).
    #[default]
    Auto,
    Gpu,
    Cpu,
}

/// Device the GPU backend runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuDeviceKind {
    #[default]
    Vulkan,
    /// CPU emulation of the compute path.
    Software,
}

/// Configuration for frame preprocessing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub backend: BackendPreference,
    pub device: GpuDeviceKind,
    pub gpu: GpuConfig,
}

/// A GPU preprocessor with its device type erased.
pub trait GpuBackend: Send + Sync {
    fn process(&self, frame: &dyn NativeFrame) -> Result<ProcessedFrame>;
}

impl<D: GpuDevice> GpuBackend for GpuPreprocessor<D> {
    fn process(&self, frame: &dyn NativeFrame) -> Result<ProcessedFrame> {
        GpuPreprocessor::process(self, frame)
    }
}

/// Turns native camera frames into rotated grayscale buffers, on the GPU
/// when available and on the CPU otherwise.
pub struct FramePreprocessor {
    preference: BackendPreference,
    gpu: Option<Box<dyn GpuBackend>>,
    cpu: CpuPlaneRotator,
}

impl FramePreprocessor {
    /// Bring up the configured backend. With `Auto`, a GPU that cannot be
    /// initialised is logged and the CPU backend is used instead.
    pub fn new(config: &PreprocessConfig) -> Result<Self> {
        if config.backend == BackendPreference::Cpu {
            return Ok(Self::cpu_only());
        }
        let gpu = match config.device {
            GpuDeviceKind::Vulkan => {
                GpuPreprocessor::vulkan(&config.gpu).map(|g| Box::new(g) as Box<dyn GpuBackend>)
            }
            GpuDeviceKind::Software => {
                GpuPreprocessor::new(Arc::new(SoftwareDevice::new()), &config.gpu)
                    .map(|g| Box::new(g) as Box<dyn GpuBackend>)
            }
        };
        Self::with_gpu(config.backend, gpu)
    }

    /// Select a backend given the outcome of building the GPU one.
    pub fn with_gpu(
        preference: BackendPreference,
        gpu: Result<Box<dyn GpuBackend>>,
    ) -> Result<Self> {
        match (preference, gpu) {
            (BackendPreference::Cpu, _) => Ok(Self::cpu_only()),
            (_, Ok(gpu)) => {
                tracing::info!(preference = ?preference, "using GPU frame preprocessing");
                Ok(Self {
                    preference,
                    gpu: Some(gpu),
                    cpu: CpuPlaneRotator::new(),
                })
            }
            (BackendPreference::Gpu, Err(e)) => Err(e),
            (BackendPreference::Auto, Err(e)) => {
                tracing::info!(
                    reason = %e,
                    "GPU frame preprocessing unavailable, falling back to CPU"
                );
                Ok(Self {
                    preference,
                    gpu: None,
                    cpu: CpuPlaneRotator::new(),
                })
            }
        }
    }

    pub fn cpu_only() -> Self {
        tracing::info!("using CPU frame preprocessing");
        Self {
            preference: BackendPreference::Cpu,
            gpu: None,
            cpu: CpuPlaneRotator::new(),
        }
    }

    /// Backend that will be tried first for the next frame.
    pub fn active_backend(&self) -> Backend {
        if self.gpu.is_some() {
            Backend::Gpu
        } else {
            Backend::Cpu
        }
    }

    pub fn preference(&self) -> BackendPreference {
        self.preference
    }

    /// Extract and rotate the luma plane of `frame`.
    ///
    /// The output always holds `width * height` bytes of the source frame; a
    /// backend returning anything else is logged, not rejected.
    pub fn process(&self, frame: &dyn NativeFrame) -> Result<ProcessedFrame> {
        let start = Instant::now();
        let result = match &self.gpu {
            Some(gpu) => match gpu.process(frame) {
                Ok(out) => Ok(out),
                Err(e) if self.preference == BackendPreference::Auto => {
                    tracing::warn!(error = %e, "GPU preprocessing failed, using CPU for this frame");
                    metrics::counter!("anpr_preprocess_fallbacks_total").increment(1);
                    self.cpu.process(frame)
                }
                Err(e) => Err(e),
            },
            None => self.cpu.process(frame),
        };

        match &result {
            Ok(out) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                metrics::counter!("anpr_frames_total", "backend" => out.backend.name()).increment(1);
                metrics::histogram!("anpr_preprocess_latency_ms", "backend" => out.backend.name())
                    .record(elapsed_ms);

                let expected = frame.description().output_len();
                if out.data.len() != expected {
                    tracing::warn!(
                        got = out.data.len(),
                        expected,
                        backend = out.backend.name(),
                        "preprocessed frame size mismatch"
                    );
                }
                tracing::debug!(
                    backend = out.backend.name(),
                    width = out.width,
                    height = out.height,
                    elapsed_ms,
                    "frame preprocessed"
                );
            }
            Err(e) => {
                metrics::counter!("anpr_preprocess_errors_total").increment(1);
                tracing::error!(error = %e, "frame preprocessing failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anpr_core::{AnprError, MemoryFrame};

    struct Failing;

    impl GpuBackend for Failing {
        fn process(&self, _frame: &dyn NativeFrame) -> Result<ProcessedFrame> {
            Err(AnprError::DispatchTimeout { timeout_ms: 10 })
        }
    }

    /// Returns a truncated buffer, as a misbehaving backend might.
    struct Short;

    impl GpuBackend for Short {
        fn process(&self, _frame: &dyn NativeFrame) -> Result<ProcessedFrame> {
            Ok(ProcessedFrame {
                data: vec![0; 3],
                width: 2,
                height: 4,
                backend: Backend::Gpu,
            })
        }
    }

    fn frame() -> MemoryFrame {
        MemoryFrame::from_luma(4, 2, 4, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap()
    }

    #[test]
    fn auto_falls_back_when_gpu_unavailable() {
        let pre = FramePreprocessor::with_gpu(
            BackendPreference::Auto,
            Err(AnprError::NoSuitableDevice("none".into())),
        )
        .unwrap();
        assert_eq!(pre.active_backend(), Backend::Cpu);
        assert_eq!(pre.process(&frame()).unwrap().data, vec![5, 1, 6, 2, 7, 3, 8, 4]);
    }

    #[test]
    fn forced_gpu_surfaces_init_error() {
        let err = FramePreprocessor::with_gpu(
            BackendPreference::Gpu,
            Err(AnprError::ShaderLoad("missing".into())),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AnprError::ShaderLoad(_)));
    }

    #[test]
    fn auto_falls_back_per_frame() {
        let pre = FramePreprocessor::with_gpu(BackendPreference::Auto, Ok(Box::new(Failing))).unwrap();
        assert_eq!(pre.active_backend(), Backend::Gpu);
        let out = pre.process(&frame()).unwrap();
        assert_eq!(out.backend, Backend::Cpu);
        assert_eq!(out.data, vec![5, 1, 6, 2, 7, 3, 8, 4]);
    }

    #[test]
    fn forced_gpu_surfaces_frame_error() {
        let pre = FramePreprocessor::with_gpu(BackendPreference::Gpu, Ok(Box::new(Failing))).unwrap();
        assert!(matches!(
            pre.process(&frame()),
            Err(AnprError::DispatchTimeout { timeout_ms: 10 })
        ));
    }

    #[test]
    fn size_mismatch_is_returned_anyway() {
        let pre = FramePreprocessor::with_gpu(BackendPreference::Gpu, Ok(Box::new(Short))).unwrap();
        assert_eq!(pre.process(&frame()).unwrap().data.len(), 3);
    }

    #[test]
    fn cpu_preference_never_touches_gpu() {
        let pre = FramePreprocessor::with_gpu(BackendPreference::Cpu, Ok(Box::new(Failing))).unwrap();
        assert_eq!(pre.active_backend(), Backend::Cpu);
        assert_eq!(pre.process(&frame()).unwrap().backend, Backend::Cpu);
    }

    #[test]
    fn config_parses_lowercase_names() {
        let config: PreprocessConfig =
            serde_json::from_str(r#"{"backend":"gpu","device":"software"}"#).unwrap();
        assert_eq!(config.backend, BackendPreference::Gpu);
        assert_eq!(config.device, GpuDeviceKind::Software);
        assert_eq!(config.gpu.dispatch_timeout_ms, 10_000);
    }
}
