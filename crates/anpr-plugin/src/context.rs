use std::sync::Arc;

use parking_lot::Mutex;

use anpr_core::{AnprError, NativeFrame, Result};
use anpr_gpu::ShaderAsset;
use anpr_preprocess::FramePreprocessor;
use anpr_recognize::{OpenAlpr, PlateRecognizer, RecognizerConfig, RecognizerSettings};

use crate::config::PluginConfig;

/// Builds the recognition engine on first initialisation.
pub type RecognizerFactory = Box<
    dyn Fn(&RecognizerConfig, &RecognizerSettings) -> Result<Box<dyn PlateRecognizer>>
        + Send
        + Sync,
>;

/// Outcome of [`PluginContext::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    Created,
    AlreadyInitialized,
}

/// State shared by every plugin command: configuration, the frame
/// preprocessor and the recognition engine. Both are created lazily, at most
/// once.
pub struct PluginContext {
    config: PluginConfig,
    factory: RecognizerFactory,
    preprocessor: Mutex<Option<Arc<FramePreprocessor>>>,
    recognizer: Mutex<Option<Box<dyn PlateRecognizer>>>,
}

impl PluginContext {
    /// Context backed by the OpenALPR library named in `config`.
    pub fn new(config: PluginConfig) -> Self {
        Self::with_recognizer_factory(
            config,
            Box::new(|config: &RecognizerConfig, settings: &RecognizerSettings| {
                let engine = OpenAlpr::new(config, &settings.country)?;
                Ok(Box::new(engine) as Box<dyn PlateRecognizer>)
            }),
        )
    }

    pub fn with_recognizer_factory(config: PluginConfig, factory: RecognizerFactory) -> Self {
        Self {
            config,
            factory,
            preprocessor: Mutex::new(None),
            recognizer: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Write the bundled shader to the configured path unless one is
    /// already there.
    pub fn stage_shader(&self) -> Result<()> {
        let path = self.config.preprocess.gpu.checked_shader_path()?;
        if path.exists() {
            tracing::debug!(path = %path.display(), "shader already staged");
            return Ok(());
        }
        ShaderAsset::stage(path)
    }

    /// Create the recognition engine. A second call leaves the existing
    /// engine untouched.
    pub fn initialize(&self, settings: &RecognizerSettings) -> Result<Initialization> {
        let mut slot = self.recognizer.lock();
        if slot.is_some() {
            tracing::info!(country = %settings.country, "recognizer already initialized");
            return Ok(Initialization::AlreadyInitialized);
        }

        tracing::info!(
            country = %settings.country,
            top_n = settings.top_n,
            region = %settings.default_region,
            "initializing recognizer"
        );
        let mut engine = (self.factory)(&self.config.recognizer, settings)?;
        settings.apply(engine.as_mut())?;
        if !engine.is_loaded() {
            tracing::error!("recognizer created but not loaded");
        }
        *slot = Some(engine);
        Ok(Initialization::Created)
    }

    pub fn is_initialized(&self) -> bool {
        self.recognizer.lock().is_some()
    }

    /// Run `f` against the engine, or fail with `NotInitialized`.
    pub fn with_recognizer<T>(
        &self,
        f: impl FnOnce(&mut dyn PlateRecognizer) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.recognizer.lock();
        let engine = slot.as_mut().ok_or(AnprError::NotInitialized("OpenALPR"))?;
        f(engine.as_mut())
    }

    /// The frame preprocessor, built on first use. A failed build is not
    /// cached; the next call tries again.
    pub fn preprocessor(&self) -> Result<Arc<FramePreprocessor>> {
        let mut slot = self.preprocessor.lock();
        if let Some(pre) = slot.as_ref() {
            return Ok(Arc::clone(pre));
        }
        let pre = Arc::new(FramePreprocessor::new(&self.config.preprocess)?);
        *slot = Some(Arc::clone(&pre));
        Ok(pre)
    }

    /// Preprocess `frame` and recognise plates in the rotated grayscale
    /// image. Returns the engine's JSON.
    pub fn recognise_frame(&self, frame: &dyn NativeFrame) -> Result<String> {
        if !self.is_initialized() {
            return Err(AnprError::NotInitialized("OpenALPR"));
        }
        let processed = self.preprocessor()?.process(frame)?;
        tracing::debug!(
            width = processed.width,
            height = processed.height,
            backend = processed.backend.name(),
            "recognizing"
        );
        self.with_recognizer(|engine| {
            engine.recognize(&processed.data, 1, processed.width, processed.height)
        })
    }
}
