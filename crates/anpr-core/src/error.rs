use thiserror::Error;

/// Top-level error type for the frame preprocessing engine.
#[derive(Debug, Error)]
pub enum AnprError {
    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(String),

    #[error("no compute-capable queue family on the selected device")]
    NoComputeQueue,

    #[error("Vulkan instance creation failed: {0}")]
    InstanceCreation(String),

    #[error("Vulkan device creation failed: {0}")]
    DeviceCreation(String),

    #[error("GPU resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("native buffer import failed: {0}")]
    Import(String),

    #[error("shader load error: {0}")]
    ShaderLoad(String),

    #[error("compute dispatch failed: {0}")]
    DispatchFailed(String),

    #[error("compute dispatch did not complete within {timeout_ms} ms")]
    DispatchTimeout { timeout_ms: u64 },

    #[error("failed to lock native buffer planes: {0}")]
    Lock(String),

    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnprError {
    /// True for failures that mean the GPU backend can never be used in this
    /// process (as opposed to a single frame failing).
    pub fn is_device_selection(&self) -> bool {
        matches!(
            self,
            AnprError::NoSuitableDevice(_)
                | AnprError::NoComputeQueue
                | AnprError::InstanceCreation(_)
                | AnprError::DeviceCreation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AnprError>;
