//! Host-facing plugin layer: configuration, the shared context and the
//! command table the host runtime calls into.

pub mod commands;
pub mod config;
pub mod context;

pub use commands::{Command, CommandTable, HostValue, Installation, Reply, COMMANDS};
pub use config::PluginConfig;
pub use context::{Initialization, PluginContext, RecognizerFactory};
