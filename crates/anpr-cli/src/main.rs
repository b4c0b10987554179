use clap::Parser;
use tracing_subscriber::EnvFilter;

use anpr_gpu::{DeviceContext, GpuDevice, ShaderAsset};
use anpr_plugin::{PluginConfig, PluginContext};
use anpr_preprocess::FramePreprocessor;
use anpr_recognize::RecognizerSettings;

mod cli;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("anpr v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => PluginConfig::load(path)?,
        None => PluginConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.preprocess.backend = backend.into();
    }
    if let Some(kind) = cli.device_kind() {
        config.preprocess.device = kind;
    }

    match cli.command {
        Command::Probe => probe(&config)?,
        Command::StageShader { output } => {
            let path = match output {
                Some(path) => path,
                None => config.preprocess.gpu.checked_shader_path()?.to_path_buf(),
            };
            ShaderAsset::stage(&path)?;
            println!("{}", path.display());
        }
        Command::Rotate { frame, output } => {
            let input = cli::load_frame(&frame)?;
            let preprocessor = FramePreprocessor::new(&config.preprocess)?;
            let processed = preprocessor.process(&input)?;
            cli::write_plane(&output, &processed.data)?;
            eprintln!(
                "{}x{} -> {}x{} via {}",
                frame.width,
                frame.height,
                processed.width,
                processed.height,
                processed.backend.name()
            );
        }
        Command::Recognize {
            frame,
            country,
            top_n,
            region,
            format,
        } => {
            let input = cli::load_frame(&frame)?;
            let context = PluginContext::new(config);
            context.initialize(&RecognizerSettings {
                country,
                top_n,
                default_region: region,
            })?;
            let json = context.recognise_frame(&input)?;
            cli::print_result(&json, &format)?;
        }
    }

    Ok(())
}

fn probe(config: &PluginConfig) -> anyhow::Result<()> {
    let gpu = &config.preprocess.gpu;
    match DeviceContext::initialize(&gpu.device) {
        Ok(device) => {
            println!("device: {}", device.device_name());
            println!("compute queue family: {}", device.compute_queue_family()?);
        }
        Err(e) => println!("device: unavailable ({e})"),
    }

    let shader = &gpu.shader_path;
    println!(
        "shader: {} ({})",
        shader.display(),
        if shader.exists() { "present" } else { "missing" }
    );
    println!(
        "embedded shader: {}",
        if ShaderAsset::embedded().is_some() { "yes" } else { "no" }
    );

    let preprocessor = FramePreprocessor::new(&config.preprocess)?;
    println!(
        "backend: {} (preference {:?})",
        preprocessor.active_backend().name(),
        preprocessor.preference()
    );
    Ok(())
}
