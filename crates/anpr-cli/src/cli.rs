use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use anpr_core::{AnprError, MemoryFrame, RecognitionResult, Result};
use anpr_preprocess::{BackendPreference, GpuDeviceKind};

#[derive(Parser)]
#[command(name = "anpr", about = "Frame preprocessing and plate recognition tools")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to plugin config file (JSON).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Preprocessing backend, overriding the config file.
    #[arg(long, global = true)]
    pub backend: Option<BackendArg>,

    /// Run the GPU path on the software device instead of Vulkan.
    #[arg(long, global = true)]
    pub software: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring up the GPU and report what was found.
    Probe,
    /// Write the bundled compute shader to disk.
    StageShader {
        /// Destination; defaults to the configured shader path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rotate a raw 8-bit luma frame and write the result.
    Rotate {
        #[command(flatten)]
        frame: FrameArgs,
        /// Output file for the rotated plane.
        #[arg(long, short)]
        output: PathBuf,
    },
    /// Preprocess a raw luma frame and run plate recognition on it.
    Recognize {
        #[command(flatten)]
        frame: FrameArgs,
        /// Recognition country.
        #[arg(long, default_value = "eu")]
        country: String,
        /// Maximum candidates per plate (0 keeps the engine default).
        #[arg(long, default_value = "0")]
        top_n: u32,
        /// Default region pattern.
        #[arg(long, default_value = "")]
        region: String,
        /// Output format.
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(Args)]
pub struct FrameArgs {
    /// Raw luma plane, `stride * height` bytes.
    #[arg(required = true)]
    pub input: PathBuf,
    #[arg(long)]
    pub width: u32,
    #[arg(long)]
    pub height: u32,
    /// Row stride in bytes; defaults to the width.
    #[arg(long)]
    pub stride: Option<u32>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum BackendArg {
    Auto,
    Gpu,
    Cpu,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Gpu => BackendPreference::Gpu,
            BackendArg::Cpu => BackendPreference::Cpu,
        }
    }
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

impl Cli {
    pub fn device_kind(&self) -> Option<GpuDeviceKind> {
        self.software.then_some(GpuDeviceKind::Software)
    }
}

/// Read a raw luma file into a frame.
pub fn load_frame(args: &FrameArgs) -> Result<MemoryFrame> {
    let stride = args.stride.unwrap_or(args.width);
    let luma = std::fs::read(&args.input)?;
    let expected = stride as usize * args.height as usize;
    if luma.len() < expected {
        return Err(AnprError::InvalidInput(format!(
            "{}: {} bytes, {}x{} at stride {stride} needs {expected}",
            args.input.display(),
            luma.len(),
            args.width,
            args.height
        )));
    }
    MemoryFrame::from_luma(args.width, args.height, stride, luma)
}

pub fn write_plane(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

/// Print a recognition result in the requested format.
pub fn print_result(json: &str, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{json}"),
        OutputFormat::Text => {
            let result = RecognitionResult::from_json(json)?;
            if result.results.is_empty() {
                println!("no plates");
            }
            for plate in &result.results {
                println!("{}\t{:.1}", plate.plate, plate.confidence);
            }
            eprintln!(
                "\n[{}x{} | {:.1}ms]",
                result.img_width, result.img_height, result.processing_time_ms
            );
        }
    }
    Ok(())
}
