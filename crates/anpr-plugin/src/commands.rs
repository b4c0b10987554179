//! The host-facing command surface.
//!
//! The host runtime calls commands by name with loosely typed arguments.
//! [`Command::parse`] checks them and produces a typed command;
//! [`CommandTable::execute`] runs it against the shared [`PluginContext`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anpr_core::{AnprError, NativeFrame, Result};
use anpr_recognize::RecognizerSettings;

use crate::context::PluginContext;

pub const INITIALIZE_ANPR: &str = "initializeANPR";
pub const SET_TOP_N: &str = "setTopN";
pub const SET_COUNTRY: &str = "setCountry";
pub const SET_PREWARP: &str = "setPrewarp";
pub const SET_MASK: &str = "setMask";
pub const SET_DETECT_REGION: &str = "setDetectRegion";
pub const SET_DEFAULT_REGION: &str = "setDefaultRegion";
pub const RECOGNISE_FRAME: &str = "recogniseFrame";

/// Every command the table registers, in registration order.
pub const COMMANDS: [&str; 8] = [
    INITIALIZE_ANPR,
    SET_TOP_N,
    SET_COUNTRY,
    SET_PREWARP,
    SET_MASK,
    SET_DETECT_REGION,
    SET_DEFAULT_REGION,
    RECOGNISE_FRAME,
];

/// An argument as passed by the host runtime.
#[derive(Clone, Copy)]
pub enum HostValue<'a> {
    Undefined,
    Bool(bool),
    Number(f64),
    String(&'a str),
    Bytes(&'a [u8]),
    Frame(&'a dyn NativeFrame),
}

impl HostValue<'_> {
    fn kind(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Bool(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Bytes(_) => "bytes",
            HostValue::Frame(_) => "frame",
        }
    }
}

impl fmt::Debug for HostValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Bool(v) => write!(f, "Bool({v})"),
            HostValue::Number(v) => write!(f, "Number({v})"),
            HostValue::String(v) => write!(f, "String({v:?})"),
            HostValue::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            HostValue::Frame(frame) => write!(f, "Frame({:?})", frame.description()),
            HostValue::Undefined => f.write_str("Undefined"),
        }
    }
}

/// A validated plugin command.
pub enum Command<'a> {
    InitializeAnpr(RecognizerSettings),
    SetTopN(u32),
    SetCountry(&'a str),
    SetPrewarp(&'a str),
    SetMask {
        pixels: &'a [u8],
        bytes_per_pixel: u32,
        width: u32,
        height: u32,
    },
    SetDetectRegion(bool),
    SetDefaultRegion(&'a str),
    RecogniseFrame(&'a dyn NativeFrame),
}

fn invalid(message: &str) -> AnprError {
    AnprError::InvalidInput(message.into())
}

/// Host numbers are doubles; counts and dimensions must be non-negative
/// integers that fit in 32 bits. Fractions are truncated.
fn as_count(value: f64) -> Option<u32> {
    (value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX)).then(|| value as u32)
}

impl<'a> Command<'a> {
    /// Validate the arguments of the command called `name`.
    pub fn parse(name: &str, args: &[HostValue<'a>]) -> Result<Self> {
        use HostValue as V;

        let arg = |i: usize| args.get(i).copied().unwrap_or(V::Undefined);
        let string = |message: &str| match arg(0) {
            V::String(s) => Ok(s),
            _ => Err(invalid(message)),
        };

        match name {
            INITIALIZE_ANPR => {
                let V::String(country) = arg(0) else {
                    return Err(invalid("Invalid arguments"));
                };
                // Optional arguments of the wrong type are ignored.
                let top_n = match arg(1) {
                    V::Number(n) => as_count(n).unwrap_or(0),
                    _ => 0,
                };
                let default_region = match arg(2) {
                    V::String(s) => s.to_string(),
                    _ => String::new(),
                };
                Ok(Command::InitializeAnpr(RecognizerSettings {
                    country: country.to_string(),
                    top_n,
                    default_region,
                }))
            }
            SET_TOP_N => match arg(0) {
                V::Number(n) => as_count(n)
                    .map(Command::SetTopN)
                    .ok_or_else(|| invalid("TopN value must be a non-negative number")),
                _ => Err(invalid("TopN value must be a number")),
            },
            SET_COUNTRY => string("Country value must be a string").map(Command::SetCountry),
            SET_PREWARP => string("Prewarp value must be a string").map(Command::SetPrewarp),
            SET_MASK => match (arg(0), arg(1), arg(2), arg(3)) {
                (V::Bytes(pixels), V::Number(bpp), V::Number(w), V::Number(h)) => {
                    match (as_count(bpp), as_count(w), as_count(h)) {
                        (Some(bytes_per_pixel), Some(width), Some(height)) => Ok(Command::SetMask {
                            pixels,
                            bytes_per_pixel,
                            width,
                            height,
                        }),
                        _ => Err(invalid("Invalid arguments for setMask")),
                    }
                }
                _ => Err(invalid("Invalid arguments for setMask")),
            },
            SET_DETECT_REGION => match arg(0) {
                V::Bool(b) => Ok(Command::SetDetectRegion(b)),
                _ => Err(invalid("DetectRegion value must be a boolean")),
            },
            SET_DEFAULT_REGION => {
                string("DefaultRegion value must be a string").map(Command::SetDefaultRegion)
            }
            RECOGNISE_FRAME => match arg(0) {
                V::Frame(frame) => Ok(Command::RecogniseFrame(frame)),
                other => Err(AnprError::InvalidInput(format!(
                    "Invalid arguments: expected a frame, got {}",
                    other.kind()
                ))),
            },
            _ => Err(AnprError::InvalidInput(format!("unknown command '{name}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::InitializeAnpr(_) => INITIALIZE_ANPR,
            Command::SetTopN(_) => SET_TOP_N,
            Command::SetCountry(_) => SET_COUNTRY,
            Command::SetPrewarp(_) => SET_PREWARP,
            Command::SetMask { .. } => SET_MASK,
            Command::SetDetectRegion(_) => SET_DETECT_REGION,
            Command::SetDefaultRegion(_) => SET_DEFAULT_REGION,
            Command::RecogniseFrame(_) => RECOGNISE_FRAME,
        }
    }
}

/// What a command hands back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Undefined,
    /// Recognition result as a JSON string.
    Json(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installation {
    Installed,
    AlreadyInstalled,
}

/// The set of commands exposed to the host, bound to one context.
pub struct CommandTable {
    context: Arc<PluginContext>,
    installed: AtomicBool,
}

impl CommandTable {
    pub fn new(context: Arc<PluginContext>) -> Self {
        Self {
            context,
            installed: AtomicBool::new(false),
        }
    }

    /// Register the commands. Only the first call does anything.
    pub fn install(&self) -> Installation {
        if self.installed.swap(true, Ordering::AcqRel) {
            tracing::info!("plugin already installed");
            return Installation::AlreadyInstalled;
        }
        tracing::info!(commands = ?COMMANDS, "plugin installed");
        Installation::Installed
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &Arc<PluginContext> {
        &self.context
    }

    /// Parse and run a command called by name from the host.
    pub fn call(&self, name: &str, args: &[HostValue<'_>]) -> Result<Reply> {
        if !self.is_installed() {
            return Err(AnprError::NotInitialized("ANPR plugin"));
        }
        let command = Command::parse(name, args).inspect_err(|e| {
            tracing::error!(command = name, error = %e, "rejected command arguments");
        })?;
        self.execute(command)
    }

    pub fn execute(&self, command: Command<'_>) -> Result<Reply> {
        let name = command.name();
        let ctx = &self.context;
        let result = match command {
            Command::InitializeAnpr(settings) => ctx.initialize(&settings).map(|_| Reply::Undefined),
            Command::SetTopN(top_n) => ctx
                .with_recognizer(|engine| engine.set_top_n(top_n))
                .map(|()| Reply::Undefined),
            Command::SetCountry(country) => ctx
                .with_recognizer(|engine| engine.set_country(country))
                .map(|()| Reply::Undefined),
            Command::SetPrewarp(prewarp) => ctx
                .with_recognizer(|engine| engine.set_prewarp(prewarp))
                .map(|()| Reply::Undefined),
            Command::SetMask {
                pixels,
                bytes_per_pixel,
                width,
                height,
            } => ctx
                .with_recognizer(|engine| engine.set_mask(pixels, bytes_per_pixel, width, height))
                .map(|()| Reply::Undefined),
            Command::SetDetectRegion(detect) => ctx
                .with_recognizer(|engine| engine.set_detect_region(detect))
                .map(|()| Reply::Undefined),
            Command::SetDefaultRegion(region) => ctx
                .with_recognizer(|engine| engine.set_default_region(region))
                .map(|()| Reply::Undefined),
            Command::RecogniseFrame(frame) => ctx.recognise_frame(frame).map(Reply::Json),
        };
        if let Err(e) = &result {
            tracing::error!(command = name, error = %e, "command failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anpr_core::MemoryFrame;

    #[test]
    fn initialize_takes_optional_top_n_and_region() {
        let Command::InitializeAnpr(s) = Command::parse(INITIALIZE_ANPR, &[HostValue::String("eu")]).unwrap()
        else {
            panic!("wrong command");
        };
        assert_eq!((s.country.as_str(), s.top_n, s.default_region.as_str()), ("eu", 0, ""));

        let args = [HostValue::String("us"), HostValue::Number(3.0), HostValue::String("md")];
        let Command::InitializeAnpr(s) = Command::parse(INITIALIZE_ANPR, &args).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!((s.country.as_str(), s.top_n, s.default_region.as_str()), ("us", 3, "md"));

        // Wrong-typed optionals are ignored, a missing country is not.
        let args = [HostValue::String("eu"), HostValue::String("3"), HostValue::Number(1.0)];
        let Command::InitializeAnpr(s) = Command::parse(INITIALIZE_ANPR, &args).unwrap() else {
            panic!("wrong command");
        };
        assert_eq!((s.top_n, s.default_region.as_str()), (0, ""));
        assert!(Command::parse(INITIALIZE_ANPR, &[]).is_err());
        assert!(Command::parse(INITIALIZE_ANPR, &[HostValue::Number(1.0)]).is_err());
    }

    #[test]
    fn setters_check_argument_types() {
        assert!(matches!(
            Command::parse(SET_TOP_N, &[HostValue::Number(10.0)]).unwrap(),
            Command::SetTopN(10)
        ));
        assert!(Command::parse(SET_TOP_N, &[HostValue::String("10")]).is_err());
        assert!(Command::parse(SET_TOP_N, &[HostValue::Number(-1.0)]).is_err());
        assert!(Command::parse(SET_TOP_N, &[HostValue::Number(f64::NAN)]).is_err());
        assert!(Command::parse(SET_COUNTRY, &[HostValue::Bool(true)]).is_err());
        assert!(Command::parse(SET_PREWARP, &[]).is_err());
        assert!(Command::parse(SET_DETECT_REGION, &[HostValue::Number(1.0)]).is_err());
        assert!(matches!(
            Command::parse(SET_DETECT_REGION, &[HostValue::Bool(true)]).unwrap(),
            Command::SetDetectRegion(true)
        ));
        assert!(matches!(
            Command::parse(SET_DEFAULT_REGION, &[HostValue::String("se")]).unwrap(),
            Command::SetDefaultRegion("se")
        ));
    }

    #[test]
    fn set_mask_needs_bytes_and_three_numbers() {
        let mask = [255u8; 12];
        let args = [
            HostValue::Bytes(&mask),
            HostValue::Number(1.0),
            HostValue::Number(4.0),
            HostValue::Number(3.0),
        ];
        let Command::SetMask { pixels, bytes_per_pixel, width, height } =
            Command::parse(SET_MASK, &args).unwrap()
        else {
            panic!("wrong command");
        };
        assert_eq!((pixels.len(), bytes_per_pixel, width, height), (12, 1, 4, 3));

        assert!(Command::parse(SET_MASK, &args[..3]).is_err());
        let args = [
            HostValue::String("mask"),
            HostValue::Number(1.0),
            HostValue::Number(4.0),
            HostValue::Number(3.0),
        ];
        assert!(Command::parse(SET_MASK, &args).is_err());
    }

    #[test]
    fn recognise_frame_needs_a_frame() {
        let frame = MemoryFrame::from_luma(4, 2, 4, vec![0; 8]).unwrap();
        let parsed = Command::parse(RECOGNISE_FRAME, &[HostValue::Frame(&frame)]).unwrap();
        assert_eq!(parsed.name(), RECOGNISE_FRAME);

        let err = Command::parse(RECOGNISE_FRAME, &[HostValue::Bytes(&[0; 8])])
            .err()
            .unwrap();
        assert!(err.to_string().contains("bytes"), "{err}");
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(
            Command::parse("recognizeFrame", &[]),
            Err(AnprError::InvalidInput(_))
        ));
    }

    #[test]
    fn names_round_trip() {
        let frame = MemoryFrame::from_luma(1, 1, 1, vec![0]).unwrap();
        let mask = [0u8; 1];
        for name in COMMANDS {
            let args = match name {
                INITIALIZE_ANPR | SET_COUNTRY | SET_PREWARP | SET_DEFAULT_REGION => {
                    vec![HostValue::String("x")]
                }
                SET_TOP_N => vec![HostValue::Number(1.0)],
                SET_DETECT_REGION => vec![HostValue::Bool(false)],
                SET_MASK => vec![
                    HostValue::Bytes(&mask),
                    HostValue::Number(1.0),
                    HostValue::Number(1.0),
                    HostValue::Number(1.0),
                ],
                _ => vec![HostValue::Frame(&frame)],
            };
            assert_eq!(Command::parse(name, &args).unwrap().name(), name);
        }
    }
}
