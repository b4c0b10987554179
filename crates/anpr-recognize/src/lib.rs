//! Plate recognition collaborator.
//!
//! The preprocessing pipeline hands rotated 8-bit grayscale frames to a
//! [`PlateRecognizer`]. The production implementation binds the OpenALPR C
//! API at runtime; tests and tools can substitute their own.

#[cfg(feature = "openalpr")]
pub mod openalpr;

#[cfg(feature = "openalpr")]
pub use openalpr::OpenAlpr;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use anpr_core::{RecognitionResult, Result};

/// A plate recognition engine.
///
/// Calls are serialised by the owner; implementations need not be `Sync`.
pub trait PlateRecognizer: Send {
    /// Recognise plates in a raw pixel buffer and return the engine's JSON.
    fn recognize(&mut self, pixels: &[u8], bytes_per_pixel: u32, width: u32, height: u32)
        -> Result<String>;

    fn set_top_n(&mut self, top_n: u32) -> Result<()>;

    fn set_country(&mut self, country: &str) -> Result<()>;

    fn set_prewarp(&mut self, prewarp: &str) -> Result<()>;

    /// Install a detection mask. Only non-black mask pixels are searched.
    fn set_mask(&mut self, pixels: &[u8], bytes_per_pixel: u32, width: u32, height: u32)
        -> Result<()>;

    fn set_detect_region(&mut self, detect_region: bool) -> Result<()>;

    fn set_default_region(&mut self, region: &str) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// [`recognize`](Self::recognize), parsed.
    fn recognize_plates(
        &mut self,
        pixels: &[u8],
        bytes_per_pixel: u32,
        width: u32,
        height: u32,
    ) -> Result<RecognitionResult> {
        let json = self.recognize(pixels, bytes_per_pixel, width, height)?;
        RecognitionResult::from_json(&json)
    }
}

/// Where the recognition engine and its data live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Shared library exporting the OpenALPR C API.
    pub library_path: PathBuf,
    /// `openalpr.conf`.
    pub config_file: PathBuf,
    /// `runtime_data` directory.
    pub runtime_dir: PathBuf,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from(default_library_name()),
            config_file: PathBuf::from("openalpr/openalpr.conf"),
            runtime_dir: PathBuf::from("openalpr/runtime_data"),
        }
    }
}

impl RecognizerConfig {
    /// Layout used when the engine data is unpacked under `base`.
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            config_file: base.join("openalpr.conf"),
            runtime_dir: base.join("runtime_data"),
            ..Self::default()
        }
    }
}

fn default_library_name() -> &'static str {
    if cfg!(windows) {
        "openalpr.dll"
    } else if cfg!(target_os = "macos") {
        "libopenalpr.dylib"
    } else {
        "libopenalpr.so"
    }
}

/// Per-session recognition settings supplied at initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerSettings {
    pub country: String,
    /// Candidate cap; zero keeps the engine default.
    pub top_n: u32,
    /// Default region pattern; empty keeps the engine default.
    pub default_region: String,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            country: "eu".into(),
            top_n: 0,
            default_region: String::new(),
        }
    }
}

impl RecognizerSettings {
    pub fn new(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            ..Self::default()
        }
    }

    /// Apply the optional settings to a freshly created engine.
    pub fn apply(&self, recognizer: &mut dyn PlateRecognizer) -> Result<()> {
        if self.top_n > 0 {
            recognizer.set_top_n(self.top_n)?;
        }
        if !self.default_region.is_empty() {
            recognizer.set_default_region(&self.default_region)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Calls {
        top_n: Vec<u32>,
        regions: Vec<String>,
    }

    impl PlateRecognizer for Calls {
        fn recognize(&mut self, _: &[u8], _: u32, width: u32, height: u32) -> Result<String> {
            Ok(format!(r#"{{"img_width":{width},"img_height":{height},"results":[]}}"#))
        }
        fn set_top_n(&mut self, top_n: u32) -> Result<()> {
            self.top_n.push(top_n);
            Ok(())
        }
        fn set_country(&mut self, _: &str) -> Result<()> {
            Ok(())
        }
        fn set_prewarp(&mut self, _: &str) -> Result<()> {
            Ok(())
        }
        fn set_mask(&mut self, _: &[u8], _: u32, _: u32, _: u32) -> Result<()> {
            Ok(())
        }
        fn set_detect_region(&mut self, _: bool) -> Result<()> {
            Ok(())
        }
        fn set_default_region(&mut self, region: &str) -> Result<()> {
            self.regions.push(region.into());
            Ok(())
        }
        fn is_loaded(&self) -> bool {
            true
        }
    }

    #[test]
    fn zero_top_n_and_empty_region_are_not_applied() {
        let mut engine = Calls::default();
        RecognizerSettings::new("us").apply(&mut engine).unwrap();
        assert!(engine.top_n.is_empty());
        assert!(engine.regions.is_empty());

        let settings = RecognizerSettings {
            country: "eu".into(),
            top_n: 5,
            default_region: "se".into(),
        };
        settings.apply(&mut engine).unwrap();
        assert_eq!(engine.top_n, vec![5]);
        assert_eq!(engine.regions, vec!["se".to_string()]);
    }

    #[test]
    fn recognize_plates_parses_engine_output() {
        let mut engine = Calls::default();
        let result = engine.recognize_plates(&[0; 6], 1, 2, 3).unwrap();
        assert_eq!((result.img_width, result.img_height), (2, 3));
        assert!(result.results.is_empty());
    }

    #[test]
    fn config_paths_under_base() {
        let config = RecognizerConfig::under("/data/files/openalpr");
        assert_eq!(config.config_file, PathBuf::from("/data/files/openalpr/openalpr.conf"));
        assert_eq!(config.runtime_dir, PathBuf::from("/data/files/openalpr/runtime_data"));

        let parsed: RecognizerConfig =
            serde_json::from_str(r#"{"library_path":"/opt/lib/libopenalpr.so.2"}"#).unwrap();
        assert_eq!(parsed.library_path, PathBuf::from("/opt/lib/libopenalpr.so.2"));
        assert_eq!(parsed.config_file, RecognizerConfig::default().config_file);
    }
}
