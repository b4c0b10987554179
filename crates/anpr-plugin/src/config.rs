use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use anpr_core::{AnprError, Result};
use anpr_preprocess::PreprocessConfig;
use anpr_recognize::RecognizerConfig;

/// Complete plugin configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub preprocess: PreprocessConfig,
    pub recognizer: RecognizerConfig,
}

impl PluginConfig {
    /// Layout of an installed Android app: the shader and the OpenALPR data
    /// are unpacked into the app's private files directory.
    pub fn android_app(package: &str) -> Self {
        Self::with_files_dir(Path::new("/data/user/0").join(package).join("files"))
    }

    /// Shader at `<files>/shaders/compute.spv`, engine data under
    /// `<files>/openalpr`.
    pub fn with_files_dir(files: impl Into<PathBuf>) -> Self {
        let files = files.into();
        let mut config = Self::default();
        config.preprocess.gpu.shader_path = files.join("shaders").join("compute.spv");
        config.recognizer = RecognizerConfig::under(files.join("openalpr"));
        config
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AnprError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| AnprError::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "loaded plugin config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anpr_preprocess::BackendPreference;

    #[test]
    fn android_layout() {
        let config = PluginConfig::android_app("com.example.anpr");
        assert_eq!(
            config.preprocess.gpu.shader_path,
            PathBuf::from("/data/user/0/com.example.anpr/files/shaders/compute.spv")
        );
        assert_eq!(
            config.recognizer.config_file,
            PathBuf::from("/data/user/0/com.example.anpr/files/openalpr/openalpr.conf")
        );
        assert_eq!(
            config.recognizer.runtime_dir,
            PathBuf::from("/data/user/0/com.example.anpr/files/openalpr/runtime_data")
        );
        assert_eq!(config.preprocess.backend, BackendPreference::Auto);
    }

    #[test]
    fn loads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anpr.json");
        std::fs::write(
            &path,
            r#"{"preprocess": {"backend": "cpu"}, "recognizer": {"runtime_dir": "/srv/runtime"}}"#,
        )
        .unwrap();

        let config = PluginConfig::load(&path).unwrap();
        assert_eq!(config.preprocess.backend, BackendPreference::Cpu);
        assert_eq!(config.recognizer.runtime_dir, PathBuf::from("/srv/runtime"));
        assert_eq!(config.recognizer.config_file, RecognizerConfig::default().config_file);
    }

    #[test]
    fn bad_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anpr.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(PluginConfig::load(&path), Err(AnprError::Config(_))));
        assert!(matches!(
            PluginConfig::load(&dir.path().join("missing.json")),
            Err(AnprError::Config(_))
        ));
    }
}
