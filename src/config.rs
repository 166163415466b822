// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Host settings shared by every sample binary. Sample constants (texture
// sizes, formats, camera) are not configurable; only the window, debug and
// asset location are.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub debug: DebugConfig,
    pub assets: AssetsConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Samples".to_string(),
            width: 960,
            height: 540,
            fullscreen: false,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vk_samples.log".to_string(),
            show_fps: true,
        }
    }
}

/// Where sample assets are read from
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    pub root: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
        }
    }
}

impl Config {
    /// Load `config.toml`, falling back to defaults on error.
    ///
    /// Runs before logging is initialised (the log settings live here), so the
    /// error is handed back for the caller to log afterwards.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation layers run only when the sample asks for them and the config allows them.
    pub fn validation_enabled(&self, sample_debug: bool) -> bool {
        sample_debug && self.debug.validation_layers
    }

    /// Resolve a path relative to the asset root.
    pub fn asset_path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.assets.root.join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.window.width, 960);
        assert_eq!(config.window.height, 540);
        assert_eq!(config.assets.root, PathBuf::from("assets"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            title = "Cube"

            [debug]
            validation_layers = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Cube");
        assert_eq!(config.window.width, 960);
        assert!(!config.debug.validation_layers);
        assert!(config.debug.show_fps);
        assert_eq!(config.debug.log_file, "vk_samples.log");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[window\nwidth = ").is_err());
        assert!(Config::from_toml("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn validation_needs_both_switches() {
        let mut config = Config::default();
        assert!(config.validation_enabled(true));
        assert!(!config.validation_enabled(false));

        config.debug.validation_layers = false;
        assert!(!config.validation_enabled(true));
    }

    #[test]
    fn assets_resolve_under_root() {
        let config = Config::from_toml("[assets]\nroot = \"data\"").unwrap();
        assert_eq!(
            config.asset_path("textures/bricks.png"),
            PathBuf::from("data").join("textures/bricks.png")
        );
    }

    #[test]
    fn unreadable_config_falls_back_with_error() {
        let path = std::env::temp_dir().join(format!("vk_samples_bad_config_{}.toml", std::process::id()));
        std::fs::write(&path, "[window]\nwidth = \"wide\"").unwrap();

        let (config, error) = Config::load_or_default(&path);
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config, Config::default());
        let error = error.expect("malformed config reported");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
    }

    #[test]
    fn missing_file_gives_defaults_without_error() {
        let (config, error) = Config::load_or_default("does/not/exist.toml");
        assert_eq!(config, Config::default());
        assert!(error.is_none());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("does/not/exist.toml").unwrap();
        assert_eq!(config, Config::default());
    }
}
