//! Engine configuration.
//!
//! Configuration is read from an optional TOML file. Every field has a
//! default, so a missing file or a partial file is valid:
//!
//! ```toml
//! [window]
//! title = "vkframe"
//! width = 1280
//! height = 720
//!
//! [renderer]
//! validation = true
//! preferred_present_mode = "mailbox"
//! clear_color = [0.0, 0.0, 0.0, 1.0]
//! default_pipeline = "basic"
//! shader_path = "shaders/basic.spv"
//! ```
//!
//! The `VKFRAME_VALIDATION` environment variable (`0`/`1`, `false`/`true`)
//! overrides `renderer.validation`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable overriding [`RendererSettings::validation`].
pub const VALIDATION_ENV: &str = "VKFRAME_VALIDATION";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Window settings, consumed by the application driver.
    pub window: WindowSettings,
    /// Renderer settings.
    pub renderer: RendererSettings,
}

/// Initial window parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "vkframe".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Present mode the swapchain should try first.
///
/// FIFO is always available and is used when the preferred mode is not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentModePreference {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

/// Settings consumed by the renderer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererSettings {
    /// Enable the Khronos validation layer and debug messenger.
    pub validation: bool,
    pub preferred_present_mode: PresentModePreference,
    /// RGBA clear color of the color attachment.
    pub clear_color: [f32; 4],
    /// Name of the pipeline bound while recording frames.
    pub default_pipeline: String,
    /// SPIR-V blob holding both `vertMain` and `fragMain`.
    pub shader_path: PathBuf,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            preferred_present_mode: PresentModePreference::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            default_pipeline: "basic".to_string(),
            shader_path: PathBuf::from("shaders/basic.spv"),
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, falling back to defaults when it does not exist.
    ///
    /// The environment override is applied after the file is read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            info!("Loaded configuration from {}", path.display());
            Self::from_toml_str(&text)?
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(value) = std::env::var(VALIDATION_ENV) {
            config.renderer.validation = parse_bool_flag(VALIDATION_ENV, &value)?;
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::InvalidConfig {
                key: "window.width/height",
                message: format!(
                    "window size must be non-zero, got {}x{}",
                    self.window.width, self.window.height
                ),
            });
        }
        if self.renderer.default_pipeline.is_empty() {
            return Err(Error::InvalidConfig {
                key: "renderer.default_pipeline",
                message: "pipeline name must not be empty".to_string(),
            });
        }
        if self.renderer.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(Error::InvalidConfig {
                key: "renderer.clear_color",
                message: "components must be finite".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool_flag(key: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(Error::InvalidConfig {
            key,
            message: format!("expected a boolean flag, got `{other}`"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.renderer.default_pipeline, "basic");
        assert_eq!(config.renderer.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_partial_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            width = 800

            [renderer]
            preferred_present_mode = "fifo"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(
            config.renderer.preferred_present_mode,
            PresentModePreference::Fifo
        );
        assert_eq!(config.renderer.shader_path, PathBuf::from("shaders/basic.spv"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = EngineConfig::from_toml_str("[renderer]\nmsaa = 4\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = EngineConfig::from_toml_str("[window]\nheight = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_empty_pipeline_name_rejected() {
        let err =
            EngineConfig::from_toml_str("[renderer]\ndefault_pipeline = \"\"\n").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidConfig {
                key: "renderer.default_pipeline",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = EngineConfig::load("definitely/not/here/vkframe.toml").unwrap();
        assert_eq!(config.window, WindowSettings::default());
    }

    #[test]
    fn test_parse_bool_flag() {
        assert!(parse_bool_flag(VALIDATION_ENV, "1").unwrap());
        assert!(parse_bool_flag(VALIDATION_ENV, " TRUE ").unwrap());
        assert!(!parse_bool_flag(VALIDATION_ENV, "off").unwrap());
        assert!(parse_bool_flag(VALIDATION_ENV, "maybe").is_err());
    }
}
