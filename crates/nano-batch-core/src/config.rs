//! Configuration management for the batch pipeline

use crate::error::{PipelineError, Result};
use crate::models::{AspectRatio, ModelTier, ResultRetention};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `NANO_BATCH__PRICING__COST_PER_IMAGE`.
pub const ENV_PREFIX: &str = "NANO_BATCH";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub generation: GenerationConfig,
    pub pricing: PricingConfig,
    pub export: ExportConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

/// How requests reach the generative-image service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Straight to the generative API with a locally held key
    Direct,
    /// Through an intermediary that forwards the key server-side
    Proxy,
}

/// Remote service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub mode: TransportMode,
    pub endpoint: String,
    pub pro_model: String,
    pub standard_model: String,
    pub fallback_model: String,
    pub validation_model: String,
    pub pro_image_size: String,
    pub request_timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Direct,
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            pro_model: "gemini-3-pro-image-preview".to_string(),
            standard_model: "gemini-2.5-flash-image".to_string(),
            fallback_model: "gemini-2.5-flash-image".to_string(),
            validation_model: "gemini-2.0-flash".to_string(),
            pro_image_size: "2K".to_string(),
            request_timeout_secs: None,
        }
    }
}

/// Initial generation settings for a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
    pub tier: ModelTier,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            instruction: String::new(),
            aspect_ratio: AspectRatio::Widescreen,
            tier: ModelTier::Pro,
        }
    }
}

/// Usage pricing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub cost_per_image: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            cost_per_image: 0.134,
        }
    }
}

/// Export naming and format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub default_format: ExportFormat,
    pub archive_entry_prefix: String,
    pub single_file_prefix: String,
    pub archive_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_format: ExportFormat::Jpeg,
            archive_entry_prefix: "nano_edit".to_string(),
            single_file_prefix: "nano".to_string(),
            archive_name: "nano_banana_batch.tar.gz".to_string(),
        }
    }
}

/// Queue behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub result_retention: ResultRetention,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for a daily-rolling log file; console output when unset
    pub output_path: Option<PathBuf>,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output_path: None,
            ansi: true,
        }
    }
}

/// Supported export formats
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Jpeg,
    Png,
    WebP,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Jpeg, ExportFormat::Png, ExportFormat::WebP];

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "jpeg",
            ExportFormat::Png => "png",
            ExportFormat::WebP => "webp",
        }
    }

    /// Get the MIME type for this format
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Png => "image/png",
            ExportFormat::WebP => "image/webp",
        }
    }

    /// Check if this format supports transparency
    pub fn supports_transparency(&self) -> bool {
        matches!(self, ExportFormat::Png | ExportFormat::WebP)
    }

    pub(crate) fn image_format(&self) -> image::ImageFormat {
        match self {
            ExportFormat::Jpeg => image::ImageFormat::Jpeg,
            ExportFormat::Png => image::ImageFormat::Png,
            ExportFormat::WebP => image::ImageFormat::WebP,
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => Ok(ExportFormat::Jpeg),
            "png" | "image/png" => Ok(ExportFormat::Png),
            "webp" | "image/webp" => Ok(ExportFormat::WebP),
            other => Err(PipelineError::InvalidInput {
                message: format!("unsupported export format '{}'", other),
            }),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a configuration manager with a custom path
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = Self::load_layered(&config_path, None)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the current configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Path the configuration is read from and saved to
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Update the configuration
    pub fn update_config(&mut self, config: AppConfig) -> Result<()> {
        self.config = config;
        self.save()
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::ConfigError {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        let config_str =
            toml::to_string_pretty(&self.config).map_err(|e| PipelineError::ConfigError {
                message: format!("Failed to serialize config: {}", e),
            })?;

        std::fs::write(&self.config_path, config_str).map_err(|e| PipelineError::ConfigError {
            message: format!("Failed to write config file: {}", e),
        })?;

        tracing::info!("Configuration saved to {:?}", self.config_path);
        Ok(())
    }

    /// Get the default configuration file path
    fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PipelineError::ConfigError {
                message: "Could not determine config directory".to_string(),
            })?
            .join("nano-batch");

        Ok(config_dir.join("config.toml"))
    }

    /// Layer defaults, the TOML file (if present) and `NANO_BATCH__*`
    /// environment overrides. `env` replaces the process environment when given.
    pub(crate) fn load_layered(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<AppConfig> {
        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(env);

        let config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(environment)
            .build()
            .and_then(|c| c.try_deserialize::<AppConfig>())
            .map_err(|e| PipelineError::ConfigError {
                message: format!("Failed to load config: {}", e),
            })?;

        if path.exists() {
            tracing::info!("Configuration loaded from {:?}", path);
        } else {
            tracing::info!("Using default configuration");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_export_format_properties() {
        assert_eq!(ExportFormat::Jpeg.extension(), "jpeg");
        assert_eq!(ExportFormat::Png.mime_type(), "image/png");
        assert_eq!(ExportFormat::WebP.mime_type(), "image/webp");
        assert!(ExportFormat::Png.supports_transparency());
        assert!(!ExportFormat::Jpeg.supports_transparency());
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("png".parse::<ExportFormat>().unwrap(), ExportFormat::Png);
        assert_eq!("JPG".parse::<ExportFormat>().unwrap(), ExportFormat::Jpeg);
        assert_eq!("image/webp".parse::<ExportFormat>().unwrap(), ExportFormat::WebP);
        assert!("gif".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_default_configs() {
        let app_config = AppConfig::default();
        assert_eq!(app_config.remote.mode, TransportMode::Direct);
        assert_eq!(app_config.remote.pro_image_size, "2K");
        assert!(app_config.remote.request_timeout_secs.is_none());
        assert_eq!(app_config.export.archive_entry_prefix, "nano_edit");
        assert_eq!(app_config.queue.result_retention, ResultRetention::RetainPrevious);
    }

    #[test]
    fn test_config_manager_creation() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let manager = ConfigManager::with_path(config_path.clone());
        assert!(manager.is_ok());

        let manager = manager.unwrap();
        assert_eq!(manager.config().export.default_format, ExportFormat::Jpeg);
        assert_eq!(manager.config_path(), config_path.as_path());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("test_config.toml");

        let mut manager = ConfigManager::with_path(config_path.clone()).unwrap();
        let mut config = manager.config().clone();
        config.pricing.cost_per_image = 0.5;
        config.export.default_format = ExportFormat::WebP;
        config.remote.mode = TransportMode::Proxy;

        manager.update_config(config).unwrap();

        let manager2 = ConfigManager::with_path(config_path).unwrap();
        assert_eq!(manager2.config().pricing.cost_per_image, 0.5);
        assert_eq!(manager2.config().export.default_format, ExportFormat::WebP);
        assert_eq!(manager2.config().remote.mode, TransportMode::Proxy);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        std::fs::write(&config_path, "[pricing]\ncost_per_image = 0.25\n").unwrap();

        let config = ConfigManager::load_layered(&config_path, Some(HashMap::new())).unwrap();
        assert_eq!(config.pricing.cost_per_image, 0.25);
        assert_eq!(config.remote.pro_model, RemoteConfig::default().pro_model);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("env.toml");
        std::fs::write(&config_path, "[remote]\nmode = \"direct\"\n").unwrap();

        let mut env = HashMap::new();
        env.insert("NANO_BATCH__REMOTE__MODE".to_string(), "proxy".to_string());
        env.insert(
            "NANO_BATCH__REMOTE__ENDPOINT".to_string(),
            "http://localhost:8888".to_string(),
        );

        let config = ConfigManager::load_layered(&config_path, Some(env)).unwrap();
        assert_eq!(config.remote.mode, TransportMode::Proxy);
        assert_eq!(config.remote.endpoint, "http://localhost:8888");
    }
}
