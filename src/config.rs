//! # Configuration Management
//!
//! This module handles loading application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Configuration is read exactly once, before any model is loaded and before the
//! HTTP server binds. Nothing mutates it afterwards.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Bare deployment variables (`HOST`, `PORT`, `API_KEY`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_AUTH__API_KEY`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Example config.toml:
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 5000
//!
//! [auth]
//! api_key = "sk-your_secret_api_key"
//!
//! [models.base]
//! device = "cpu"
//!
//! [models.small]
//! device = "cuda"
//! ```

use crate::device::DevicePreference;
use crate::transcription::model::ModelSize;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, auth, transcription,
/// models) keeps each concern small and lets the `config` crate map nested
/// TOML tables and `APP_*__*` environment variables onto them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub transcription: TranscriptionSettings,
    /// Model name (as sent in the `model` form field) → loading parameters.
    /// A BTreeMap keeps the model listing in a stable, sorted order.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to. Loopback by default: the API uses a single
///   shared key and a permissive CORS policy, so it is meant for local use.
/// - `port`: TCP port number to listen on
/// - `workers`: actix worker threads (defaults to the number of physical cores)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Authentication settings.
///
/// A single static key shared by every caller. Requests must carry
/// `Authorization: Bearer <api_key>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub api_key: String,
}

/// Per-request transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    /// Where uploaded audio is staged while the engine reads it.
    /// `None` means the OS temporary directory.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,

    /// Beam width used for deterministic (temperature 0) decoding
    pub beam_size: usize,
}

/// Loading parameters for one named model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hugging Face repository id. Optional for the well-known Whisper sizes.
    #[serde(default)]
    pub repo: Option<String>,

    /// Repository revision (branch, tag or commit). Defaults to `main`.
    #[serde(default)]
    pub revision: Option<String>,

    /// Compute device: "auto", "cpu", "cuda"/"gpu" or "metal"
    #[serde(default = "default_device")]
    pub device: String,
}

fn default_device() -> String {
    "cpu".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo: None,
            revision: None,
            device: default_device(),
        }
    }
}

/// The model every installation gets when nothing else is configured.
fn default_models() -> BTreeMap<String, ModelConfig> {
    let mut models = BTreeMap::new();
    models.insert("base".to_string(), ModelConfig::default());
    models
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// The server can start with no configuration file at all: loopback on port
/// 5000, the `base` Whisper model on CPU, and the placeholder API key.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only
                port: 5000,
                workers: None,
            },
            auth: AuthConfig {
                api_key: "sk-your_secret_api_key".to_string(),
            },
            transcription: TranscriptionSettings {
                temp_dir: None,
                max_upload_bytes: 25 * 1024 * 1024,  // 25 MiB, same ceiling as the hosted API
                beam_size: 5,
            },
            models: default_models(),
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults (without the default model map)
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST, PORT and API_KEY environment variables
    /// 5. Fall back to the `base` model if no model was configured anywhere
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8000`: Override server port
    /// - `APP_AUTH__API_KEY=sk-...`: Override the API key
    /// - `APP_MODELS__SMALL__DEVICE=cuda`: Add or change the `small` model
    ///
    /// `__` separates nesting levels so that field names containing a single
    /// underscore (`api_key`, `max_upload_bytes`) stay intact.
    pub fn load() -> Result<Self> {
        // Models are left out of the defaults: maps merge key by key, and a
        // configured model list should replace the default one, not extend it.
        let mut defaults = AppConfig::default();
        defaults.models.clear();

        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("API_KEY") {
            settings = settings.set_override("auth.api_key", api_key)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        if config.models.is_empty() {
            config.models = default_models();
        }
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The API key is not empty (an empty key would accept `Bearer `)
    /// - At least one model is configured, each with a known device and a
    ///   resolvable repository
    /// - Upload limit and beam width are positive
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.auth.api_key.trim().is_empty() {
            return Err(anyhow!("API key must not be empty"));
        }

        if self.transcription.max_upload_bytes == 0 {
            return Err(anyhow!("Max upload size must be greater than 0"));
        }

        if self.transcription.beam_size == 0 {
            return Err(anyhow!("Beam size must be greater than 0"));
        }

        if self.models.is_empty() {
            return Err(anyhow!("At least one model must be configured"));
        }

        for (name, model) in &self.models {
            if name.trim().is_empty() {
                return Err(anyhow!("Model names must not be empty"));
            }
            model
                .device
                .parse::<DevicePreference>()
                .map_err(|e| anyhow!("Model '{}': {}", name, e))?;
            model.repo_for(name)?;
        }

        Ok(())  // All validation passed
    }
}

impl TranscriptionSettings {
    /// Directory that receives staged uploads.
    pub fn staging_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

impl ModelConfig {
    /// Resolve the Hugging Face repository for the model registered as `name`.
    ///
    /// An explicit `repo` always wins. Otherwise `name` must be one of the
    /// well-known Whisper sizes ("base", "small.en", ...).
    pub fn repo_for(&self, name: &str) -> Result<String> {
        if let Some(repo) = &self.repo {
            return Ok(repo.clone());
        }
        let size: ModelSize = name.parse().map_err(|_| {
            anyhow!(
                "Model '{}' is not a known Whisper size; set models.{}.repo",
                name,
                name
            )
        })?;
        Ok(size.repo_name().to_string())
    }

    /// Repository revision, `main` unless configured.
    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or("main")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.transcription.beam_size, 5);
        assert_eq!(config.models.keys().collect::<Vec<_>>(), vec!["base"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.auth.api_key = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.get_mut("base").unwrap().device = "tpu".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_model_needs_explicit_repo() {
        let mut config = AppConfig::default();
        config.models.insert("distil".to_string(), ModelConfig::default());
        assert!(config.validate().is_err());

        config.models.get_mut("distil").unwrap().repo =
            Some("distil-whisper/distil-small.en".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_repo_resolution() {
        let model = ModelConfig::default();
        assert_eq!(model.repo_for("base").unwrap(), "openai/whisper-base");
        assert_eq!(model.repo_for("small.en").unwrap(), "openai/whisper-small.en");
        assert_eq!(model.revision(), "main");
    }

    #[test]
    fn test_staging_dir_fallback() {
        let mut settings = AppConfig::default().transcription;
        assert_eq!(settings.staging_dir(), env::temp_dir());

        settings.temp_dir = Some(PathBuf::from("/srv/uploads"));
        assert_eq!(settings.staging_dir(), PathBuf::from("/srv/uploads"));
    }
}
