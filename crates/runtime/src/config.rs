//! Configuration management for the llamaslot runtime
//!
//! `RuntimeConfig` is read from TOML and validated once. The engine section
//! is tolerant on load: a missing or malformed field falls back to its
//! default with a warning. Explicit updates through
//! [`EngineConfig::validate`] are strict.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::env;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file: {message}")]
    IoError { message: String },

    #[error("Configuration parsing error: {message}")]
    ParseError { message: String },
}

pub const CONTEXT_LENGTH_RANGE: RangeInclusive<u32> = 1024..=32768;
pub const THREADS_RANGE: RangeInclusive<u32> = 1..=64;
pub const GPU_LAYERS_RANGE: RangeInclusive<u32> = 0..=100;
pub const BATCH_RANGE: RangeInclusive<u32> = 16..=4096;

/// Parameters applied when an engine is created.
///
/// Changing these never touches engines that are already loaded; the new
/// values are picked up by the next bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawEngineConfig")]
pub struct EngineConfig {
    pub context_length: u32,
    pub threads: u32,
    pub gpu_layers: u32,
    pub batch: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_length: 4096,
            threads: 4,
            gpu_layers: 0,
            batch: 512,
        }
    }
}

impl EngineConfig {
    /// Strict check used for explicit updates
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("engine.context_length", self.context_length, CONTEXT_LENGTH_RANGE)?;
        check_range("engine.threads", self.threads, THREADS_RANGE)?;
        check_range("engine.gpu_layers", self.gpu_layers, GPU_LAYERS_RANGE)?;
        check_range("engine.batch", self.batch, BATCH_RANGE)?;
        Ok(())
    }
}

fn check_range(key: &str, value: u32, range: RangeInclusive<u32>) -> Result<(), ConfigError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!(
                "{} is outside the allowed range {}..={}",
                value,
                range.start(),
                range.end()
            ),
        })
    }
}

/// Any scalar a hand-edited or older config might hold for an engine field
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LenientValue {
    Int(i64),
    Float(f64),
    /// Strings, tables and anything else that cannot be a count
    Other(IgnoredAny),
}

#[derive(Debug, Default, Deserialize)]
struct RawEngineConfig {
    context_length: Option<LenientValue>,
    threads: Option<LenientValue>,
    gpu_layers: Option<LenientValue>,
    batch: Option<LenientValue>,
}

impl From<RawEngineConfig> for EngineConfig {
    fn from(raw: RawEngineConfig) -> Self {
        let defaults = EngineConfig::default();
        EngineConfig {
            context_length: lenient_field(
                "context_length",
                raw.context_length,
                CONTEXT_LENGTH_RANGE,
                defaults.context_length,
            ),
            threads: lenient_field("threads", raw.threads, THREADS_RANGE, defaults.threads),
            gpu_layers: lenient_field(
                "gpu_layers",
                raw.gpu_layers,
                GPU_LAYERS_RANGE,
                defaults.gpu_layers,
            ),
            batch: lenient_field("batch", raw.batch, BATCH_RANGE, defaults.batch),
        }
    }
}

fn lenient_field(
    key: &str,
    value: Option<LenientValue>,
    range: RangeInclusive<u32>,
    default: u32,
) -> u32 {
    let Some(value) = value else {
        return default;
    };

    let parsed = match value {
        LenientValue::Int(v) => u32::try_from(v).ok(),
        LenientValue::Float(v) if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64 => {
            Some(v as u32)
        }
        LenientValue::Float(_) | LenientValue::Other(_) => None,
    };

    match parsed {
        Some(v) if range.contains(&v) => v,
        Some(v) => {
            tracing::warn!(
                "engine.{} = {} is outside {}..={}, using default {}",
                key,
                v,
                range.start(),
                range.end(),
                default
            );
            default
        }
        None => {
            tracing::warn!(
                "engine.{} is not a valid integer, using default {}",
                key,
                default
            );
            default
        }
    }
}

/// Main runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Root directory for the session file, state file and catalog
    pub data_dir: PathBuf,
    /// Engine parameters used when nothing has been persisted yet
    pub engine: EngineConfig,
    /// Session cache behaviour
    pub session: SessionConfig,
    /// Model catalog configuration
    pub models: ModelsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            engine: EngineConfig::default(),
            session: SessionConfig::default(),
            models: ModelsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Save the KV session after every main chat completion
    pub persist: bool,
    /// Bind the last main chat model on startup
    pub autoload: bool,
    /// File name of the session snapshot inside `data_dir`
    pub file_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist: false,
            autoload: false,
            file_name: "llama-session.bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// SQLite catalog file. Defaults to `<data_dir>/models.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_path: Option<PathBuf>,
    /// GGUF `general.file_type` codes that are refused at bind time
    pub deprecated_quantizations: Vec<u32>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            deprecated_quantizations: crate::models::DEFAULT_DEPRECATED_QUANTIZATIONS.to_vec(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llamaslot")
}

impl RuntimeConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load from `path` if given, otherwise defaults, then apply
    /// `LLAMASLOT_DATA_DIR` and `LLAMASLOT_LOG_LEVEL` overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(dir) = env::var("LLAMASLOT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = env::var("LLAMASLOT_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "data_dir".to_string(),
            });
        }

        let file_name = self.session.file_name.trim();
        if file_name.is_empty() || file_name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                key: "session.file_name".to_string(),
                reason: "Must be a plain, non-empty file name".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("Must be one of: {}", valid_levels.join(", ")),
            });
        }

        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(&self.session.file_name)
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("engine-state.json")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.models
            .catalog_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models.db"))
    }
}
