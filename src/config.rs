//! Runner configuration
//!
//! Parses and validates the optional configuration file at
//! `$XDG_CONFIG_HOME/qemu-runner/config.toml` (or
//! `~/.config/qemu-runner/config.toml`). Every field has a default, so a
//! missing default file is the same as an empty one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable consulted for layer directories unless configured otherwise
pub const DEFAULT_LAYER_PATH_VAR: &str = "QEMU_RUNNER_LAYERS";

/// Runner configuration (config.toml)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Extra directories searched for layer files
    #[serde(default)]
    pub layer_dirs: Vec<PathBuf>,

    /// Environment variables holding PATH-style lists of layer directories
    #[serde(default = "default_layer_path_vars")]
    pub layer_path_vars: Vec<String>,

    /// Extra directories searched for the QEMU executable
    #[serde(default)]
    pub qemu_dirs: Vec<PathBuf>,

    /// Log filter used when neither `--verbose` nor `RUST_LOG` is given
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_layer_path_vars() -> Vec<String> {
    vec![DEFAULT_LAYER_PATH_VAR.to_string()]
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            layer_dirs: Vec::new(),
            layer_path_vars: default_layer_path_vars(),
            qemu_dirs: Vec::new(),
            log_level: None,
        }
    }
}

/// Errors that can occur when loading or validating the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl RunnerConfig {
    /// Default config file location for the current environment
    pub fn default_path() -> Option<PathBuf> {
        Self::default_path_from(std::env::var_os("XDG_CONFIG_HOME"), std::env::var_os("HOME"))
    }

    /// Default config file location given `XDG_CONFIG_HOME` and `HOME`
    pub fn default_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
        let base = match xdg_config_home.filter(|v| !v.is_empty()) {
            Some(xdg) => PathBuf::from(xdg),
            None => PathBuf::from(home.filter(|v| !v.is_empty())?).join(".config"),
        };
        Some(base.join("qemu-runner").join("config.toml"))
    }

    /// Load from an explicit path, or from the default location if it exists.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                tracing::debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: RunnerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let empty = |field: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "entries must not be empty".to_string(),
        };

        if self.layer_dirs.iter().any(|d| d.as_os_str().is_empty()) {
            return Err(empty("layer_dirs"));
        }
        if self.layer_path_vars.iter().any(|v| v.trim().is_empty()) {
            return Err(empty("layer_path_vars"));
        }
        if self.qemu_dirs.iter().any(|d| d.as_os_str().is_empty()) {
            return Err(empty("qemu_dirs"));
        }
        if let Some(level) = &self.log_level {
            if level.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "log_level".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}
