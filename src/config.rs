//! Engine configuration discovery and loading.
//!
//! Configuration is looked up in this order, first hit wins:
//! 1. Current directory: `./cflocal.toml`
//! 2. User config: `~/.cflocal/config.toml`
//! 3. Built-in defaults

use crate::container::{ContainerClientConfig, RestartPolicy};
use crate::env;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`EngineConfig`]
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The config could not be serialized
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Daemon socket; local defaults and Podman sockets are tried when unset
    pub socket: Option<String>,
    /// Daemon connection timeout in seconds
    pub connect_timeout: u64,
    /// Prefix written before every relayed log frame; `[<hostname>] ` when unset
    pub log_prefix: Option<String>,
    /// Render stderr output in bold
    pub bold_stderr: bool,
    /// Restart timing
    pub restart: RestartPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: None,
            connect_timeout: ContainerClientConfig::default().timeout,
            log_prefix: None,
            bold_stderr: false,
            restart: RestartPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save to a TOML file.
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Discover and load configuration using the lookup order.
    pub fn discover() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                Self::from_toml_file(path)
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// First existing config file in the lookup order.
    pub fn find_config_file() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::local_config_file_path(&current_dir));
        }
        if let Some(home_dir) = home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        candidates.into_iter().find(|candidate| {
            debug!("Checking for config file: {:?}", candidate);
            candidate.is_file()
        })
    }

    /// Daemon connection settings.
    pub fn client_config(&self) -> ContainerClientConfig {
        ContainerClientConfig {
            socket: self.socket.clone(),
            timeout: self.connect_timeout,
        }
    }

    /// Log prefix for a container with the given hostname.
    pub fn log_prefix_for(&self, hostname: &str) -> String {
        self.log_prefix
            .clone()
            .unwrap_or_else(|| format!("[{}] ", hostname))
    }
}

fn home_dir() -> Option<PathBuf> {
    std_env::var("HOME")
        .ok()
        .or_else(|| std_env::var("USERPROFILE").ok())
        .map(PathBuf::from)
}
