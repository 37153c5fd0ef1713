//! Configuration loading from `~/.parley/config.toml` with defaults.
//!
//! Offered services name JSON protocol definitions by path; relative paths
//! resolve against the directory holding the config file.

use parley_types::{NodeConfig, Protocol, ProtocolError, Service, ServiceConfig};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors from loading a service definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid protocol definition in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid service in {path}: {source}")]
    Service {
        path: PathBuf,
        source: ProtocolError,
    },
}

/// Load node configuration from a TOML file, with defaults.
///
/// A missing, unreadable or malformed file yields `NodeConfig::default()`.
pub fn load_config(path: Option<&Path>) -> NodeConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<NodeConfig>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                }
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
            }
        }
    } else {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
    }

    NodeConfig::default()
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    parley_home().join("config.toml")
}

/// Where a node keeps its key unless `key_file` says otherwise.
pub fn default_key_path() -> PathBuf {
    parley_home().join("node.key")
}

/// Get the default Parley home directory.
pub fn parley_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".parley")
}

/// Read one configured service's protocol definition and check its roles.
pub fn load_service(service: &ServiceConfig, base_dir: &Path) -> Result<Service, ConfigError> {
    let path = if service.protocol_file.is_absolute() {
        service.protocol_file.clone()
    } else {
        base_dir.join(&service.protocol_file)
    };
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    let protocol: Protocol =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
    Service::new(protocol, service.roles.clone())
        .map_err(|source| ConfigError::Service { path, source })
}

/// Load every service in `config`. Stops at the first bad definition.
pub fn load_services(config: &NodeConfig, base_dir: &Path) -> Result<Vec<Service>, ConfigError> {
    config
        .services
        .iter()
        .map(|service| load_service(service, base_dir))
        .collect()
}
