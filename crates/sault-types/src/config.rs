//! On-disk configuration (`sault.conf`).
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SERVER_NAME: &str = "sault";
pub const DEFAULT_SERVER_PORT: u16 = 2222;
pub const CONFIG_FILE_NAME: &str = "sault.conf";
pub const REGISTRY_FILE_NAME: &str = "registry.reg";
pub const HOST_KEY_FILE_NAME: &str = "host.key";
pub const CLIENT_KEY_FILE_NAME: &str = "client.key";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration for a sault server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaultConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub registry: RegistrySection,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Listen address, e.g. `0.0.0.0:2222`.
    pub bind: String,
    /// Login name that selects a control session; also the server's own host ID.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Host identity key; relative paths resolve against the config dir.
    pub host_key: PathBuf,
    /// Global key sault presents to backend hosts.
    pub client_key: PathBuf,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySection {
    #[serde(default)]
    pub source: Vec<RegistrySourceConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistrySourceConfig {
    /// A TOML `.reg` file.
    Toml { path: PathBuf },
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

impl SaultConfig {
    /// Defaults written by `server init`: all files live next to the config.
    pub fn default_layout() -> Self {
        Self {
            server: ServerSection {
                bind: format!("0.0.0.0:{DEFAULT_SERVER_PORT}"),
                server_name: default_server_name(),
                host_key: PathBuf::from(HOST_KEY_FILE_NAME),
                client_key: PathBuf::from(CLIENT_KEY_FILE_NAME),
            },
            registry: RegistrySection {
                source: vec![RegistrySourceConfig::Toml {
                    path: PathBuf::from(REGISTRY_FILE_NAME),
                }],
            },
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rewrite every relative path against `base_dir`.
    pub fn resolve_paths(mut self, base_dir: &Path) -> Self {
        self.server.host_key = resolve(base_dir, &self.server.host_key);
        self.server.client_key = resolve(base_dir, &self.server.client_key);
        for source in &mut self.registry.source {
            match source {
                RegistrySourceConfig::Toml { path } => *path = resolve(base_dir, path),
            }
        }
        self
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() { path.to_path_buf() } else { base_dir.join(path) }
}
