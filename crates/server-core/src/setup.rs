//! Config directory management for `server init`, `init` and `server print`.
//!
//! These run locally against the files, without a running server.

use std::path::{Path, PathBuf};

use sault_types::{
    User, config::{CONFIG_FILE_NAME, SaultConfig}
};
use state_store::{Registry, sources_from_config};
use tracing::info;

use crate::error::{ServerError, ServerResult};

pub fn config_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load `sault.conf` from `config_dir`, resolving relative paths against it.
pub fn load_config(config_dir: &Path) -> ServerResult<SaultConfig> {
    Ok(SaultConfig::load(&config_path(config_dir))?.resolve_paths(config_dir))
}

/// Create the config file, both keys and an empty registry. Existing files are kept.
pub async fn init_config_dir(config_dir: &Path) -> ServerResult<SaultConfig> {
    std::fs::create_dir_all(config_dir)?;

    let path = config_path(config_dir);
    if path.exists() {
        info!(path = %path.display(), "config already present");
    } else {
        std::fs::write(&path, SaultConfig::default_layout().to_toml_string()?)?;
        info!(path = %path.display(), "config written");
    }

    let config = load_config(config_dir)?;
    ssh_core::keys::load_or_generate_key(&config.server.host_key)?;
    ssh_core::keys::load_or_generate_key(&config.server.client_key)?;
    open_registry(&config).await?.save().await?;
    Ok(config)
}

pub async fn open_registry(config: &SaultConfig) -> ServerResult<Registry> {
    if config.registry.source.is_empty() {
        return Err(ServerError::InvalidConfig("no registry source configured".into()));
    }
    Ok(Registry::load(sources_from_config(&config.registry.source)).await?)
}

/// `init`: initialize the directory and register the first admin.
pub async fn init_with_admin(config_dir: &Path, admin_id: &str, public_key: &str) -> ServerResult<User> {
    let config = init_config_dir(config_dir).await?;
    let registry = open_registry(&config).await?;
    registry.add_user(admin_id, public_key).await?;
    let user = registry.set_user_admin(admin_id, true).await?;
    registry.save().await?;
    info!(user = %user.id, "admin user created");
    Ok(user)
}

/// Public key line of the global client key, for the hosts' `authorized_keys`.
pub fn client_public_key(config: &SaultConfig) -> ServerResult<String> {
    let key = ssh_core::keys::load_private_key(&config.server.client_key, None)?;
    Ok(ssh_core::keys::public_key_line(key.public_key())?)
}

pub async fn registry_text(config: &SaultConfig) -> ServerResult<String> {
    let bytes = open_registry(config).await?.to_bytes().await?;
    String::from_utf8(bytes).map_err(|e| ServerError::Internal(e.to_string()))
}
