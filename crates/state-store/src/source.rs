//! Persistence backends for the registry.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use sault_types::config::RegistrySourceConfig;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::{RegistryError, RegistryResult};

/// Somewhere the serialized registry can be read from and written to.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Human readable location used in logs and errors.
    fn name(&self) -> String;

    /// Stored bytes, or `None` when the source has nothing yet.
    async fn load(&self) -> RegistryResult<Option<Vec<u8>>>;

    async fn save(&self, bytes: &[u8]) -> RegistryResult<()>;
}

/// A `.reg` TOML file, replaced atomically and kept at mode 0600.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry".to_string());
        self.path.with_file_name(format!(".{file_name}.tmp"))
    }
}

#[async_trait]
impl RegistrySource for TomlFileSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> RegistryResult<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::io(&self.path, e)),
        }
    }

    async fn save(&self, bytes: &[u8]) -> RegistryResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::io(parent, e))?;
        }

        let tmp = self.temp_path();
        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(|e| RegistryError::io(&tmp, e))?;
        file.write_all(bytes).await.map_err(|e| RegistryError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| RegistryError::io(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RegistryError::io(&self.path, e))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "registry written");
        Ok(())
    }
}

/// Build sources in the order they appear in `sault.conf`.
pub fn sources_from_config(configs: &[RegistrySourceConfig]) -> Vec<Arc<dyn RegistrySource>> {
    configs
        .iter()
        .map(|cfg| match cfg {
            RegistrySourceConfig::Toml { path } => Arc::new(TomlFileSource::new(path.clone())) as Arc<dyn RegistrySource>,
        })
        .collect()
}
