//! In-memory registry with pluggable persistence.

use std::sync::Arc;

use chrono::Utc;
use russh::keys::PublicKey;
use sault_types::RegistryData;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::{RegistryError, RegistryResult, RegistrySource};

mod hosts;
mod links;
mod users;

pub use hosts::HostUpdate;
pub use users::UserUpdate;

/// Authoritative store of users, hosts and links.
///
/// Readers share the lock; every mutation takes it exclusively, so concurrent administrative
/// commands never interleave. Mutations only touch memory: callers persist with [`Registry::save`].
pub struct Registry {
    data: RwLock<RegistryData>,
    sources: Vec<Arc<dyn RegistrySource>>,
    save_lock: Mutex<()>,
}

impl Registry {
    /// A registry with no sources; `save` succeeds without writing anything.
    pub fn in_memory() -> Self {
        Self::from_data(RegistryData::default(), Vec::new())
    }

    pub fn from_data(data: RegistryData, sources: Vec<Arc<dyn RegistrySource>>) -> Self {
        Self {
            data: RwLock::new(data),
            sources,
            save_lock: Mutex::new(()),
        }
    }

    /// Load from the first source that has data. Unreadable sources are skipped with a warning;
    /// a source holding data that does not parse is an error.
    pub async fn load(sources: Vec<Arc<dyn RegistrySource>>) -> RegistryResult<Self> {
        let mut data = None;
        for source in &sources {
            match source.load().await {
                Ok(Some(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    let parsed: RegistryData = toml::from_str(&text).map_err(|e| RegistryError::Parse {
                        origin: source.name(),
                        source: e,
                    })?;
                    info!(
                        source = %source.name(),
                        users = parsed.user.len(),
                        hosts = parsed.host.len(),
                        "loaded registry"
                    );
                    data = Some(parsed);
                    break;
                }
                Ok(None) => {}
                Err(e) => warn!(source = %source.name(), error = %e, "failed to read registry source"),
            }
        }
        Ok(Self::from_data(data.unwrap_or_default(), sources))
    }

    /// Persist to every source; succeeds when at least one write succeeds.
    pub async fn save(&self) -> RegistryResult<()> {
        let _guard = self.save_lock.lock().await;
        if self.sources.is_empty() {
            return Ok(());
        }

        let bytes = self.to_bytes().await?;
        let mut failures = Vec::new();
        for source in &self.sources {
            if let Err(e) = source.save(&bytes).await {
                warn!(source = %source.name(), error = %e, "failed to write registry source");
                failures.push(format!("{}: {e}", source.name()));
            }
        }

        if failures.len() == self.sources.len() {
            return Err(RegistryError::SaveFailed(failures.join("; ")));
        }
        Ok(())
    }

    /// TOML document of the current state.
    pub async fn to_bytes(&self) -> RegistryResult<Vec<u8>> {
        let data = self.data.read().await;
        Ok(toml::to_string_pretty(&*data)?.into_bytes())
    }

    pub async fn snapshot(&self) -> RegistryData {
        self.data.read().await.clone()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, RegistryData> {
        self.data.read().await
    }

    /// Exclusive access; the registry timestamp is bumped up front.
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, RegistryData> {
        let mut guard = self.data.write().await;
        guard.time_updated = Utc::now();
        guard
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Parse an OpenSSH public key line and drop its comment.
pub(crate) fn normalize_public_key(text: &str) -> RegistryResult<(PublicKey, String)> {
    let text = text.trim();
    let key = PublicKey::from_openssh(text).map_err(|e| RegistryError::InvalidPublicKey(e.to_string()))?;
    let line = text.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
    Ok((key, line))
}

pub(crate) fn key_matches(stored: &str, key: &PublicKey) -> bool {
    PublicKey::from_openssh(stored).is_ok_and(|candidate| candidate.key_data() == key.key_data())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        TomlFileSource,
        test_support::{FailingSource, MemorySource, generate_public_key},
    };

    #[tokio::test]
    async fn save_and_load_through_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let source: Arc<dyn RegistrySource> = Arc::new(TomlFileSource::new(dir.path().join("registry.reg")));

        let registry = Registry::load(vec![source.clone()]).await.unwrap();
        registry.add_user("alice", &generate_public_key()).await.unwrap();
        registry.save().await.unwrap();

        let reloaded = Registry::load(vec![source]).await.unwrap();
        let users = reloaded.get_users(Default::default()).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "alice");
    }

    #[tokio::test]
    async fn save_succeeds_when_one_source_succeeds() {
        let memory = Arc::new(MemorySource::default());
        let registry = Registry::from_data(
            RegistryData::default(),
            vec![Arc::new(FailingSource), memory.clone() as Arc<dyn RegistrySource>],
        );
        registry.save().await.unwrap();
        assert_eq!(memory.saves(), 1);
    }

    #[tokio::test]
    async fn save_fails_when_every_source_fails() {
        let registry = Registry::from_data(
            RegistryData::default(),
            vec![Arc::new(FailingSource), Arc::new(FailingSource)],
        );
        let err = registry.save().await.unwrap_err();
        assert!(matches!(err, RegistryError::SaveFailed(_)));
    }

    #[tokio::test]
    async fn load_uses_first_source_with_data() {
        let empty = Arc::new(MemorySource::default());
        let seeded = Arc::new(MemorySource::default());
        let seed = Registry::in_memory();
        seed.add_user("bob", &generate_public_key()).await.unwrap();
        seeded.save(&seed.to_bytes().await.unwrap()).await.unwrap();

        let registry = Registry::load(vec![
            Arc::new(FailingSource),
            empty as Arc<dyn RegistrySource>,
            seeded as Arc<dyn RegistrySource>,
        ])
        .await
        .unwrap();
        assert!(registry.get_user(Some("bob"), None, Default::default()).await.is_ok());
    }

    #[tokio::test]
    async fn corrupt_source_is_an_error() {
        let source = Arc::new(MemorySource::default());
        source.save(b"this is = = not toml").await.unwrap();
        let err = Registry::load(vec![source as Arc<dyn RegistrySource>])
            .await
            .err()
            .expect("parse error");
        assert!(matches!(err, RegistryError::Parse { .. }));
    }

    #[test]
    fn key_normalization_strips_comment() {
        let line = generate_public_key();
        let (_, normalized) = normalize_public_key(&format!("{line} alice@laptop")).unwrap();
        assert_eq!(normalized, line);
        assert!(normalize_public_key("ssh-ed25519 not-base64").is_err());
    }
}
