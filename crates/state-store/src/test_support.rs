//! Registry sources and key material for tests.
//!
//! Public so the server crates can build registries without touching the filesystem.

use std::sync::{
    Mutex, atomic::{AtomicUsize, Ordering}
};

use async_trait::async_trait;
use russh::keys::{Algorithm, PrivateKey, PublicKey, ssh_key::rand_core::OsRng};

use crate::{RegistryError, RegistryResult, RegistrySource};

/// A source that refuses every read and write.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSource;

#[async_trait]
impl RegistrySource for FailingSource {
    fn name(&self) -> String {
        "failing".to_string()
    }

    async fn load(&self) -> RegistryResult<Option<Vec<u8>>> {
        Err(RegistryError::Source("source unavailable".into()))
    }

    async fn save(&self, _bytes: &[u8]) -> RegistryResult<()> {
        Err(RegistryError::Source("source is read-only".into()))
    }
}

/// Keeps the last saved bytes in memory and counts writes.
#[derive(Debug, Default)]
pub struct MemorySource {
    bytes: Mutex<Option<Vec<u8>>>,
    saves: AtomicUsize,
}

impl MemorySource {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Option<Vec<u8>> {
        self.bytes.lock().ok().and_then(|b| b.clone())
    }
}

#[async_trait]
impl RegistrySource for MemorySource {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn load(&self) -> RegistryResult<Option<Vec<u8>>> {
        Ok(self.contents())
    }

    async fn save(&self, bytes: &[u8]) -> RegistryResult<()> {
        let mut slot = self
            .bytes
            .lock()
            .map_err(|_| RegistryError::Source("memory source poisoned".into()))?;
        *slot = Some(bytes.to_vec());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A fresh ed25519 key pair.
pub fn generate_key_pair() -> (PrivateKey, PublicKey) {
    let private = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).expect("ed25519 key generation");
    let public = private.public_key().clone();
    (private, public)
}

/// A fresh ed25519 public key in OpenSSH format, without comment.
pub fn generate_public_key() -> String {
    let (_, public) = generate_key_pair();
    public.to_openssh().expect("encode public key")
}
