use std::path::PathBuf;

use sault_types::validation::ValidationError;
use thiserror::Error;

/// Errors raised by registry lookups, mutations and persistence.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("public key is already registered to user '{0}'")]
    DuplicatePublicKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("account '{account}' is not allowed on host '{host}'")]
    UnknownAccount { host: String, account: String },

    #[error("nothing to update")]
    NothingToUpdate,

    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to parse registry from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every configured source refused the write.
    #[error("failed to save registry: {0}")]
    SaveFailed(String),

    #[error("registry source error: {0}")]
    Source(String),
}

impl RegistryError {
    pub fn not_found(kind: &'static str, id: impl AsRef<str>) -> Self {
        Self::NotFound {
            kind,
            id: id.as_ref().to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, id: impl AsRef<str>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.as_ref().to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;
