use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Key file could not be read or written
    #[error("key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key material could not be parsed or encoded
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Private key is encrypted and no passphrase was given
    #[error("encrypted private key requires a passphrase")]
    PassphraseRequired,

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    pub fn key_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::KeyFile {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_key(message: impl ToString) -> Self {
        Self::InvalidKey(message.to_string())
    }
}
