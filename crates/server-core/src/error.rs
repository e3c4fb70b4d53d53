use sault_types::{ErrorType, config::ConfigError};
use state_store::RegistryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    SshKey(#[from] ssh_core::SshCoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The host could not be reached at the TCP or SSH transport level.
    #[error("dial error: {address}: {message}")]
    DialFailed { address: String, message: String },

    /// The host was reached but refused sault's credentials.
    #[error("auth failed: {address} rejected account '{account}'")]
    AuthFailed { address: String, account: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn dial_failed(address: impl Into<String>, message: impl ToString) -> Self {
        Self::DialFailed {
            address: address.into(),
            message: message.to_string(),
        }
    }

    pub fn auth_failed(address: impl Into<String>, account: impl Into<String>) -> Self {
        Self::AuthFailed {
            address: address.into(),
            account: account.into(),
        }
    }

    /// Error kind reported to control clients.
    pub fn error_type(&self) -> ErrorType {
        match self {
            ServerError::DialFailed { .. } => ErrorType::DialFailed,
            ServerError::AuthFailed { .. } => ErrorType::AuthFailed,
            ServerError::Registry(RegistryError::SaveFailed(_)) => ErrorType::SaveFailed,
            ServerError::Registry(_) => ErrorType::Registry,
            _ => ErrorType::Internal,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
