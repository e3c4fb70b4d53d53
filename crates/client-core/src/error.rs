use sault_types::{ErrorType, validation::ValidationError};
use thiserror::Error;

/// Errors that can occur in client-core operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Identity file could not be loaded
    #[error(transparent)]
    Key(#[from] ssh_core::SshCoreError),

    /// `--at` could not be parsed
    #[error(transparent)]
    Address(#[from] ValidationError),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The server answered with an error
    #[error("{error_type}: {message}")]
    Response { error_type: ErrorType, message: String },

    /// The server answered with something that is not a response
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Suggested remedy shown under the error message.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ClientError::Response { error_type, .. } => error_type.hint(),
            ClientError::AuthFailed(_) => Some("check --identity and that your user is registered and active"),
            ClientError::Address(_) => Some("use --at [name@]host[:port]"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_errors_carry_the_server_hint() {
        let err = ClientError::Response {
            error_type: ErrorType::DialFailed,
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "dial failed: connection refused");
        assert!(err.hint().unwrap().contains("--force"));
        assert!(ClientError::Other("x".into()).hint().is_none());
    }
}
