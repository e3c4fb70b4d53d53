//! Syntax rules for user IDs, host IDs and account names.
use thiserror::Error;

pub const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} '{value}' is longer than {MAX_ID_LEN} characters")]
    TooLong { field: &'static str, value: String },

    #[error("{field} '{value}' contains invalid character '{ch}'")]
    InvalidChar { field: &'static str, value: String, ch: char },

    #[error("{field} '{value}' must start with a letter or digit")]
    InvalidStart { field: &'static str, value: String },

    #[error("invalid address '{0}': expected host[:port]")]
    InvalidAddress(String),
}

/// Validate an identifier. `+` is never accepted since it separates account and host in login names.
pub fn validate_id(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let Some(first) = value.chars().next() else {
        return Err(ValidationError::Empty { field });
    };
    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field,
            value: value.to_string(),
        });
    }
    if !first.is_ascii_alphanumeric() {
        return Err(ValidationError::InvalidStart {
            field,
            value: value.to_string(),
        });
    }
    if let Some(ch) = value.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))) {
        return Err(ValidationError::InvalidChar {
            field,
            value: value.to_string(),
            ch,
        });
    }
    Ok(())
}

/// Split `host[:port]`, accepting `[v6]:port` literals. Missing port falls back to `default_port`.
pub fn parse_host_address(value: &str, default_port: u16) -> Result<(String, u16), ValidationError> {
    let invalid = || ValidationError::InvalidAddress(value.to_string());
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid());
    }

    if let Some(rest) = value.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = match tail {
            "" => default_port,
            t => t.strip_prefix(':').and_then(|p| p.parse().ok()).ok_or_else(invalid)?,
        };
        return Ok((host.to_string(), port));
    }

    match value.rsplit_once(':') {
        // Bare IPv6 without brackets carries no port.
        Some((host, _)) if host.contains(':') => Ok((value.to_string(), default_port)),
        Some((host, port)) if !host.is_empty() => Ok((host.to_string(), port.parse().map_err(|_| invalid())?)),
        Some(_) => Err(invalid()),
        None => Ok((value.to_string(), default_port)),
    }
}
