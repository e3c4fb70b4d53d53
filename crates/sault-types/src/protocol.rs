//! Wire envelopes carried over control sessions.
//!
//! A command travels inside the payload of an SSH `exec` request. sault's own client encodes a
//! [`CommandMsg`] with SSH wire rules (length-prefixed strings, one-byte booleans); native OpenSSH
//! clients send plain text such as `whoami` or `user list --admin`, which is tokenized into an
//! argv and marked as coming from a native client. Replies are raw channel bytes: a JSON
//! [`ResponseMsg`] for sault clients, rendered text for native ones.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit status sent after every handled command, success or not.
pub const EXIT_STATUS_SUCCESS: u32 = 0;
/// Sent when a control channel receives a request other than `exec`.
pub const EXIT_STATUS_NOT_ALLOWED: u32 = 1;
/// Sent when an `exec` payload cannot be parsed in either form.
pub const EXIT_STATUS_INVALID_REQUEST: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("exec payload is empty")]
    EmptyPayload,
    #[error("exec payload is truncated")]
    Truncated,
    #[error("exec payload has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("exec payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("command name is empty")]
    EmptyName,
    #[error("invalid boolean byte {0}")]
    InvalidBool(u8),
}

/// Command envelope. `data` is JSON whose schema depends on `name`; for native clients it is the
/// JSON array of the remaining argv tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMsg {
    pub name: String,
    pub data: Vec<u8>,
    pub is_sault_client: bool,
}

impl CommandMsg {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            is_sault_client: true,
        }
    }

    /// SSH wire encoding: `string name`, `string data`, `boolean is_sault_client`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.name.len() + self.data.len());
        put_string(&mut out, self.name.as_bytes());
        put_string(&mut out, &self.data);
        out.push(u8::from(self.is_sault_client));
        out
    }

    /// Strict decoding of [`CommandMsg::encode`] output; any leftover byte is an error.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader { buf: bytes };
        let name = reader.string()?;
        let data = reader.string()?.to_vec();
        let is_sault_client = reader.boolean()?;
        if !reader.buf.is_empty() {
            return Err(ProtocolError::TrailingBytes(reader.buf.len()));
        }
        let name = std::str::from_utf8(name).map_err(|_| ProtocolError::InvalidUtf8)?;
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        Ok(Self {
            name: name.to_string(),
            data,
            is_sault_client,
        })
    }

    /// Parse a whitespace separated command line as sent by `ssh sault <name> <args...>`.
    pub fn from_argv(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)?;
        let mut tokens = text.split_whitespace();
        let name = tokens.next().ok_or(ProtocolError::EmptyPayload)?;
        let args: Vec<&str> = tokens.collect();
        Ok(Self {
            name: name.to_string(),
            data: serde_json::Value::from(args).to_string().into_bytes(),
            is_sault_client: false,
        })
    }

    /// Binary envelope first, argv fallback second.
    pub fn from_exec_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyPayload);
        }
        Self::decode(payload).or_else(|_| Self::from_argv(payload))
    }

    /// Argv tokens of a native command; empty for sault clients.
    pub fn native_args(&self) -> Vec<String> {
        if self.is_sault_client {
            return Vec::new();
        }
        serde_json::from_slice(&self.data).unwrap_or_default()
    }
}

fn put_string(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    fn string(&mut self) -> Result<&'a [u8], ProtocolError> {
        let (len, rest) = self.buf.split_first_chunk::<4>().ok_or(ProtocolError::Truncated)?;
        let len = u32::from_be_bytes(*len) as usize;
        if rest.len() < len {
            return Err(ProtocolError::Truncated);
        }
        let (value, rest) = rest.split_at(len);
        self.buf = rest;
        Ok(value)
    }

    fn boolean(&mut self) -> Result<bool, ProtocolError> {
        let (byte, rest) = self.buf.split_first().ok_or(ProtocolError::Truncated)?;
        self.buf = rest;
        match byte {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(*other)),
        }
    }
}

/// Error kinds visible to clients, serialized as integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ErrorType {
    Internal,
    CommandNotFound,
    InvalidRequest,
    Prohibited,
    Registry,
    DialFailed,
    AuthFailed,
    SaveFailed,
}

impl From<ErrorType> for u8 {
    fn from(value: ErrorType) -> Self {
        match value {
            ErrorType::Internal => 1,
            ErrorType::CommandNotFound => 2,
            ErrorType::InvalidRequest => 3,
            ErrorType::Prohibited => 4,
            ErrorType::Registry => 5,
            ErrorType::DialFailed => 6,
            ErrorType::AuthFailed => 7,
            ErrorType::SaveFailed => 8,
        }
    }
}

impl From<u8> for ErrorType {
    fn from(value: u8) -> Self {
        match value {
            2 => ErrorType::CommandNotFound,
            3 => ErrorType::InvalidRequest,
            4 => ErrorType::Prohibited,
            5 => ErrorType::Registry,
            6 => ErrorType::DialFailed,
            7 => ErrorType::AuthFailed,
            8 => ErrorType::SaveFailed,
            _ => ErrorType::Internal,
        }
    }
}

impl ErrorType {
    /// Suggested remedy shown next to the error, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ErrorType::DialFailed => {
                Some("check the host address and that sshd is listening; use --force to save anyway or --skiptest to skip the check")
            }
            ErrorType::AuthFailed => {
                Some("install sault's client key on the host (host inject); use --force to save anyway or --skiptest to skip the check")
            }
            ErrorType::Prohibited => Some("this command requires an admin user"),
            ErrorType::CommandNotFound => Some("run `sault --help` for the list of commands"),
            ErrorType::SaveFailed => Some("the change was not persisted; check the registry sources in sault.conf"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorType::Internal => "internal error",
            ErrorType::CommandNotFound => "command not found",
            ErrorType::InvalidRequest => "invalid request",
            ErrorType::Prohibited => "prohibited",
            ErrorType::Registry => "registry error",
            ErrorType::DialFailed => "dial failed",
            ErrorType::AuthFailed => "authentication failed",
            ErrorType::SaveFailed => "registry save failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseMsgError {
    pub error_type: ErrorType,
    pub message: String,
}

/// Reply envelope; a missing `Err` means success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseMsg {
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub err: Option<ResponseMsgError>,
}

impl ResponseMsg {
    pub fn ok(data: serde_json::Value) -> Self {
        Self { data, err: None }
    }

    pub fn error(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            data: serde_json::Value::Null,
            err: Some(ResponseMsgError {
                error_type,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}
