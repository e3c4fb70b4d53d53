//! Shared type definitions for sault
//!
//! This crate contains the registry data model, the wire envelopes exchanged over control
//! sessions, the typed command requests and the on-disk configuration shared by the server,
//! the client and the CLI.

pub mod commands;
pub mod config;
pub mod hosts;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod users;
pub mod validation;

pub use hosts::{Host, HostFilter};
pub use identity::LoginIdentity;
pub use protocol::{CommandMsg, ErrorType, ResponseMsg, ResponseMsgError};
pub use registry::{Link, RegistryData};
pub use users::{User, UserFilter};
