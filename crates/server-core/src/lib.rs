//! sault server: SSH bastion that authorizes clients against the registry and either runs
//! admin commands (control sessions) or relays channels to a backend host (proxy sessions).
//!
//! ## Module Structure
//!
//! - `ssh_server`: listener, accept loop and startup from `sault.conf`
//! - `handler`: per-connection state, authorization, relay and control channels
//! - `commands`: the command table served over control sessions
//! - `upstream`: outbound connections to hosts and connectivity tests
//! - `setup`: config directory initialization and local prints
//! - `context`, `error`: shared runtime state and error types

pub mod commands;
mod context;
pub mod error;
mod handler;
pub mod setup;
pub mod ssh_server;
mod upstream;

pub use context::{DEFAULT_DIAL_TIMEOUT, ServerContext};
pub use error::{ServerError, ServerResult};
pub use handler::{AuthError, Authorization, authorize};
pub use ssh_server::{SaultServer, prepare, run_server};
