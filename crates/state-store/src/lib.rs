//! Registry storage for sault: users, hosts and the links between them.
//!
//! The [`Registry`] keeps the authoritative state in memory behind an async lock and persists it
//! to one or more [`RegistrySource`]s.
//!
//! ## Module Structure
//!
//! - `registry`: the in-memory store, split into user, host and link operations
//! - `source`: persistence backends (TOML files)
//! - `test_support`: sources and keys for tests
//! - `error`: error types and results

mod error;
mod registry;
mod source;
pub mod test_support;

pub use error::{RegistryError, RegistryResult};
pub use registry::{HostUpdate, Registry, UserUpdate};
pub use source::{RegistrySource, TomlFileSource, sources_from_config};
