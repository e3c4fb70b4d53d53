//! SSH plumbing shared by the sault server and client: algorithm preferences, russh
//! configurations and key file handling.

pub mod crypto;
pub mod error;
pub mod keys;

pub use error::{SshCoreError, SshResult};
