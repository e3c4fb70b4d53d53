use std::{sync::Arc, time::Duration};

use russh::keys::PrivateKey;
use sault_types::config::DEFAULT_SERVER_NAME;
use state_store::Registry;

use crate::commands::CommandTable;

/// Default limit for dialing and authenticating to a host.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime dependencies shared by every connection.
///
/// Everything a connection needs is passed in here explicitly so tests can build servers with
/// in-memory registries and custom command tables side by side.
#[derive(Clone)]
pub struct ServerContext {
    /// Login host ID selecting a control session.
    pub server_name: String,
    pub registry: Arc<Registry>,
    /// Global key presented to hosts that have no key of their own.
    pub client_key: Arc<PrivateKey>,
    pub commands: Arc<CommandTable>,
    pub dial_timeout: Duration,
}

impl ServerContext {
    pub fn new(registry: Arc<Registry>, client_key: PrivateKey) -> Self {
        Self {
            server_name: DEFAULT_SERVER_NAME.to_string(),
            registry,
            client_key: Arc::new(client_key),
            commands: Arc::new(CommandTable::standard()),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_commands(mut self, commands: CommandTable) -> Self {
        self.commands = Arc::new(commands);
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }
}
