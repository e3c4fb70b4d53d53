//! `server.*` commands.

use async_trait::async_trait;
use sault_types::{User, commands::ServerRegistryRequest};

use super::{ApplyCommand, CommandError, CommandResult};
use crate::{ServerContext, error::ServerError};

/// Dump the registry as TOML.
pub struct ServerRegistry;

#[async_trait]
impl ApplyCommand for ServerRegistry {
    type Request = ServerRegistryRequest;

    async fn apply(&self, _caller: &User, _request: ServerRegistryRequest, ctx: &ServerContext) -> CommandResult<String> {
        let bytes = ctx.registry.to_bytes().await?;
        String::from_utf8(bytes).map_err(|e| CommandError::Server(ServerError::Internal(e.to_string())))
    }
}
