//! Administrative commands served over control sessions.
//!
//! The [`CommandTable`] maps command names to [`Command`] trait objects. Most commands are
//! written against the typed [`ApplyCommand`] trait, which the blanket implementation turns into
//! a [`Command`]: it decodes the request (JSON for sault clients, argv for native ones), applies
//! it to the registry and hands back the JSON response.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sault_types::{
    CommandMsg, ErrorType, ResponseMsg, User, commands::{CommandRequest, NativeArgs}, protocol::{EXIT_STATUS_INVALID_REQUEST, EXIT_STATUS_SUCCESS}
};
use state_store::RegistryError;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{ServerContext, error::ServerError};

mod hosts;
mod render;
mod server;
mod users;

pub use hosts::{
    HostActive, HostAdd, HostAlive, HostClientKey, HostList, HostRemove, HostUpdate
};
pub use server::ServerRegistry;
pub use users::{
    SetPublicKey, UserActive, UserAdd, UserAdmin, UserLink, UserList, UserRemove, UserUpdate, Whoami
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{0}' not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("'{0}' requires an admin user")]
    Prohibited(String),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl From<RegistryError> for CommandError {
    fn from(value: RegistryError) -> Self {
        Self::Server(ServerError::Registry(value))
    }
}

impl CommandError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            CommandError::NotFound(_) => ErrorType::CommandNotFound,
            CommandError::InvalidRequest(_) => ErrorType::InvalidRequest,
            CommandError::Prohibited(_) => ErrorType::Prohibited,
            CommandError::Server(e) => e.error_type(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// One entry of the command table.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether non-admin users may run it.
    fn self_service(&self) -> bool;

    async fn respond(&self, caller: &User, msg: &CommandMsg, ctx: &ServerContext) -> CommandResult<serde_json::Value>;
}

/// Server side of a typed [`CommandRequest`].
#[async_trait]
pub trait ApplyCommand: Send + Sync + 'static {
    type Request: CommandRequest;

    async fn apply(
        &self,
        caller: &User,
        request: Self::Request,
        ctx: &ServerContext,
    ) -> CommandResult<<Self::Request as CommandRequest>::Response>;
}

#[async_trait]
impl<T: ApplyCommand> Command for T {
    fn name(&self) -> &'static str {
        T::Request::NAME
    }

    fn self_service(&self) -> bool {
        T::Request::SELF_SERVICE
    }

    async fn respond(&self, caller: &User, msg: &CommandMsg, ctx: &ServerContext) -> CommandResult<serde_json::Value> {
        let request = decode_request::<T::Request>(msg)?;
        let response = self.apply(caller, request, ctx).await?;
        serde_json::to_value(&response).map_err(|e| CommandError::Server(e.into()))
    }
}

fn decode_request<R: CommandRequest>(msg: &CommandMsg) -> CommandResult<R> {
    if msg.is_sault_client {
        let data: &[u8] = if msg.data.is_empty() { b"{}" } else { &msg.data };
        return serde_json::from_slice(data).map_err(|e| CommandError::InvalidRequest(e.to_string()));
    }
    R::from_native(&NativeArgs::parse(&msg.native_args())).map_err(CommandError::InvalidRequest)
}

/// Persist the registry; mutating commands call this before answering.
pub(crate) async fn save(ctx: &ServerContext) -> CommandResult<()> {
    ctx.registry.save().await.map_err(CommandError::from)
}

/// Bytes to write back on the control channel and the exit status to send after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub body: Vec<u8>,
    pub exit_status: u32,
}

/// Name to command map.
#[derive(Default)]
pub struct CommandTable {
    commands: BTreeMap<&'static str, Box<dyn Command>>,
}

impl CommandTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every command sault ships with.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(Whoami);
        table.register(SetPublicKey);
        table.register(UserAdd);
        table.register(UserRemove);
        table.register(UserUpdate);
        table.register(UserList);
        table.register(UserLink);
        table.register(UserAdmin);
        table.register(UserActive);
        table.register(HostAdd);
        table.register(HostRemove);
        table.register(HostUpdate);
        table.register(HostList);
        table.register(HostActive);
        table.register(HostAlive);
        table.register(HostClientKey);
        table.register(ServerRegistry);
        table
    }

    pub fn register<C: Command + 'static>(&mut self, command: C) {
        self.commands.insert(command.name(), Box::new(command));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Command> {
        self.commands.get(name).map(|c| c.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.commands.keys().copied()
    }

    /// Native clients may write `user add ...` for `user.add ...`.
    fn resolve(&self, msg: &mut CommandMsg) -> bool {
        if self.commands.contains_key(msg.name.as_str()) {
            return true;
        }
        if msg.is_sault_client {
            return false;
        }
        let mut args = msg.native_args();
        if args.is_empty() {
            return false;
        }
        let grouped = format!("{}.{}", msg.name, args[0]);
        if !self.commands.contains_key(grouped.as_str()) {
            return false;
        }
        args.remove(0);
        msg.name = grouped;
        msg.data = serde_json::Value::from(args).to_string().into_bytes();
        true
    }

    /// Run one `exec` payload on behalf of `caller`.
    pub async fn dispatch(&self, caller: &User, payload: &[u8], ctx: &ServerContext) -> Dispatch {
        let mut msg = match CommandMsg::from_exec_payload(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(user = %caller.id, error = %e, "malformed command payload");
                return Dispatch {
                    body: render::native_error(ErrorType::InvalidRequest, &e.to_string()),
                    exit_status: EXIT_STATUS_INVALID_REQUEST,
                };
            }
        };

        let result = self.run(caller, &mut msg, ctx).await;
        match &result {
            Ok(_) => info!(user = %caller.id, command = %msg.name, "command completed"),
            Err(e) => warn!(user = %caller.id, command = %msg.name, error = %e, "command failed"),
        }

        let body = if msg.is_sault_client {
            let response = match result {
                Ok(data) => ResponseMsg::ok(data),
                Err(e) => ResponseMsg::error(e.error_type(), e.to_string()),
            };
            encode_response(&response)
        } else {
            match result {
                Ok(data) => render::native_data(&data),
                Err(e) => render::native_error(e.error_type(), &e.to_string()),
            }
        };
        Dispatch {
            body,
            exit_status: EXIT_STATUS_SUCCESS,
        }
    }

    async fn run(&self, caller: &User, msg: &mut CommandMsg, ctx: &ServerContext) -> CommandResult<serde_json::Value> {
        if !self.resolve(msg) {
            return Err(CommandError::NotFound(msg.name.clone()));
        }
        let command = self
            .get(&msg.name)
            .ok_or_else(|| CommandError::NotFound(msg.name.clone()))?;
        if !command.self_service() && !caller.is_admin {
            return Err(CommandError::Prohibited(msg.name.clone()));
        }
        debug!(user = %caller.id, command = %msg.name, sault_client = msg.is_sault_client, "running command");
        command.respond(caller, msg, ctx).await
    }
}

/// Body sent when even the internal error response cannot be encoded.
const INTERNAL_ERROR_BODY: &[u8] = br#"{"Data":null,"Err":{"ErrorType":1,"Message":"internal error"}}"#;

/// JSON body of a sault-client response. Encoding failures become an internal error response.
fn encode_response(response: &ResponseMsg) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode command response");
        serde_json::to_vec(&ResponseMsg::error(ErrorType::Internal, format!("failed to encode response: {e}")))
            .unwrap_or_else(|_| INTERNAL_ERROR_BODY.to_vec())
    })
}
