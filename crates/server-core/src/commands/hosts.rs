//! `host.*` commands.

use async_trait::async_trait;
use sault_types::{
    Host, HostFilter, User, commands::{
        HostActiveRequest, HostAddRequest, HostAlive as HostAliveEntry, HostAliveRequest, HostClientKey as HostClientKeyResponse, HostClientKeyRequest, HostListRequest, HostRemoveRequest, HostUpdateRequest
    }
};
use state_store::{HostUpdate as RegistryHostUpdate, RegistryError};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{ApplyCommand, CommandError, CommandResult, save};
use crate::{
    ServerContext, error::ServerError, upstream::{check_host, client_key_for}
};

/// Run the connectivity test unless skipped. With `force` a failure is only logged.
async fn test_connectivity(host: &Host, force: bool, skip_test: bool, ctx: &ServerContext) -> CommandResult<()> {
    if skip_test {
        return Ok(());
    }
    match check_host(host, &ctx.client_key, ctx.dial_timeout).await {
        Ok(()) => Ok(()),
        Err(e) if force => {
            warn!(host = %host.id, error = %e, "connectivity test failed; saving anyway");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn validate_key(key: Option<&str>) -> CommandResult<()> {
    if let Some(text) = key {
        ssh_core::keys::load_private_key_from_str(text, None).map_err(|e| CommandError::Server(e.into()))?;
    }
    Ok(())
}

fn reserved(id: &str, ctx: &ServerContext) -> CommandResult<()> {
    if id == ctx.server_name {
        return Err(CommandError::InvalidRequest(format!("'{id}' is reserved for control sessions")));
    }
    Ok(())
}

pub struct HostAdd;

#[async_trait]
impl ApplyCommand for HostAdd {
    type Request = HostAddRequest;

    async fn apply(&self, caller: &User, request: HostAddRequest, ctx: &ServerContext) -> CommandResult<Host> {
        reserved(&request.id, ctx)?;
        validate_key(request.client_private_key.as_deref())?;
        if ctx.registry.get_host(&request.id, HostFilter::ANY).await.is_ok() {
            return Err(RegistryError::already_exists("host", &request.id).into());
        }

        let mut host = Host::new(request.id, request.host_name, request.port, request.accounts);
        host.is_active = request.is_active;
        host.client_private_key = request.client_private_key;
        test_connectivity(&host, request.force, request.skip_test, ctx).await?;

        let host = ctx.registry.add_host(host).await?;
        save(ctx).await?;
        info!(host = %host.id, address = %host.address(), by = %caller.id, "host added");
        Ok(host.redacted())
    }
}

pub struct HostRemove;

#[async_trait]
impl ApplyCommand for HostRemove {
    type Request = HostRemoveRequest;

    async fn apply(&self, caller: &User, request: HostRemoveRequest, ctx: &ServerContext) -> CommandResult<()> {
        ctx.registry.remove_host(&request.id).await?;
        save(ctx).await?;
        info!(host = %request.id, by = %caller.id, "host removed");
        Ok(())
    }
}

pub struct HostUpdate;

#[async_trait]
impl ApplyCommand for HostUpdate {
    type Request = HostUpdateRequest;

    async fn apply(&self, caller: &User, request: HostUpdateRequest, ctx: &ServerContext) -> CommandResult<Host> {
        if let Some(new_id) = &request.new_id {
            reserved(new_id, ctx)?;
        }
        validate_key(request.client_private_key.as_deref())?;

        let update = RegistryHostUpdate {
            new_id: request.new_id,
            host_name: request.host_name,
            port: request.port,
            accounts: request.accounts,
            client_private_key: request.client_private_key,
        };
        let current = ctx.registry.get_host(&request.id, HostFilter::ANY).await?;
        let next = update.apply_to(&current);
        let reachability_changed = next.host_name != current.host_name
            || next.port != current.port
            || next.accounts.first() != current.accounts.first()
            || next.client_private_key != current.client_private_key;
        if reachability_changed {
            test_connectivity(&next, request.force, request.skip_test, ctx).await?;
        }

        let host = ctx.registry.update_host(&request.id, update).await?;
        save(ctx).await?;
        info!(host = %request.id, now = %host.id, by = %caller.id, "host updated");
        Ok(host.redacted())
    }
}

pub struct HostList;

#[async_trait]
impl ApplyCommand for HostList {
    type Request = HostListRequest;

    async fn apply(&self, _caller: &User, request: HostListRequest, ctx: &ServerContext) -> CommandResult<Vec<Host>> {
        let filter = HostFilter { active: request.active };
        Ok(ctx.registry.get_hosts(filter).await.iter().map(Host::redacted).collect())
    }
}

pub struct HostActive;

#[async_trait]
impl ApplyCommand for HostActive {
    type Request = HostActiveRequest;

    async fn apply(&self, caller: &User, request: HostActiveRequest, ctx: &ServerContext) -> CommandResult<Host> {
        let host = ctx.registry.set_host_active(&request.id, request.active).await?;
        save(ctx).await?;
        info!(host = %host.id, active = host.is_active, by = %caller.id, "host active flag changed");
        Ok(host.redacted())
    }
}

/// Connectivity test of several hosts at once.
pub struct HostAlive;

#[async_trait]
impl ApplyCommand for HostAlive {
    type Request = HostAliveRequest;

    async fn apply(&self, _caller: &User, request: HostAliveRequest, ctx: &ServerContext) -> CommandResult<Vec<HostAliveEntry>> {
        let hosts = if request.ids.is_empty() {
            ctx.registry.get_hosts(HostFilter::ANY).await
        } else {
            let mut hosts = Vec::with_capacity(request.ids.len());
            for id in &request.ids {
                hosts.push(ctx.registry.get_host(id, HostFilter::ANY).await?);
            }
            hosts
        };

        let mut checks = JoinSet::new();
        for host in hosts {
            let key = ctx.client_key.clone();
            let timeout = ctx.dial_timeout;
            checks.spawn(async move {
                let result = check_host(&host, &key, timeout).await;
                (host.id, result)
            });
        }

        let mut entries = Vec::new();
        while let Some(joined) = checks.join_next().await {
            let (id, result) = joined.map_err(|e| CommandError::Server(ServerError::Internal(e.to_string())))?;
            entries.push(match result {
                Ok(()) => HostAliveEntry {
                    id,
                    alive: true,
                    error_type: None,
                    error: None,
                },
                Err(e) => HostAliveEntry {
                    id,
                    alive: false,
                    error_type: Some(e.error_type()),
                    error: Some(e.to_string()),
                },
            });
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

/// Address and public key sault uses for a host; feeds `host inject`.
pub struct HostClientKey;

#[async_trait]
impl ApplyCommand for HostClientKey {
    type Request = HostClientKeyRequest;

    async fn apply(&self, _caller: &User, request: HostClientKeyRequest, ctx: &ServerContext) -> CommandResult<HostClientKeyResponse> {
        let host = ctx.registry.get_host(&request.id, HostFilter::ANY).await?;
        let key = client_key_for(&host, &ctx.client_key)?;
        let public_key = ssh_core::keys::public_key_line(key.public_key()).map_err(ServerError::from)?;
        Ok(HostClientKeyResponse {
            id: host.id,
            host_name: host.host_name,
            port: host.port,
            accounts: host.accounts,
            public_key,
        })
    }
}
