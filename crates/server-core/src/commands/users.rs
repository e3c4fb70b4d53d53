//! `whoami`, `publickey` and the `user.*` commands.

use async_trait::async_trait;
use sault_types::{
    User, UserFilter, commands::{
        LinkState, PublicKeyRequest, UserActiveRequest, UserAddRequest, UserAdminRequest, UserEntry, UserLinkRequest, UserListRequest, UserRemoveRequest, UserUpdateRequest, WhoamiRequest
    }
};
use state_store::UserUpdate as RegistryUserUpdate;
use tracing::info;

use super::{ApplyCommand, CommandError, CommandResult, save};
use crate::ServerContext;

pub struct Whoami;

#[async_trait]
impl ApplyCommand for Whoami {
    type Request = WhoamiRequest;

    async fn apply(&self, caller: &User, _request: WhoamiRequest, ctx: &ServerContext) -> CommandResult<User> {
        Ok(ctx.registry.get_user(Some(&caller.id), None, UserFilter::ANY).await?)
    }
}

/// Replace the caller's own public key.
pub struct SetPublicKey;

#[async_trait]
impl ApplyCommand for SetPublicKey {
    type Request = PublicKeyRequest;

    async fn apply(&self, caller: &User, request: PublicKeyRequest, ctx: &ServerContext) -> CommandResult<User> {
        let update = RegistryUserUpdate {
            new_id: None,
            public_key: Some(request.public_key),
        };
        let user = ctx.registry.update_user(&caller.id, update).await?;
        save(ctx).await?;
        info!(user = %user.id, "public key replaced");
        Ok(user)
    }
}

pub struct UserAdd;

#[async_trait]
impl ApplyCommand for UserAdd {
    type Request = UserAddRequest;

    async fn apply(&self, caller: &User, request: UserAddRequest, ctx: &ServerContext) -> CommandResult<User> {
        let user = ctx.registry.add_user(&request.id, &request.public_key).await?;
        save(ctx).await?;
        info!(user = %user.id, by = %caller.id, "user added");
        Ok(user)
    }
}

pub struct UserRemove;

#[async_trait]
impl ApplyCommand for UserRemove {
    type Request = UserRemoveRequest;

    async fn apply(&self, caller: &User, request: UserRemoveRequest, ctx: &ServerContext) -> CommandResult<()> {
        if request.id == caller.id {
            return Err(CommandError::InvalidRequest("you cannot remove yourself".into()));
        }
        ctx.registry.remove_user(&request.id).await?;
        save(ctx).await?;
        info!(user = %request.id, by = %caller.id, "user removed");
        Ok(())
    }
}

pub struct UserUpdate;

#[async_trait]
impl ApplyCommand for UserUpdate {
    type Request = UserUpdateRequest;

    async fn apply(&self, caller: &User, request: UserUpdateRequest, ctx: &ServerContext) -> CommandResult<User> {
        let update = RegistryUserUpdate {
            new_id: request.new_id,
            public_key: request.public_key,
        };
        let user = ctx.registry.update_user(&request.id, update).await?;
        save(ctx).await?;
        info!(user = %request.id, now = %user.id, by = %caller.id, "user updated");
        Ok(user)
    }
}

pub struct UserList;

#[async_trait]
impl ApplyCommand for UserList {
    type Request = UserListRequest;

    async fn apply(&self, _caller: &User, request: UserListRequest, ctx: &ServerContext) -> CommandResult<Vec<UserEntry>> {
        let filter = UserFilter {
            active: request.active,
            admin: request.admin,
        };
        let mut entries = Vec::new();
        for user in ctx.registry.get_users(filter).await {
            let links = ctx.registry.links_of_user(&user.id).await;
            entries.push(UserEntry { user, links });
        }
        Ok(entries)
    }
}

pub struct UserLink;

#[async_trait]
impl ApplyCommand for UserLink {
    type Request = UserLinkRequest;

    async fn apply(&self, caller: &User, request: UserLinkRequest, ctx: &ServerContext) -> CommandResult<LinkState> {
        let UserLinkRequest {
            user_id,
            host_id,
            accounts,
            all,
            unlink,
        } = request;
        if !all && accounts.is_empty() {
            return Err(CommandError::InvalidRequest("give at least one account or --all".into()));
        }

        let registry = &ctx.registry;
        let link = match (unlink, all) {
            (false, true) => Some(registry.link_all(&user_id, &host_id).await?),
            (false, false) => Some(registry.link(&user_id, &host_id, &accounts).await?),
            (true, true) => {
                registry.unlink_all(&user_id, &host_id).await?;
                None
            }
            (true, false) => registry.unlink(&user_id, &host_id, &accounts).await?,
        };
        save(ctx).await?;
        info!(user = %user_id, host = %host_id, unlink, all, by = %caller.id, "link changed");
        Ok(LinkState { user_id, host_id, link })
    }
}

pub struct UserAdmin;

#[async_trait]
impl ApplyCommand for UserAdmin {
    type Request = UserAdminRequest;

    async fn apply(&self, caller: &User, request: UserAdminRequest, ctx: &ServerContext) -> CommandResult<User> {
        if request.id == caller.id && !request.admin {
            return Err(CommandError::InvalidRequest("you cannot revoke your own admin flag".into()));
        }
        let user = ctx.registry.set_user_admin(&request.id, request.admin).await?;
        save(ctx).await?;
        info!(user = %user.id, admin = user.is_admin, by = %caller.id, "admin flag changed");
        Ok(user)
    }
}

pub struct UserActive;

#[async_trait]
impl ApplyCommand for UserActive {
    type Request = UserActiveRequest;

    async fn apply(&self, caller: &User, request: UserActiveRequest, ctx: &ServerContext) -> CommandResult<User> {
        if request.id == caller.id && !request.active {
            return Err(CommandError::InvalidRequest("you cannot deactivate yourself".into()));
        }
        let user = ctx.registry.set_user_active(&request.id, request.active).await?;
        save(ctx).await?;
        info!(user = %user.id, active = user.is_active, by = %caller.id, "active flag changed");
        Ok(user)
    }
}
