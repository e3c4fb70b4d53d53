//! Public-key authentication: resolve the login name and key to a control or proxy session.

use russh::{keys::PublicKey, server::Auth};
use sault_types::{Host, HostFilter, LoginIdentity, User, UserFilter, identity::IdentityError};
use state_store::Registry;
use thiserror::Error;
use tracing::{info, warn};

use super::Connection;

/// What an accepted connection is allowed to do.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// Admin session against the server itself; only `exec` commands.
    Control { user: User },
    /// Transparent relay to `account` on `host`.
    Proxy { user: User, host: Host, account: String },
}

impl Authorization {
    pub fn user(&self) -> &User {
        match self {
            Authorization::Control { user } | Authorization::Proxy { user, .. } => user,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Login(#[from] IdentityError),
    #[error("no active user has this public key")]
    UnknownKey,
    #[error("control sessions take no account")]
    AccountOnControl,
    #[error("user '{0}' is not an admin")]
    NotAdmin(String),
    #[error("no active host '{0}'")]
    UnknownHost(String),
    #[error("account '{account}' is not allowed on host '{host}'")]
    AccountNotAllowed { host: String, account: String },
    #[error("user '{user}' is not linked to {account}+{host}")]
    NotLinked { user: String, host: String, account: String },
}

/// Decide whether `key` may log in as `login`.
///
/// Admins reach any account a host declares; everybody else needs a link.
pub async fn authorize(registry: &Registry, login: &str, key: &PublicKey, control_name: &str) -> Result<Authorization, AuthError> {
    let identity = LoginIdentity::parse(login)?;
    let user = registry
        .get_user(None, Some(key), UserFilter::ACTIVE)
        .await
        .map_err(|_| AuthError::UnknownKey)?;

    if identity.is_control(control_name) {
        if !identity.account.is_empty() {
            return Err(AuthError::AccountOnControl);
        }
        if !user.is_admin {
            return Err(AuthError::NotAdmin(user.id));
        }
        return Ok(Authorization::Control { user });
    }

    let host = registry
        .get_host(&identity.host_id, HostFilter::ACTIVE)
        .await
        .map_err(|_| AuthError::UnknownHost(identity.host_id.clone()))?;
    if !host.has_account(&identity.account) {
        return Err(AuthError::AccountNotAllowed {
            host: host.id,
            account: identity.account,
        });
    }
    if !user.is_admin && !registry.is_linked(&user.id, &host.id, &identity.account).await {
        return Err(AuthError::NotLinked {
            user: user.id,
            host: host.id,
            account: identity.account,
        });
    }
    Ok(Authorization::Proxy {
        user,
        host,
        account: identity.account,
    })
}

impl Connection {
    pub(super) async fn handle_auth_publickey(&mut self, login: &str, key: &PublicKey) -> Result<Auth, russh::Error> {
        match authorize(&self.ctx.registry, login, key, &self.ctx.server_name).await {
            Ok(authorization) => {
                info!(
                    peer = %self.peer(),
                    login,
                    user = %authorization.user().id,
                    "public key accepted"
                );
                self.authorization = Some(authorization);
                Ok(Auth::Accept)
            }
            Err(e) => {
                warn!(peer = %self.peer(), login, error = %e, "public key rejected");
                Ok(Auth::reject())
            }
        }
    }
}
