//! Outbound SSH connections from sault to registered hosts.
//!
//! Used both by proxy sessions and by the connectivity test run from `host.add`,
//! `host.update` and `host.alive`.

use std::{sync::Arc, time::Duration};

use russh::{
    Disconnect, client, keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey}
};
use sault_types::Host;
use ssh_core::crypto::client_config;
use tracing::debug;

use crate::error::{ServerError, ServerResult};

/// Client handler for connections that carry no forwarded channels back.
pub(crate) struct ProbeHandler;

impl client::Handler for ProbeHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// The key sault presents to `host`: its own key when set, the global client key otherwise.
pub(crate) fn client_key_for(host: &Host, global: &Arc<PrivateKey>) -> ServerResult<Arc<PrivateKey>> {
    match &host.client_private_key {
        Some(text) => Ok(Arc::new(ssh_core::keys::load_private_key_from_str(text, None)?)),
        None => Ok(global.clone()),
    }
}

/// Dial `host` and authenticate as `account`, all within `timeout`.
///
/// Transport failures map to [`ServerError::DialFailed`], a rejected key to
/// [`ServerError::AuthFailed`].
pub(crate) async fn connect_host<H>(
    host: &Host,
    account: &str,
    key: Arc<PrivateKey>,
    timeout: Duration,
    handler: H,
) -> ServerResult<client::Handle<H>>
where
    H: client::Handler<Error = russh::Error> + Send + 'static,
{
    let address = host.address();
    debug!(host = %host.id, address = %address, account, "dialing host");

    let connect = client::connect(client_config(), (host.host_name.as_str(), host.port), handler);
    let mut handle = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| ServerError::dial_failed(&address, "timed out"))?
        .map_err(|e| ServerError::dial_failed(&address, e))?;

    let hash_alg = if key.algorithm().is_rsa() {
        handle.best_supported_rsa_hash().await.unwrap_or(None).flatten()
    } else {
        None
    };
    let auth = handle.authenticate_publickey(account.to_string(), PrivateKeyWithHashAlg::new(key, hash_alg));
    let result = tokio::time::timeout(timeout, auth)
        .await
        .map_err(|_| ServerError::dial_failed(&address, "authentication timed out"))?
        .map_err(|e| ServerError::dial_failed(&address, e))?;

    match result {
        client::AuthResult::Success => Ok(handle),
        client::AuthResult::Failure { .. } => Err(ServerError::auth_failed(address, account)),
    }
}

/// Connectivity test: reach the host and log in with its first account.
/// A host without accounts is only dialed.
pub(crate) async fn check_host(host: &Host, global_key: &Arc<PrivateKey>, timeout: Duration) -> ServerResult<()> {
    let key = client_key_for(host, global_key)?;
    let Some(account) = host.accounts.first() else {
        let address = host.address();
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host.host_name.as_str(), host.port)))
            .await
            .map_err(|_| ServerError::dial_failed(&address, "timed out"))?
            .map_err(|e| ServerError::dial_failed(&address, e))?;
        return Ok(());
    };

    let handle = connect_host(host, account, key, timeout, ProbeHandler).await?;
    let _ = handle.disconnect(Disconnect::ByApplication, "connectivity check", "en").await;
    Ok(())
}
