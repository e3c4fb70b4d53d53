//! `host inject`: install sault's client key in a host's `authorized_keys`.
//!
//! The host is reached through a `direct-tcpip` channel of the control connection, so it only
//! has to be reachable from the sault server. The account logs in with its password once.

use russh::{ChannelMsg, client};
use sault_types::commands::{HostClientKey, HostClientKeyRequest};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::{ClientError, ClientHandler, ClientResult, SaultClient};

const ADDED: &str = "added";
const PRESENT: &str = "present";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectOutcome {
    pub host_id: String,
    pub account: String,
    /// `false` when the key was already authorized.
    pub added: bool,
}

/// Shell snippet appending `public_key` to `~/.ssh/authorized_keys` unless it is already there.
pub fn authorized_keys_script(public_key: &str) -> ClientResult<String> {
    let key = public_key.trim();
    if key.is_empty() || key.contains(['\'', '\n', '\r']) {
        return Err(ClientError::Other("refusing to inject a malformed public key".into()));
    }
    Ok(format!(
        "umask 077; mkdir -p ~/.ssh && touch ~/.ssh/authorized_keys && \
         if grep -qF '{key}' ~/.ssh/authorized_keys; then echo {PRESENT}; \
         else echo '{key}' >> ~/.ssh/authorized_keys && echo {ADDED}; fi"
    ))
}

/// Inject the client key sault uses for `host_id` as `account` (the host's first account when
/// `None`), logging in with `password`.
pub async fn inject_client_key(
    sault: &SaultClient,
    host_id: &str,
    account: Option<&str>,
    password: SecretString,
) -> ClientResult<InjectOutcome> {
    let key: HostClientKey = sault
        .request(&HostClientKeyRequest {
            id: host_id.to_string(),
        })
        .await?;
    let account = match account {
        Some(account) => account.to_string(),
        None => key
            .accounts
            .first()
            .cloned()
            .ok_or_else(|| ClientError::Other(format!("host '{host_id}' has no accounts")))?,
    };
    let script = authorized_keys_script(&key.public_key)?;

    info!(host = %key.id, address = %format!("{}:{}", key.host_name, key.port), account = %account, "injecting client key");
    let tunnel = sault.open_direct_tcpip(&key.host_name, key.port).await?;
    let mut host = client::connect_stream(ssh_core::crypto::client_config(), tunnel.into_stream(), ClientHandler).await?;

    let result = host
        .authenticate_password(account.clone(), password.expose_secret())
        .await?;
    if !result.success() {
        return Err(ClientError::AuthFailed(format!("{account}@{} rejected the password", key.id)));
    }

    let mut channel = host.channel_open_session().await?;
    channel.exec(true, script).await?;
    let mut output = Vec::new();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => output.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    let _ = host.disconnect(russh::Disconnect::ByApplication, "", "en").await;

    let output = String::from_utf8_lossy(&output);
    debug!(host = %key.id, ?exit_status, output = %output.trim(), "inject script finished");
    if exit_status != Some(0) {
        return Err(ClientError::Other(format!(
            "updating authorized_keys on '{}' failed: {}",
            key.id,
            output.trim()
        )));
    }
    Ok(InjectOutcome {
        host_id: key.id,
        account,
        added: output.lines().any(|line| line.trim() == ADDED),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_checks_before_appending() {
        let script = authorized_keys_script("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA\n").unwrap();
        assert!(script.contains("grep -qF 'ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA'"));
        assert!(script.contains(">> ~/.ssh/authorized_keys"));
        assert!(script.starts_with("umask 077"));
    }

    #[test]
    fn quoted_keys_are_refused() {
        assert!(authorized_keys_script("ssh-ed25519 AAAA'; rm -rf ~; echo '").is_err());
        assert!(authorized_keys_script("  ").is_err());
    }
}
