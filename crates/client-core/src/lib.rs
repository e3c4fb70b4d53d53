//! Client side of sault's control sessions.
//!
//! [`SaultClient`] logs in to the server's control name with the user's own key and runs typed
//! [`CommandRequest`]s over `exec`, one channel per command. [`inject_client_key`] installs
//! sault's client key on a host, tunnelled through the control connection.

pub mod error;
mod inject;
mod target;

use std::{path::Path, sync::Arc};

pub use error::{ClientError, ClientResult};
pub use inject::{InjectOutcome, authorized_keys_script, inject_client_key};
use russh::{
    Channel, ChannelMsg, client, keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey}
};
use sault_types::{
    CommandMsg, ResponseMsg, commands::CommandRequest, protocol::EXIT_STATUS_SUCCESS
};
use secrecy::{ExposeSecret, SecretString};
pub use target::ServerTarget;
use tokio::task;
use tracing::{debug, info};

/// russh handler for connections made by the sault client.
///
/// Server keys are accepted and logged; the fingerprint is shown at debug level.
pub(crate) struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = ClientError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        debug!(
            fingerprint = %ssh_core::keys::fingerprint(server_public_key),
            "server key presented"
        );
        Ok(true)
    }
}

/// An authenticated control connection.
pub struct SaultClient {
    handle: client::Handle<ClientHandler>,
    target: ServerTarget,
}

impl SaultClient {
    /// Connect to `target` and authenticate as its server name with `key`.
    pub async fn connect(target: &ServerTarget, key: PrivateKey) -> ClientResult<Self> {
        info!(server = %target, "connecting to sault");
        let mut handle = client::connect(
            ssh_core::crypto::client_config(),
            (target.host.as_str(), target.port),
            ClientHandler,
        )
        .await?;

        let rsa_hint = handle.best_supported_rsa_hash().await.unwrap_or(None).flatten();
        let hash_alg = if key.algorithm().is_rsa() { rsa_hint } else { None };
        let result = handle
            .authenticate_publickey(target.server_name.clone(), PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
            .await?;
        if !result.success() {
            return Err(ClientError::AuthFailed(format!(
                "{} rejected the key (admin users only)",
                target
            )));
        }
        debug!(server = %target, "authenticated");
        Ok(Self {
            handle,
            target: target.clone(),
        })
    }

    pub fn target(&self) -> &ServerTarget {
        &self.target
    }

    /// Run one command and decode its typed response.
    pub async fn request<R: CommandRequest>(&self, request: &R) -> ClientResult<R::Response> {
        let msg = CommandMsg::new(R::NAME, serde_json::to_vec(request)?);
        debug!(command = R::NAME, "sending command");
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, msg.encode()).await?;
        let reply = collect_reply(&mut channel).await?;
        if reply.exit_status != Some(EXIT_STATUS_SUCCESS) {
            return Err(ClientError::Other(format!(
                "'{}' ended with exit status {:?}: {}",
                R::NAME,
                reply.exit_status,
                String::from_utf8_lossy(&reply.body).trim()
            )));
        }
        decode_response(&reply.body)
    }

    /// Open a `direct-tcpip` channel to `host:port` through sault.
    pub async fn open_direct_tcpip(&self, host: &str, port: u16) -> ClientResult<Channel<client::Msg>> {
        debug!(host, port, "opening direct-tcpip through sault");
        Ok(self.handle.channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0).await?)
    }

    pub async fn disconnect(self) -> ClientResult<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

struct Reply {
    body: Vec<u8>,
    exit_status: Option<u32>,
}

async fn collect_reply(channel: &mut Channel<client::Msg>) -> ClientResult<Reply> {
    let mut reply = Reply {
        body: Vec::new(),
        exit_status: None,
    };
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => reply.body.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status } => reply.exit_status = Some(exit_status),
            ChannelMsg::Failure => return Err(ClientError::Other("server refused the request".into())),
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    Ok(reply)
}

/// Decode a [`ResponseMsg`] body into the command's response type.
pub fn decode_response<T: serde::de::DeserializeOwned>(body: &[u8]) -> ClientResult<T> {
    let response: ResponseMsg = serde_json::from_slice(body)?;
    if let Some(err) = response.err {
        return Err(ClientError::Response {
            error_type: err.error_type,
            message: err.message,
        });
    }
    Ok(serde_json::from_value(response.data)?)
}

/// Load the private key at `path`, prompting for its passphrase when it is encrypted.
pub async fn load_identity(path: &Path) -> ClientResult<PrivateKey> {
    if !ssh_core::keys::is_encrypted(path)? {
        return Ok(ssh_core::keys::load_private_key(path, None)?);
    }
    let passphrase = prompt_for_secret(&format!("Enter passphrase for {}: ", path.display())).await?;
    Ok(ssh_core::keys::load_private_key(path, Some(passphrase.expose_secret()))?)
}

/// Read a secret from the terminal without echo.
pub async fn prompt_for_secret(prompt: &str) -> ClientResult<SecretString> {
    let prompt = prompt.to_string();
    task::spawn_blocking(move || {
        rpassword::prompt_password(prompt)
            .map(|s| SecretString::new(s.into_boxed_str()))
            .map_err(Into::into)
    })
    .await
    .map_err(|e| ClientError::Other(format!("task join error: {e}")))?
}

#[cfg(test)]
mod tests {
    use sault_types::{ErrorType, User};

    use super::*;

    #[test]
    fn error_responses_become_client_errors() {
        let body = serde_json::to_vec(&ResponseMsg::error(ErrorType::Prohibited, "'user.add' requires an admin user")).unwrap();
        match decode_response::<User>(&body) {
            Err(ClientError::Response { error_type, message }) => {
                assert_eq!(error_type, ErrorType::Prohibited);
                assert!(message.contains("user.add"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unit_responses_decode_from_null() {
        let body = serde_json::to_vec(&ResponseMsg::ok(serde_json::Value::Null)).unwrap();
        decode_response::<()>(&body).unwrap();
        assert!(matches!(decode_response::<()>(b"not json"), Err(ClientError::Malformed(_))));
    }

    #[tokio::test]
    async fn plain_identity_loads_without_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id_ed25519");
        let key = ssh_core::keys::generate_private_key().unwrap();
        ssh_core::keys::write_private_key(&path, &key).unwrap();

        let loaded = load_identity(&path).await.unwrap();
        assert_eq!(loaded.public_key(), key.public_key());
        assert!(load_identity(&dir.path().join("missing")).await.is_err());
    }
}
