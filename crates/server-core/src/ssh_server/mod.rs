//! SSH server configuration and startup functionality
//!
//! This module owns the listening socket and spawns one task per accepted connection.

use std::{future::Future, net::SocketAddr, sync::Arc};

use russh::{keys::PrivateKey, server};
use sault_types::config::SaultConfig;
use tokio::{net::TcpListener, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    ServerContext, error::{ServerError, ServerResult}, handler::Connection, setup
};

/// A bound, not yet serving, sault server.
pub struct SaultServer {
    ctx: ServerContext,
    config: Arc<server::Config>,
    listener: TcpListener,
}

impl SaultServer {
    /// Bind `address`. Failure to bind is fatal for the caller.
    pub async fn bind(ctx: ServerContext, host_key: PrivateKey, address: &str) -> ServerResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
        Ok(Self {
            ctx,
            config: Arc::new(ssh_core::crypto::server_config(host_key)),
            listener,
        })
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process ends.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves; open connections are aborted on return.
    pub async fn run_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        info!(address = %local, server_name = %self.ctx.server_name, "sault server listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(open = connections.len(), "shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    while connections.try_join_next().is_some() {}

                    info!(peer = %peer, "client connected");
                    let handler = Connection::new(self.ctx.clone(), Some(peer));
                    let config = self.config.clone();
                    connections.spawn(async move {
                        match server::run_stream(config, stream, handler).await {
                            Ok(session) => {
                                if let Err(e) = session.await {
                                    debug!(peer = %peer, error = %e, "session ended with error");
                                }
                            }
                            Err(e) => debug!(peer = %peer, error = %e, "handshake failed"),
                        }
                    });
                }
            }
        }
        connections.shutdown().await;
        Ok(())
    }
}

/// Load keys and the registry named by `config`.
///
/// Missing key files are generated. Returns the shared context and the host key.
pub async fn prepare(config: &SaultConfig) -> ServerResult<(ServerContext, PrivateKey)> {
    let host_key = ssh_core::keys::load_or_generate_key(&config.server.host_key)?;
    let client_key = ssh_core::keys::load_or_generate_key(&config.server.client_key)?;
    let registry = setup::open_registry(config).await?;
    let ctx = ServerContext::new(Arc::new(registry), client_key).with_server_name(config.server.server_name.clone());
    Ok((ctx, host_key))
}

/// `server run`: serve `config` until Ctrl-C.
pub async fn run_server(config: &SaultConfig) -> ServerResult<()> {
    let (ctx, host_key) = prepare(config).await?;
    let server = SaultServer::bind(ctx, host_key, &config.server.bind).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}

#[cfg(test)]
mod tests {
    use sault_types::config::RegistrySourceConfig;
    use state_store::Registry;

    use super::*;

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();
        let ctx = ServerContext::new(Arc::new(Registry::in_memory()), ssh_core::keys::generate_private_key().unwrap());

        let err = SaultServer::bind(ctx, ssh_core::keys::generate_private_key().unwrap(), &address)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
        assert!(err.to_string().contains(&address));
    }

    #[tokio::test]
    async fn prepare_generates_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SaultConfig::default_layout().resolve_paths(dir.path());
        config.server.server_name = "bastion".into();

        let (ctx, _) = prepare(&config).await.unwrap();
        assert_eq!(ctx.server_name, "bastion");
        assert!(dir.path().join("host.key").exists());
        assert!(dir.path().join("client.key").exists());

        config.registry.source.clear();
        assert!(prepare(&config).await.is_err());
        config.registry.source.push(RegistrySourceConfig::Toml {
            path: dir.path().join("registry.reg"),
        });
        assert!(prepare(&config).await.is_ok());
    }
}
