//! Test utilities for client-core integration tests: a sault server with a `root` admin and a
//! password-only host that pretends to run the inject script.

#![allow(dead_code)]

use std::{
    net::SocketAddr, sync::{Arc, Mutex}, time::Duration
};

use anyhow::Result;
use client_core::ServerTarget;
use russh::{
    Channel, ChannelId, CryptoVec, MethodKind, keys::PrivateKey, server::{self, Auth, Server as _, Session}
};
use sault_types::Host;
use server_core::{SaultServer, ServerContext};
use state_store::{Registry, test_support::generate_key_pair};
use tokio::{sync::oneshot, task::JoinHandle};

pub const HOST_PASSWORD: &str = "correct horse";

pub fn pick_free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

/// Exec commands the password host received, prefixed with the login.
pub type ExecLog = Arc<Mutex<Vec<String>>>;

struct PasswordHost {
    log: ExecLog,
}

impl server::Server for PasswordHost {
    type Handler = PasswordHostHandler;

    fn new_client(&mut self, _addr: Option<SocketAddr>) -> Self::Handler {
        PasswordHostHandler {
            log: self.log.clone(),
            user: String::new(),
        }
    }
}

struct PasswordHostHandler {
    log: ExecLog,
    user: String,
}

impl server::Handler for PasswordHostHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if password == HOST_PASSWORD {
            self.user = user.to_string();
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(&mut self, _channel: Channel<server::Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}: {}", self.user, String::from_utf8_lossy(data)));
        session.channel_success(channel)?;
        session.data(channel, CryptoVec::from_slice(b"added\n"))?;
        session.exit_status_request(channel, 0)?;
        session.eof(channel)?;
        session.close(channel)
    }
}

pub struct PasswordBackend {
    pub port: u16,
    pub log: ExecLog,
    task: JoinHandle<()>,
}

impl PasswordBackend {
    pub async fn start() -> Result<Self> {
        let port = pick_free_port();
        let log = ExecLog::default();
        let (host_key, _) = generate_key_pair();
        let mut config = ssh_core::crypto::server_config(host_key);
        config.methods.push(MethodKind::Password);
        let config = Arc::new(config);
        let mut host = PasswordHost { log: log.clone() };
        let task = tokio::spawn(async move {
            let _ = host.run_on_address(config, ("127.0.0.1", port)).await;
        });
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(Self { port, log, task })
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Drop for PasswordBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A running sault server plus the keys of its users.
pub struct Bastion {
    pub target: ServerTarget,
    pub registry: Arc<Registry>,
    pub root_key: PrivateKey,
    pub alice_key: PrivateKey,
    pub client_key: PrivateKey,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Bastion {
    /// `root` is an admin, `alice` is not; `web1` points at `host_port` with account `deploy`.
    pub async fn start(host_port: u16) -> Result<Self> {
        let registry = Arc::new(Registry::in_memory());
        let (root_key, root_pub) = generate_key_pair();
        let (alice_key, alice_pub) = generate_key_pair();
        let (client_key, _) = generate_key_pair();
        registry.add_user("root", &ssh_core::keys::public_key_line(&root_pub)?).await?;
        registry.set_user_admin("root", true).await?;
        registry.add_user("alice", &ssh_core::keys::public_key_line(&alice_pub)?).await?;
        registry
            .add_host(Host::new("web1", "127.0.0.1", host_port, vec!["deploy".into()]))
            .await?;

        let ctx = ServerContext::new(registry.clone(), client_key.clone()).with_dial_timeout(Duration::from_secs(5));
        let (host_key, _) = generate_key_pair();
        let server = SaultServer::bind(ctx, host_key, "127.0.0.1:0").await?;
        let addr = server.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = server
                .run_until(async {
                    let _ = rx.await;
                })
                .await;
        });
        Ok(Self {
            target: ServerTarget::parse(&addr.to_string())?,
            registry,
            root_key,
            alice_key,
            client_key,
            shutdown: Some(tx),
            task,
        })
    }
}

impl Drop for Bastion {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.abort();
    }
}
