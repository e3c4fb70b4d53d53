//! Test utilities for server-core integration tests.
//!
//! Provides a loopback backend host (a small russh server that echoes exec data and
//! `direct-tcpip` streams) and helpers to start sault and connect to it as a client.

#![allow(dead_code)]

use std::{
    net::{SocketAddr, TcpListener}, sync::{Arc, Mutex}, time::Duration
};

use anyhow::Result;
use russh::{
    Channel, ChannelId, ChannelMsg, CryptoVec, Pty, client, keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey}, server::{self, Auth, Server as _, Session}
};
use sault_types::Host;
use server_core::{SaultServer, ServerContext};
use state_store::{Registry, test_support::generate_key_pair};
use tokio::{sync::oneshot, task::JoinHandle};

pub fn pick_free_port() -> u16 {
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap()
}

/// What the backend host observed, in order.
pub type HostLog = Arc<Mutex<Vec<String>>>;

struct EchoHost {
    accepted: PublicKey,
    log: HostLog,
}

impl server::Server for EchoHost {
    type Handler = EchoHostHandler;

    fn new_client(&mut self, _addr: Option<SocketAddr>) -> Self::Handler {
        EchoHostHandler {
            accepted: self.accepted.clone(),
            log: self.log.clone(),
            account: None,
        }
    }
}

struct EchoHostHandler {
    accepted: PublicKey,
    log: HostLog,
    account: Option<String>,
}

impl EchoHostHandler {
    fn record(&self, event: impl Into<String>) {
        self.log.lock().unwrap().push(event.into());
    }
}

impl server::Handler for EchoHostHandler {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        if public_key.key_data() == self.accepted.key_data() {
            self.record(format!("login {user}"));
            self.account = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(&mut self, _channel: Channel<server::Msg>, _session: &mut Session) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.record(format!("pty {term}"));
        session.channel_success(channel)
    }

    async fn env_request(&mut self, channel: ChannelId, variable_name: &str, variable_value: &str, session: &mut Session) -> Result<(), Self::Error> {
        self.record(format!("env {variable_name}={variable_value}"));
        session.channel_success(channel)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<server::Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.record(format!("direct-tcpip {host_to_connect}:{port_to_connect}"));
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(channel.into_stream());
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(true)
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        self.record(format!("exec {}", String::from_utf8_lossy(data)));
        session.channel_success(channel)
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        session.data(channel, CryptoVec::from_slice(data))
    }

    async fn channel_eof(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.record("eof");
        session.exit_status_request(channel, 0)?;
        session.eof(channel)?;
        session.close(channel)
    }

    async fn channel_close(&mut self, _channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.record("close");
        Ok(())
    }
}

impl Drop for EchoHostHandler {
    fn drop(&mut self) {
        if let Some(account) = &self.account {
            self.record(format!("disconnect {account}"));
        }
    }
}

/// A running loopback host that accepts only `accepted`.
pub struct BackendHost {
    pub port: u16,
    pub log: HostLog,
    task: JoinHandle<()>,
}

impl BackendHost {
    pub async fn start(accepted: PublicKey) -> Result<Self> {
        let port = pick_free_port();
        let log = HostLog::default();
        let (host_key, _) = generate_key_pair();
        let config = Arc::new(ssh_core::crypto::server_config(host_key));
        let mut host = EchoHost {
            accepted,
            log: log.clone(),
        };
        let task = tokio::spawn(async move {
            let _ = host.run_on_address(config, ("127.0.0.1", port)).await;
        });
        wait_for_port(port).await;
        Ok(Self { port, log, task })
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Wait until the host has logged `event`.
    pub async fn wait_for(&self, event: &str) -> bool {
        for _ in 0..100 {
            if self.events().iter().any(|e| e == event) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

impl Drop for BackendHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn wait_for_port(port: u16) {
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A running sault server.
pub struct Sault {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Sault {
    pub async fn start(ctx: ServerContext) -> Result<Self> {
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
            addr,
            shutdown: Some(tx),
            task,
        })
    }
}

impl Drop for Sault {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.abort();
    }
}

/// Registry with `root` (admin) and `alice`, and a `web1` host pointing at `backend_port`.
pub struct World {
    pub ctx: ServerContext,
    pub root_key: PrivateKey,
    pub alice_key: PrivateKey,
}

/// World whose `web1` points at a port with nothing behind it.
pub async fn world(backend_port: u16) -> Result<World> {
    let (client_key, _) = generate_key_pair();
    build_world(backend_port, client_key).await
}

/// World whose `web1` is a live backend trusting sault's client key.
pub async fn world_with_backend() -> Result<(World, BackendHost)> {
    let (client_key, client_pub) = generate_key_pair();
    let backend = BackendHost::start(client_pub).await?;
    let world = build_world(backend.port, client_key).await?;
    Ok((world, backend))
}

async fn build_world(backend_port: u16, client_key: PrivateKey) -> Result<World> {
    let registry = Arc::new(Registry::in_memory());
    let (root_key, root_pub) = generate_key_pair();
    let (alice_key, alice_pub) = generate_key_pair();
    registry.add_user("root", &ssh_core::keys::public_key_line(&root_pub)?).await?;
    registry.set_user_admin("root", true).await?;
    registry.add_user("alice", &ssh_core::keys::public_key_line(&alice_pub)?).await?;
    registry
        .add_host(Host::new("web1", "127.0.0.1", backend_port, vec!["ubuntu".into()]))
        .await?;

    let ctx = ServerContext::new(registry, client_key).with_dial_timeout(Duration::from_secs(5));
    Ok(World { ctx, root_key, alice_key })
}

pub struct TestClient;

impl client::Handler for TestClient {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connect to sault and try `login` with `key`. `Ok(None)` means the key was rejected.
pub async fn login(addr: SocketAddr, login: &str, key: &PrivateKey) -> Result<Option<client::Handle<TestClient>>> {
    let mut handle = client::connect(ssh_core::crypto::client_config(), addr, TestClient).await?;
    let result = handle
        .authenticate_publickey(login.to_string(), PrivateKeyWithHashAlg::new(Arc::new(key.clone()), None))
        .await?;
    Ok(match result {
        client::AuthResult::Success => Some(handle),
        client::AuthResult::Failure { .. } => None,
    })
}

/// Everything a channel produced until it closed.
#[derive(Debug, Default)]
pub struct ChannelOutput {
    pub data: Vec<u8>,
    pub exit_statuses: Vec<u32>,
    pub eof: bool,
    pub successes: usize,
    pub failures: usize,
}

impl ChannelOutput {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

pub async fn drain(channel: &mut Channel<client::Msg>) -> ChannelOutput {
    let mut out = ChannelOutput::default();
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => out.data.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => out.exit_statuses.push(exit_status),
                Some(ChannelMsg::Eof) => out.eof = true,
                Some(ChannelMsg::Success) => out.successes += 1,
                Some(ChannelMsg::Failure) => out.failures += 1,
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }
    }
    out
}
