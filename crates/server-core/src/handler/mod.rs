//! Per-connection SSH handler: authorization, then either a control session or a proxy relay.

use std::{
    collections::HashMap, net::SocketAddr, sync::{Arc, Mutex, PoisonError}, time::{Duration, Instant}
};

use russh::{
    Channel, ChannelId, Pty, Sig, client, keys::PublicKey, server::{self, Auth, Msg, Session}
};
use tokio::{
    sync::{mpsc::UnboundedSender, oneshot}, task::AbortHandle
};
use tracing::{debug, error, info, warn};

use crate::{ServerContext, upstream};

mod auth;
mod control;
mod relay;

pub use auth::{AuthError, Authorization, authorize};
use control::ControlChannel;
use relay::{ChannelRequest, HostHandler, RelayEvent};

/// How long a relayed request waits for the host's verdict before it is refused.
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

/// Tasks spawned on behalf of one connection; aborted when it goes away.
#[derive(Clone, Default)]
pub(crate) struct TaskList(Arc<Mutex<Vec<AbortHandle>>>);

impl TaskList {
    pub(crate) fn push(&self, task: AbortHandle) {
        let mut tasks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn abort_all(&self) {
        let mut tasks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// State of one client connection.
pub(crate) struct Connection {
    pub(super) ctx: ServerContext,
    pub(super) peer_addr: Option<SocketAddr>,
    pub(super) authorization: Option<Authorization>,
    /// Outbound connection to the host, proxy sessions only.
    pub(super) inner: Option<client::Handle<HostHandler>>,
    pub(super) relays: HashMap<ChannelId, UnboundedSender<RelayEvent>>,
    pub(super) control_channels: HashMap<ChannelId, ControlChannel>,
    pub(super) tasks: TaskList,
    pub(super) connected_at: Instant,
}

impl Connection {
    pub(crate) fn new(ctx: ServerContext, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            ctx,
            peer_addr,
            authorization: None,
            inner: None,
            relays: HashMap::new(),
            control_channels: HashMap::new(),
            tasks: TaskList::default(),
            connected_at: Instant::now(),
        }
    }

    pub(super) fn peer(&self) -> String {
        display_addr(self.peer_addr)
    }

    fn is_control(&self) -> bool {
        matches!(self.authorization, Some(Authorization::Control { .. }))
    }

    async fn handle_auth_succeeded(&mut self, session: &mut Session) -> Result<(), russh::Error> {
        let Some(Authorization::Proxy { user, host, account }) = &self.authorization else {
            return Ok(());
        };

        let key = upstream::client_key_for(host, &self.ctx.client_key).map_err(|e| russh::Error::IO(std::io::Error::other(e.to_string())))?;
        let handler = HostHandler {
            client: session.handle(),
            tasks: self.tasks.clone(),
            host_id: host.id.clone(),
        };
        match upstream::connect_host(host, account, key, self.ctx.dial_timeout, handler).await {
            Ok(inner) => {
                info!(
                    peer = %self.peer(),
                    user = %user.id,
                    host = %host.id,
                    account = %account,
                    "proxy session established"
                );
                self.inner = Some(inner);
                Ok(())
            }
            Err(e) => {
                error!(
                    peer = %self.peer(),
                    user = %user.id,
                    host = %host.id,
                    account = %account,
                    error = %e,
                    "failed to reach host; closing connection"
                );
                Err(russh::Error::IO(std::io::Error::other(e.to_string())))
            }
        }
    }

    /// Forward a client request on a proxy channel, or refuse it on a control channel.
    ///
    /// The host's verdict is awaited here: russh only remembers whether the client wanted a
    /// reply until the next request arrives on the channel, and handlers run one at a time.
    async fn route_request(&mut self, channel: ChannelId, request: ChannelRequest, session: &mut Session) -> Result<(), russh::Error> {
        if !request.can_reply() {
            self.relay_event(channel, RelayEvent::Request(request, None));
            return Ok(());
        }
        if self.is_control() {
            return self.refuse_control_request(channel, request.name(), session);
        }

        let name = request.name();
        let (tx, rx) = oneshot::channel();
        let accepted = if self.relay_event(channel, RelayEvent::Request(request, Some(tx))) {
            match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
                Ok(verdict) => verdict.unwrap_or(false),
                Err(_) => {
                    warn!(peer = %self.peer(), channel = ?channel, request = name, "host did not answer channel request");
                    false
                }
            }
        } else {
            false
        };
        debug!(peer = %self.peer(), channel = ?channel, request = name, accepted, "relayed channel request");
        // Both calls are no-ops when the client did not ask for a reply.
        if accepted {
            session.channel_success(channel)
        } else {
            session.channel_failure(channel)
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.tasks.abort_all();
        if let (Some(inner), Ok(runtime)) = (self.inner.take(), tokio::runtime::Handle::try_current()) {
            runtime.spawn(async move {
                let _ = inner.disconnect(russh::Disconnect::ByApplication, "client disconnected", "en").await;
            });
        }
        info!(
            peer = %self.peer(),
            user = %self.authorization.as_ref().map(|a| a.user().id.as_str()).unwrap_or("<unauthenticated>"),
            duration = ?self.connected_at.elapsed(),
            "client disconnected"
        );
    }
}

impl server::Handler for Connection {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        self.handle_auth_publickey(user, public_key).await
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        self.handle_auth_succeeded(session).await
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, session: &mut Session) -> Result<bool, Self::Error> {
        match &self.authorization {
            Some(Authorization::Control { .. }) => Ok(self.open_control_session(channel.id())),
            Some(Authorization::Proxy { .. }) => self.open_proxy_session(channel, session).await,
            None => Ok(false),
        }
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match &self.authorization {
            Some(Authorization::Control { .. }) => self.open_control_direct_tcpip(channel, host_to_connect, port_to_connect).await,
            Some(Authorization::Proxy { .. }) => {
                self.open_proxy_direct_tcpip(channel, host_to_connect, port_to_connect, originator_address, originator_port)
                    .await
            }
            None => Ok(false),
        }
    }

    async fn tcpip_forward(&mut self, address: &str, port: &mut u32, _session: &mut Session) -> Result<bool, Self::Error> {
        if self.is_control() {
            return Ok(false);
        }
        self.proxy_tcpip_forward(address, port).await
    }

    async fn cancel_tcpip_forward(&mut self, address: &str, port: u32, _session: &mut Session) -> Result<bool, Self::Error> {
        if self.is_control() {
            return Ok(false);
        }
        self.proxy_cancel_tcpip_forward(address, port).await
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], session: &mut Session) -> Result<(), Self::Error> {
        if self.is_control() {
            return self.handle_control_exec(channel, data, session).await;
        }
        self.route_request(channel, ChannelRequest::Exec(data.to_vec()), session).await
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<(), Self::Error> {
        self.route_request(channel, ChannelRequest::Shell, session).await
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, session: &mut Session) -> Result<(), Self::Error> {
        self.route_request(channel, ChannelRequest::Subsystem(name.to_string()), session).await
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::Pty {
            term: term.to_string(),
            col_width,
            row_height,
            pix_width,
            pix_height,
            modes: modes.to_vec(),
        };
        self.route_request(channel, request, session).await
    }

    async fn env_request(&mut self, channel: ChannelId, variable_name: &str, variable_value: &str, session: &mut Session) -> Result<(), Self::Error> {
        // OpenSSH sends env before exec; control sessions decline it without ending the channel.
        if self.is_control() {
            return session.channel_failure(channel);
        }
        let request = ChannelRequest::Env {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.route_request(channel, request, session).await
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let request = ChannelRequest::WindowChange {
            col_width,
            row_height,
            pix_width,
            pix_height,
        };
        self.route_request(channel, request, session).await
    }

    async fn signal(&mut self, channel: ChannelId, signal: Sig, session: &mut Session) -> Result<(), Self::Error> {
        self.route_request(channel, ChannelRequest::Signal(signal), session).await
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(peer = %self.peer(), channel = ?channel, "x11 forwarding declined");
        session.channel_failure(channel)
    }

    async fn data(&mut self, channel: ChannelId, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        self.relay_event(channel, RelayEvent::Data(data.to_vec()));
        Ok(())
    }

    async fn extended_data(&mut self, channel: ChannelId, code: u32, data: &[u8], _session: &mut Session) -> Result<(), Self::Error> {
        self.relay_event(channel, RelayEvent::ExtendedData(code, data.to_vec()));
        Ok(())
    }

    async fn channel_eof(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        self.relay_event(channel, RelayEvent::Eof);
        Ok(())
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<(), Self::Error> {
        if let Some(tx) = self.relays.remove(&channel) {
            let _ = tx.send(RelayEvent::Close);
        }
        self.control_channels.remove(&channel);
        debug!(peer = %self.peer(), channel = ?channel, "channel closed by client");
        Ok(())
    }
}

/// Display helper used for tracing; keeps logging concise when the socket address is unavailable.
pub(crate) fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "<unknown>".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn task_list_survives_a_poisoned_lock() {
        let tasks = TaskList::default();
        let poisoner = tasks.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.0.lock().unwrap();
            panic!("poison the task list");
        })
        .join();
        assert!(tasks.0.is_poisoned());

        let task = tokio::spawn(std::future::pending::<()>());
        tasks.push(task.abort_handle());
        assert_eq!(tasks.len(), 1);

        tasks.abort_all();
        assert_eq!(tasks.len(), 0);
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
