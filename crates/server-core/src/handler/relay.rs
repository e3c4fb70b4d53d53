//! Proxy relay between the client leg (this server's session) and the host leg (an outbound
//! client connection).
//!
//! Each session channel gets one task owning the host-side channel. The client side feeds it
//! [`RelayEvent`]s from the handler callbacks; the host side is read with `Channel::wait`.
//! Requests that can carry a reply are always sent to the host with `want_reply` set. The
//! host's verdicts arrive in request order and are handed back to the waiting handler, which
//! answers the client only if the client asked for a reply.
//!
//! [`RelayEvent::Eof`] is the half-close crossing the relay boundary. It is never forwarded as a
//! channel request: the destination leg receives a plain `eof` and stays open for the reverse
//! direction until one side closes.

use std::collections::VecDeque;

use russh::{
    Channel, ChannelId, ChannelMsg, Pty, Sig, client, keys::PublicKey, server::{self, Session}
};
use tokio::{
    io::AsyncWriteExt, sync::{
        mpsc::{UnboundedReceiver, unbounded_channel}, oneshot
    }
};
use tracing::{debug, trace, warn};

use super::{Connection, TaskList};

/// Client-side traffic for one relayed channel.
#[derive(Debug)]
pub(crate) enum RelayEvent {
    Data(Vec<u8>),
    ExtendedData(u32, Vec<u8>),
    /// Client half-closed its side.
    Eof,
    /// A request and, when one is awaited, where to report the host's verdict.
    Request(ChannelRequest, Option<oneshot::Sender<bool>>),
    Close,
}

/// Session channel requests forwarded to the host.
#[derive(Debug)]
pub(crate) enum ChannelRequest {
    Pty {
        term: String,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: Vec<(Pty, u32)>,
    },
    Shell,
    Exec(Vec<u8>),
    Subsystem(String),
    Env {
        name: String,
        value: String,
    },
    WindowChange {
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
    },
    Signal(Sig),
}

impl ChannelRequest {
    /// Whether the request type has a `want_reply` field. `window-change` and `signal` never
    /// get a reply.
    pub(crate) fn can_reply(&self) -> bool {
        !matches!(self, ChannelRequest::WindowChange { .. } | ChannelRequest::Signal(_))
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            ChannelRequest::Pty { .. } => "pty-req",
            ChannelRequest::Shell => "shell",
            ChannelRequest::Exec(_) => "exec",
            ChannelRequest::Subsystem(_) => "subsystem",
            ChannelRequest::Env { .. } => "env",
            ChannelRequest::WindowChange { .. } => "window-change",
            ChannelRequest::Signal(_) => "signal",
        }
    }

    async fn send_to(self, channel: &Channel<client::Msg>, want_reply: bool) -> Result<(), russh::Error> {
        match self {
            ChannelRequest::Pty {
                term,
                col_width,
                row_height,
                pix_width,
                pix_height,
                modes,
            } => {
                channel
                    .request_pty(want_reply, &term, col_width, row_height, pix_width, pix_height, &modes)
                    .await
            }
            ChannelRequest::Shell => channel.request_shell(want_reply).await,
            ChannelRequest::Exec(command) => channel.exec(want_reply, command).await,
            ChannelRequest::Subsystem(name) => channel.request_subsystem(want_reply, &name).await,
            ChannelRequest::Env { name, value } => channel.set_env(want_reply, name, value).await,
            ChannelRequest::WindowChange {
                col_width,
                row_height,
                pix_width,
                pix_height,
            } => channel.window_change(col_width, row_height, pix_width, pix_height).await,
            ChannelRequest::Signal(sig) => channel.signal(sig).await,
        }
    }
}

/// Drive one session channel until either leg closes, then close both.
pub(crate) async fn relay_session(
    mut inner: Channel<client::Msg>,
    client_channel: ChannelId,
    client: server::Handle,
    mut events: UnboundedReceiver<RelayEvent>,
) {
    // Handlers waiting for a host verdict, oldest first.
    let mut verdicts: VecDeque<oneshot::Sender<bool>> = VecDeque::new();

    loop {
        tokio::select! {
            msg = inner.wait() => {
                let Some(msg) = msg else { break };
                match msg {
                    ChannelMsg::Data { data } => {
                        trace!(channel = ?client_channel, len = data.len(), "host -> client");
                        if client.data(client_channel, data).await.is_err() {
                            break;
                        }
                    }
                    ChannelMsg::ExtendedData { data, ext } => {
                        if client.extended_data(client_channel, ext, data).await.is_err() {
                            break;
                        }
                    }
                    ChannelMsg::Eof => {
                        debug!(channel = ?client_channel, "host sent eof");
                        let _ = client.eof(client_channel).await;
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        let _ = client.exit_status_request(client_channel, exit_status).await;
                    }
                    ChannelMsg::ExitSignal { signal_name, core_dumped, error_message, lang_tag } => {
                        let _ = client
                            .exit_signal_request(client_channel, signal_name, core_dumped, error_message, lang_tag)
                            .await;
                    }
                    ChannelMsg::Success => report_verdict(&mut verdicts, client_channel, true),
                    ChannelMsg::Failure => report_verdict(&mut verdicts, client_channel, false),
                    ChannelMsg::Close => break,
                    other => trace!(channel = ?client_channel, msg = ?other, "ignored host channel message"),
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    RelayEvent::Data(bytes) => {
                        trace!(channel = ?client_channel, len = bytes.len(), "client -> host");
                        if inner.data(&bytes[..]).await.is_err() {
                            break;
                        }
                    }
                    RelayEvent::ExtendedData(ext, bytes) => {
                        if inner.extended_data(ext, &bytes[..]).await.is_err() {
                            break;
                        }
                    }
                    RelayEvent::Eof => {
                        debug!(channel = ?client_channel, "client sent eof");
                        let _ = inner.eof().await;
                    }
                    RelayEvent::Request(request, verdict) => {
                        let name = request.name();
                        match (request.send_to(&inner, verdict.is_some()).await, verdict) {
                            (Ok(()), Some(verdict)) => verdicts.push_back(verdict),
                            (Ok(()), None) => {}
                            (Err(e), verdict) => {
                                warn!(channel = ?client_channel, request = name, error = %e, "failed to forward channel request");
                                if let Some(verdict) = verdict {
                                    let _ = verdict.send(false);
                                }
                            }
                        }
                    }
                    RelayEvent::Close => break,
                }
            }
        }
    }

    let _ = inner.close().await;
    let _ = client.close(client_channel).await;
    debug!(channel = ?client_channel, "relay closed");
}

fn report_verdict(verdicts: &mut VecDeque<oneshot::Sender<bool>>, channel: ChannelId, accepted: bool) {
    match verdicts.pop_front() {
        Some(verdict) => {
            let _ = verdict.send(accepted);
        }
        None => trace!(channel = ?channel, accepted, "unsolicited reply from host"),
    }
}

/// Pipe two byte streams until both directions finish.
pub(crate) async fn bridge<A, B>(mut a: A, mut b: B, what: &'static str)
where
    A: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    B: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut a, &mut b).await {
        Ok((up, down)) => debug!(what, up, down, "bridge finished"),
        Err(e) => debug!(what, error = %e, "bridge ended"),
    }
    let _ = a.shutdown().await;
    let _ = b.shutdown().await;
}

/// Client handler of the host leg. Channels the host opens towards the client (remote port
/// forwards) are mirrored onto the client connection.
pub(crate) struct HostHandler {
    pub(crate) client: server::Handle,
    pub(crate) tasks: TaskList,
    pub(crate) host_id: String,
}

impl client::Handler for HostHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(
            host = %self.host_id,
            connected = %format!("{connected_address}:{connected_port}"),
            originator = %format!("{originator_address}:{originator_port}"),
            "host opened forwarded-tcpip channel"
        );
        let client = self.client.clone();
        let connected_address = connected_address.to_string();
        let originator_address = originator_address.to_string();
        let task = tokio::spawn(async move {
            match client
                .channel_open_forwarded_tcpip(connected_address, connected_port, originator_address, originator_port)
                .await
            {
                Ok(outer) => bridge(outer.into_stream(), channel.into_stream(), "forwarded-tcpip").await,
                Err(e) => {
                    debug!(error = %e, "client refused forwarded-tcpip channel");
                    let _ = channel.close().await;
                }
            }
        });
        self.tasks.push(task.abort_handle());
        Ok(())
    }
}

impl Connection {
    /// Open the host-side twin of a client session channel and start relaying.
    pub(super) async fn open_proxy_session(&mut self, channel: Channel<server::Msg>, session: &mut Session) -> Result<bool, russh::Error> {
        let Some(inner) = self.inner.as_ref() else {
            return Ok(false);
        };
        let host_channel = match inner.channel_open_session().await {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = %self.peer(), error = %e, "host refused session channel");
                return Ok(false);
            }
        };

        let id = channel.id();
        let (tx, rx) = unbounded_channel();
        self.relays.insert(id, tx);
        let task = tokio::spawn(relay_session(host_channel, id, session.handle(), rx));
        self.tasks.push(task.abort_handle());
        debug!(peer = %self.peer(), channel = ?id, "session channel relayed");
        Ok(true)
    }

    pub(super) async fn open_proxy_direct_tcpip(
        &mut self,
        channel: Channel<server::Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> Result<bool, russh::Error> {
        let Some(inner) = self.inner.as_ref() else {
            return Ok(false);
        };
        let host_channel = match inner
            .channel_open_direct_tcpip(host_to_connect, port_to_connect, originator_address, originator_port)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(peer = %self.peer(), target = %format!("{host_to_connect}:{port_to_connect}"), error = %e, "host refused direct-tcpip channel");
                return Ok(false);
            }
        };
        let task = tokio::spawn(bridge(channel.into_stream(), host_channel.into_stream(), "direct-tcpip"));
        self.tasks.push(task.abort_handle());
        Ok(true)
    }

    /// Queue client-side traffic for the channel's relay task.
    pub(super) fn relay_event(&self, channel: ChannelId, event: RelayEvent) -> bool {
        match self.relays.get(&channel) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub(super) async fn proxy_tcpip_forward(&mut self, address: &str, port: &mut u32) -> Result<bool, russh::Error> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(false);
        };
        match inner.tcpip_forward(address, *port).await {
            Ok(bound) => {
                if *port == 0 {
                    *port = bound;
                }
                debug!(peer = %self.peer(), address, port = *port, "remote forward requested on host");
                Ok(true)
            }
            Err(e) => {
                warn!(peer = %self.peer(), address, port = *port, error = %e, "host refused remote forward");
                Ok(false)
            }
        }
    }

    pub(super) async fn proxy_cancel_tcpip_forward(&mut self, address: &str, port: u32) -> Result<bool, russh::Error> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(false);
        };
        Ok(inner.cancel_tcpip_forward(address, port).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_change_and_signal_never_reply() {
        assert!(ChannelRequest::Shell.can_reply());
        assert!(ChannelRequest::Exec(b"ls".to_vec()).can_reply());
        assert!(ChannelRequest::Subsystem("sftp".into()).can_reply());
        assert!(
            ChannelRequest::Env {
                name: "LANG".into(),
                value: "C".into()
            }
            .can_reply()
        );
        assert!(!ChannelRequest::Signal(Sig::TERM).can_reply());
        assert!(
            !ChannelRequest::WindowChange {
                col_width: 80,
                row_height: 24,
                pix_width: 0,
                pix_height: 0
            }
            .can_reply()
        );
    }

    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn bridge_copies_both_ways() {
        let (left, mut left_peer) = tokio::io::duplex(64);
        let (right, mut right_peer) = tokio::io::duplex(64);
        let task = tokio::spawn(bridge(left, right, "test"));

        left_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        right_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        right_peer.write_all(b"pong").await.unwrap();
        left_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        drop(left_peer);
        drop(right_peer);
        task.await.unwrap();
    }
}
