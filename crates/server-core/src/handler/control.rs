//! Control sessions: one command per session channel, plus admin `direct-tcpip`.

use russh::{
    Channel, ChannelId, CryptoVec, server::{self, Session}
};
use sault_types::protocol::EXIT_STATUS_NOT_ALLOWED;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::{Connection, auth::Authorization, relay::bridge};

/// Per-channel state of a control session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ControlChannel {
    Open,
    /// A command ran or the channel was refused; nothing more is processed.
    Done,
}

const NOT_ALLOWED_NOTICE: &str = "sault control sessions only accept commands, e.g. `ssh sault whoami`\r\n";

impl Connection {
    pub(super) fn open_control_session(&mut self, channel: ChannelId) -> bool {
        self.control_channels.insert(channel, ControlChannel::Open);
        true
    }

    pub(super) async fn handle_control_exec(&mut self, channel: ChannelId, payload: &[u8], session: &mut Session) -> Result<(), russh::Error> {
        let Some(state) = self.control_channels.get_mut(&channel) else {
            return session.channel_failure(channel);
        };
        if *state == ControlChannel::Done {
            debug!(peer = %self.peer(), channel = ?channel, "ignoring repeated exec on control channel");
            return session.channel_failure(channel);
        }
        *state = ControlChannel::Done;

        let Some(Authorization::Control { user }) = &self.authorization else {
            return session.channel_failure(channel);
        };
        session.channel_success(channel)?;

        let user = user.clone();
        let ctx = self.ctx.clone();
        let handle = session.handle();
        let payload = payload.to_vec();
        let peer = self.peer();
        let task = tokio::spawn(async move {
            let dispatch = ctx.commands.dispatch(&user, &payload, &ctx).await;
            debug!(peer = %peer, user = %user.id, exit_status = dispatch.exit_status, "command finished");
            if !dispatch.body.is_empty() {
                let _ = handle.data(channel, CryptoVec::from_slice(&dispatch.body)).await;
            }
            let _ = handle.exit_status_request(channel, dispatch.exit_status).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
        });
        self.tasks.push(task.abort_handle());
        Ok(())
    }

    /// Anything but `exec` ends the channel with a notice.
    pub(super) fn refuse_control_request(&mut self, channel: ChannelId, request: &str, session: &mut Session) -> Result<(), russh::Error> {
        let Some(state) = self.control_channels.get_mut(&channel) else {
            return session.channel_failure(channel);
        };
        session.channel_failure(channel)?;
        if *state == ControlChannel::Done {
            return Ok(());
        }
        *state = ControlChannel::Done;

        warn!(peer = %self.peer(), channel = ?channel, request, "request refused on control session");
        session.data(channel, CryptoVec::from_slice(NOT_ALLOWED_NOTICE.as_bytes()))?;
        session.exit_status_request(channel, EXIT_STATUS_NOT_ALLOWED)?;
        session.eof(channel)?;
        session.close(channel)
    }

    /// Admin port forward: the server itself dials the destination.
    pub(super) async fn open_control_direct_tcpip(
        &mut self,
        channel: Channel<server::Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
    ) -> Result<bool, russh::Error> {
        let Some(Authorization::Control { user }) = &self.authorization else {
            return Ok(false);
        };
        let Ok(port) = u16::try_from(port_to_connect) else {
            return Ok(false);
        };
        let target = format!("{host_to_connect}:{port}");
        let stream = match tokio::time::timeout(self.ctx.dial_timeout, TcpStream::connect((host_to_connect, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(peer = %self.peer(), target = %target, error = %e, "direct-tcpip dial failed");
                return Ok(false);
            }
            Err(_) => {
                warn!(peer = %self.peer(), target = %target, "direct-tcpip dial timed out");
                return Ok(false);
            }
        };
        info!(peer = %self.peer(), user = %user.id, target = %target, "direct-tcpip opened");
        let task = tokio::spawn(bridge(channel.into_stream(), stream, "control direct-tcpip"));
        self.tasks.push(task.abort_handle());
        Ok(true)
    }
}
