//! SSH transport and PTY shell adapter.
//!
//! Wraps the `russh` client behind two small types: [`SshConnection`] (the
//! authenticated transport) and [`Shell`] (an interactive PTY channel). The
//! session pump in [`crate::sessions`] drives a `Shell` by alternating
//! [`Shell::recv`] with write/resize calls.
//!
//! Keepalives run at the transport layer (interval × max misses from
//! [`crate::config::SshConfig`]); when the peer stops answering, russh drops
//! the connection and [`Shell::recv`] yields [`ShellEvent::Disconnected`],
//! which the pump maps to an Error transition — dead transports never leak.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::SshConfig;

/// Failure modes of the adapter.
#[derive(Debug, Error)]
pub enum SshError {
    /// DNS, TCP, or protocol handshake failure.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Password rejected by the server.
    #[error("authentication failed for user {user}")]
    Auth { user: String },

    /// Transport + auth + shell did not complete within the ready timeout.
    #[error("connect timed out after {0} ms")]
    Timeout(u64),

    /// Session channel, PTY request, or shell request failed.
    #[error("shell request failed: {0}")]
    Shell(String),
}

/// Writes the session pump forwards to the shell channel.
#[derive(Debug)]
pub enum ShellOp {
    /// Raw stdin bytes.
    Data(Vec<u8>),
    /// PTY window-change request.
    Resize { cols: u16, rows: u16 },
    /// Orderly teardown; the pump exits after sending EOF.
    Close,
}

/// Events surfaced by [`Shell::recv`].
#[derive(Debug)]
pub enum ShellEvent {
    /// A chunk of shell output (stdout and stderr are merged by the PTY).
    Data(Vec<u8>),
    /// The remote side closed the channel in an orderly way.
    Closed,
    /// The transport died underneath the channel (network drop, keepalive
    /// exhaustion).
    Disconnected,
}

/// Sender half handed to the session record; the matching receiver is owned
/// by the pump.
pub struct ShellHandle {
    pub ops: mpsc::Sender<ShellOp>,
}

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Host keys are not pinned; destinations are caller-supplied.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// An authenticated SSH transport. Lives for the whole session; dropped (after
/// [`SshConnection::disconnect`]) in the terminate step.
pub struct SshConnection {
    handle: Handle<ClientHandler>,
}

impl SshConnection {
    /// Establish a transport and authenticate with a password.
    ///
    /// The whole sequence is bounded by `cfg.ready_timeout_ms`; the caller
    /// never hangs on an unresponsive host.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        cfg: &SshConfig,
    ) -> Result<Self, SshError> {
        let config = Arc::new(client::Config {
            keepalive_interval: Some(Duration::from_millis(cfg.keepalive_interval_ms)),
            keepalive_max: cfg.keepalive_max,
            ..client::Config::default()
        });

        let establish = async {
            let mut handle = client::connect(config, (host, port), ClientHandler)
                .await
                .map_err(|e| SshError::Connect(e.to_string()))?;

            let auth = handle
                .authenticate_password(username, password)
                .await
                .map_err(|e| SshError::Connect(e.to_string()))?;
            if !auth.success() {
                return Err(SshError::Auth {
                    user: username.to_string(),
                });
            }

            Ok(SshConnection { handle })
        };

        tokio::time::timeout(Duration::from_millis(cfg.ready_timeout_ms), establish)
            .await
            .map_err(|_| SshError::Timeout(cfg.ready_timeout_ms))?
    }

    /// Request an interactive shell on a fresh session channel with a PTY of
    /// the given dimensions.
    pub async fn open_shell(&self, cols: u16, rows: u16, term: &str) -> Result<Shell, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Shell(e.to_string()))?;

        channel
            .request_pty(false, term, u32::from(cols), u32::from(rows), 0, 0, &[])
            .await
            .map_err(|e| SshError::Shell(e.to_string()))?;

        channel
            .request_shell(false)
            .await
            .map_err(|e| SshError::Shell(e.to_string()))?;

        Ok(Shell { channel })
    }

    /// Orderly transport shutdown. Safe to call with channels still open;
    /// their pumps observe [`ShellEvent::Disconnected`].
    pub async fn disconnect(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "session terminated", "en")
            .await;
    }
}

/// An interactive PTY shell channel.
pub struct Shell {
    channel: russh::Channel<client::Msg>,
}

impl Shell {
    /// Next upstream event. Exit-status and flow-control messages are
    /// consumed internally; callers only see data, orderly close, or
    /// transport death.
    pub async fn recv(&mut self) -> ShellEvent {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return ShellEvent::Data(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return ShellEvent::Data(data.to_vec())
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("shell exited with status {exit_status}");
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) => return ShellEvent::Closed,
                Some(_) => {}
                None => return ShellEvent::Disconnected,
            }
        }
    }

    /// Write stdin bytes to the shell.
    pub async fn write(&self, data: &[u8]) -> Result<(), SshError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SshError::Shell(e.to_string()))
    }

    /// Propagate a window change. Servers without PTY support simply ignore
    /// it; errors are the caller's to drop.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), SshError> {
        self.channel
            .window_change(u32::from(cols), u32::from(rows), 0, 0)
            .await
            .map_err(|e| SshError::Shell(e.to_string()))
    }

    /// Signal end of input. The remote close that follows surfaces through
    /// [`Shell::recv`].
    pub async fn close(&self) {
        let _ = self.channel.eof().await;
    }
}
