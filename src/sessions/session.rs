//! The per-connection session record and its state machine.
//!
//! A [`Session`] couples one SSH transport, one PTY shell handle, and the set
//! of attached WebSocket peers under a single id. Records are owned by the
//! registry map in [`crate::sessions::SessionManager`]; peers and the shell
//! pump refer to a session by id lookup, never by holding the record, so
//! terminate can drop everything by removing the map entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::ssh::{ShellHandle, SshConnection};
use crate::util::now_ms;

/// Lifecycle state. `Closed` and `Error` are terminal: once entered, a
/// session never leaves them (it is removed from the registry in the same
/// step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Ready,
    Closed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

/// Connection coordinates echoed back in snapshots. Never carries the
/// password.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// Frames pushed to an attached WebSocket peer's outbound queue.
#[derive(Debug, Clone)]
pub enum PeerFrame {
    /// Raw shell output; delivered as a binary frame.
    Output(Vec<u8>),
    /// Control replies (the attach banner, pong); delivered as text.
    Text(String),
    /// Orders the peer loop to close its socket with the given code.
    Close { code: u16, reason: &'static str },
}

/// Send side of one attached peer. The receive loop lives in [`crate::ws`];
/// when it exits, the channel closes and the peer stops counting as open.
pub struct PeerHandle {
    pub tx: mpsc::UnboundedSender<PeerFrame>,
}

impl PeerHandle {
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// One managed SSH session.
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub created_at: u64,
    last_activity: AtomicU64,
    pub idle_timeout_ms: u64,
    pub cols: u16,
    pub rows: u16,
    pub meta: SessionMeta,
    /// SSH transport; installed on Ready, released by terminate.
    pub(crate) ssh: Option<SshConnection>,
    /// Shell write/resize handle; present only while Ready.
    pub(crate) shell: Option<ShellHandle>,
    pub(crate) peers: HashMap<u64, PeerHandle>,
    next_peer_id: u64,
}

impl Session {
    /// Fresh record in the Connecting state, before any transport exists.
    pub fn connecting(
        id: String,
        meta: SessionMeta,
        cols: u16,
        rows: u16,
        idle_timeout_ms: u64,
    ) -> Self {
        let now = now_ms();
        Self {
            id,
            state: SessionState::Connecting,
            created_at: now,
            last_activity: AtomicU64::new(now),
            idle_timeout_ms,
            cols,
            rows,
            meta,
            ssh: None,
            shell: None,
            peers: HashMap::new(),
            next_peer_id: 1,
        }
    }

    /// Apply a state transition. Terminal states are absorbing; returns
    /// whether the transition was applied.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }

    /// Record activity now. Takes `&self` so the fan-out hot path can touch
    /// under the registry read lock.
    pub fn touch(&self) {
        self.last_activity.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Peers whose outbound channel is still open.
    pub fn open_peer_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_open()).count()
    }

    pub fn add_peer(&mut self, tx: mpsc::UnboundedSender<PeerFrame>) -> u64 {
        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;
        self.peers.insert(peer_id, PeerHandle { tx });
        peer_id
    }

    pub fn remove_peer(&mut self, peer_id: u64) -> bool {
        self.peers.remove(&peer_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> SessionMeta {
        SessionMeta {
            host: "example.net".into(),
            port: 22,
            username: "ops".into(),
        }
    }

    fn session() -> Session {
        Session::connecting("s1".into(), meta(), 120, 30, 600_000)
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut s = session();
        assert!(s.transition(SessionState::Ready));
        assert!(s.transition(SessionState::Closed));
        assert!(!s.transition(SessionState::Ready));
        assert!(!s.transition(SessionState::Error));
        assert_eq!(s.state, SessionState::Closed);

        let mut s = session();
        assert!(s.transition(SessionState::Error));
        assert!(!s.transition(SessionState::Closed));
        assert_eq!(s.state, SessionState::Error);
    }

    #[test]
    fn open_peer_count_ignores_dead_channels() {
        let mut s = session();
        let (tx_live, _rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        s.add_peer(tx_live);
        let dead_id = s.add_peer(tx_dead);
        drop(rx_dead);

        assert_eq!(s.peers.len(), 2);
        assert_eq!(s.open_peer_count(), 1);

        assert!(s.remove_peer(dead_id));
        assert!(!s.remove_peer(dead_id));
        assert_eq!(s.open_peer_count(), 1);
    }

    #[test]
    fn touch_advances_last_activity() {
        let s = session();
        let before = s.last_activity();
        s.touch();
        assert!(s.last_activity() >= before);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(SessionState::Ready).unwrap(),
            serde_json::json!("ready")
        );
        assert_eq!(
            serde_json::to_value(SessionState::Connecting).unwrap(),
            serde_json::json!("connecting")
        );
    }
}
