//! Session lifecycle management and shell fan-out.
//!
//! [`SessionManager`] is the single authority for which sessions exist. It
//! owns the registry map, enforces the `max_connections` cap, runs one pump
//! task per Ready session that fans shell output out to every attached peer,
//! and terminates sessions on delete, idle sweep, or upstream failure.
//!
//! ## Concurrency
//!
//! The registry is a `HashMap` behind an `RwLock`. Admission holds the write
//! lock across the capacity check and insert so concurrent creates cannot
//! both squeeze past the cap. Every mutation publishes its notification while
//! still holding the lock, so summary counts always match the registry state
//! they describe and versions are ordered with the mutations themselves.
//!
//! Terminations are idempotent: the first caller to remove the map entry wins
//! and performs the teardown; later callers (sweeper racing a DELETE racing
//! an upstream close) see a missing entry and return.

pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::notify::{NotifyBus, Reason, StateCounts, Summary};
use crate::ssh::{Shell, ShellEvent, ShellHandle, ShellOp, SshConnection};
use crate::util::now_ms;
use session::{PeerFrame, Session, SessionMeta, SessionState};

/// Validated parameters for creating a session. Built by the HTTP layer from
/// the request body with defaults already applied.
pub struct CreateParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub cols: u16,
    pub rows: u16,
    pub idle_timeout_ms: u64,
}

/// Public view of one session, as returned in snapshots. No credentials, no
/// handles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub state: SessionState,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub idle_timeout_ms: u64,
    pub cols: u16,
    pub rows: u16,
    pub attached_clients: usize,
    pub meta: SessionMeta,
}

impl SessionView {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            state: session.state,
            created_at: session.created_at,
            last_activity_at: session.last_activity(),
            idle_timeout_ms: session.idle_timeout_ms,
            cols: session.cols,
            rows: session.rows,
            attached_clients: session.open_peer_count(),
            meta: session.meta.clone(),
        }
    }
}

/// Full registry snapshot at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub version: u64,
    pub ts: u64,
    pub connections: Vec<SessionView>,
}

/// Why a session is being torn down. Decides the final state, the WebSocket
/// close frame sent to peers, and the published reason.
#[derive(Debug, Clone, Copy)]
pub enum TerminateCause {
    /// External DELETE.
    Delete,
    /// Idle sweeper reaped the session.
    IdleTimeout,
    /// SSH connect or shell open failed while Connecting.
    ConnectFailed,
    /// Remote side closed the shell in an orderly way.
    UpstreamClosed,
    /// SSH transport or shell stream error.
    UpstreamError,
    /// Process shutdown.
    Shutdown,
}

impl TerminateCause {
    fn final_state(self) -> SessionState {
        match self {
            Self::ConnectFailed | Self::UpstreamError => SessionState::Error,
            _ => SessionState::Closed,
        }
    }

    fn reason(self) -> Reason {
        match self {
            Self::Delete | Self::Shutdown => Reason::Deleted,
            Self::IdleTimeout => Reason::IdleTimeout,
            Self::ConnectFailed | Self::UpstreamClosed | Self::UpstreamError => Reason::State,
        }
    }

    /// 1001 for administrative closes, 1011 for upstream failures.
    fn close_frame(self) -> (u16, &'static str) {
        match self {
            Self::Delete => (1001, "Connection closed"),
            Self::IdleTimeout => (1001, "Idle timeout"),
            Self::Shutdown => (1001, "Server shutting down"),
            Self::ConnectFailed => (1011, "SSH connect failed"),
            Self::UpstreamClosed => (1011, "Shell closed"),
            Self::UpstreamError => (1011, "SSH transport failed"),
        }
    }
}

fn counts_of(sessions: &HashMap<String, Session>) -> StateCounts {
    let mut counts = StateCounts {
        total: sessions.len(),
        ..StateCounts::default()
    };
    for session in sessions.values() {
        match session.state {
            SessionState::Ready => counts.ready += 1,
            SessionState::Connecting => counts.connecting += 1,
            SessionState::Error => counts.error += 1,
            SessionState::Closed => counts.closed += 1,
        }
    }
    counts
}

/// Manages the pool of SSH sessions.
///
/// Cloneable — all clones share the same registry and notification bus.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    bus: Arc<NotifyBus>,
    config: Arc<Config>,
}

impl SessionManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            bus: Arc::new(NotifyBus::new(256)),
            config,
        }
    }

    /// Subscribe to change summaries (used by the SSE route).
    pub fn subscribe(&self) -> broadcast::Receiver<Summary> {
        self.bus.subscribe()
    }

    /// Synthetic `state` summary with current counts, for new subscribers.
    pub async fn current_summary(&self) -> Summary {
        let sessions = self.sessions.read().await;
        self.bus.current(counts_of(&sessions))
    }

    /// Create a session: admit it into the registry, establish the SSH
    /// transport and PTY shell, then start the fan-out pump. The caller waits
    /// through the whole sequence; failures surface as [`ApiError`] after the
    /// half-built session has been torn down.
    pub async fn create(&self, params: CreateParams) -> Result<SessionView, ApiError> {
        let id = Uuid::new_v4().to_string();
        self.admit(&id, &params).await?;
        info!(
            "connection {id}: connecting to {}@{}:{}",
            params.username, params.host, params.port
        );

        let conn = match SshConnection::connect(
            &params.host,
            params.port,
            &params.username,
            &params.password,
            &self.config.ssh,
        )
        .await
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!("connection {id}: connect failed: {e}");
                self.terminate(&id, TerminateCause::ConnectFailed).await;
                return Err(e.into());
            }
        };

        let shell = match conn
            .open_shell(params.cols, params.rows, &self.config.ssh.term)
            .await
        {
            Ok(shell) => shell,
            Err(e) => {
                warn!("connection {id}: shell open failed: {e}");
                conn.disconnect().await;
                self.terminate(&id, TerminateCause::ConnectFailed).await;
                return Err(e.into());
            }
        };

        let (ops_tx, ops_rx) = mpsc::channel::<ShellOp>(64);

        let view = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(&id) else {
                // Removed mid-connect (DELETE won the race) — release the
                // fresh transport and report the session gone.
                drop(sessions);
                conn.disconnect().await;
                return Err(ApiError::NotFound(id));
            };
            session.ssh = Some(conn);
            session.shell = Some(ShellHandle { ops: ops_tx });
            session.transition(SessionState::Ready);
            session.touch();
            let view = SessionView::of(session);
            let counts = counts_of(&sessions);
            self.bus
                .publish(Reason::State, Some(vec![id.clone()]), counts);
            view
        };

        info!("connection {id}: ready ({}x{})", params.cols, params.rows);

        let manager = self.clone();
        tokio::spawn(async move { manager.pump(id, shell, ops_rx).await });

        Ok(view)
    }

    /// Insert a Connecting record, holding the write lock across the
    /// capacity check and insert.
    async fn admit(&self, id: &str, params: &CreateParams) -> Result<(), ApiError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.server.max_connections {
            return Err(ApiError::CapacityExceeded(
                self.config.server.max_connections,
            ));
        }
        let meta = SessionMeta {
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
        };
        sessions.insert(
            id.to_string(),
            Session::connecting(
                id.to_string(),
                meta,
                params.cols,
                params.rows,
                params.idle_timeout_ms,
            ),
        );
        let counts = counts_of(&sessions);
        self.bus
            .publish(Reason::Created, Some(vec![id.to_string()]), counts);
        Ok(())
    }

    /// Per-session task: drives the shell channel, fanning output out to
    /// peers and serializing writes/resizes from the ops channel. Exits when
    /// either side closes; upstream endings terminate the session.
    async fn pump(&self, id: String, mut shell: Shell, mut ops_rx: mpsc::Receiver<ShellOp>) {
        enum Input {
            Upstream(ShellEvent),
            Op(Option<ShellOp>),
        }

        loop {
            let input = tokio::select! {
                event = shell.recv() => Input::Upstream(event),
                op = ops_rx.recv() => Input::Op(op),
            };
            match input {
                Input::Upstream(ShellEvent::Data(chunk)) => {
                    self.deliver_chunk(&id, &chunk).await;
                }
                Input::Upstream(ShellEvent::Closed) => {
                    info!("connection {id}: shell closed by remote");
                    self.terminate(&id, TerminateCause::UpstreamClosed).await;
                    break;
                }
                Input::Upstream(ShellEvent::Disconnected) => {
                    warn!("connection {id}: SSH transport lost");
                    self.terminate(&id, TerminateCause::UpstreamError).await;
                    break;
                }
                Input::Op(Some(ShellOp::Data(data))) => {
                    if shell.write(&data).await.is_err() {
                        warn!("connection {id}: shell write failed");
                        self.terminate(&id, TerminateCause::UpstreamError).await;
                        break;
                    }
                }
                Input::Op(Some(ShellOp::Resize { cols, rows })) => {
                    // Window-change absence is tolerated.
                    let _ = shell.resize(cols, rows).await;
                }
                Input::Op(Some(ShellOp::Close) | None) => {
                    shell.close().await;
                    break;
                }
            }
        }
    }

    /// Fan one shell chunk out to every open peer. Closed peers are skipped;
    /// their own close handlers detach them. Send errors never propagate
    /// beyond the failing peer.
    async fn deliver_chunk(&self, id: &str, chunk: &[u8]) {
        let sessions = self.sessions.read().await;
        let Some(session) = sessions.get(id) else {
            return;
        };
        session.touch();
        for peer in session.peers.values() {
            if peer.is_open() {
                let _ = peer.tx.send(PeerFrame::Output(chunk.to_vec()));
            }
        }
    }

    /// Attach a WebSocket peer to a Ready session. Returns the peer id and
    /// the outbound frame queue, or `None` if the session is missing or not
    /// Ready.
    pub async fn attach(
        &self,
        id: &str,
    ) -> Option<(u64, mpsc::UnboundedReceiver<PeerFrame>)> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id)?;
        if session.state != SessionState::Ready {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let peer_id = session.add_peer(tx);
        session.touch();
        let counts = counts_of(&sessions);
        self.bus
            .publish(Reason::WsAttached, Some(vec![id.to_string()]), counts);
        Some((peer_id, rx))
    }

    /// Remove a peer. No-op when the session is already gone (terminate
    /// cleared the peer set first).
    pub async fn detach(&self, id: &str, peer_id: u64) {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(id) else {
            return;
        };
        if !session.remove_peer(peer_id) {
            return;
        }
        session.touch();
        let counts = counts_of(&sessions);
        self.bus
            .publish(Reason::WsDetached, Some(vec![id.to_string()]), counts);
    }

    /// Record peer activity without any other effect.
    pub async fn touch(&self, id: &str) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(id) {
            session.touch();
        }
    }

    /// Forward stdin bytes to the session's shell. Silently dropped when the
    /// session is gone or not Ready.
    pub async fn write_stdin(&self, id: &str, data: Vec<u8>) {
        let ops = {
            let sessions = self.sessions.read().await;
            let Some(session) = sessions.get(id) else {
                return;
            };
            session.touch();
            session.shell.as_ref().map(|shell| shell.ops.clone())
        };
        if let Some(ops) = ops {
            let _ = ops.send(ShellOp::Data(data)).await;
        }
    }

    /// Update stored dimensions, request the PTY window change, and publish
    /// a `resize` summary. Valid only while Ready.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), ApiError> {
        let ops = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return Err(ApiError::NotFound(id.to_string()));
            };
            if session.state != SessionState::Ready {
                return Err(ApiError::NotReady(id.to_string()));
            }
            session.cols = cols;
            session.rows = rows;
            session.touch();
            let ops = session.shell.as_ref().map(|shell| shell.ops.clone());
            let counts = counts_of(&sessions);
            self.bus
                .publish(Reason::Resize, Some(vec![id.to_string()]), counts);
            ops
        };
        if let Some(ops) = ops {
            let _ = ops.try_send(ShellOp::Resize { cols, rows });
        }
        Ok(())
    }

    /// External DELETE. Returns whether the session existed.
    pub async fn delete(&self, id: &str) -> bool {
        self.terminate(id, TerminateCause::Delete).await
    }

    /// Full registry snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        let sessions = self.sessions.read().await;
        let mut connections: Vec<SessionView> = sessions.values().map(SessionView::of).collect();
        connections.sort_by_key(|view| view.created_at);
        Snapshot {
            version: self.bus.version(),
            ts: now_ms(),
            connections,
        }
    }

    /// Reap sessions with no open peer whose activity is older than their
    /// idle budget. Returns the number reaped. Safe to race with deletes and
    /// upstream closes — terminate is idempotent.
    pub async fn sweep(&self) -> usize {
        let now = now_ms();
        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, session)| {
                    session.open_peer_count() == 0
                        && now.saturating_sub(session.last_activity()) > session.idle_timeout_ms
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut reaped = 0;
        for id in expired {
            if self.terminate(&id, TerminateCause::IdleTimeout).await {
                info!("connection {id}: reaped by idle sweep");
                reaped += 1;
            }
        }
        reaped
    }

    /// Terminate every session (process shutdown).
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };
        let count = ids.len();
        for id in ids {
            self.terminate(&id, TerminateCause::Shutdown).await;
        }
        if count > 0 {
            info!("shut down {count} connection(s)");
        }
    }

    /// Tear a session down: remove it from the registry, close every peer
    /// with the cause's close code, release the shell handle, publish exactly
    /// one summary, then end the SSH transport. Idempotent — only the caller
    /// that removes the entry performs the teardown.
    pub(crate) async fn terminate(&self, id: &str, cause: TerminateCause) -> bool {
        let mut session = {
            let mut sessions = self.sessions.write().await;
            let Some(mut session) = sessions.remove(id) else {
                return false;
            };
            session.transition(cause.final_state());
            let (code, reason) = cause.close_frame();
            for peer in session.peers.values() {
                let _ = peer.tx.send(PeerFrame::Close { code, reason });
            }
            session.peers.clear();
            if let Some(shell) = session.shell.take() {
                let _ = shell.ops.try_send(ShellOp::Close);
            }
            let counts = counts_of(&sessions);
            self.bus
                .publish(cause.reason(), Some(vec![id.to_string()]), counts);
            session
        };

        if let Some(ssh) = session.ssh.take() {
            ssh.disconnect().await;
        }
        info!(
            "connection {id}: terminated ({})",
            cause.reason().as_str()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Reason;

    fn manager_with_cap(max_connections: usize) -> SessionManager {
        let mut config = Config::load(None);
        config.server.max_connections = max_connections;
        SessionManager::new(Arc::new(config))
    }

    fn params(host: &str) -> CreateParams {
        CreateParams {
            host: host.into(),
            port: 22,
            username: "ops".into(),
            password: "secret".into(),
            cols: 120,
            rows: 30,
            idle_timeout_ms: 600_000,
        }
    }

    /// Install a Ready session without a real SSH transport. Returns the ops
    /// receiver so tests can observe shell-bound traffic.
    async fn insert_ready(
        manager: &SessionManager,
        id: &str,
        idle_timeout_ms: u64,
    ) -> mpsc::Receiver<ShellOp> {
        let (ops_tx, ops_rx) = mpsc::channel(8);
        let meta = SessionMeta {
            host: "example.net".into(),
            port: 22,
            username: "ops".into(),
        };
        let mut session =
            Session::connecting(id.to_string(), meta, 120, 30, idle_timeout_ms);
        session.transition(SessionState::Ready);
        session.shell = Some(ShellHandle { ops: ops_tx });
        manager
            .sessions
            .write()
            .await
            .insert(id.to_string(), session);
        ops_rx
    }

    #[tokio::test]
    async fn admission_respects_capacity() {
        let manager = manager_with_cap(2);
        manager.admit("a", &params("h1")).await.unwrap();
        manager.admit("b", &params("h2")).await.unwrap();
        let err = manager.admit("c", &params("h3")).await.unwrap_err();
        assert!(matches!(err, ApiError::CapacityExceeded(2)));
        assert_eq!(manager.snapshot().await.connections.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        assert!(manager.delete("s1").await);
        assert!(!manager.delete("s1").await);
        assert!(!manager.delete("never-existed").await);
    }

    #[tokio::test]
    async fn delete_publishes_exactly_one_summary() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        let mut rx = manager.subscribe();

        manager.delete("s1").await;
        manager.delete("s1").await;

        let summary = rx.recv().await.unwrap();
        assert_eq!(summary.reason, Reason::Deleted);
        assert_eq!(summary.changed_ids, Some(vec!["s1".to_string()]));
        assert_eq!(summary.counts.total, 0);
        // Second delete found nothing and must not have published.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn attach_requires_ready_state() {
        let manager = manager_with_cap(10);
        manager.admit("pending", &params("h")).await.unwrap();
        assert!(manager.attach("pending").await.is_none());
        assert!(manager.attach("missing").await.is_none());

        let _ops = insert_ready(&manager, "up", 600_000).await;
        assert!(manager.attach("up").await.is_some());
    }

    #[tokio::test]
    async fn fanout_reaches_all_open_peers_in_order() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        let (_a, mut rx_a) = manager.attach("s1").await.unwrap();
        let (_b, mut rx_b) = manager.attach("s1").await.unwrap();

        manager.deliver_chunk("s1", b"hello ").await;
        manager.deliver_chunk("s1", b"world").await;

        for rx in [&mut rx_a, &mut rx_b] {
            let mut seen = Vec::new();
            while let Ok(frame) = rx.try_recv() {
                if let PeerFrame::Output(bytes) = frame {
                    seen.extend_from_slice(&bytes);
                }
            }
            assert_eq!(seen, b"hello world");
        }
    }

    #[tokio::test]
    async fn fanout_skips_dead_peers() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        let (_dead, rx_dead) = manager.attach("s1").await.unwrap();
        let (_live, mut rx_live) = manager.attach("s1").await.unwrap();
        drop(rx_dead);

        manager.deliver_chunk("s1", b"x").await;
        assert!(matches!(rx_live.try_recv(), Ok(PeerFrame::Output(_))));
    }

    #[tokio::test]
    async fn detach_publishes_and_is_idempotent() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        let (peer_id, _rx) = manager.attach("s1").await.unwrap();
        let mut bus_rx = manager.subscribe();

        manager.detach("s1", peer_id).await;
        let summary = bus_rx.recv().await.unwrap();
        assert_eq!(summary.reason, Reason::WsDetached);

        // Already removed — no second publication.
        manager.detach("s1", peer_id).await;
        assert!(bus_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn resize_updates_snapshot_and_signals_shell() {
        let manager = manager_with_cap(10);
        let mut ops = insert_ready(&manager, "s1", 600_000).await;
        let mut bus_rx = manager.subscribe();

        manager.resize("s1", 200, 50).await.unwrap();

        let view = &manager.snapshot().await.connections[0];
        assert_eq!((view.cols, view.rows), (200, 50));

        let summary = bus_rx.recv().await.unwrap();
        assert_eq!(summary.reason, Reason::Resize);
        assert_eq!(summary.changed_ids, Some(vec!["s1".to_string()]));

        assert!(matches!(
            ops.try_recv(),
            Ok(ShellOp::Resize {
                cols: 200,
                rows: 50
            })
        ));
    }

    #[tokio::test]
    async fn resize_outside_ready_is_not_found_to_callers() {
        let manager = manager_with_cap(10);
        manager.admit("pending", &params("h")).await.unwrap();
        assert!(matches!(
            manager.resize("pending", 80, 24).await,
            Err(ApiError::NotReady(_))
        ));
        assert!(matches!(
            manager.resize("missing", 80, 24).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stdin_reaches_shell_in_arrival_order() {
        let manager = manager_with_cap(10);
        let mut ops = insert_ready(&manager, "s1", 600_000).await;

        manager.write_stdin("s1", b"ls\n".to_vec()).await;
        manager.write_stdin("s1", b"pwd\n".to_vec()).await;

        assert!(matches!(ops.try_recv(), Ok(ShellOp::Data(d)) if d == b"ls\n"));
        assert!(matches!(ops.try_recv(), Ok(ShellOp::Data(d)) if d == b"pwd\n"));
    }

    #[tokio::test]
    async fn sweep_reaps_only_idle_peerless_sessions() {
        let manager = manager_with_cap(10);
        // Zero idle budget: eligible as soon as last_activity is in the past.
        let _ops_idle = insert_ready(&manager, "idle", 0).await;
        let _ops_busy = insert_ready(&manager, "busy", 0).await;
        let (_peer, _rx) = manager.attach("busy").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reaped = manager.sweep().await;

        assert_eq!(reaped, 1);
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(snapshot.connections[0].id, "busy");
    }

    #[tokio::test]
    async fn sweep_spares_recently_active_sessions() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "fresh", 600_000).await;
        assert_eq!(manager.sweep().await, 0);
        assert_eq!(manager.snapshot().await.connections.len(), 1);
    }

    #[tokio::test]
    async fn terminate_closes_peers_with_cause_code() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        let (_peer, mut rx) = manager.attach("s1").await.unwrap();

        manager.terminate("s1", TerminateCause::UpstreamError).await;

        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, PeerFrame::Close { code: 1011, .. }));
        // Queue ends after the close frame.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn versions_increase_across_mixed_operations() {
        let manager = manager_with_cap(10);
        let mut bus_rx = manager.subscribe();

        manager.admit("a", &params("h")).await.unwrap();
        let _ops = insert_ready(&manager, "b", 600_000).await;
        let (peer_id, _rx) = manager.attach("b").await.unwrap();
        manager.resize("b", 100, 40).await.unwrap();
        manager.detach("b", peer_id).await;
        manager.delete("a").await;

        let mut last = 0;
        while let Ok(summary) = bus_rx.try_recv() {
            assert!(summary.version > last);
            last = summary.version;
        }
        assert!(last >= 5);
    }

    #[tokio::test]
    async fn snapshot_never_exposes_credentials() {
        let manager = manager_with_cap(10);
        let _ops = insert_ready(&manager, "s1", 600_000).await;
        let json = serde_json::to_string(&manager.snapshot().await).unwrap();
        assert!(!json.contains("password"));
        assert!(!json.contains("secret"));
        assert!(json.contains("attachedClients"));
        assert!(json.contains("idleTimeoutMs"));
    }
}
