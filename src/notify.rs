//! Versioned change-notification bus.
//!
//! Every registry mutation publishes one [`Summary`] carrying a globally
//! monotonic version and the session counts at publish time. Callers compute
//! the counts while still holding the registry lock so that a summary always
//! matches the registry state it describes.
//!
//! Delivery rides a `tokio::sync::broadcast` channel: a slow subscriber lags
//! and skips messages rather than blocking the publisher, and a dropped
//! subscriber detaches silently.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::util::now_ms;

/// Why a summary was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Reason {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "deleted")]
    Deleted,
    #[serde(rename = "state")]
    State,
    #[serde(rename = "ws-attached")]
    WsAttached,
    #[serde(rename = "ws-detached")]
    WsDetached,
    #[serde(rename = "resize")]
    Resize,
    #[serde(rename = "idle-timeout")]
    IdleTimeout,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::State => "state",
            Self::WsAttached => "ws-attached",
            Self::WsDetached => "ws-detached",
            Self::Resize => "resize",
            Self::IdleTimeout => "idle-timeout",
        }
    }
}

/// Session tally by state at publish time.
///
/// `closed` is normally zero: a session entering a terminal state is removed
/// from the registry in the same step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub total: usize,
    pub ready: usize,
    pub connecting: usize,
    pub error: usize,
    pub closed: usize,
}

/// Compact change notification delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub version: u64,
    pub ts: u64,
    pub reason: Reason,
    #[serde(rename = "changedIds", skip_serializing_if = "Option::is_none")]
    pub changed_ids: Option<Vec<String>>,
    pub counts: StateCounts,
}

/// Publisher half of the notification bus.
pub struct NotifyBus {
    tx: broadcast::Sender<Summary>,
    version: AtomicU64,
}

impl NotifyBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            version: AtomicU64::new(0),
        }
    }

    /// Current version without incrementing.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Summary> {
        self.tx.subscribe()
    }

    /// Increment the version and deliver a summary to every subscriber.
    ///
    /// Callers serialize publications through the registry lock, so versions
    /// observed by subscribers are strictly increasing in publication order.
    /// Returns the published summary. Send errors (no subscribers) are
    /// ignored.
    pub fn publish(
        &self,
        reason: Reason,
        changed_ids: Option<Vec<String>>,
        counts: StateCounts,
    ) -> Summary {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let summary = Summary {
            version,
            ts: now_ms(),
            reason,
            changed_ids,
            counts,
        };
        let _ = self.tx.send(summary.clone());
        summary
    }

    /// Synthetic summary for a freshly-subscribed client. Carries the current
    /// version and does not count as a publication.
    pub fn current(&self, counts: StateCounts) -> Summary {
        Summary {
            version: self.version(),
            ts: now_ms(),
            reason: Reason::State,
            changed_ids: None,
            counts,
        }
    }
}
