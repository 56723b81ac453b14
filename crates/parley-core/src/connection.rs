//! Connection state as seen by the hub.

use bytes::Bytes;
use parley_protocol::{ConversationId, UserId};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Atomic counter for connection ids.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier.
///
/// Identities are not unique (one user may hold several sessions), so the
/// registry keys connections by this id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Last-activity stamp of a connection.
///
/// Written by the connection's inbound duty, read by the hub's idle sweep.
#[derive(Debug, Clone)]
pub struct Activity(Arc<AtomicU64>);

impl Activity {
    /// Create a stamp set to now.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(now_millis())))
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.0.store(now_millis(), Ordering::Relaxed);
    }

    /// Last activity in unix milliseconds.
    #[must_use]
    pub fn last_seen(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Check if there was no activity for the given duration.
    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        now_millis().saturating_sub(self.last_seen()) > timeout.as_millis() as u64
    }

    #[cfg(test)]
    pub(crate) fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::Relaxed);
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// A live connection entry, owned by the hub.
///
/// Dropping the entry drops the only sender of the outbound queue, which
/// closes it and lets the connection's outbound duty shut the transport down.
#[derive(Debug)]
pub struct Connection {
    /// Connection id.
    pub id: ConnectionId,
    /// User identity supplied at handshake.
    pub identity: UserId,
    /// Bounded outbound queue of encoded frames.
    pub(crate) outbound: mpsc::Sender<Bytes>,
    /// Conversations this connection has joined.
    pub(crate) joined: HashSet<ConversationId>,
    /// Last-activity stamp shared with the inbound duty.
    pub activity: Activity,
    /// Registration time in unix milliseconds.
    pub connected_at: u64,
}

impl Connection {
    /// Create a new connection entry.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        identity: impl Into<UserId>,
        outbound: mpsc::Sender<Bytes>,
        activity: Activity,
    ) -> Self {
        Self {
            id,
            identity: identity.into(),
            outbound,
            joined: HashSet::new(),
            activity,
            connected_at: now_millis(),
        }
    }

    /// Conversations this connection has joined.
    pub fn joined(&self) -> impl Iterator<Item = &str> {
        self.joined.iter().map(String::as_str)
    }

    /// Check if this connection has joined a conversation.
    #[must_use]
    pub fn has_joined(&self, conversation_id: &str) -> bool {
        self.joined.contains(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_activity_staleness() {
        let activity = Activity::new();
        assert!(!activity.is_stale(Duration::from_secs(60)));

        activity.set(now_millis() - 120_000);
        assert!(activity.is_stale(Duration::from_secs(60)));

        activity.touch();
        assert!(!activity.is_stale(Duration::from_secs(60)));
    }
}
