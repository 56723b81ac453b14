//! The hub's registry of live connections and conversation memberships.
//!
//! The registry is plain data owned by the hub task. It keeps three indexes
//! consistent with each other:
//!
//! - every live connection is indexed under its identity, and nothing else is;
//! - a connection is in a conversation's member set iff the conversation is in
//!   the connection's joined set;
//! - no identity or conversation maps to an empty set.

use crate::connection::{Connection, ConnectionId};
use bytes::Bytes;
use parley_protocol::{ConversationId, UserId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Result of a membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// The membership changed.
    Changed,
    /// Already in the requested state.
    Unchanged,
    /// The connection is not registered.
    UnknownConnection,
}

/// Registry of live connections.
#[derive(Debug, Default)]
pub struct Registry {
    /// Live connections by id.
    connections: HashMap<ConnectionId, Connection>,
    /// Identity -> connection ids.
    identities: HashMap<UserId, HashSet<ConnectionId>>,
    /// Conversation -> member connection ids.
    conversations: HashMap<ConversationId, HashSet<ConnectionId>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    ///
    /// Returns `false` (and drops the connection) if the id is already live.
    pub fn insert(&mut self, connection: Connection) -> bool {
        if self.connections.contains_key(&connection.id) {
            return false;
        }

        self.identities
            .entry(connection.identity.clone())
            .or_default()
            .insert(connection.id);
        self.connections.insert(connection.id, connection);
        true
    }

    /// Remove a connection from every index.
    ///
    /// Returns the removed entry, or `None` if it was not registered.
    /// Dropping the returned entry closes its outbound queue.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;

        if let Some(ids) = self.identities.get_mut(&connection.identity) {
            ids.remove(&id);
            if ids.is_empty() {
                self.identities.remove(&connection.identity);
            }
        }

        for conversation_id in &connection.joined {
            self.detach(id, conversation_id);
        }

        Some(connection)
    }

    /// Add a connection to a conversation, creating the member set if absent.
    pub fn join(&mut self, id: ConnectionId, conversation_id: &str) -> Membership {
        let Some(connection) = self.connections.get_mut(&id) else {
            return Membership::UnknownConnection;
        };

        if !connection.joined.insert(conversation_id.to_string()) {
            return Membership::Unchanged;
        }

        self.conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "Creating member set");
                HashSet::new()
            })
            .insert(id);
        Membership::Changed
    }

    /// Remove a connection from a conversation, dropping the member set once
    /// it is empty.
    pub fn leave(&mut self, id: ConnectionId, conversation_id: &str) -> Membership {
        let Some(connection) = self.connections.get_mut(&id) else {
            return Membership::UnknownConnection;
        };

        if !connection.joined.remove(conversation_id) {
            return Membership::Unchanged;
        }

        self.detach(id, conversation_id);
        Membership::Changed
    }

    fn detach(&mut self, id: ConnectionId, conversation_id: &str) {
        if let Some(members) = self.conversations.get_mut(conversation_id) {
            members.remove(&id);
            if members.is_empty() {
                self.conversations.remove(conversation_id);
                debug!(conversation = %conversation_id, "Deleted empty member set");
            }
        }
    }

    /// Get a live connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Check if a connection is live.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub(crate) fn outbound(&self, id: ConnectionId) -> Option<&mpsc::Sender<Bytes>> {
        self.connections.get(&id).map(|c| &c.outbound)
    }

    /// Ids of all live connections.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Ids of a conversation's members, or `None` if nobody has joined it.
    #[must_use]
    pub fn members(&self, conversation_id: &str) -> Option<Vec<ConnectionId>> {
        self.conversations
            .get(conversation_id)
            .map(|members| members.iter().copied().collect())
    }

    /// Identities present in a conversation, sorted and deduplicated.
    #[must_use]
    pub fn member_identities(&self, conversation_id: &str) -> Vec<UserId> {
        let mut identities: Vec<UserId> = self
            .conversations
            .get(conversation_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .map(|c| c.identity.clone())
            .collect();
        identities.sort();
        identities.dedup();
        identities
    }

    /// Connections held by an identity.
    #[must_use]
    pub fn connections_of(&self, identity: &str) -> Vec<ConnectionId> {
        self.identities
            .get(identity)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Check if a conversation has any members.
    #[must_use]
    pub fn has_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.contains_key(conversation_id)
    }

    /// Connections with no activity for the given duration.
    #[must_use]
    pub fn stale(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.activity.is_stale(timeout))
            .map(|c| c.id)
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no live connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            identities: self.identities.len(),
            conversations: self.conversations.len(),
            memberships: self.conversations.values().map(HashSet::len).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of live connections.
    pub connections: usize,
    /// Number of distinct online identities.
    pub identities: usize,
    /// Number of conversations with at least one member.
    pub conversations: usize,
    /// Total number of conversation memberships.
    pub memberships: usize,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    pub(crate) type Digest = (
        BTreeSet<ConnectionId>,
        BTreeMap<UserId, BTreeSet<ConnectionId>>,
        BTreeMap<ConversationId, BTreeSet<ConnectionId>>,
    );

    impl Registry {
        /// Order-independent copy of every index.
        pub(crate) fn digest(&self) -> Digest {
            (
                self.connections.keys().copied().collect(),
                self.identities
                    .iter()
                    .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                    .collect(),
                self.conversations
                    .iter()
                    .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                    .collect(),
            )
        }

        /// Panic if any cross-index invariant is broken.
        pub(crate) fn assert_consistent(&self) {
            for (id, connection) in &self.connections {
                assert!(
                    self.identities
                        .get(&connection.identity)
                        .is_some_and(|ids| ids.contains(id)),
                    "{id} missing from identity index"
                );
                for conversation_id in &connection.joined {
                    assert!(
                        self.conversations
                            .get(conversation_id)
                            .is_some_and(|members| members.contains(id)),
                        "{id} joined {conversation_id} but is not a member"
                    );
                }
            }

            for (identity, ids) in &self.identities {
                assert!(!ids.is_empty(), "empty identity entry {identity}");
                for id in ids {
                    assert_eq!(
                        self.connections.get(id).map(|c| c.identity.as_str()),
                        Some(identity.as_str())
                    );
                }
            }

            for (conversation_id, members) in &self.conversations {
                assert!(!members.is_empty(), "empty member set {conversation_id}");
                for id in members {
                    assert!(self
                        .connections
                        .get(id)
                        .is_some_and(|c| c.joined.contains(conversation_id)));
                }
            }
        }
    }
}
