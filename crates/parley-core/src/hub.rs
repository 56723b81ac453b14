//! The hub: single owner of the registry and the routing algorithm.
//!
//! All registry mutations arrive as [`HubCommand`]s on one bounded channel and
//! are applied one at a time by the task running [`Hub::run`]. Nothing else
//! touches the registry, so no locks are needed. Handling a command never
//! awaits: deliveries are non-blocking enqueues onto each target's outbound
//! queue, and a target whose queue is full is purged on the spot.

use crate::connection::{now_millis, Connection, ConnectionId};
use crate::metrics;
use crate::registry::{Membership, Registry, RegistryStats};
use bytes::Bytes;
use parley_protocol::{codec, ConversationSummary, Envelope, NewConversation, UserId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub task has stopped.
    #[error("Hub is not running")]
    Closed,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the hub's command queue.
    pub command_capacity: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Purge connections idle for longer than this. `None` disables the sweep.
    pub idle_timeout: Option<Duration>,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            outbound_capacity: 256,
            idle_timeout: None,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Why a connection was purged by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeReason {
    /// Outbound queue full.
    Backpressure,
    /// Outbound queue already closed by the connection.
    Closed,
    /// No inbound activity within the idle timeout.
    Idle,
}

impl PurgeReason {
    fn as_str(self) -> &'static str {
        match self {
            PurgeReason::Backpressure => "backpressure",
            PurgeReason::Closed => "closed",
            PurgeReason::Idle => "idle",
        }
    }
}

/// Hub statistics.
pub type HubStats = RegistryStats;

/// A command for the hub task.
#[derive(Debug)]
pub enum HubCommand {
    /// Register a connection and deliver its snapshot.
    Register {
        connection: Connection,
        snapshot: Envelope,
    },
    /// Remove a connection. No-op if it is not registered.
    Unregister(ConnectionId),
    /// Join a conversation.
    Join {
        id: ConnectionId,
        conversation_id: String,
    },
    /// Leave a conversation.
    Leave {
        id: ConnectionId,
        conversation_id: String,
    },
    /// Create a conversation and announce it to everyone.
    Create {
        id: ConnectionId,
        conversation: NewConversation,
    },
    /// Route an envelope to a conversation, or to everyone.
    Route(Envelope),
    /// Report statistics.
    Stats(oneshot::Sender<HubStats>),
    /// Report the identities present in a conversation.
    Members {
        conversation_id: String,
        reply: oneshot::Sender<Vec<UserId>>,
    },
}

/// Synthesize an id for an ad-hoc conversation.
///
/// Distinct creators never collide. The same creator creating twice within
/// one second gets the same id.
#[must_use]
pub fn conversation_id_for(creator: &str, unix_seconds: u64) -> String {
    format!("conv_{}_{}", creator, unix_seconds)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The hub task state.
pub struct Hub {
    registry: Registry,
    commands: mpsc::Receiver<HubCommand>,
    config: HubConfig,
    clock: fn() -> u64,
}

impl Hub {
    /// Create a hub and the handle used to talk to it.
    ///
    /// The hub does nothing until [`Hub::run`] is polled.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        info!("Creating hub with config: {:?}", config);
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let handle = HubHandle {
            commands: tx,
            outbound_capacity: config.outbound_capacity.max(1),
        };
        let hub = Self {
            registry: Registry::new(),
            commands: rx,
            config,
            clock: unix_seconds,
        };
        (hub, handle)
    }

    /// Create a hub and run it on a new task.
    #[must_use]
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Replace the time source used for conversation ids.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    /// The registry. Only the hub mutates it.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Process commands until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        let mut sweep = tokio::time::interval(period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle_timeout = self.config.idle_timeout;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sweep.tick(), if idle_timeout.is_some() => {
                    if let Some(timeout) = idle_timeout {
                        self.sweep_idle(timeout);
                    }
                }
            }
        }

        info!(connections = self.registry.len(), "Hub stopped");
    }

    /// Apply one command.
    pub fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                connection,
                snapshot,
            } => self.register(connection, snapshot),
            HubCommand::Unregister(id) => self.unregister(id),
            HubCommand::Join {
                id,
                conversation_id,
            } => self.join(id, &conversation_id),
            HubCommand::Leave {
                id,
                conversation_id,
            } => self.leave(id, &conversation_id),
            HubCommand::Create { id, conversation } => self.create(id, conversation),
            HubCommand::Route(envelope) => self.route(&envelope),
            HubCommand::Stats(reply) => {
                let stats = self.registry.stats();
                metrics::set_registry_gauges(stats.conversations, stats.identities);
                let _ = reply.send(stats);
            }
            HubCommand::Members {
                conversation_id,
                reply,
            } => {
                let _ = reply.send(self.registry.member_identities(&conversation_id));
            }
        }
    }

    fn register(&mut self, connection: Connection, snapshot: Envelope) {
        let id = connection.id;
        let identity = connection.identity.clone();

        if !self.registry.insert(connection) {
            warn!(connection = %id, "Connection already registered");
            return;
        }
        info!(connection = %id, user = %identity, "Client connected");

        if let Some(frame) = encode(&snapshot) {
            self.deliver([id], &frame);
        }
    }

    fn unregister(&mut self, id: ConnectionId) {
        if let Some(connection) = self.registry.remove(id) {
            info!(
                connection = %id,
                user = %connection.identity,
                conversations = connection.joined().count(),
                connected_ms = now_millis().saturating_sub(connection.connected_at),
                "Client disconnected"
            );
        }
    }

    fn join(&mut self, id: ConnectionId, conversation_id: &str) {
        match self.registry.join(id, conversation_id) {
            Membership::Changed => {}
            Membership::Unchanged => {
                debug!(connection = %id, conversation = %conversation_id, "Already joined");
                return;
            }
            Membership::UnknownConnection => {
                debug!(connection = %id, "Join from unregistered connection ignored");
                return;
            }
        }

        let Some(identity) = self.identity_of(id) else {
            return;
        };
        info!(user = %identity, conversation = %conversation_id, "Joined conversation");

        let others: Vec<ConnectionId> = self
            .registry
            .members(conversation_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|member| *member != id)
            .collect();

        if let Some(frame) = encode(&Envelope::user_joined(&identity, conversation_id)) {
            self.deliver(others, &frame);
        }
    }

    fn leave(&mut self, id: ConnectionId, conversation_id: &str) {
        let Some(identity) = self.identity_of(id) else {
            debug!(connection = %id, "Leave from unregistered connection ignored");
            return;
        };

        if self.registry.leave(id, conversation_id) != Membership::Changed {
            debug!(connection = %id, conversation = %conversation_id, "Not a member");
            return;
        }
        info!(user = %identity, conversation = %conversation_id, "Left conversation");

        // Whoever is still a member hears about it.
        if let Some(remaining) = self.registry.members(conversation_id) {
            if let Some(frame) = encode(&Envelope::user_left(&identity, conversation_id)) {
                self.deliver(remaining, &frame);
            }
        }
    }

    fn create(&mut self, id: ConnectionId, conversation: NewConversation) {
        let Some(creator) = self.identity_of(id) else {
            debug!(connection = %id, "Create from unregistered connection ignored");
            return;
        };

        let summary = ConversationSummary {
            id: conversation_id_for(&creator, (self.clock)()),
            name: conversation.name,
            kind: conversation.kind,
            participants: vec![creator.clone()],
            created_by: Some(creator.clone()),
            created_at: Some(now_millis()),
            last_message: None,
        };
        info!(
            user = %creator,
            conversation = %summary.id,
            name = %summary.name,
            "Created conversation"
        );
        metrics::record_created();

        if let Some(frame) = encode(&Envelope::conversation_created(&summary)) {
            let everyone = self.registry.connection_ids();
            self.deliver(everyone, &frame);
        }
    }

    fn route(&mut self, envelope: &Envelope) {
        let Some(frame) = encode(envelope) else {
            return;
        };

        let (scope, targets) = match envelope.conversation() {
            Some(conversation_id) => match self.registry.members(conversation_id) {
                Some(members) => ("conversation", members),
                None => {
                    trace!(
                        conversation = %conversation_id,
                        "Route to conversation without members"
                    );
                    return;
                }
            },
            None => ("broadcast", self.registry.connection_ids()),
        };

        let delivered = self.deliver(targets, &frame);
        metrics::record_routed(scope, delivered);
        trace!(kind = %envelope.kind, scope, recipients = delivered, "Routed envelope");
    }

    /// Enqueue a frame on each target without blocking.
    ///
    /// Targets whose queue is full or closed are purged. Returns the number of
    /// successful enqueues.
    fn deliver(&mut self, targets: impl IntoIterator<Item = ConnectionId>, frame: &Bytes) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for id in targets {
            let Some(outbound) = self.registry.outbound(id) else {
                continue;
            };
            match outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => dead.push((id, PurgeReason::Backpressure)),
                Err(TrySendError::Closed(_)) => dead.push((id, PurgeReason::Closed)),
            }
        }

        for (id, reason) in dead {
            self.purge(id, reason);
        }

        delivered
    }

    fn purge(&mut self, id: ConnectionId, reason: PurgeReason) {
        if let Some(connection) = self.registry.remove(id) {
            warn!(
                connection = %id,
                user = %connection.identity,
                reason = reason.as_str(),
                conversations = connection.joined().count(),
                "Purged connection"
            );
            metrics::record_purge(reason.as_str());
        }
    }

    fn sweep_idle(&mut self, timeout: Duration) {
        for id in self.registry.stale(timeout) {
            self.purge(id, PurgeReason::Idle);
        }
    }

    fn identity_of(&self, id: ConnectionId) -> Option<UserId> {
        self.registry.get(id).map(|c| c.identity.clone())
    }
}

fn encode(envelope: &Envelope) -> Option<Bytes> {
    match codec::encode(envelope) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(kind = %envelope.kind, error = %e, "Failed to encode envelope");
            None
        }
    }
}

/// Cloneable handle for sending commands to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    outbound_capacity: usize,
}

impl HubHandle {
    /// Capacity to use for each connection's outbound queue.
    #[must_use]
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// Send a raw command.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Register a connection; `snapshot` is the first envelope it receives.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn register(
        &self,
        connection: Connection,
        snapshot: Envelope,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Register {
            connection,
            snapshot,
        })
        .await
    }

    /// Unregister a connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(id)).await
    }

    /// Join a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn join(
        &self,
        id: ConnectionId,
        conversation_id: impl Into<String>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Join {
            id,
            conversation_id: conversation_id.into(),
        })
        .await
    }

    /// Leave a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn leave(
        &self,
        id: ConnectionId,
        conversation_id: impl Into<String>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Leave {
            id,
            conversation_id: conversation_id.into(),
        })
        .await
    }

    /// Create a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn create(
        &self,
        id: ConnectionId,
        conversation: NewConversation,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Create { id, conversation }).await
    }

    /// Route an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn route(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(HubCommand::Route(envelope)).await
    }

    /// Get hub statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Identities currently present in a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub has stopped.
    pub async fn members(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<Vec<UserId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Members {
            conversation_id: conversation_id.into(),
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Activity;
    use parley_protocol::kinds;
    use serde_json::json;
    use std::collections::HashSet;

    fn hub() -> Hub {
        Hub::new(HubConfig::default()).0
    }

    /// Register a connection with the given queue capacity.
    fn connect(
        hub: &mut Hub,
        identity: &str,
        capacity: usize,
    ) -> (ConnectionId, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = ConnectionId::next();
        hub.handle(HubCommand::Register {
            connection: Connection::new(id, identity, tx, Activity::new()),
            snapshot: Envelope::conversation_list(&[]),
        });
        (id, rx)
    }

    fn join(hub: &mut Hub, id: ConnectionId, conversation_id: &str) {
        hub.handle(HubCommand::Join {
            id,
            conversation_id: conversation_id.to_string(),
        });
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            envelopes.push(codec::decode(&frame).unwrap());
        }
        envelopes
    }

    #[test]
    fn test_register_delivers_snapshot() {
        let mut hub = hub();
        let (id, mut rx) = connect(&mut hub, "alice", 8);

        assert!(hub.registry().contains(id));
        let received = drain(&mut rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, kinds::CONVERSATION_LIST);
    }

    #[test]
    fn test_register_unregister_restores_registry() {
        let mut hub = hub();
        let (alice, _rx1) = connect(&mut hub, "alice", 8);
        join(&mut hub, alice, "general");
        let before = hub.registry().digest();

        let (carol, mut carol_rx) = connect(&mut hub, "carol", 8);
        join(&mut hub, carol, "general");
        join(&mut hub, carol, "random");
        hub.handle(HubCommand::Unregister(carol));

        assert_eq!(hub.registry().digest(), before);
        hub.registry().assert_consistent();

        // Queue closed exactly once; a second unregister is a no-op
        drain(&mut carol_rx);
        assert!(matches!(
            carol_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        hub.handle(HubCommand::Unregister(carol));
        assert_eq!(hub.registry().digest(), before);
    }

    #[test]
    fn test_join_announces_to_others() {
        let mut hub = hub();
        let (alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        let (bob, mut bob_rx) = connect(&mut hub, "bob", 8);
        join(&mut hub, alice, "general");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        join(&mut hub, bob, "general");

        let alice_got = drain(&mut alice_rx);
        assert_eq!(alice_got, vec![Envelope::user_joined("bob", "general")]);
        assert!(drain(&mut bob_rx).is_empty());

        // Joining twice is not announced again
        join(&mut hub, bob, "general");
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[test]
    fn test_leave_announces_and_cleans_up() {
        let mut hub = hub();
        let (alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        let (bob, mut bob_rx) = connect(&mut hub, "bob", 8);
        join(&mut hub, alice, "general");
        join(&mut hub, bob, "general");
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.handle(HubCommand::Leave {
            id: bob,
            conversation_id: "general".into(),
        });
        assert_eq!(
            drain(&mut alice_rx),
            vec![Envelope::user_left("bob", "general")]
        );
        assert!(drain(&mut bob_rx).is_empty());

        hub.handle(HubCommand::Leave {
            id: alice,
            conversation_id: "general".into(),
        });
        assert!(!hub.registry().has_conversation("general"));
        hub.registry().assert_consistent();
    }

    #[test]
    fn test_routing_isolation() {
        let mut hub = hub();
        let (alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        let (bob, mut bob_rx) = connect(&mut hub, "bob", 8);
        let (carol, mut carol_rx) = connect(&mut hub, "carol", 8);
        join(&mut hub, alice, "general");
        join(&mut hub, bob, "general");
        join(&mut hub, carol, "random");
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        let message = Envelope::new(kinds::MESSAGE, "hi")
            .with_user("alice")
            .with_conversation("general");
        hub.handle(HubCommand::Route(message.clone()));

        assert_eq!(drain(&mut bob_rx), vec![message.clone()]);
        assert_eq!(drain(&mut alice_rx), vec![message]);
        assert!(drain(&mut carol_rx).is_empty());
    }

    #[test]
    fn test_route_without_conversation_reaches_everyone() {
        let mut hub = hub();
        let (_alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        let (_bob, mut bob_rx) = connect(&mut hub, "bob", 8);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // An empty conversation id counts as absent
        let notice =
            Envelope::new("system_notice", json!({"text": "maintenance"})).with_conversation("");
        hub.handle(HubCommand::Route(notice.clone()));

        assert_eq!(drain(&mut alice_rx), vec![notice.clone()]);
        assert_eq!(drain(&mut bob_rx), vec![notice]);
    }

    #[test]
    fn test_route_to_unknown_conversation_is_noop() {
        let mut hub = hub();
        let (_alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        drain(&mut alice_rx);
        let before = hub.registry().digest();

        hub.handle(HubCommand::Route(
            Envelope::new(kinds::MESSAGE, "hello?").with_conversation("nowhere"),
        ));

        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(hub.registry().digest(), before);
    }

    #[test]
    fn test_backpressure_purge() {
        let mut hub = hub();
        let (alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        // Snapshot fills one of two slots
        let (slow, _slow_rx) = connect(&mut hub, "slow", 2);
        join(&mut hub, alice, "general");
        join(&mut hub, slow, "general");
        join(&mut hub, slow, "random");
        drain(&mut alice_rx);

        let message = Envelope::new(kinds::MESSAGE, "hi").with_conversation("general");
        // Fills the queue
        hub.handle(HubCommand::Route(message.clone()));
        assert!(hub.registry().contains(slow));

        // One more delivery overflows it
        hub.handle(HubCommand::Route(message.clone()));
        assert!(!hub.registry().contains(slow));
        assert_eq!(hub.registry().members("general"), Some(vec![alice]));
        assert!(!hub.registry().has_conversation("random"));
        assert!(hub.registry().connections_of("slow").is_empty());
        hub.registry().assert_consistent();

        // Later routes neither block nor fail
        drain(&mut alice_rx);
        hub.handle(HubCommand::Route(message.clone()));
        assert_eq!(drain(&mut alice_rx), vec![message]);
    }

    #[test]
    fn test_closed_queue_is_purged() {
        let mut hub = hub();
        let (gone, gone_rx) = connect(&mut hub, "gone", 8);
        drop(gone_rx);

        hub.handle(HubCommand::Route(Envelope::new("ping", json!({}))));
        assert!(!hub.registry().contains(gone));
    }

    #[test]
    fn test_create_announces_to_everyone() {
        let mut hub = hub().with_clock(|| 1_700_000_000);
        let (alice, mut alice_rx) = connect(&mut hub, "alice", 8);
        let (_bob, mut bob_rx) = connect(&mut hub, "bob", 8);
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        hub.handle(HubCommand::Create {
            id: alice,
            conversation: NewConversation {
                name: "Design".into(),
                kind: "group".into(),
            },
        });

        for rx in [&mut alice_rx, &mut bob_rx] {
            let got = drain(rx);
            assert_eq!(got.len(), 1);
            let announcement = &got[0];
            assert_eq!(announcement.kind, kinds::CONVERSATION_CREATED);
            assert_eq!(announcement.user_id.as_deref(), Some("alice"));
            assert_eq!(announcement.data["id"], "conv_alice_1700000000");
            assert_eq!(announcement.data["name"], "Design");
            assert_eq!(announcement.data["type"], "group");
            assert_eq!(announcement.data["participants"], json!(["alice"]));
            assert_eq!(announcement.data["lastMessage"], json!(null));
        }

        // Creation does not make anyone a member
        assert_eq!(hub.registry().stats().conversations, 0);
    }

    #[test]
    fn test_creation_ids_unique_across_identities() {
        let mut hub = hub().with_clock(|| 42);
        let (alice, _alice_rx) = connect(&mut hub, "alice", 64);
        let (bob, _bob_rx) = connect(&mut hub, "bob", 64);
        let (observer, mut observer_rx) = connect(&mut hub, "observer", 64);
        drain(&mut observer_rx);

        for id in [alice, bob, observer] {
            hub.handle(HubCommand::Create {
                id,
                conversation: NewConversation {
                    name: "Same Name".into(),
                    kind: "group".into(),
                },
            });
        }

        let ids: HashSet<String> = drain(&mut observer_rx)
            .into_iter()
            .map(|e| e.data["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_commands_from_purged_connection_ignored() {
        let mut hub = hub();
        let (alice, _rx) = connect(&mut hub, "alice", 8);
        hub.handle(HubCommand::Unregister(alice));

        join(&mut hub, alice, "general");
        hub.handle(HubCommand::Create {
            id: alice,
            conversation: NewConversation {
                name: "Ghost".into(),
                kind: "group".into(),
            },
        });

        assert!(hub.registry().is_empty());
        assert!(!hub.registry().has_conversation("general"));
    }

    #[test]
    fn test_idle_sweep() {
        let mut hub = hub();
        let (idle, _idle_rx) = connect(&mut hub, "idle", 8);
        let (active, _active_rx) = connect(&mut hub, "active", 8);
        join(&mut hub, idle, "general");
        hub.registry().get(idle).unwrap().activity.set(0);

        hub.sweep_idle(Duration::from_secs(60));

        assert!(!hub.registry().contains(idle));
        assert!(hub.registry().contains(active));
        assert!(!hub.registry().has_conversation("general"));
    }

    #[test]
    fn test_conversation_id_for() {
        assert_eq!(conversation_id_for("alice", 10), "conv_alice_10");
        assert_ne!(conversation_id_for("alice", 10), conversation_id_for("bob", 10));
    }

    #[tokio::test]
    async fn test_handle_stats_and_members() {
        let handle = Hub::spawn(HubConfig::default());
        let (tx, _rx) = mpsc::channel(8);
        let id = ConnectionId::next();

        handle
            .register(
                Connection::new(id, "alice", tx, Activity::new()),
                Envelope::conversation_list(&[]),
            )
            .await
            .unwrap();
        handle.join(id, "general").await.unwrap();

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.conversations, 1);
        assert_eq!(handle.members("general").await.unwrap(), vec!["alice"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_runs_on_interval() {
        let handle = Hub::spawn(HubConfig {
            idle_timeout: Some(Duration::from_secs(1)),
            sweep_interval: Duration::from_millis(10),
            ..HubConfig::default()
        });
        let (tx, _rx) = mpsc::channel(8);
        let activity = Activity::new();
        activity.set(0);

        handle
            .register(
                Connection::new(ConnectionId::next(), "idle", tx, activity),
                Envelope::conversation_list(&[]),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.stats().await.unwrap().connections, 0);
    }
}
