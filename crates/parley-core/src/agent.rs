//! Per-connection agent.
//!
//! An agent owns one transport session for its whole life. It fetches the
//! connection's snapshot, registers with the hub, then runs two duties:
//!
//! - **inbound** reads frames, decodes them into [`Command`]s and forwards
//!   them to the hub
//! - **outbound** drains the connection's queue into the transport
//!
//! When either duty ends the agent unregisters. Unregistering drops the
//! queue's only sender, so the outbound duty drains what is left and closes
//! the transport.

use crate::connection::{Activity, Connection, ConnectionId};
use crate::directory::ConversationDirectory;
use crate::hub::{HubError, HubHandle};
use crate::metrics;
use bytes::Bytes;
use parley_protocol::{codec, Command, Envelope, ProtocolError, UserId};
use parley_transport::{FrameSink, FrameSource, Session};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Drives a single client connection.
pub struct ConnectionAgent {
    id: ConnectionId,
    identity: UserId,
    hub: HubHandle,
    activity: Activity,
}

impl ConnectionAgent {
    /// Create an agent for an identity.
    #[must_use]
    pub fn new(hub: HubHandle, identity: impl Into<UserId>) -> Self {
        Self {
            id: ConnectionId::next(),
            identity: identity.into(),
            hub,
            activity: Activity::new(),
        }
    }

    /// The connection id this agent registers under.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The identity this agent speaks for.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Run the connection until the client goes away or the hub drops it.
    ///
    /// A directory failure is not fatal: the client gets an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is not running.
    pub async fn run<S: Session>(
        self,
        session: S,
        directory: &dyn ConversationDirectory,
    ) -> Result<(), HubError> {
        let remote = session.remote_addr().unwrap_or_else(|| "unknown".to_string());
        debug!(connection = %self.id, user = %self.identity, remote = %remote, "Session opened");

        let conversations = match directory.conversations_for(&self.identity).await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(user = %self.identity, error = %e, "Failed to load conversations");
                Vec::new()
            }
        };
        let snapshot = Envelope::conversation_list(&conversations);

        let (sink, source) = session.split();
        let (tx, rx) = mpsc::channel(self.hub.outbound_capacity());
        let connection = Connection::new(self.id, self.identity.clone(), tx, self.activity.clone());
        self.hub.register(connection, snapshot).await?;

        let mut outbound = tokio::spawn(outbound_duty(self.id, rx, sink));

        let outbound_done = tokio::select! {
            () = self.inbound_duty(source) => false,
            _ = &mut outbound => true,
        };

        // No-op if the hub already purged us
        let unregistered = self.hub.unregister(self.id).await;

        if !outbound_done {
            if let Err(e) = outbound.await {
                warn!(connection = %self.id, error = %e, "Outbound task failed");
            }
        }

        info!(connection = %self.id, user = %self.identity, "Session closed");
        unregistered
    }

    async fn inbound_duty<R: FrameSource>(&self, mut source: R) {
        loop {
            let frame = match source.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(connection = %self.id, "Client closed connection");
                    return;
                }
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Receive failed");
                    return;
                }
            };
            self.activity.touch();

            let command = match codec::decode(&frame).and_then(Command::try_from) {
                Ok(command) => command,
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Dropping inbound frame");
                    metrics::record_dropped(drop_reason(&e));
                    continue;
                }
            };
            metrics::record_inbound(&command);

            if self.dispatch(command).await.is_err() {
                warn!(connection = %self.id, "Hub stopped");
                return;
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<(), HubError> {
        match command {
            Command::Join(conversation_id) => self.hub.join(self.id, conversation_id).await,
            Command::Leave(conversation_id) => self.hub.leave(self.id, conversation_id).await,
            Command::Create(conversation) => self.hub.create(self.id, conversation).await,
            Command::Content(_, envelope) => {
                // Clients cannot speak for someone else
                self.hub
                    .route(envelope.with_user(self.identity.clone()))
                    .await
            }
            Command::Passthrough(envelope) => self.hub.route(envelope).await,
        }
    }
}

fn drop_reason(error: &ProtocolError) -> &'static str {
    match error {
        ProtocolError::FrameTooLarge(_) => "too_large",
        ProtocolError::Json(_) => "malformed",
        ProtocolError::InvalidPayload { .. } => "invalid_payload",
    }
}

async fn outbound_duty<K: FrameSink>(
    id: ConnectionId,
    mut queue: mpsc::Receiver<Bytes>,
    mut sink: K,
) {
    while let Some(frame) = queue.recv().await {
        if let Err(e) = sink.send(frame).await {
            debug!(connection = %id, error = %e, "Send failed");
            return;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(connection = %id, error = %e, "Close failed");
    }
}
