//! # parley-core
//!
//! Presence tracking and message routing for the Parley chat hub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Registry** - Connections, identities and conversation memberships
//! - **Hub** - Single task that owns the registry and routes envelopes
//! - **Agent** - Per-connection driver bridging a transport session and the hub
//! - **Directory** - Source of the conversation snapshot sent on connect
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  commands   ┌─────────────┐     ┌─────────────┐
//! │    Agent    │────────────▶│     Hub     │────▶│  Registry   │
//! └─────────────┘             └─────────────┘     └─────────────┘
//!        ▲                           │
//!        │     outbound queue        │
//!        └───────────────────────────┘
//! ```
//!
//! Each agent holds the receiving end of its bounded outbound queue. The hub
//! holds the only sender, so removing a connection from the registry is what
//! closes its queue.

pub mod agent;
pub mod connection;
pub mod directory;
pub mod hub;
pub mod metrics;
pub mod registry;

pub use agent::ConnectionAgent;
pub use connection::{Activity, Connection, ConnectionId};
pub use directory::{ConversationDirectory, DirectoryError, StaticDirectory};
pub use hub::{
    conversation_id_for, Hub, HubCommand, HubConfig, HubError, HubHandle, HubStats, PurgeReason,
};
pub use registry::{Membership, Registry, RegistryStats};
