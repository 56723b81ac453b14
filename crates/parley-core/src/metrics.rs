//! Hub-side instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, gauge};
use parley_protocol::Command;

/// Metric names.
pub mod names {
    pub const ENVELOPES_INBOUND: &str = "parley_envelopes_inbound_total";
    pub const ENVELOPES_DROPPED: &str = "parley_envelopes_dropped_total";
    pub const ENVELOPES_ROUTED: &str = "parley_envelopes_routed_total";
    pub const DELIVERIES_TOTAL: &str = "parley_deliveries_total";
    pub const CONNECTIONS_PURGED: &str = "parley_connections_purged_total";
    pub const CONVERSATIONS_CREATED: &str = "parley_conversations_created_total";
    pub const CONVERSATIONS_ACTIVE: &str = "parley_conversations_active";
    pub const IDENTITIES_ONLINE: &str = "parley_identities_online";
}

/// Record a decoded inbound command.
pub fn record_inbound(command: &Command) {
    let kind = match command {
        Command::Join(_) => "join",
        Command::Leave(_) => "leave",
        Command::Create(_) => "create",
        Command::Content(..) => "content",
        Command::Passthrough(_) => "passthrough",
    };
    counter!(names::ENVELOPES_INBOUND, "command" => kind).increment(1);
}

/// Record an inbound frame that was dropped.
pub fn record_dropped(reason: &'static str) {
    counter!(names::ENVELOPES_DROPPED, "reason" => reason).increment(1);
}

/// Record a routed envelope and its fan-out.
pub fn record_routed(scope: &'static str, recipients: usize) {
    counter!(names::ENVELOPES_ROUTED, "scope" => scope).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(recipients as u64);
}

/// Record a purged connection.
pub fn record_purge(reason: &'static str) {
    counter!(names::CONNECTIONS_PURGED, "reason" => reason).increment(1);
}

/// Record a created conversation.
pub fn record_created() {
    counter!(names::CONVERSATIONS_CREATED).increment(1);
}

/// Update registry gauges.
pub fn set_registry_gauges(conversations: usize, identities: usize) {
    gauge!(names::CONVERSATIONS_ACTIVE).set(conversations as f64);
    gauge!(names::IDENTITIES_ONLINE).set(identities as f64);
}
