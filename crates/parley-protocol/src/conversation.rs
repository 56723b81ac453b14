//! Conversation identifiers and summary payloads.

use serde::{Deserialize, Serialize};

/// Maximum conversation id length.
pub const MAX_CONVERSATION_ID_LENGTH: usize = 256;

/// A conversation identifier. Opaque to the hub.
pub type ConversationId = String;

/// Validate a conversation id received from a client.
///
/// # Errors
///
/// Returns an error message if the id is invalid.
pub fn validate_conversation_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Conversation id cannot be empty");
    }
    if id.len() > MAX_CONVERSATION_ID_LENGTH {
        return Err("Conversation id too long");
    }
    if id.chars().any(char::is_control) {
        return Err("Conversation id contains control characters");
    }
    Ok(())
}

/// Last message preview attached to a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    /// Unix milliseconds.
    pub timestamp: u64,
    pub sender: String,
}

/// Conversation summary, as sent in snapshots and creation announcements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: ConversationId,
    /// Display name.
    pub name: String,
    /// Conversation type, e.g. `direct` or `group`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Participant identities.
    #[serde(default)]
    pub participants: Vec<String>,
    /// Creator identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Creation time in unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    /// Most recent message, if any.
    #[serde(rename = "lastMessage", default)]
    pub last_message: Option<LastMessage>,
}

impl ConversationSummary {
    /// Create a summary with no participants.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            participants: Vec::new(),
            created_by: None,
            created_at: None,
            last_message: None,
        }
    }

    /// Set the participant list.
    #[must_use]
    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants = participants.into_iter().map(Into::into).collect();
        self
    }

    /// Set the last message preview.
    #[must_use]
    pub fn with_last_message(mut self, last_message: LastMessage) -> Self {
        self.last_message = Some(last_message);
        self
    }
}
