//! The envelope is the unit of communication in Parley.
//!
//! Envelopes are serialized as JSON text. The field names are part of the
//! client contract and must not change.

use crate::conversation::ConversationSummary;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user identifier, as supplied by the client at handshake time.
pub type UserId = String;

/// Envelope type tags.
pub mod kinds {
    pub const JOIN_CONVERSATION: &str = "join_conversation";
    pub const LEAVE_CONVERSATION: &str = "leave_conversation";
    pub const CREATE_CONVERSATION: &str = "create_conversation";
    pub const MESSAGE: &str = "message";
    pub const TYPING: &str = "typing";
    pub const REACTION: &str = "reaction";

    // Emitted by the hub.
    pub const CONVERSATION_LIST: &str = "conversation_list";
    pub const CONVERSATION_CREATED: &str = "conversation_created";
    pub const USER_JOINED: &str = "user_joined";
    pub const USER_LEFT: &str = "user_left";
}

/// A wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: String,

    /// Payload; its shape depends on the type tag.
    #[serde(default)]
    pub data: Value,

    /// Sender identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,

    /// Target conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl Envelope {
    /// Create a new envelope with no sender or conversation.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
            user_id: None,
            conversation_id: None,
        }
    }

    /// Set the sender identity.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the target conversation.
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// The target conversation, if any.
    ///
    /// An empty `conversation_id` counts as absent.
    #[must_use]
    pub fn conversation(&self) -> Option<&str> {
        self.conversation_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Snapshot of conversations delivered to a newly registered connection.
    ///
    /// The payload is an object keyed by conversation id.
    #[must_use]
    pub fn conversation_list(conversations: &[ConversationSummary]) -> Self {
        let data: Map<String, Value> = conversations
            .iter()
            .filter_map(|c| serde_json::to_value(c).ok().map(|v| (c.id.clone(), v)))
            .collect();
        Self::new(kinds::CONVERSATION_LIST, Value::Object(data))
    }

    /// Announcement of a newly created conversation.
    #[must_use]
    pub fn conversation_created(summary: &ConversationSummary) -> Self {
        let data = serde_json::to_value(summary).unwrap_or(Value::Null);
        let mut envelope = Self::new(kinds::CONVERSATION_CREATED, data);
        envelope.user_id = summary.created_by.clone();
        envelope
    }

    /// A member joined a conversation.
    #[must_use]
    pub fn user_joined(user_id: &str, conversation_id: &str) -> Self {
        Self::new(kinds::USER_JOINED, user_id)
            .with_user(user_id)
            .with_conversation(conversation_id)
    }

    /// A member left a conversation.
    #[must_use]
    pub fn user_left(user_id: &str, conversation_id: &str) -> Self {
        Self::new(kinds::USER_LEFT, user_id)
            .with_user(user_id)
            .with_conversation(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_field_names() {
        let envelope = Envelope::new("message", "hi")
            .with_user("alice")
            .with_conversation("general");

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "data": "hi",
                "user_id": "alice",
                "conversation_id": "general",
            })
        );
    }

    #[test]
    fn test_optional_fields_omitted() {
        let value = serde_json::to_value(Envelope::new("ping", json!({}))).unwrap();
        assert!(value.get("user_id").is_none());
        assert!(value.get("conversation_id").is_none());
    }

    #[test]
    fn test_empty_conversation_is_absent() {
        let envelope = Envelope::new("message", "x").with_conversation("");
        assert_eq!(envelope.conversation(), None);

        let envelope = Envelope::new("message", "x").with_conversation("general");
        assert_eq!(envelope.conversation(), Some("general"));
    }

    #[test]
    fn test_conversation_list_keyed_by_id() {
        let list = vec![
            ConversationSummary::new("general", "General Chat", "group"),
            ConversationSummary::new("tech-talk", "Tech Talk", "group"),
        ];

        let envelope = Envelope::conversation_list(&list);
        assert_eq!(envelope.kind, kinds::CONVERSATION_LIST);
        assert_eq!(envelope.data["general"]["name"], "General Chat");
        assert_eq!(envelope.data["tech-talk"]["type"], "group");
    }

    #[test]
    fn test_user_joined_shape() {
        let envelope = Envelope::user_joined("bob", "general");
        assert_eq!(envelope.kind, kinds::USER_JOINED);
        assert_eq!(envelope.data, json!("bob"));
        assert_eq!(envelope.user_id.as_deref(), Some("bob"));
        assert_eq!(envelope.conversation_id.as_deref(), Some("general"));
    }
}
