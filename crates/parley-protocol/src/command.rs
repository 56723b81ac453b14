//! Typed commands decoded from inbound envelopes.
//!
//! The envelope `data` field is polymorphic on the wire. Converting an
//! [`Envelope`] into a [`Command`] checks the payload shape for the known
//! type tags and keeps unknown tags as an opaque passthrough.

use crate::codec::ProtocolError;
use crate::conversation::{validate_conversation_id, ConversationId};
use crate::envelope::{kinds, Envelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Content type tags. These are stamped with the sender identity and routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Message,
    Typing,
    Reaction,
}

impl ContentKind {
    /// Parse a content type tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            kinds::MESSAGE => Some(ContentKind::Message),
            kinds::TYPING => Some(ContentKind::Typing),
            kinds::REACTION => Some(ContentKind::Reaction),
            _ => None,
        }
    }

    /// The wire tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Message => kinds::MESSAGE,
            ContentKind::Typing => kinds::TYPING,
            ContentKind::Reaction => kinds::REACTION,
        }
    }
}

/// Payload of a `create_conversation` envelope.
///
/// Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    /// Display name. Must not be empty.
    pub name: String,
    /// Conversation type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// A decoded inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Join a conversation.
    Join(ConversationId),
    /// Leave a conversation.
    Leave(ConversationId),
    /// Create a conversation.
    Create(NewConversation),
    /// Content for a conversation or for everyone.
    Content(ContentKind, Envelope),
    /// Unknown type tag, forwarded as is.
    Passthrough(Envelope),
}

impl Command {
    /// The wire tag this command was decoded from.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Command::Join(_) => kinds::JOIN_CONVERSATION,
            Command::Leave(_) => kinds::LEAVE_CONVERSATION,
            Command::Create(_) => kinds::CREATE_CONVERSATION,
            Command::Content(kind, _) => kind.as_str(),
            Command::Passthrough(envelope) => envelope.kind.as_str(),
        }
    }
}

impl TryFrom<Envelope> for Command {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        match envelope.kind.as_str() {
            kinds::JOIN_CONVERSATION => conversation_id(&envelope).map(Command::Join),
            kinds::LEAVE_CONVERSATION => conversation_id(&envelope).map(Command::Leave),
            kinds::CREATE_CONVERSATION => {
                let new: NewConversation = serde_json::from_value(envelope.data.clone())
                    .map_err(|e| ProtocolError::InvalidPayload {
                        kind: envelope.kind.clone(),
                        reason: e.to_string(),
                    })?;
                if new.name.is_empty() {
                    return Err(ProtocolError::InvalidPayload {
                        kind: envelope.kind,
                        reason: "conversation name cannot be empty".into(),
                    });
                }
                Ok(Command::Create(new))
            }
            tag => match ContentKind::from_tag(tag) {
                Some(kind) => Ok(Command::Content(kind, envelope)),
                None => Ok(Command::Passthrough(envelope)),
            },
        }
    }
}

fn conversation_id(envelope: &Envelope) -> Result<ConversationId, ProtocolError> {
    let invalid = |reason: &str| ProtocolError::InvalidPayload {
        kind: envelope.kind.clone(),
        reason: reason.to_string(),
    };

    match &envelope.data {
        Value::String(id) => {
            validate_conversation_id(id).map_err(invalid)?;
            Ok(id.clone())
        }
        _ => Err(invalid("expected a conversation id string")),
    }
}
