//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat hub.
//!
//! Every unit exchanged with a client is an [`Envelope`]: a JSON object with a
//! `type` tag, a polymorphic `data` payload and optional `user_id` /
//! `conversation_id` fields. Inbound envelopes are turned into a typed
//! [`Command`] before dispatch.
//!
//! ## Type Tags
//!
//! - `join_conversation` / `leave_conversation` - Conversation membership
//! - `create_conversation` - Ad-hoc conversation creation
//! - `message` / `typing` / `reaction` - Content routed to members
//! - anything else - Passed through untouched
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Command, Envelope};
//!
//! let envelope = Envelope::new("join_conversation", "general");
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//!
//! assert_eq!(
//!     Command::try_from(decoded).unwrap(),
//!     Command::Join("general".to_string())
//! );
//! ```

pub mod codec;
pub mod command;
pub mod conversation;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError};
pub use command::{Command, ContentKind, NewConversation};
pub use conversation::{validate_conversation_id, ConversationId, ConversationSummary, LastMessage};
pub use envelope::{kinds, Envelope, UserId};
