//! Conversation directory.
//!
//! The directory is the persistence collaborator that owns durable
//! conversation records. The hub only needs one thing from it: the
//! conversation summaries to send a newly registered identity.

use crate::connection::now_millis;
use async_trait::async_trait;
use parley_protocol::{ConversationSummary, LastMessage};
use thiserror::Error;

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backing store could not be reached.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Source of conversation snapshots.
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// Conversation summaries visible to an identity.
    async fn conversations_for(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, DirectoryError>;
}

/// A directory serving a fixed list to everyone.
///
/// Stands in for a real persistence query.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    conversations: Vec<ConversationSummary>,
}

impl StaticDirectory {
    /// Serve the given conversations.
    #[must_use]
    pub fn new(conversations: Vec<ConversationSummary>) -> Self {
        Self { conversations }
    }

    /// A small demo set of group conversations.
    #[must_use]
    pub fn demo() -> Self {
        let now = now_millis();
        Self::new(vec![
            ConversationSummary::new("general", "General Chat", "group")
                .with_participants(["user1", "user2", "user3"])
                .with_last_message(LastMessage {
                    content: "Hello everyone!".into(),
                    timestamp: now,
                    sender: "user1".into(),
                }),
            ConversationSummary::new("tech-talk", "Tech Talk", "group")
                .with_participants(["dev1", "dev2"])
                .with_last_message(LastMessage {
                    content: "Anyone tried the new release?".into(),
                    timestamp: now,
                    sender: "dev1".into(),
                }),
        ])
    }
}

#[async_trait]
impl ConversationDirectory for StaticDirectory {
    async fn conversations_for(
        &self,
        _user_id: &str,
    ) -> Result<Vec<ConversationSummary>, DirectoryError> {
        Ok(self.conversations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticDirectory::demo();
        let conversations = directory.conversations_for("alice").await.unwrap();

        let ids: Vec<_> = conversations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["general", "tech-talk"]);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let directory = StaticDirectory::default();
        assert!(directory.conversations_for("alice").await.unwrap().is_empty());
    }
}
