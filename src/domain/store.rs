//! Collaborator trait definitions.
//!
//! The gateway core depends only on these interfaces; concrete
//! implementations live in the infrastructure layer (dependency inversion).

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::{AuthError, Claims, Conversation, ConversationKind, Message, StoreError, UserId};

/// Result of persisting a new message.
#[derive(Debug, Clone)]
pub struct CreatedMessage {
    pub message: Message,
    /// True when the conversation had zero messages before this one.
    pub first_message: bool,
}

/// Message persistence collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message and report whether it is the conversation's
    /// first.
    async fn create(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<CreatedMessage, StoreError>;

    /// Ordered history for a conversation, oldest first.
    async fn find_all_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    async fn edit_message(
        &self,
        message_id: &str,
        editor_id: &str,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// Soft delete: the record survives as a tombstone.
    async fn delete_message(&self, message_id: &str, actor_id: &str)
    -> Result<Message, StoreError>;

    async fn pin_message(&self, message_id: &str, actor_id: &str) -> Result<Message, StoreError>;

    async fn unpin_message(&self, message_id: &str, actor_id: &str) -> Result<Message, StoreError>;

    async fn search_messages(
        &self,
        conversation_id: &str,
        query: &str,
    ) -> Result<Vec<Message>, StoreError>;
}

/// Conversation persistence collaborator.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_one(&self, conversation_id: &str) -> Result<Conversation, StoreError>;

    async fn create(
        &self,
        creator_id: &str,
        name: Option<String>,
        kind: ConversationKind,
        members: Vec<UserId>,
    ) -> Result<Conversation, StoreError>;

    /// All conversations the user is a member of, optionally filtered by
    /// kind.
    async fn find_all(
        &self,
        user_id: &str,
        kind: Option<ConversationKind>,
    ) -> Result<Vec<Conversation>, StoreError>;

    /// Delete a conversation. Returns the record as it was, for broadcast
    /// targeting.
    async fn remove(&self, conversation_id: &str, actor_id: &str)
    -> Result<Conversation, StoreError>;

    /// Remove a member from a group conversation (admin only). Returns the
    /// updated record.
    async fn remove_member(
        &self,
        conversation_id: &str,
        member_id: &str,
        actor_id: &str,
    ) -> Result<Conversation, StoreError>;

    /// Voluntary exit from a group conversation. Returns the updated record.
    async fn leave_group(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Conversation, StoreError>;

    /// Bump the conversation's activity timestamp.
    async fn update_last_activity(&self, conversation_id: &str) -> Result<(), StoreError>;
}

/// Credential verifier collaborator.
#[cfg_attr(test, automock)]
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}
