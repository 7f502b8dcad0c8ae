//! Domain types shared across the gateway.
//!
//! Identifiers are plain strings: user and conversation ids come from the
//! credential verifier and the stores, socket ids are generated per session.

mod store;

pub use store::{ConversationStore, CreatedMessage, MessageStore, TokenVerifier};
#[cfg(test)]
pub use store::{MockConversationStore, MockMessageStore, MockTokenVerifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of an authenticated user.
pub type UserId = String;
/// Identity of a live transport session, unique per connection.
pub type SocketId = String;
/// Identity of a conversation; doubles as the conversation's room id.
pub type ConversationId = String;

/// Verified identity claims attached to a connection at authentication time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the authenticated user id.
    pub sub: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    /// Display name used in typing notifications.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "Unknown User".to_string())
    }

    pub fn email_or_empty(&self) -> String {
        self.email.clone().unwrap_or_default()
    }
}

/// Conversation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Two participants, no admin.
    Direct,
    /// Multi-participant with an admin role.
    Group,
}

/// A conversation record as held by the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub members: Vec<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// The other participant of a direct conversation.
    pub fn other_member(&self, user_id: &str) -> Option<&UserId> {
        self.members.iter().find(|m| m.as_str() != user_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}

/// A message record as held by the message store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub pinned: bool,
    pub edited: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Credential verification failures. All of them terminate the connection.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingToken,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token")]
    Invalid,
}

/// Failures surfaced by the message/conversation stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    /// The caller is not allowed to perform the operation; message is
    /// user-facing.
    #[error("{0}")]
    Rejected(String),
    #[error("storage failure: {0}")]
    Internal(String),
}

impl StoreError {
    /// Message safe to relay to the originating caller. Internal causes are
    /// collapsed to a generic message.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::NotFound(_) | StoreError::Rejected(_) => self.to_string(),
            StoreError::Internal(_) => "Internal server error".to_string(),
        }
    }
}
