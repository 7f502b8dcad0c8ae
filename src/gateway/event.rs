//! Wire events.
//!
//! Every frame in either direction is a JSON envelope
//! `{"event": <name>, "data": <payload>}`. Event names and payload field
//! names are part of the client contract and must not change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound client events.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    SendMessage {
        conversation_id: String,
        content: String,
    },
    JoinConversation {
        conversation_id: String,
    },
    LeaveConversation {
        conversation_id: String,
    },
    GetMessages {
        conversation_id: String,
    },
    Typing {
        conversation_id: String,
    },
    StopTyping {
        conversation_id: String,
    },
}

/// Outbound event names.
pub mod outbound {
    pub const AUTHENTICATED: &str = "authenticated";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NEW_MESSAGE: &str = "new_message";
    pub const FIRST_MESSAGE: &str = "first_message";
    pub const MESSAGE_ERROR: &str = "message_error";
    pub const JOINED_CONVERSATION: &str = "joined_conversation";
    pub const MESSAGES_LOADED: &str = "messages_loaded";
    pub const MESSAGES_ERROR: &str = "messages_error";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_STOPPED_TYPING: &str = "user_stopped_typing";
    pub const NEW_CONVERSATION: &str = "new_conversation";
    pub const CONVERSATION_DELETED: &str = "conversation_deleted";
    pub const MEMBER_REMOVED: &str = "member_removed";
    pub const USER_LEFT_GROUP: &str = "user_left_group";
    pub const LEFT_GROUP_SUCCESS: &str = "left_group_success";
    pub const MESSAGE_EDITED: &str = "message_edited";
    pub const MESSAGE_DELETED: &str = "message_deleted";
    pub const MESSAGE_PINNED: &str = "message_pinned";
    pub const MESSAGE_UNPINNED: &str = "message_unpinned";
}

/// Outbound envelope.
#[derive(Debug, Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Serialize an outbound event to its wire form.
///
/// Serialization of our own payload types cannot fail; a failure here is a
/// programming error and yields an error envelope instead of a panic.
pub fn encode<T: Serialize>(event: &str, data: &T) -> String {
    match serde_json::to_string(&Envelope { event, data }) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to encode '{}' event: {}", event, e);
            format!(r#"{{"event":"{event}","data":null}}"#)
        }
    }
}

/// Parse an inbound frame. `None` for frames that are not valid client
/// events; the caller logs and drops them.
pub fn decode(text: &str) -> Option<ClientEvent> {
    serde_json::from_str(text).ok()
}

/// Decode helper for tests and diagnostics: split a wire frame back into
/// `(event, data)`.
pub fn decode_envelope(text: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(text).ok()?;
    let event = value.get("event")?.as_str()?.to_string();
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    Some((event, data))
}
