//! REST trigger surface.
//!
//! Thin glue only: authenticate, call the store, then hand the result to the
//! event router for broadcast. Message and conversation CRUD proper belongs
//! to the stores; these handlers exist because several gateway events
//! (edit/delete/pin/unpin, membership changes) originate from REST calls
//! rather than socket events.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::domain::{Claims, ConversationKind, StoreError};
use crate::gateway::registry::RegistryStats;

use super::handler::bearer_token;
use super::state::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn ok(message: &str, data: impl serde::Serialize) -> Json<Value> {
    Json(json!({"success": true, "message": message, "data": data}))
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"success": false, "message": message})))
}

fn store_error(e: StoreError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Rejected(_) => StatusCode::FORBIDDEN,
        StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::error!("Store call failed: {}", e);
    error_response(status, &e.user_message())
}

/// Authenticate a REST call with the same credential verifier the WebSocket
/// handshake uses.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Claims, (StatusCode, Json<Value>)> {
    let token = bearer_token(headers)
        .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Authentication required"))?;
    state
        .verifier
        .verify(&token)
        .map_err(|e| error_response(StatusCode::UNAUTHORIZED, &e.to_string()))
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Debug endpoint: current registry stats.
pub async fn debug_connections(State(state): State<Arc<AppState>>) -> Json<RegistryStats> {
    Json(state.registry.stats().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub members: Vec<String>,
}

/// POST /api/conversation
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateConversationRequest>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let conversation = state
        .conversations
        .create(&claims.sub, body.name, body.kind, body.members)
        .await
        .map_err(store_error)?;

    let notified = state
        .router
        .notify_conversation_created(&conversation, &claims.sub)
        .await;
    tracing::info!(
        "Conversation '{}' created by '{}', {} members notified",
        conversation.id,
        claims.sub,
        notified
    );
    Ok(ok("Conversation created successfully", conversation))
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    #[serde(rename = "type")]
    pub kind: Option<ConversationKind>,
}

/// GET /api/conversation
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let conversations = state
        .conversations
        .find_all(&claims.sub, query.kind)
        .await
        .map_err(store_error)?;
    Ok(ok("Conversations retrieved successfully", conversations))
}

/// GET /api/conversation/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let conversation = state
        .conversations
        .find_one(&conversation_id)
        .await
        .map_err(store_error)?;
    if !conversation.is_member(&claims.sub) {
        return Err(error_response(
            StatusCode::FORBIDDEN,
            "Not a member of this conversation",
        ));
    }
    Ok(ok("Conversation retrieved successfully", conversation))
}

/// DELETE /api/conversation/{id}
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let conversation = state
        .conversations
        .remove(&conversation_id, &claims.sub)
        .await
        .map_err(store_error)?;

    state
        .router
        .notify_conversation_deleted(&conversation, &claims.sub)
        .await;
    Ok(ok("Conversation deleted successfully", conversation.id))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberRequest {
    pub member_id: String,
}

/// POST /api/conversation/{id}/remove-member
pub async fn remove_member(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
    Json(body): Json<RemoveMemberRequest>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let conversation = state
        .conversations
        .remove_member(&conversation_id, &body.member_id, &claims.sub)
        .await
        .map_err(store_error)?;

    // Only the removed member is notified; the remaining members see the
    // change on their next conversation fetch.
    state
        .router
        .notify_member_removed(&conversation_id, &body.member_id, &claims.sub)
        .await;
    Ok(ok("Member removed successfully", conversation))
}

/// POST /api/conversation/{id}/leave
pub async fn leave_group(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(conversation_id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let conversation = state
        .conversations
        .leave_group(&conversation_id, &claims.sub)
        .await
        .map_err(store_error)?;

    state
        .router
        .notify_user_left_group(&conversation, &claims.sub)
        .await;
    Ok(ok("Left group successfully", conversation.id))
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

/// PATCH /api/message/{id}
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let message = state
        .messages
        .edit_message(&message_id, &claims.sub, &body.content)
        .await
        .map_err(store_error)?;

    state.router.notify_message_edited(&message).await;
    Ok(ok("Message edited successfully", message))
}

/// DELETE /api/message/{id}
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let message = state
        .messages
        .delete_message(&message_id, &claims.sub)
        .await
        .map_err(store_error)?;

    state.router.notify_message_deleted(&message).await;
    Ok(ok("Message deleted successfully", message.id))
}

/// POST /api/message/{id}/pin
pub async fn pin_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let message = state
        .messages
        .pin_message(&message_id, &claims.sub)
        .await
        .map_err(store_error)?;
    let conversation = state
        .conversations
        .find_one(&message.conversation_id)
        .await
        .map_err(store_error)?;

    state
        .router
        .notify_message_pinned(&conversation.members, &message, &claims.sub)
        .await;
    Ok(ok("Message pinned successfully", message))
}

/// POST /api/message/{id}/unpin
pub async fn unpin_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> ApiResult {
    let claims = authenticate(&state, &headers)?;
    let message = state
        .messages
        .unpin_message(&message_id, &claims.sub)
        .await
        .map_err(store_error)?;
    let conversation = state
        .conversations
        .find_one(&message.conversation_id)
        .await
        .map_err(store_error)?;

    state
        .router
        .notify_message_unpinned(&conversation.members, &message, &claims.sub)
        .await;
    Ok(ok("Message unpinned successfully", message))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMessagesQuery {
    pub conversation_id: String,
    pub q: String,
}

/// GET /api/message/search
pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SearchMessagesQuery>,
) -> ApiResult {
    authenticate(&state, &headers)?;
    let hits = state
        .messages
        .search_messages(&query.conversation_id, &query.q)
        .await
        .map_err(store_error)?;
    Ok(ok("Messages retrieved successfully", hits))
}
