//! WebSocket connection lifecycle.
//!
//! A socket moves Connecting → Authenticated → Disconnected. Authentication
//! happens immediately after the upgrade: the bearer credential comes from
//! the `?token=` query parameter or the `Authorization` header. A missing or
//! invalid credential is answered with an `unauthorized` event over the
//! upgraded socket, then the connection is closed without ever reaching the
//! authenticated state.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::AuthError;
use crate::gateway::{
    ConnContext, Connection,
    event::{self, outbound},
};

use super::state::AppState;

/// Query parameters for the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Extract a bearer credential from an `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// GET /ws: upgrade and hand the socket to the lifecycle handler.
///
/// The upgrade always succeeds; rejection notifications need an open socket
/// to be delivered on.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = query.token.or_else(|| bearer_token(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Connecting → Authenticated, or straight to Disconnected.
    let verified = token
        .ok_or(AuthError::MissingToken)
        .and_then(|t| state.verifier.verify(&t));
    let claims = match verified {
        Ok(claims) => claims,
        Err(e) => {
            tracing::warn!("WebSocket authentication failed: {}", e);
            let frame = event::encode(
                outbound::UNAUTHORIZED,
                &json!({"success": false, "message": e.to_string()}),
            );
            let _ = ws_sender.send(Message::Text(frame.into())).await;
            let _ = ws_sender.close().await;
            return;
        }
    };

    let socket_id = Uuid::new_v4().to_string();
    let user_id = claims.sub.clone();

    // The writer task owns the sink; every other component reaches this
    // connection only through the channel sender.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Register with the connection registry (superseding any previous socket
    // for this user) and take over the personal room.
    state
        .registry
        .register(user_id.clone(), Connection::new(socket_id.clone(), tx.clone()))
        .await;
    state
        .rooms
        .join_exclusive(&user_id, &socket_id, tx.clone())
        .await;

    let ctx = ConnContext::authenticated(socket_id.clone(), tx.clone(), claims.clone());
    let _ = tx.send(event::encode(
        outbound::AUTHENTICATED,
        &json!({
            "success": true,
            "message": "Successfully authenticated",
            "user": claims,
        }),
    ));
    tracing::info!("User '{}' authenticated on socket {}", user_id, socket_id);

    // Reader loop. Each event is handled in its own task so that one slow
    // store call never blocks this connection's other events, let alone
    // other connections.
    let router = state.router.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            let message = match result {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("WebSocket receive error on socket {}: {}", ctx.socket_id, e);
                    break;
                }
            };
            match message {
                Message::Text(text) => match event::decode(&text) {
                    Some(client_event) => {
                        let router = router.clone();
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            router.dispatch(&ctx, client_event).await;
                        });
                    }
                    None => {
                        tracing::warn!(
                            "Unparseable frame on socket {}: {}",
                            ctx.socket_id,
                            text.chars().take(120).collect::<String>()
                        );
                    }
                },
                Message::Close(_) => {
                    tracing::info!("Socket {} requested close", ctx.socket_id);
                    break;
                }
                // Ping/pong is handled by the protocol layer.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    // Authenticated → Disconnected. Registry cleanup happens exactly once:
    // if this socket was superseded in the meantime, the unregister below is
    // a no-op and the newer session stays registered.
    state.registry.unregister(&socket_id).await;
    state.rooms.leave_all(&socket_id).await;
    tracing::info!("Socket {} for user '{}' torn down", socket_id, user_id);
}
