//! Server execution logic.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::trace::TraceLayer;

use super::{
    handler::websocket_handler,
    http::{
        create_conversation, debug_connections, delete_conversation, delete_message, edit_message,
        get_conversation, health_check, leave_group, list_conversations, pin_message,
        remove_member, search_messages, unpin_message,
    },
    signal::shutdown_signal,
    state::AppState,
};

/// How often the registry is swept for connections whose disconnect
/// notification was missed.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the chat gateway.
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
pub async fn run_server(
    host: String,
    port: u16,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Periodic hygiene, independent of the disconnect event path.
    let sweep_registry = state.registry.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            let evicted = sweep_registry.sweep_stale().await;
            if evicted > 0 {
                tracing::info!("Sweep evicted {} stale connections", evicted);
            }
        }
    });

    let app = Router::new()
        // WebSocket endpoint
        .route("/ws", get(websocket_handler))
        // HTTP endpoints
        .route("/api/health", get(health_check))
        .route("/api/debug/connections", get(debug_connections))
        .route(
            "/api/conversation",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversation/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/api/conversation/{id}/remove-member", post(remove_member))
        .route("/api/conversation/{id}/leave", post(leave_group))
        .route("/api/message/search", get(search_messages))
        .route(
            "/api/message/{id}",
            patch(edit_message).delete(delete_message),
        )
        .route("/api/message/{id}/pin", post(pin_message))
        .route("/api/message/{id}/unpin", post(unpin_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Chat gateway listening on {}", listener.local_addr()?);
    tracing::info!("Connect to: ws://{}/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
