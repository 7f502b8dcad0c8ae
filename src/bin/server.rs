//! Chat gateway server binary.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chat-gateway
//! cargo run --bin chat-gateway -- --host 0.0.0.0 --port 3000
//! JWT_SECRET=... cargo run --bin chat-gateway
//! ```

use std::sync::Arc;

use chat_gateway::{
    common::logger::setup_logger,
    infrastructure::{
        auth::JwtVerifier,
        store::{InMemoryConversationStore, InMemoryMessageStore},
    },
    server::{AppState, run_server},
};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chat-gateway")]
#[command(about = "Real-time chat gateway with WebSocket fan-out", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// HS256 secret used to verify bearer tokens
    #[arg(long, env = "JWT_SECRET", default_value = "dev-secret-change-me")]
    jwt_secret: String,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Stores (message/conversation collaborators)
    // 2. Credential verifier
    // 3. AppState (registry + rooms + router wiring)
    let messages = Arc::new(InMemoryMessageStore::new());
    let conversations = Arc::new(InMemoryConversationStore::new());
    let verifier = Arc::new(JwtVerifier::new(args.jwt_secret.as_bytes()));
    let state = Arc::new(AppState::new(verifier, messages, conversations));

    if let Err(e) = run_server(args.host, args.port, state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
