//! HTTP/WebSocket surface of the gateway.

mod handler;
mod http;
mod runner;
mod signal;
mod state;

pub use runner::run_server;
pub use state::AppState;
