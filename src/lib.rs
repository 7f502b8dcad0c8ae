//! Real-time chat gateway library.
//!
//! The heart of this crate is the `gateway` layer: the connection registry
//! mapping authenticated users to live sockets, the room manager used for
//! conversation fan-out, and the event router that turns inbound client
//! events into store calls and outbound broadcasts.

// layers
pub mod domain;
pub mod gateway;
pub mod infrastructure;
pub mod server;

// shared library
pub mod common;
