//! Store implementations.
//!
//! - `memory`: in-memory stores, used by the dev server and the test suite.
//! - A document-database implementation plugs in behind the same traits.

pub mod memory;

pub use memory::{InMemoryConversationStore, InMemoryMessageStore};
