//! Shared application state.
//!
//! Everything is an explicitly constructed, owned service handed to the
//! handlers through axum state; no ambient singletons.

use std::sync::Arc;

use crate::domain::{ConversationStore, MessageStore, TokenVerifier};
use crate::gateway::{ConnectionRegistry, EventRouter, RoomManager};

pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub router: Arc<EventRouter>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub messages: Arc<dyn MessageStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl AppState {
    /// Wire the gateway core around the given collaborators.
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let router = Arc::new(EventRouter::new(
            registry.clone(),
            rooms.clone(),
            messages.clone(),
            conversations.clone(),
        ));
        Self {
            registry,
            rooms,
            router,
            verifier,
            messages,
            conversations,
        }
    }
}
