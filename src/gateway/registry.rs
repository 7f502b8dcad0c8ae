//! Connection registry: the single source of truth for which users are
//! online and on which socket.
//!
//! Two maps are kept consistent as a unit under one lock: `by_user`
//! (user id → connection) and the inverse `by_socket` (socket id → user id).
//! Every operation is total over "not found" conditions; absence of presence
//! is an expected case, not an error, which keeps the broadcast path
//! exception-free.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};

use crate::domain::{SocketId, UserId};

use super::event;

/// A live transport session. The sender is the only way to reach the
/// connection's writer task; the socket itself is owned by the connection's
/// own tasks.
#[derive(Debug, Clone)]
pub struct Connection {
    pub socket_id: SocketId,
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(socket_id: SocketId, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            socket_id,
            sender,
            connected_at: Utc::now(),
        }
    }

    /// Whether the connection's writer task is still alive.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a frame for delivery. Returns false when the writer task is
    /// gone.
    pub fn push(&self, frame: String) -> bool {
        self.sender.send(frame).is_ok()
    }

    /// Serialize and queue an event for delivery.
    pub fn emit<T: Serialize>(&self, event: &str, data: &T) -> bool {
        self.push(event::encode(event, data))
    }
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<UserId, Connection>,
    by_socket: HashMap<SocketId, UserId>,
}

impl RegistryInner {
    /// Remove both directions of the mapping for a socket id.
    fn remove_socket(&mut self, socket_id: &str) -> Option<UserId> {
        let user_id = self.by_socket.remove(socket_id)?;
        // The inverse entry only exists while its connection is current, so
        // the forward entry is the same connection.
        self.by_user.remove(&user_id);
        Some(user_id)
    }

    /// Deliver a frame to a user's connection, evicting the entry when the
    /// transport turns out to be gone (self-healing).
    fn send_frame(&mut self, user_id: &str, frame: String) -> bool {
        let Some(connection) = self.by_user.get(user_id) else {
            tracing::debug!("User '{}' not connected, dropping event", user_id);
            return false;
        };
        if connection.is_open() && connection.push(frame) {
            return true;
        }
        let socket_id = connection.socket_id.clone();
        tracing::warn!(
            "Connection for user '{}' (socket {}) is stale, evicting",
            user_id,
            socket_id
        );
        self.remove_socket(&socket_id);
        false
    }
}

/// Registry stats exposed on the debug HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub total_connections: usize,
    pub active_users: Vec<UserId>,
}

/// Bidirectional map between authenticated users and live connections.
///
/// At most one connection per user: a second registration for the same user
/// atomically supersedes the first.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the mapping for a user. An existing connection for the same
    /// user is superseded: its inverse entry is removed first so the old
    /// socket cannot leak a forward entry, then the new mapping is
    /// installed. Afterwards exactly one connection is reachable for the
    /// user.
    pub async fn register(&self, user_id: UserId, connection: Connection) {
        let mut inner = self.inner.lock().await;
        let superseded = inner
            .by_user
            .get(&user_id)
            .map(|old| old.socket_id.clone());
        if let Some(old_socket) = superseded {
            inner.by_socket.remove(&old_socket);
            tracing::info!(
                "User '{}' reconnected: socket {} superseded by {}",
                user_id,
                old_socket,
                connection.socket_id
            );
        }
        inner.by_socket
            .insert(connection.socket_id.clone(), user_id.clone());
        inner.by_user.insert(user_id.clone(), connection);
        tracing::debug!(
            "User '{}' registered ({} connections total)",
            user_id,
            inner.by_user.len()
        );
    }

    /// Remove both directions of the mapping. No-op when the socket was
    /// never registered or was already superseded.
    pub async fn unregister(&self, socket_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(user_id) = inner.remove_socket(socket_id) {
            tracing::info!(
                "User '{}' disconnected (socket {}), {} connections remain",
                user_id,
                socket_id,
                inner.by_user.len()
            );
        }
    }

    pub async fn lookup(&self, user_id: &str) -> Option<Connection> {
        self.inner.lock().await.by_user.get(user_id).cloned()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().await.by_user.contains_key(user_id)
    }

    /// Deliver an event to a single user. Returns whether delivery was
    /// queued; an offline user or a stale connection yields false, never an
    /// error.
    pub async fn send<T: Serialize>(&self, user_id: &str, event: &str, data: &T) -> bool {
        let frame = event::encode(event, data);
        let mut inner = self.inner.lock().await;
        inner.send_frame(user_id, frame)
    }

    /// Deliver an event to each of the given users, tolerating individual
    /// failures. Returns the number of successful deliveries.
    pub async fn send_many<T: Serialize>(
        &self,
        user_ids: &[UserId],
        event: &str,
        data: &T,
    ) -> usize {
        let frame = event::encode(event, data);
        let mut inner = self.inner.lock().await;
        let delivered = user_ids
            .iter()
            .filter(|user_id| inner.send_frame(user_id.as_str(), frame.clone()))
            .count();
        tracing::debug!(
            "Sent '{}' to {}/{} users",
            event,
            delivered,
            user_ids.len()
        );
        delivered
    }

    /// Evict every entry whose connection is no longer open. Periodic
    /// hygiene, independent of the disconnect event path, for the case where
    /// a disconnect notification was missed.
    pub async fn sweep_stale(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let stale: Vec<SocketId> = inner
            .by_user
            .values()
            .filter(|connection| !connection.is_open())
            .map(|connection| connection.socket_id.clone())
            .collect();
        for socket_id in &stale {
            if let Some(user_id) = inner.remove_socket(socket_id) {
                tracing::info!(
                    "Swept stale connection for user '{}' (socket {})",
                    user_id,
                    socket_id
                );
            }
        }
        stale.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        RegistryStats {
            total_connections: inner.by_user.len(),
            active_users: inner.by_user.keys().cloned().collect(),
        }
    }
}
