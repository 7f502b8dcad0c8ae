//! Room manager: named groups of sockets used for fan-out.
//!
//! The transport has no native grouping primitive, so membership lives here:
//! room id → socket id → sender. Membership is transient and re-established
//! each session; a socket may belong to any number of rooms. Conversation
//! rooms are keyed by conversation id, personal rooms by user id.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};

use crate::domain::SocketId;

use super::event;

type RoomMembers = HashMap<SocketId, mpsc::UnboundedSender<String>>;

/// Transient socket group membership, keyed by room id.
#[derive(Default)]
pub struct RoomManager {
    rooms: Mutex<HashMap<String, RoomMembers>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket to a room. Joining a room twice is harmless.
    pub async fn join(&self, room_id: &str, socket_id: &str, sender: mpsc::UnboundedSender<String>) {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(socket_id.to_string(), sender);
        tracing::debug!("Socket {} joined room '{}'", socket_id, room_id);
    }

    /// Add a socket to a room after evicting every other socket from it.
    /// Used for personal rooms, which must contain at most the user's latest
    /// session so a targeted per-user emit reaches only that session.
    pub async fn join_exclusive(
        &self,
        room_id: &str,
        socket_id: &str,
        sender: mpsc::UnboundedSender<String>,
    ) {
        let mut rooms = self.rooms.lock().await;
        let members = rooms.entry(room_id.to_string()).or_default();
        members.retain(|member_socket, _| {
            if member_socket == socket_id {
                return true;
            }
            tracing::debug!(
                "Evicting socket {} from exclusive room '{}'",
                member_socket,
                room_id
            );
            false
        });
        members.insert(socket_id.to_string(), sender);
    }

    /// Remove a socket from a room. No-op for non-members and unknown rooms.
    pub async fn leave(&self, room_id: &str, socket_id: &str) {
        let mut rooms = self.rooms.lock().await;
        if let Some(members) = rooms.get_mut(room_id) {
            members.remove(socket_id);
            if members.is_empty() {
                rooms.remove(room_id);
            }
            tracing::debug!("Socket {} left room '{}'", socket_id, room_id);
        }
    }

    /// Remove a socket from every room it is a member of. Disconnect path.
    pub async fn leave_all(&self, socket_id: &str) {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|_, members| {
            members.remove(socket_id);
            !members.is_empty()
        });
    }

    /// Socket ids currently in a room.
    pub async fn members(&self, room_id: &str) -> Vec<SocketId> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room_id)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fan an event out to every member of a room. Members whose transport
    /// is gone are pruned on the way. Returns the delivered count.
    pub async fn broadcast<T: Serialize>(&self, room_id: &str, event: &str, data: &T) -> usize {
        self.broadcast_inner(room_id, None, event, data).await
    }

    /// Fan an event out to every member of a room except one socket
    /// (typically the actor). Returns the delivered count.
    pub async fn broadcast_except<T: Serialize>(
        &self,
        room_id: &str,
        exclude_socket_id: &str,
        event: &str,
        data: &T,
    ) -> usize {
        self.broadcast_inner(room_id, Some(exclude_socket_id), event, data)
            .await
    }

    async fn broadcast_inner<T: Serialize>(
        &self,
        room_id: &str,
        exclude_socket_id: Option<&str>,
        event: &str,
        data: &T,
    ) -> usize {
        let frame = event::encode(event, data);
        let mut rooms = self.rooms.lock().await;
        let Some(members) = rooms.get_mut(room_id) else {
            tracing::debug!("Room '{}' has no members, dropping '{}'", room_id, event);
            return 0;
        };

        let mut delivered = 0;
        members.retain(|socket_id, sender| {
            if exclude_socket_id == Some(socket_id.as_str()) {
                return true;
            }
            if sender.send(frame.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                tracing::warn!(
                    "Pruning closed socket {} from room '{}'",
                    socket_id,
                    room_id
                );
                false
            }
        });
        if members.is_empty() {
            rooms.remove(room_id);
        }
        tracing::debug!("Broadcast '{}' to {} members of room '{}'", event, delivered, room_id);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::event::decode_envelope;

    fn channel() -> (mpsc::UnboundedSender<String>, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn broadcast_reaches_all_members() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        rooms.join("c1", "s1", tx1).await;
        rooms.join("c1", "s2", tx2).await;

        let delivered = rooms
            .broadcast("c1", "new_message", &serde_json::json!({"id": "m1"}))
            .await;
        assert_eq!(delivered, 2);

        let (event, _) = decode_envelope(&rx1.recv().await.unwrap()).unwrap();
        assert_eq!(event, "new_message");
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_actor() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (tx3, mut rx3) = channel();
        rooms.join("c1", "sender", tx1).await;
        rooms.join("c1", "a", tx2).await;
        rooms.join("c1", "b", tx3).await;

        let delivered = rooms
            .broadcast_except("c1", "sender", "user_typing", &serde_json::json!({}))
            .await;

        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.recv().await.is_some());
        assert!(rx3.recv().await.is_some());
    }

    #[tokio::test]
    async fn join_exclusive_keeps_only_the_latest_socket() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        rooms.join_exclusive("alice", "s1", tx1).await;
        rooms.join_exclusive("alice", "s2", tx2).await;

        assert_eq!(rooms.members("alice").await, vec!["s2".to_string()]);

        rooms.broadcast("alice", "first_message", &serde_json::json!({})).await;
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_all_clears_every_membership() {
        let rooms = RoomManager::new();
        let (tx, _rx) = channel();
        rooms.join("c1", "s1", tx.clone()).await;
        rooms.join("c2", "s1", tx.clone()).await;
        rooms.join("alice", "s1", tx).await;

        rooms.leave_all("s1").await;

        assert!(rooms.members("c1").await.is_empty());
        assert!(rooms.members("c2").await.is_empty());
        assert!(rooms.members("alice").await.is_empty());
    }

    #[tokio::test]
    async fn closed_members_are_pruned_during_broadcast() {
        let rooms = RoomManager::new();
        let (tx1, mut rx1) = channel();
        let (tx2, rx2) = channel();
        rooms.join("c1", "s1", tx1).await;
        rooms.join("c1", "s2", tx2).await;
        drop(rx2);

        let delivered = rooms.broadcast("c1", "ping", &serde_json::json!({})).await;
        assert_eq!(delivered, 1);
        assert_eq!(rooms.members("c1").await, vec!["s1".to_string()]);
        assert!(rx1.recv().await.is_some());
    }

    #[tokio::test]
    async fn leave_unknown_room_is_a_noop() {
        let rooms = RoomManager::new();
        rooms.leave("nope", "s1").await;
        assert!(rooms.members("nope").await.is_empty());
    }
}
