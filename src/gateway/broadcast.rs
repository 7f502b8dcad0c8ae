//! Broadcast dispatcher: stateless event targeting on top of the registry
//! and the room manager.
//!
//! Two addressing modes exist in this domain: conversation-wide fan-out
//! through rooms, and explicit per-user targeting through the registry (for
//! users who have no room membership yet, e.g. the other side of a brand-new
//! direct conversation). Target lists are always deduplicated before
//! dispatch.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::UserId;

use super::{ConnectionRegistry, RoomManager};

pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomManager>) -> Self {
        Self { registry, rooms }
    }

    /// Fan out to every member of a room. Returns the delivered count.
    pub async fn to_room<T: Serialize>(&self, room_id: &str, event: &str, data: &T) -> usize {
        self.rooms.broadcast(room_id, event, data).await
    }

    /// Fan out to every member of several rooms.
    pub async fn to_rooms<T: Serialize>(&self, room_ids: &[String], event: &str, data: &T) -> usize {
        let mut delivered = 0;
        for room_id in room_ids {
            delivered += self.rooms.broadcast(room_id, event, data).await;
        }
        delivered
    }

    /// Targeted send to a list of users, deduplicated. Returns the number of
    /// users actually reached.
    pub async fn to_users<T: Serialize>(&self, user_ids: &[UserId], event: &str, data: &T) -> usize {
        let unique = dedupe(user_ids, None);
        self.registry.send_many(&unique, event, data).await
    }

    /// Targeted send to a list of users minus an excluded actor.
    pub async fn to_users_except<T: Serialize>(
        &self,
        user_ids: &[UserId],
        exclude_user_id: &str,
        event: &str,
        data: &T,
    ) -> usize {
        let unique = dedupe(user_ids, Some(exclude_user_id));
        self.registry.send_many(&unique, event, data).await
    }
}

/// Deduplicate preserving first-seen order, optionally dropping one id.
fn dedupe(user_ids: &[UserId], exclude: Option<&str>) -> Vec<UserId> {
    let mut seen = HashSet::new();
    user_ids
        .iter()
        .filter(|id| exclude != Some(id.as_str()))
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
