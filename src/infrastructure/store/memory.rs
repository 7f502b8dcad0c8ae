//! In-memory message and conversation stores.
//!
//! Permission rules: the sender edits and deletes their own messages, any
//! member pins/unpins, the admin removes members and deletes group
//! conversations, either participant deletes a direct conversation, and
//! direct conversations cannot be left.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Conversation, ConversationKind, ConversationStore, CreatedMessage, Message, MessageStore,
    StoreError, UserId,
};

#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<HashMap<String, Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create(
        &self,
        conversation_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<CreatedMessage, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Rejected("Message content is empty".to_string()));
        }
        let mut messages = self.messages.lock().await;
        let first_message = !messages
            .values()
            .any(|m| m.conversation_id == conversation_id);
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            pinned: false,
            edited: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        messages.insert(message.id.clone(), message.clone());
        Ok(CreatedMessage {
            message,
            first_message,
        })
    }

    async fn find_all_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().await;
        let mut history: Vec<Message> = messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(history)
    }

    async fn edit_message(
        &self,
        message_id: &str,
        editor_id: &str,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut messages = self.messages.lock().await;
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound("Message".to_string()))?;
        if message.sender_id != editor_id {
            return Err(StoreError::Rejected(
                "Only the sender can edit a message".to_string(),
            ));
        }
        if message.deleted {
            return Err(StoreError::Rejected(
                "Cannot edit a deleted message".to_string(),
            ));
        }
        message.content = content.to_string();
        message.edited = true;
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn delete_message(
        &self,
        message_id: &str,
        actor_id: &str,
    ) -> Result<Message, StoreError> {
        let mut messages = self.messages.lock().await;
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound("Message".to_string()))?;
        if message.sender_id != actor_id {
            return Err(StoreError::Rejected(
                "Only the sender can delete a message".to_string(),
            ));
        }
        // Soft delete: the record survives as a tombstone.
        message.deleted = true;
        message.pinned = false;
        message.content = String::new();
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn pin_message(&self, message_id: &str, _actor_id: &str) -> Result<Message, StoreError> {
        let mut messages = self.messages.lock().await;
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound("Message".to_string()))?;
        if message.deleted {
            return Err(StoreError::Rejected(
                "Cannot pin a deleted message".to_string(),
            ));
        }
        message.pinned = true;
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn unpin_message(&self, message_id: &str, _actor_id: &str) -> Result<Message, StoreError> {
        let mut messages = self.messages.lock().await;
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| StoreError::NotFound("Message".to_string()))?;
        message.pinned = false;
        message.updated_at = Utc::now();
        Ok(message.clone())
    }

    async fn search_messages(
        &self,
        conversation_id: &str,
        query: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let needle = query.to_lowercase();
        let messages = self.messages.lock().await;
        let mut hits: Vec<Message> = messages
            .values()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && !m.deleted
                    && m.content.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(hits)
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_one(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        let conversations = self.conversations.lock().await;
        conversations
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("Conversation".to_string()))
    }

    async fn create(
        &self,
        creator_id: &str,
        name: Option<String>,
        kind: ConversationKind,
        members: Vec<UserId>,
    ) -> Result<Conversation, StoreError> {
        // Creator is always a participant.
        let mut participants = vec![creator_id.to_string()];
        for member in members {
            if !participants.contains(&member) {
                participants.push(member);
            }
        }
        match kind {
            ConversationKind::Direct if participants.len() != 2 => {
                return Err(StoreError::Rejected(
                    "A direct conversation needs exactly two participants".to_string(),
                ));
            }
            ConversationKind::Group if participants.len() < 2 => {
                return Err(StoreError::Rejected(
                    "A group conversation needs at least two participants".to_string(),
                ));
            }
            _ => {}
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            name,
            kind,
            members: participants,
            admin_id: (kind == ConversationKind::Group).then(|| creator_id.to_string()),
            created_at: now,
            updated_at: now,
        };
        let mut conversations = self.conversations.lock().await;
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn find_all(
        &self,
        user_id: &str,
        kind: Option<ConversationKind>,
    ) -> Result<Vec<Conversation>, StoreError> {
        let conversations = self.conversations.lock().await;
        let mut list: Vec<Conversation> = conversations
            .values()
            .filter(|c| c.is_member(user_id))
            .filter(|c| kind.is_none_or(|k| c.kind == k))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn remove(
        &self,
        conversation_id: &str,
        actor_id: &str,
    ) -> Result<Conversation, StoreError> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get(conversation_id)
            .ok_or_else(|| StoreError::NotFound("Conversation".to_string()))?;
        let allowed = match conversation.kind {
            ConversationKind::Direct => conversation.is_member(actor_id),
            ConversationKind::Group => conversation.admin_id.as_deref() == Some(actor_id),
        };
        if !allowed {
            return Err(StoreError::Rejected(
                "Only the admin can delete this conversation".to_string(),
            ));
        }
        conversations
            .remove(conversation_id)
            .ok_or_else(|| StoreError::NotFound("Conversation".to_string()))
    }

    async fn remove_member(
        &self,
        conversation_id: &str,
        member_id: &str,
        actor_id: &str,
    ) -> Result<Conversation, StoreError> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound("Conversation".to_string()))?;
        if conversation.kind != ConversationKind::Group {
            return Err(StoreError::Rejected(
                "Members can only be removed from group conversations".to_string(),
            ));
        }
        if conversation.admin_id.as_deref() != Some(actor_id) {
            return Err(StoreError::Rejected(
                "Only the admin can remove members".to_string(),
            ));
        }
        if member_id == actor_id {
            return Err(StoreError::Rejected(
                "The admin cannot remove themselves; delete the group instead".to_string(),
            ));
        }
        if !conversation.is_member(member_id) {
            return Err(StoreError::NotFound("Member".to_string()));
        }
        conversation.members.retain(|m| m != member_id);
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn leave_group(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Conversation, StoreError> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound("Conversation".to_string()))?;
        if conversation.kind != ConversationKind::Group {
            return Err(StoreError::Rejected(
                "Direct conversations cannot be left".to_string(),
            ));
        }
        if !conversation.is_member(user_id) {
            return Err(StoreError::NotFound("Member".to_string()));
        }
        conversation.members.retain(|m| m != user_id);
        if conversation.admin_id.as_deref() == Some(user_id) {
            // Admin left: hand the role to the oldest remaining member.
            conversation.admin_id = conversation.members.first().cloned();
        }
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn update_last_activity(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound("Conversation".to_string()))?;
        conversation.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_message_flag_is_set_exactly_once() {
        let store = InMemoryMessageStore::new();
        let first = store.create("c1", "alice", "hello").await.unwrap();
        assert!(first.first_message);

        let second = store.create("c1", "bob", "hi back").await.unwrap();
        assert!(!second.first_message);

        // a different conversation starts its own count
        let other = store.create("c2", "alice", "hey").await.unwrap();
        assert!(other.first_message);
    }

    #[tokio::test]
    async fn history_is_ordered_oldest_first() {
        let store = InMemoryMessageStore::new();
        store.create("c1", "alice", "one").await.unwrap();
        store.create("c1", "bob", "two").await.unwrap();
        store.create("c2", "carol", "elsewhere").await.unwrap();

        let history = store.find_all_by_conversation("c1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "one");
        assert_eq!(history[1].content, "two");
    }

    #[tokio::test]
    async fn only_the_sender_edits_and_deletes() {
        let store = InMemoryMessageStore::new();
        let created = store.create("c1", "alice", "hello").await.unwrap();

        let err = store
            .edit_message(&created.message.id, "bob", "hacked")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let edited = store
            .edit_message(&created.message.id, "alice", "hello again")
            .await
            .unwrap();
        assert!(edited.edited);
        assert_eq!(edited.content, "hello again");
    }

    #[tokio::test]
    async fn delete_is_soft_and_blanks_content() {
        let store = InMemoryMessageStore::new();
        let created = store.create("c1", "alice", "secret").await.unwrap();
        store.pin_message(&created.message.id, "bob").await.unwrap();

        let deleted = store
            .delete_message(&created.message.id, "alice")
            .await
            .unwrap();
        assert!(deleted.deleted);
        assert!(!deleted.pinned);
        assert_eq!(deleted.content, "");

        // tombstone still shows up in history
        let history = store.find_all_by_conversation("c1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].deleted);

        // but not in search, and it can no longer be pinned or edited
        assert!(store.search_messages("c1", "secret").await.unwrap().is_empty());
        assert!(store.pin_message(&created.message.id, "alice").await.is_err());
        assert!(
            store
                .edit_message(&created.message.id, "alice", "x")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_scoped() {
        let store = InMemoryMessageStore::new();
        store.create("c1", "alice", "Deploy on Friday").await.unwrap();
        store.create("c1", "bob", "nothing relevant").await.unwrap();
        store.create("c2", "carol", "deploy now").await.unwrap();

        let hits = store.search_messages("c1", "deploy").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Deploy on Friday");
    }

    #[tokio::test]
    async fn direct_conversations_need_exactly_two_members() {
        let store = InMemoryConversationStore::new();
        let err = store
            .create(
                "alice",
                None,
                ConversationKind::Direct,
                vec!["bob".to_string(), "carol".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let direct = store
            .create("alice", None, ConversationKind::Direct, vec!["bob".to_string()])
            .await
            .unwrap();
        assert_eq!(direct.members, vec!["alice", "bob"]);
        assert!(direct.admin_id.is_none());
    }

    #[tokio::test]
    async fn admin_rules_for_member_removal() {
        let store = InMemoryConversationStore::new();
        let group = store
            .create(
                "alice",
                Some("team".to_string()),
                ConversationKind::Group,
                vec!["bob".to_string(), "carol".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(group.admin_id.as_deref(), Some("alice"));

        // non-admin cannot remove
        let err = store
            .remove_member(&group.id, "carol", "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let updated = store.remove_member(&group.id, "carol", "alice").await.unwrap();
        assert!(!updated.is_member("carol"));

        // admin cannot remove themselves
        let err = store
            .remove_member(&group.id, "alice", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn leaving_a_group_reassigns_the_admin_role() {
        let store = InMemoryConversationStore::new();
        let group = store
            .create(
                "alice",
                Some("team".to_string()),
                ConversationKind::Group,
                vec!["bob".to_string(), "carol".to_string()],
            )
            .await
            .unwrap();

        let updated = store.leave_group(&group.id, "alice").await.unwrap();
        assert!(!updated.is_member("alice"));
        assert!(updated.admin_id.is_some());
        assert_ne!(updated.admin_id.as_deref(), Some("alice"));

        // direct conversations cannot be left
        let direct = store
            .create("alice", None, ConversationKind::Direct, vec!["bob".to_string()])
            .await
            .unwrap();
        assert!(store.leave_group(&direct.id, "alice").await.is_err());
    }

    #[tokio::test]
    async fn find_all_filters_by_membership_and_kind() {
        let store = InMemoryConversationStore::new();
        store
            .create("alice", None, ConversationKind::Direct, vec!["bob".to_string()])
            .await
            .unwrap();
        store
            .create(
                "alice",
                Some("team".to_string()),
                ConversationKind::Group,
                vec!["carol".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(store.find_all("alice", None).await.unwrap().len(), 2);
        assert_eq!(
            store
                .find_all("alice", Some(ConversationKind::Group))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.find_all("bob", None).await.unwrap().len(), 1);
        assert!(store.find_all("dave", None).await.unwrap().is_empty());
    }
}
