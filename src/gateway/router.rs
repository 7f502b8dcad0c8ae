//! Event router: inbound client events → collaborator side effects →
//! outbound fan-out.
//!
//! Every handler gates on the connection's attached identity rather than on
//! transport ordering. Collaborator failures surface only to the originating
//! caller as `*_error` events and never cross connection boundaries or enter
//! the broadcast path.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::domain::{
    Claims, Conversation, ConversationKind, ConversationStore, Message, MessageStore, SocketId,
    UserId,
};

use super::{
    BroadcastDispatcher, ConnectionRegistry, RoomManager,
    event::{self, ClientEvent, outbound},
};

/// Per-connection context created at authentication time and handed to every
/// event handler alongside the connection's sender.
#[derive(Clone)]
pub struct ConnContext {
    pub socket_id: SocketId,
    pub sender: mpsc::UnboundedSender<String>,
    /// Verified claims; `None` only for connections that never reached the
    /// authenticated state.
    pub identity: Option<Claims>,
}

impl ConnContext {
    pub fn authenticated(
        socket_id: SocketId,
        sender: mpsc::UnboundedSender<String>,
        claims: Claims,
    ) -> Self {
        Self {
            socket_id,
            sender,
            identity: Some(claims),
        }
    }

    pub fn unauthenticated(socket_id: SocketId, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            socket_id,
            sender,
            identity: None,
        }
    }

    /// Reply to the originating caller only.
    fn emit<T: Serialize>(&self, event_name: &str, data: &T) {
        if self.sender.send(event::encode(event_name, data)).is_err() {
            tracing::debug!(
                "Socket {} went away before '{}' could be delivered",
                self.socket_id,
                event_name
            );
        }
    }
}

/// Routes domain events to the stores and relays results back as outbound
/// events. All dependencies are injected at construction time; the router
/// itself holds no mutable state.
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    broadcast: BroadcastDispatcher,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        let broadcast = BroadcastDispatcher::new(registry.clone(), rooms.clone());
        Self {
            registry,
            rooms,
            broadcast,
            messages,
            conversations,
        }
    }

    /// Handle one inbound client event. Independent per event: callers spawn
    /// a task per invocation so a slow store call never blocks other events.
    pub async fn dispatch(&self, ctx: &ConnContext, client_event: ClientEvent) {
        match client_event {
            ClientEvent::SendMessage {
                conversation_id,
                content,
            } => self.handle_send_message(ctx, &conversation_id, &content).await,
            ClientEvent::JoinConversation { conversation_id } => {
                self.handle_join_conversation(ctx, &conversation_id).await
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.handle_leave_conversation(ctx, &conversation_id).await
            }
            ClientEvent::GetMessages { conversation_id } => {
                self.handle_get_messages(ctx, &conversation_id).await
            }
            ClientEvent::Typing { conversation_id } => {
                self.handle_typing(ctx, &conversation_id, outbound::USER_TYPING, "User is typing")
                    .await
            }
            ClientEvent::StopTyping { conversation_id } => {
                self.handle_typing(
                    ctx,
                    &conversation_id,
                    outbound::USER_STOPPED_TYPING,
                    "User stopped typing",
                )
                .await
            }
        }
    }

    async fn handle_send_message(&self, ctx: &ConnContext, conversation_id: &str, content: &str) {
        let Some(claims) = &ctx.identity else {
            ctx.emit(
                outbound::MESSAGE_ERROR,
                &json!({"success": false, "message": "User not authenticated"}),
            );
            return;
        };

        let created = match self.messages.create(conversation_id, &claims.sub, content).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!(
                    "Failed to persist message from '{}' in '{}': {}",
                    claims.sub,
                    conversation_id,
                    e
                );
                ctx.emit(
                    outbound::MESSAGE_ERROR,
                    &json!({"success": false, "message": e.user_message()}),
                );
                return;
            }
        };

        if let Err(e) = self.conversations.update_last_activity(conversation_id).await {
            // Activity bumps are best-effort; the message is already stored.
            tracing::warn!(
                "Failed to update last activity for '{}': {}",
                conversation_id,
                e
            );
        }

        if created.first_message {
            self.notify_first_message(conversation_id, &claims.sub, &created.message)
                .await;
        }

        let delivered = self
            .broadcast
            .to_room(
                conversation_id,
                outbound::NEW_MESSAGE,
                &json!({
                    "success": true,
                    "message": "Message sent successfully",
                    "data": created.message,
                }),
            )
            .await;
        tracing::info!(
            "Message {} broadcast to {} members of room '{}'",
            created.message.id,
            delivered,
            conversation_id
        );
    }

    /// Targeted notification to the other participant of a direct
    /// conversation receiving its very first message. That participant has
    /// no room membership yet, so a room broadcast cannot reach them.
    async fn notify_first_message(&self, conversation_id: &str, sender_id: &str, message: &Message) {
        let conversation = match self.conversations.find_one(conversation_id).await {
            Ok(conversation) => conversation,
            Err(e) => {
                tracing::warn!(
                    "First-message lookup failed for '{}': {}",
                    conversation_id,
                    e
                );
                return;
            }
        };
        if conversation.kind != ConversationKind::Direct {
            return;
        }
        let Some(other_user) = conversation.other_member(sender_id) else {
            tracing::warn!(
                "Direct conversation '{}' has no member besides '{}'",
                conversation_id,
                sender_id
            );
            return;
        };

        let delivered = self
            .registry
            .send(
                other_user,
                outbound::FIRST_MESSAGE,
                &json!({
                    "success": true,
                    "message": "First message in direct conversation",
                    "data": {
                        "conversation": conversation,
                        "message": message,
                    },
                }),
            )
            .await;
        tracing::info!(
            "first_message for '{}' delivered to '{}': {}",
            conversation_id,
            other_user,
            delivered
        );
    }

    async fn handle_join_conversation(&self, ctx: &ConnContext, conversation_id: &str) {
        if ctx.identity.is_none() {
            tracing::debug!(
                "Ignoring join_conversation from unauthenticated socket {}",
                ctx.socket_id
            );
            return;
        }
        self.rooms
            .join(conversation_id, &ctx.socket_id, ctx.sender.clone())
            .await;
        ctx.emit(
            outbound::JOINED_CONVERSATION,
            &json!({
                "conversationId": conversation_id,
                "message": "Successfully joined conversation",
            }),
        );
    }

    async fn handle_leave_conversation(&self, ctx: &ConnContext, conversation_id: &str) {
        if ctx.identity.is_none() {
            return;
        }
        self.rooms.leave(conversation_id, &ctx.socket_id).await;
    }

    async fn handle_get_messages(&self, ctx: &ConnContext, conversation_id: &str) {
        // Unauthenticated requests are gated out before any store call.
        if ctx.identity.is_none() {
            tracing::debug!(
                "Ignoring get_messages from unauthenticated socket {}",
                ctx.socket_id
            );
            return;
        }
        match self.messages.find_all_by_conversation(conversation_id).await {
            Ok(messages) => ctx.emit(
                outbound::MESSAGES_LOADED,
                &json!({
                    "success": true,
                    "message": "Messages loaded successfully",
                    "data": messages,
                }),
            ),
            Err(e) => {
                tracing::error!("Failed to load messages for '{}': {}", conversation_id, e);
                ctx.emit(
                    outbound::MESSAGES_ERROR,
                    &json!({"success": false, "message": e.user_message()}),
                );
            }
        }
    }

    async fn handle_typing(
        &self,
        ctx: &ConnContext,
        conversation_id: &str,
        event_name: &str,
        description: &str,
    ) {
        let Some(claims) = &ctx.identity else {
            return;
        };
        let delivered = self
            .rooms
            .broadcast_except(
                conversation_id,
                &ctx.socket_id,
                event_name,
                &json!({
                    "success": true,
                    "message": description,
                    "data": {
                        "conversationId": conversation_id,
                        "userId": claims.sub,
                        "userName": claims.display_name(),
                        "userEmail": claims.email_or_empty(),
                        "timestamp": Utc::now(),
                    },
                }),
            )
            .await;
        tracing::debug!(
            "'{}' from '{}' relayed to {} members of room '{}'",
            event_name,
            claims.sub,
            delivered,
            conversation_id
        );
    }

    // ------------------------------------------------------------------
    // Notifications triggered from the REST layer, not by socket events.
    // ------------------------------------------------------------------

    /// A group conversation was created: tell every member except the
    /// creator. Direct conversations announce themselves through
    /// `first_message` instead.
    pub async fn notify_conversation_created(
        &self,
        conversation: &Conversation,
        creator_id: &str,
    ) -> usize {
        if conversation.kind != ConversationKind::Group {
            return 0;
        }
        self.broadcast
            .to_users_except(
                &conversation.members,
                creator_id,
                outbound::NEW_CONVERSATION,
                &json!({
                    "success": true,
                    "message": "You were added to a new group",
                    "data": conversation,
                }),
            )
            .await
    }

    /// A conversation was deleted: tell every member except the actor.
    pub async fn notify_conversation_deleted(
        &self,
        conversation: &Conversation,
        actor_id: &str,
    ) -> usize {
        self.broadcast
            .to_users_except(
                &conversation.members,
                actor_id,
                outbound::CONVERSATION_DELETED,
                &json!({
                    "conversationId": conversation.id,
                    "deletedBy": actor_id,
                }),
            )
            .await
    }

    /// A member was removed by an admin: tell the removed member only.
    /// Remaining members learn through their next conversation fetch.
    pub async fn notify_member_removed(
        &self,
        conversation_id: &str,
        removed_user_id: &str,
        actor_id: &str,
    ) -> bool {
        self.registry
            .send(
                removed_user_id,
                outbound::MEMBER_REMOVED,
                &json!({
                    "conversationId": conversation_id,
                    "removedBy": actor_id,
                }),
            )
            .await
    }

    /// A member left a group voluntarily: remaining members get
    /// `user_left_group`, the leaver gets a confirmation.
    pub async fn notify_user_left_group(&self, conversation: &Conversation, user_id: &str) {
        self.broadcast
            .to_users_except(
                &conversation.members,
                user_id,
                outbound::USER_LEFT_GROUP,
                &json!({
                    "conversationId": conversation.id,
                    "userId": user_id,
                }),
            )
            .await;
        self.registry
            .send(
                user_id,
                outbound::LEFT_GROUP_SUCCESS,
                &json!({"conversationId": conversation.id}),
            )
            .await;
    }

    /// A message was edited: conversation-wide room broadcast.
    pub async fn notify_message_edited(&self, message: &Message) -> usize {
        self.broadcast
            .to_room(
                &message.conversation_id,
                outbound::MESSAGE_EDITED,
                &json!({
                    "conversationId": message.conversation_id,
                    "message": message,
                }),
            )
            .await
    }

    /// A message was deleted (soft): conversation-wide room broadcast.
    pub async fn notify_message_deleted(&self, message: &Message) -> usize {
        self.broadcast
            .to_room(
                &message.conversation_id,
                outbound::MESSAGE_DELETED,
                &json!({
                    "conversationId": message.conversation_id,
                    "messageId": message.id,
                }),
            )
            .await
    }

    /// A message was pinned: targeted sends to all members except the actor.
    pub async fn notify_message_pinned(
        &self,
        members: &[UserId],
        message: &Message,
        actor_id: &str,
    ) -> usize {
        self.broadcast
            .to_users_except(
                members,
                actor_id,
                outbound::MESSAGE_PINNED,
                &json!({
                    "conversationId": message.conversation_id,
                    "message": message,
                    "pinnedBy": actor_id,
                }),
            )
            .await
    }

    /// A message was unpinned: targeted sends to all members except the
    /// actor.
    pub async fn notify_message_unpinned(
        &self,
        members: &[UserId],
        message: &Message,
        actor_id: &str,
    ) -> usize {
        self.broadcast
            .to_users_except(
                members,
                actor_id,
                outbound::MESSAGE_UNPINNED,
                &json!({
                    "conversationId": message.conversation_id,
                    "message": message,
                    "unpinnedBy": actor_id,
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CreatedMessage, MockConversationStore, MockMessageStore, StoreError,
    };
    use crate::gateway::Connection;
    use crate::gateway::event::decode_envelope;

    fn claims(sub: &str, name: &str) -> Claims {
        Claims {
            sub: sub.to_string(),
            name: Some(name.to_string()),
            email: Some(format!("{sub}@example.com")),
            iat: 0,
            exp: i64::MAX,
        }
    }

    fn message(id: &str, conversation_id: &str, sender_id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            pinned: false,
            edited: false,
            deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn direct_conversation(id: &str, a: &str, b: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            name: None,
            kind: ConversationKind::Direct,
            members: vec![a.to_string(), b.to_string()],
            admin_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomManager>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: Arc::new(ConnectionRegistry::new()),
                rooms: Arc::new(RoomManager::new()),
            }
        }

        fn router(
            &self,
            messages: MockMessageStore,
            conversations: MockConversationStore,
        ) -> EventRouter {
            EventRouter::new(
                self.registry.clone(),
                self.rooms.clone(),
                Arc::new(messages),
                Arc::new(conversations),
            )
        }

        /// An authenticated context plus the receiving end of its outbound
        /// channel.
        fn connect(&self, user_id: &str, socket_id: &str) -> (ConnContext, mpsc::UnboundedReceiver<String>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let ctx = ConnContext::authenticated(
                socket_id.to_string(),
                tx,
                claims(user_id, user_id),
            );
            (ctx, rx)
        }
    }

    #[tokio::test]
    async fn unauthenticated_get_messages_never_touches_the_store() {
        let harness = Harness::new();
        let mut messages = MockMessageStore::new();
        messages.expect_find_all_by_conversation().times(0);
        let router = harness.router(messages, MockConversationStore::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ConnContext::unauthenticated("s1".to_string(), tx);

        router
            .dispatch(
                &ctx,
                ClientEvent::GetMessages {
                    conversation_id: "c1".to_string(),
                },
            )
            .await;

        // Nothing emitted either: the request is gated out.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unauthenticated_send_message_gets_a_message_error() {
        let harness = Harness::new();
        let mut messages = MockMessageStore::new();
        messages.expect_create().times(0);
        let router = harness.router(messages, MockConversationStore::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = ConnContext::unauthenticated("s1".to_string(), tx);

        router
            .dispatch(
                &ctx,
                ClientEvent::SendMessage {
                    conversation_id: "c1".to_string(),
                    content: "hi".to_string(),
                },
            )
            .await;

        let (event, data) = decode_envelope(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "message_error");
        assert_eq!(data["success"], false);
        assert_eq!(data["message"], "User not authenticated");
    }

    #[tokio::test]
    async fn first_message_in_direct_conversation_reaches_the_other_member() {
        let harness = Harness::new();

        let sent = message("m1", "c1", "alice", "hi");
        let mut messages = MockMessageStore::new();
        {
            let sent = sent.clone();
            messages.expect_create().times(1).returning(move |_, _, _| {
                Ok(CreatedMessage {
                    message: sent.clone(),
                    first_message: true,
                })
            });
        }
        let mut conversations = MockConversationStore::new();
        conversations
            .expect_update_last_activity()
            .times(1)
            .returning(|_| Ok(()));
        conversations
            .expect_find_one()
            .times(1)
            .returning(|_| Ok(direct_conversation("c1", "alice", "bob")));

        let router = harness.router(messages, conversations);

        // alice is in the room, bob is online but not in the room
        let (alice_ctx, mut alice_rx) = harness.connect("alice", "s-alice");
        harness
            .rooms
            .join("c1", &alice_ctx.socket_id, alice_ctx.sender.clone())
            .await;
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        harness
            .registry
            .register("bob".to_string(), Connection::new("s-bob".to_string(), bob_tx))
            .await;

        router
            .dispatch(
                &alice_ctx,
                ClientEvent::SendMessage {
                    conversation_id: "c1".to_string(),
                    content: "hi".to_string(),
                },
            )
            .await;

        // bob receives the targeted first_message with conversation + message
        let (event, data) = decode_envelope(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "first_message");
        assert_eq!(data["data"]["conversation"]["id"], "c1");
        assert_eq!(data["data"]["message"]["id"], "m1");

        // the room receives new_message
        let (event, data) = decode_envelope(&alice_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "new_message");
        assert_eq!(data["data"]["content"], "hi");
    }

    #[tokio::test]
    async fn store_failure_surfaces_only_to_the_caller() {
        let harness = Harness::new();
        let mut messages = MockMessageStore::new();
        messages
            .expect_create()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Internal("disk on fire".to_string())));
        let router = harness.router(messages, MockConversationStore::new());

        let (alice_ctx, mut alice_rx) = harness.connect("alice", "s-alice");
        let (other_ctx, mut other_rx) = harness.connect("bob", "s-bob");
        harness
            .rooms
            .join("c1", &other_ctx.socket_id, other_ctx.sender.clone())
            .await;

        router
            .dispatch(
                &alice_ctx,
                ClientEvent::SendMessage {
                    conversation_id: "c1".to_string(),
                    content: "hi".to_string(),
                },
            )
            .await;

        let (event, data) = decode_envelope(&alice_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "message_error");
        // internal cause is not leaked
        assert_eq!(data["message"], "Internal server error");
        // the room hears nothing
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_broadcast_excludes_the_sender() {
        let harness = Harness::new();
        let router = harness.router(MockMessageStore::new(), MockConversationStore::new());

        let (sender_ctx, mut sender_rx) = harness.connect("alice", "s-alice");
        let (a_ctx, mut a_rx) = harness.connect("bob", "s-bob");
        let (b_ctx, mut b_rx) = harness.connect("carol", "s-carol");
        for ctx in [&sender_ctx, &a_ctx, &b_ctx] {
            harness.rooms.join("c1", &ctx.socket_id, ctx.sender.clone()).await;
        }

        router
            .dispatch(
                &sender_ctx,
                ClientEvent::Typing {
                    conversation_id: "c1".to_string(),
                },
            )
            .await;

        for rx in [&mut a_rx, &mut b_rx] {
            let (event, data) = decode_envelope(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(event, "user_typing");
            assert_eq!(data["data"]["userId"], "alice");
            assert_eq!(data["data"]["userName"], "alice");
        }
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_conversation_acks_and_registers_membership() {
        let harness = Harness::new();
        let router = harness.router(MockMessageStore::new(), MockConversationStore::new());
        let (ctx, mut rx) = harness.connect("alice", "s1");

        router
            .dispatch(
                &ctx,
                ClientEvent::JoinConversation {
                    conversation_id: "c1".to_string(),
                },
            )
            .await;

        let (event, data) = decode_envelope(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "joined_conversation");
        assert_eq!(data["conversationId"], "c1");
        assert_eq!(harness.rooms.members("c1").await, vec!["s1".to_string()]);

        router
            .dispatch(
                &ctx,
                ClientEvent::LeaveConversation {
                    conversation_id: "c1".to_string(),
                },
            )
            .await;
        assert!(harness.rooms.members("c1").await.is_empty());
        // leaving produces no outbound event
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn member_removed_notifies_only_the_removed_member() {
        let harness = Harness::new();
        let router = harness.router(MockMessageStore::new(), MockConversationStore::new());

        let (removed_tx, mut removed_rx) = mpsc::unbounded_channel();
        let (rest_tx, mut rest_rx) = mpsc::unbounded_channel();
        harness
            .registry
            .register("mallory".to_string(), Connection::new("s1".to_string(), removed_tx))
            .await;
        harness
            .registry
            .register("bob".to_string(), Connection::new("s2".to_string(), rest_tx))
            .await;

        let delivered = router.notify_member_removed("g1", "mallory", "admin").await;

        assert!(delivered);
        let (event, data) = decode_envelope(&removed_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "member_removed");
        assert_eq!(data["conversationId"], "g1");
        assert_eq!(data["removedBy"], "admin");
        assert!(rest_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_creation_notifies_members_except_creator() {
        let harness = Harness::new();
        let router = harness.router(MockMessageStore::new(), MockConversationStore::new());

        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let (creator_tx, mut creator_rx) = mpsc::unbounded_channel();
        harness
            .registry
            .register("bob".to_string(), Connection::new("s1".to_string(), bob_tx))
            .await;
        harness
            .registry
            .register("alice".to_string(), Connection::new("s2".to_string(), creator_tx))
            .await;

        let group = Conversation {
            id: "g1".to_string(),
            name: Some("team".to_string()),
            kind: ConversationKind::Group,
            members: vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            admin_id: Some("alice".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // carol is offline, alice is the creator: only bob is reached
        let delivered = router.notify_conversation_created(&group, "alice").await;
        assert_eq!(delivered, 1);

        let (event, data) = decode_envelope(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(event, "new_conversation");
        assert_eq!(data["data"]["id"], "g1");
        assert!(creator_rx.try_recv().is_err());

        // direct conversations never announce through new_conversation
        let direct = direct_conversation("c9", "alice", "bob");
        assert_eq!(router.notify_conversation_created(&direct, "alice").await, 0);
    }
}
