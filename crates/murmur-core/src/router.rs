//! Event router for Murmur.
//!
//! The router applies one decoded inbound event on behalf of an
//! authenticated user: it checks the caller's role against the target
//! entity, mutates the store, and fans the result out through the notifier.
//! The HTTP API calls the same public operations directly.

use murmur_protocol::events::{
    Decision, DeliveredMessage, FriendRequestAnswered, FriendRequestCancelled, SendMessage,
    TypingNotice,
};
use murmur_protocol::model::{
    DeliveryStatus, Friendship, FriendshipId, FriendshipStatus, Message, MessageId, UserId,
    UserSummary,
};
use murmur_protocol::{ErrorCode, InboundEvent, OutboundEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use crate::connection::ConnectionHandle;
use crate::notifier::Notifier;
use crate::store::{Store, StoreError};

/// Errors raised while routing an event.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Store-level failure or invariant violation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Message content is empty or whitespace.
    #[error("Message content is empty")]
    EmptyContent,

    /// Message content exceeds the configured limit.
    #[error("Message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    /// No user is registered under the name.
    #[error("User not found: {0}")]
    UnknownUsername(String),

    /// Messaging requires an accepted friendship.
    #[error("User {0} is not an accepted friend")]
    NotFriends(UserId),
}

impl RouteError {
    /// The `error` event to send back to the issuing connection, if any.
    ///
    /// Stale or racing requests and malformed content are dropped without
    /// a reply.
    #[must_use]
    pub fn notice(&self) -> Option<OutboundEvent> {
        let code = match self {
            RouteError::Store(StoreError::InvalidTransition { .. }) | RouteError::EmptyContent => {
                return None;
            }
            RouteError::Store(StoreError::DuplicateRequest(..)) => ErrorCode::DuplicateRequest,
            RouteError::Store(StoreError::SelfRequest(_)) => ErrorCode::SelfRequest,
            RouteError::Store(StoreError::UnknownUser(_)) | RouteError::UnknownUsername(_) => {
                ErrorCode::UnknownUser
            }
            RouteError::Store(_) => {
                return Some(OutboundEvent::error(ErrorCode::Internal, "Request failed"));
            }
            RouteError::ContentTooLong { .. } => ErrorCode::ContentTooLong,
            RouteError::NotFriends(_) => ErrorCode::NotFriends,
        };

        Some(OutboundEvent::error(code, self.to_string()))
    }
}

/// A stored message and, when the receiver was connected, its record after
/// delivery.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Record as created, status `sent`.
    pub message: Message,
    /// Record advanced to `delivered`.
    pub delivered: Option<Message>,
}

impl SentMessage {
    /// The most advanced record.
    #[must_use]
    pub fn latest(&self) -> &Message {
        self.delivered.as_ref().unwrap_or(&self.message)
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum message length in characters.
    pub max_content_length: usize,
    /// Only accepted friends may message or signal typing to each other.
    pub require_friendship: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_content_length: 4096,
            require_friendship: false,
        }
    }
}

/// Applies inbound events for authenticated users.
pub struct EventRouter {
    store: Arc<dyn Store>,
    notifier: Notifier,
    config: RouterConfig,
}

impl EventRouter {
    /// Create a router.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, config: RouterConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Router configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Process one event from `me`, arriving on `origin`.
    ///
    /// Failures never tear down the connection; user-correctable ones are
    /// reported to `origin` only.
    pub async fn route(&self, me: UserId, origin: &ConnectionHandle, event: InboundEvent) {
        let kind = event.kind();
        trace!(user = me, kind, "Routing event");

        let result = match event {
            InboundEvent::Authenticate(_) => {
                warn!(user = me, connection = %origin.id(), "Ignoring repeated authenticate");
                Ok(())
            }
            InboundEvent::Message(SendMessage {
                receiver_id,
                content,
            }) => self
                .send_message(me, receiver_id, content)
                .await
                .map(|sent| {
                    if let Some(delivered) = sent.delivered {
                        reply(origin, OutboundEvent::MessageStatus(delivered));
                    }
                    reply(origin, OutboundEvent::MessageSent(sent.message));
                }),
            InboundEvent::Typing(payload) => {
                self.relay_typing(me, payload.receiver_id, true).await
            }
            InboundEvent::StopTyping(payload) => {
                self.relay_typing(me, payload.receiver_id, false).await
            }
            InboundEvent::FriendRequest(payload) => {
                self.request_friend(me, payload.friend_id).await.map(drop)
            }
            InboundEvent::FriendRequestResponse(payload) => self
                .answer_request(me, payload.request_id, payload.status)
                .await
                .map(drop),
            InboundEvent::CancelFriendRequest(payload) => {
                self.cancel_request(me, payload.request_id).await.map(drop)
            }
            InboundEvent::MessageRead(payload) => self
                .update_message_status(me, payload.message_id, DeliveryStatus::Read)
                .await
                .map(drop),
        };

        if let Err(e) = result {
            self.report(me, origin, kind, &e);
        }
    }

    fn report(&self, me: UserId, origin: &ConnectionHandle, kind: &str, err: &RouteError) {
        match err {
            RouteError::Store(StoreError::InvalidTransition { .. }) => {
                debug!(user = me, kind, error = %err, "Dropping stale status change")
            }
            RouteError::Store(e) if !e.is_user_correctable() => {
                error!(user = me, kind, error = %err, "Store failure while routing")
            }
            RouteError::EmptyContent => warn!(user = me, kind, "Dropping empty message"),
            _ => debug!(user = me, kind, error = %err, "Rejected event"),
        }

        if let Some(notice) = err.notice() {
            reply(origin, notice);
        }
    }

    async fn ensure_friends(&self, me: UserId, other: UserId) -> Result<(), RouteError> {
        if !self.config.require_friendship {
            return Ok(());
        }

        match self.store.find_friendship(me, other).await? {
            Some(friendship) if friendship.status == FriendshipStatus::Accepted => Ok(()),
            _ => Err(RouteError::NotFriends(other)),
        }
    }

    /// Store a message from `me` and push it to the receiver if connected.
    ///
    /// A pushed message is advanced to `delivered`; a receiver that already
    /// read it in the meantime keeps `read`.
    pub async fn send_message(
        &self,
        me: UserId,
        receiver_id: UserId,
        content: String,
    ) -> Result<SentMessage, RouteError> {
        if content.trim().is_empty() {
            return Err(RouteError::EmptyContent);
        }
        if content.chars().count() > self.config.max_content_length {
            return Err(RouteError::ContentTooLong {
                max: self.config.max_content_length,
            });
        }
        self.ensure_friends(me, receiver_id).await?;

        let message = self.store.create_message(me, receiver_id, content).await?;
        let sender = self
            .store
            .get_user(me)
            .await?
            .map(|user| UserSummary::from(&user));

        let pushed = self.notifier.send_to_user(
            receiver_id,
            OutboundEvent::Message(DeliveredMessage {
                message: message.clone(),
                sender,
            }),
        );

        let mut delivered = None;
        if pushed {
            match self
                .store
                .advance_message_status(message.id, DeliveryStatus::Delivered)
                .await
            {
                Ok(updated) => delivered = updated,
                // The receiver already read it
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => error!(message = message.id, error = %e, "Failed to mark delivered"),
            }
        }

        Ok(SentMessage { message, delivered })
    }

    async fn relay_typing(
        &self,
        me: UserId,
        receiver: UserId,
        typing: bool,
    ) -> Result<(), RouteError> {
        self.ensure_friends(me, receiver).await?;

        let notice = TypingNotice { sender_id: me };
        let event = if typing {
            OutboundEvent::Typing(notice)
        } else {
            OutboundEvent::StopTyping(notice)
        };
        self.notifier.send_to_user(receiver, event);
        Ok(())
    }

    /// Open a friend request from `me` to `recipient` and push it to them.
    pub async fn request_friend(
        &self,
        me: UserId,
        recipient: UserId,
    ) -> Result<Friendship, RouteError> {
        let friendship = self.store.create_friend_request(me, recipient).await?;

        self.notifier
            .send_to_user(recipient, OutboundEvent::FriendRequest(friendship.clone()));
        Ok(friendship)
    }

    /// Answer a pending request addressed to `me`.
    ///
    /// Returns `None` when the request is missing, addressed to someone
    /// else, or no longer pending. A rejected request is deleted once the
    /// requester has been told.
    pub async fn answer_request(
        &self,
        me: UserId,
        request_id: FriendshipId,
        decision: Decision,
    ) -> Result<Option<Friendship>, RouteError> {
        let status = FriendshipStatus::from(decision);
        let Some(updated) = self
            .store
            .respond_to_request(request_id, me, status)
            .await?
        else {
            debug!(user = me, request = request_id, "Ignoring response to unanswerable request");
            return Ok(None);
        };

        let responder = self.store.get_user(me).await?;
        self.notifier.send_to_user(
            updated.requester_id,
            OutboundEvent::FriendRequestResponse(FriendRequestAnswered {
                request_id: updated.id,
                status: updated.status,
                responder_id: me,
                responder_username: responder.as_ref().map(|u| u.username.clone()),
                responder_avatar: responder.and_then(|u| u.avatar),
            }),
        );

        if updated.status == FriendshipStatus::Rejected {
            self.store.delete_friendship(updated.id).await?;
        }
        Ok(Some(updated))
    }

    /// Withdraw a pending request sent by `me`.
    ///
    /// Returns the withdrawn request, or `None` when it is missing, was sent
    /// by someone else, or is no longer pending.
    pub async fn cancel_request(
        &self,
        me: UserId,
        request_id: FriendshipId,
    ) -> Result<Option<Friendship>, RouteError> {
        let Some(request) = self.store.cancel_request(request_id, me).await? else {
            debug!(user = me, request = request_id, "Ignoring cancel of uncancellable request");
            return Ok(None);
        };

        let sender = self.store.get_user(me).await?;
        self.notifier.send_to_user(
            request.recipient_id,
            OutboundEvent::FriendRequestCancelled(FriendRequestCancelled {
                request_id: request.id,
                sender_id: me,
                sender_username: sender.as_ref().map(|u| u.username.clone()),
                sender_avatar: sender.and_then(|u| u.avatar),
            }),
        );
        Ok(Some(request))
    }

    /// Advance a message received by `me` and tell the sender.
    ///
    /// Returns `None` when the message is missing or `me` is not its
    /// receiver; a non-advancing status is `InvalidTransition`.
    pub async fn update_message_status(
        &self,
        me: UserId,
        message_id: MessageId,
        status: DeliveryStatus,
    ) -> Result<Option<Message>, RouteError> {
        let Some(message) = self.store.get_message(message_id).await? else {
            return Ok(None);
        };
        if message.receiver_id != me {
            debug!(user = me, message = message.id, "Ignoring status change from non-receiver");
            return Ok(None);
        }

        let updated = self.store.advance_message_status(message.id, status).await?;
        if let Some(updated) = &updated {
            self.notifier
                .send_to_user(message.sender_id, OutboundEvent::MessageStatus(updated.clone()));
        }
        Ok(updated)
    }
}

/// Send to the issuing connection; a closed origin just loses the reply.
fn reply(origin: &ConnectionHandle, event: OutboundEvent) {
    if let Err(e) = origin.send(event) {
        trace!(error = %e, "Origin closed before reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outgoing;
    use crate::memory::MemoryStore;
    use crate::presence::PresenceRegistry;
    use crate::testing::GatedStore;
    use murmur_protocol::events::{
        CancelFriendRequest, FriendRequest, FriendRequestResponse, MessageRead, Typing,
    };
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        store: Arc<MemoryStore>,
        presence: Arc<PresenceRegistry>,
        router: EventRouter,
    }

    async fn fixture(config: RouterConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for name in ["alice", "bob", "carol"] {
            store.create_user(name, None).await.unwrap();
        }
        let presence = Arc::new(PresenceRegistry::new());
        let notifier = Notifier::new(store.clone(), presence.clone());
        let router = EventRouter::new(store.clone(), notifier, config);
        Fixture {
            store,
            presence,
            router,
        }
    }

    impl Fixture {
        fn connect(&self, user: UserId) -> (ConnectionHandle, UnboundedReceiver<Outgoing>) {
            let (handle, rx) = ConnectionHandle::channel();
            self.presence.register(user, handle.clone());
            (handle, rx)
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Outgoing>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outgoing::Event(event) = item {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn test_typing_relay() {
        let f = fixture(RouterConfig::default()).await;
        let (alice, _alice_rx) = f.connect(1);
        let (_bob, mut bob_rx) = f.connect(2);

        f.router
            .route(1, &alice, InboundEvent::Typing(Typing { receiver_id: 2 }))
            .await;
        f.router
            .route(1, &alice, InboundEvent::StopTyping(Typing { receiver_id: 2 }))
            .await;
        // Absent receiver is a no-op
        f.router
            .route(1, &alice, InboundEvent::Typing(Typing { receiver_id: 3 }))
            .await;

        assert_eq!(
            drain(&mut bob_rx),
            vec![
                OutboundEvent::Typing(TypingNotice { sender_id: 1 }),
                OutboundEvent::StopTyping(TypingNotice { sender_id: 1 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_and_oversized_content() {
        let f = fixture(RouterConfig {
            max_content_length: 5,
            require_friendship: false,
        })
        .await;
        let (alice, mut alice_rx) = f.connect(1);

        f.router.route(1, &alice, InboundEvent::message(2, "   ")).await;
        assert!(drain(&mut alice_rx).is_empty());

        f.router
            .route(1, &alice, InboundEvent::message(2, "too long"))
            .await;
        match drain(&mut alice_rx).as_slice() {
            [OutboundEvent::Error(notice)] => assert_eq!(notice.code, ErrorCode::ContentTooLong),
            other => panic!("Expected a single error, got {:?}", other),
        }

        assert!(f.store.list_conversation(1, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_require_friendship() {
        let f = fixture(RouterConfig {
            require_friendship: true,
            ..RouterConfig::default()
        })
        .await;
        let (alice, mut alice_rx) = f.connect(1);
        let (_bob, mut bob_rx) = f.connect(2);

        f.router.route(1, &alice, InboundEvent::message(2, "hi")).await;
        match drain(&mut alice_rx).as_slice() {
            [OutboundEvent::Error(notice)] => assert_eq!(notice.code, ErrorCode::NotFriends),
            other => panic!("Expected a single error, got {:?}", other),
        }
        assert!(drain(&mut bob_rx).is_empty());

        let request = f.store.create_friend_request(1, 2).await.unwrap();
        f.store
            .update_friendship_status(request.id, FriendshipStatus::Accepted)
            .await
            .unwrap();

        f.router.route(1, &alice, InboundEvent::message(2, "hi")).await;
        assert_eq!(drain(&mut bob_rx).len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_and_self_requests_are_reported() {
        let f = fixture(RouterConfig::default()).await;
        let (alice, mut alice_rx) = f.connect(1);
        let (_bob, mut bob_rx) = f.connect(2);

        let request = InboundEvent::FriendRequest(FriendRequest { friend_id: 2 });
        f.router.route(1, &alice, request.clone()).await;
        f.router.route(1, &alice, request).await;
        f.router
            .route(1, &alice, InboundEvent::FriendRequest(FriendRequest { friend_id: 1 }))
            .await;

        let codes: Vec<_> = drain(&mut alice_rx)
            .into_iter()
            .map(|event| match event {
                OutboundEvent::Error(notice) => notice.code,
                other => panic!("Unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(codes, vec![ErrorCode::DuplicateRequest, ErrorCode::SelfRequest]);

        // Recipient sees the request exactly once
        let received = drain(&mut bob_rx);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind(), "friendRequest");
    }

    #[tokio::test]
    async fn test_only_recipient_may_answer() {
        let f = fixture(RouterConfig::default()).await;
        let (alice, mut alice_rx) = f.connect(1);
        let (carol, _carol_rx) = f.connect(3);
        let request = f.store.create_friend_request(1, 2).await.unwrap();

        let answer = InboundEvent::FriendRequestResponse(FriendRequestResponse {
            request_id: request.id,
            status: Decision::Accepted,
        });
        // Neither the requester nor a third party can accept
        f.router.route(1, &alice, answer.clone()).await;
        f.router.route(3, &carol, answer).await;

        let stored = f.store.get_friendship(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FriendshipStatus::Pending);
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_rejection_deletes_record() {
        let f = fixture(RouterConfig::default()).await;
        let (_alice, mut alice_rx) = f.connect(1);
        let (bob, _bob_rx) = f.connect(2);
        let request = f.store.create_friend_request(1, 2).await.unwrap();

        f.router
            .route(
                2,
                &bob,
                InboundEvent::FriendRequestResponse(FriendRequestResponse {
                    request_id: request.id,
                    status: Decision::Rejected,
                }),
            )
            .await;

        match drain(&mut alice_rx).as_slice() {
            [OutboundEvent::FriendRequestResponse(answer)] => {
                assert_eq!(answer.status, FriendshipStatus::Rejected);
                assert_eq!(answer.responder_id, 2);
                assert_eq!(answer.responder_username.as_deref(), Some("bob"));
            }
            other => panic!("Expected friendRequestResponse, got {:?}", other),
        }
        assert!(f.store.get_friendship(request.id).await.unwrap().is_none());
        assert!(f.store.create_friend_request(1, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_request() {
        let f = fixture(RouterConfig::default()).await;
        let (alice, _alice_rx) = f.connect(1);
        let (bob, mut bob_rx) = f.connect(2);
        let request = f.store.create_friend_request(1, 2).await.unwrap();
        let cancel = InboundEvent::CancelFriendRequest(CancelFriendRequest {
            request_id: request.id,
        });

        // Recipient cannot cancel
        f.router.route(2, &bob, cancel.clone()).await;
        assert!(f.store.get_friendship(request.id).await.unwrap().is_some());

        f.router.route(1, &alice, cancel.clone()).await;
        assert!(f.store.get_friendship(request.id).await.unwrap().is_none());

        match drain(&mut bob_rx).as_slice() {
            [OutboundEvent::FriendRequestCancelled(cancelled)] => {
                assert_eq!(cancelled.request_id, request.id);
                assert_eq!(cancelled.sender_id, 1);
            }
            other => panic!("Expected friendRequestCancelled, got {:?}", other),
        }

        // Cancelling again is a silent no-op
        f.router.route(1, &alice, cancel).await;
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_accept_racing_cancel_has_one_outcome() {
        let store = GatedStore::with_users(&["alice", "bob"]).await;
        let presence = Arc::new(PresenceRegistry::new());
        let notifier = Notifier::new(store.clone(), presence.clone());
        let router = EventRouter::new(store.clone(), notifier, RouterConfig::default());
        let (alice, mut alice_rx) = ConnectionHandle::channel();
        let (bob, mut bob_rx) = ConnectionHandle::channel();
        presence.register(1, alice.clone());
        presence.register(2, bob.clone());
        let request = store.create_friend_request(1, 2).await.unwrap();

        let answering = store.hold("respond_to_request");
        let cancelling = store.hold("cancel_request");
        let accept = InboundEvent::FriendRequestResponse(FriendRequestResponse {
            request_id: request.id,
            status: Decision::Accepted,
        });
        let cancel = InboundEvent::CancelFriendRequest(CancelFriendRequest {
            request_id: request.id,
        });

        // Let both events reach the store before either write lands
        let interleave = async {
            answering.reached().await;
            cancelling.reached().await;
            tokio::join!(answering.release(), cancelling.release());
        };
        tokio::join!(
            router.route(2, &bob, accept),
            router.route(1, &alice, cancel),
            interleave
        );

        let alice_kinds: Vec<_> = drain(&mut alice_rx).iter().map(|e| e.kind()).collect();
        let bob_kinds: Vec<_> = drain(&mut bob_rx).iter().map(|e| e.kind()).collect();
        match store.get_friendship(request.id).await.unwrap() {
            Some(friendship) => {
                assert_eq!(friendship.status, FriendshipStatus::Accepted);
                assert_eq!(alice_kinds, vec!["friendRequestResponse"]);
                assert!(bob_kinds.is_empty());
            }
            None => {
                assert!(alice_kinds.is_empty());
                assert_eq!(bob_kinds, vec!["friendRequestCancelled"]);
            }
        }
    }

    #[tokio::test]
    async fn test_read_receipts() {
        let f = fixture(RouterConfig::default()).await;
        let (alice, mut alice_rx) = f.connect(1);
        let (bob, _bob_rx) = f.connect(2);
        let message = f.store.create_message(1, 2, "hi".into()).await.unwrap();
        let read = InboundEvent::MessageRead(MessageRead {
            message_id: message.id,
        });

        // The sender cannot mark their own message read
        f.router.route(1, &alice, read.clone()).await;
        assert_eq!(
            f.store.get_message(message.id).await.unwrap().unwrap().status,
            DeliveryStatus::Sent
        );

        f.router.route(2, &bob, read.clone()).await;
        // Re-reading is dropped silently
        f.router.route(2, &bob, read).await;

        let events = drain(&mut alice_rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delivery_status(), Some(DeliveryStatus::Read));
    }
}
