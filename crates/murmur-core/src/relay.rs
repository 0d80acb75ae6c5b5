//! The relay hub.
//!
//! [`Relay`] wires the store, presence registry, notifier, router, and
//! liveness tracker together. Transports hold an `Arc<Relay>` and open one
//! [`Session`] per accepted connection.

use dashmap::DashMap;
use murmur_protocol::model::{FriendEntry, Friendship, FriendshipStatus, Message, UserId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::liveness::Liveness;
use crate::notifier::Notifier;
use crate::presence::PresenceRegistry;
use crate::router::{EventRouter, RouteError, RouterConfig};
use crate::session::Session;
use crate::store::{Store, StoreError, StoreResult};

/// Point-in-time relay counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub online_users: usize,
    pub connections: usize,
}

/// Shared state for every connection.
pub struct Relay {
    store: Arc<dyn Store>,
    presence: Arc<PresenceRegistry>,
    notifier: Notifier,
    router: EventRouter,
    liveness: Liveness,
    transitions: DashMap<UserId, Arc<Mutex<()>>>,
}

impl Relay {
    /// Build a relay over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: RouterConfig) -> Self {
        let presence = Arc::new(PresenceRegistry::new());
        let notifier = Notifier::new(store.clone(), presence.clone());
        let router = EventRouter::new(store.clone(), notifier.clone(), config);

        Self {
            store,
            presence,
            notifier,
            router,
            liveness: Liveness::new(),
            transitions: DashMap::new(),
        }
    }

    /// Start a session for a freshly accepted connection.
    #[must_use]
    pub fn open_session(self: &Arc<Self>, handle: ConnectionHandle) -> Session {
        self.liveness.track(handle.clone());
        debug!(connection = %handle.id(), "Session opened");
        Session::new(self.clone(), handle)
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Outbound notifier.
    #[must_use]
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Event router.
    #[must_use]
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Liveness tracker.
    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            online_users: self.presence.len(),
            connections: self.liveness.len(),
        }
    }

    /// Friend list of `user`: accepted friends and requests pending on them.
    pub async fn friends(&self, user: UserId) -> StoreResult<Vec<FriendEntry>> {
        self.require_user(user).await?;
        self.store.list_friends(user).await
    }

    /// Conversation between `user` and `other`, oldest first.
    pub async fn conversation(&self, user: UserId, other: UserId) -> StoreResult<Vec<Message>> {
        self.require_user(user).await?;
        self.store.list_conversation(user, other).await
    }

    /// Send a friend request from `user` to whoever is registered as `username`.
    pub async fn request_friend_by_name(
        &self,
        user: UserId,
        username: &str,
    ) -> Result<Friendship, RouteError> {
        let Some(recipient) = self.store.get_user_by_name(username).await? else {
            return Err(RouteError::UnknownUsername(username.to_string()));
        };
        self.router.request_friend(user, recipient.id).await
    }

    /// Remove an accepted friendship, whichever side requested it.
    ///
    /// Returns `false` if the two users are not friends.
    pub async fn remove_friend(&self, user: UserId, other: UserId) -> StoreResult<bool> {
        match self.store.find_friendship(user, other).await? {
            Some(friendship) if friendship.status == FriendshipStatus::Accepted => {
                self.store.delete_friendship(friendship.id).await?;
                debug!(user, other, friendship = friendship.id, "Friend removed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Serialize online/offline transitions for `user`.
    ///
    /// Held from presence registration through the status broadcast, so a
    /// closing connection and a fresh login for the same user never
    /// interleave.
    pub(crate) async fn lock_presence(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = self.transitions.entry(user).or_default().clone();
        lock.lock_owned().await
    }

    async fn require_user(&self, user: UserId) -> StoreResult<()> {
        match self.store.get_user(user).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::UnknownUser(user)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outgoing;
    use crate::memory::MemoryStore;
    use murmur_protocol::OutboundEvent;

    async fn relay() -> Arc<Relay> {
        let store = Arc::new(MemoryStore::new());
        for name in ["alice", "bob", "carol"] {
            store.create_user(name, None).await.unwrap();
        }
        Arc::new(Relay::new(store, RouterConfig::default()))
    }

    #[tokio::test]
    async fn test_open_session_tracks_liveness() {
        let relay = relay().await;
        let (handle, _rx) = ConnectionHandle::channel();

        let _session = relay.open_session(handle);
        assert_eq!(
            relay.stats(),
            RelayStats {
                online_users: 0,
                connections: 1
            }
        );
    }

    #[test]
    fn test_stats_serialization() {
        let stats = RelayStats {
            online_users: 2,
            connections: 3,
        };
        assert_eq!(
            serde_json::to_value(stats).unwrap(),
            serde_json::json!({"onlineUsers": 2, "connections": 3})
        );
    }

    #[tokio::test]
    async fn test_remove_friend_requires_acceptance() {
        let relay = relay().await;
        let store = relay.store();
        let request = store.create_friend_request(1, 2).await.unwrap();

        assert!(!relay.remove_friend(2, 1).await.unwrap());

        store
            .update_friendship_status(request.id, FriendshipStatus::Accepted)
            .await
            .unwrap();
        // Either side may remove it
        assert!(relay.remove_friend(2, 1).await.unwrap());
        assert!(!relay.remove_friend(1, 2).await.unwrap());
        assert!(store.find_friendship(1, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_friend_by_name() {
        let relay = relay().await;
        let (bob, mut bob_rx) = ConnectionHandle::channel();
        relay.presence().register(2, bob);

        let request = relay.request_friend_by_name(1, "bob").await.unwrap();
        assert_eq!((request.requester_id, request.recipient_id), (1, 2));
        match bob_rx.try_recv() {
            Ok(Outgoing::Event(OutboundEvent::FriendRequest(pushed))) => {
                assert_eq!(pushed, request)
            }
            other => panic!("Expected friendRequest, got {:?}", other),
        }

        assert!(matches!(
            relay.request_friend_by_name(2, "alice").await,
            Err(RouteError::Store(StoreError::DuplicateRequest(2, 1)))
        ));
        assert!(matches!(
            relay.request_friend_by_name(1, "alice").await,
            Err(RouteError::Store(StoreError::SelfRequest(1)))
        ));
        assert!(matches!(
            relay.request_friend_by_name(1, "mallory").await,
            Err(RouteError::UnknownUsername(name)) if name == "mallory"
        ));
    }

    #[tokio::test]
    async fn test_friends_and_conversation() {
        let relay = relay().await;
        let store = relay.store();
        let request = store.create_friend_request(3, 1).await.unwrap();
        store.create_message(1, 2, "first".into()).await.unwrap();
        store.create_message(2, 1, "second".into()).await.unwrap();
        store.create_message(1, 3, "elsewhere".into()).await.unwrap();

        let friends = relay.friends(1).await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].friendship_id, request.id);

        let contents: Vec<_> = relay
            .conversation(2, 1)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);

        assert_eq!(
            relay.friends(99).await.unwrap_err(),
            StoreError::UnknownUser(99)
        );
    }
}
