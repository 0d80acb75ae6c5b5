//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use murmur_protocol::model::{
    DeliveryStatus, FriendEntry, Friendship, FriendshipId, FriendshipStatus, Message, MessageId,
    User, UserId, UserStatus,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use crate::memory::MemoryStore;
use crate::store::{Store, StoreResult};

/// Rendezvous between a held store call and the test driving it.
pub(crate) struct Gate {
    reached: Barrier,
    release: Barrier,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reached: Barrier::new(2),
            release: Barrier::new(2),
        })
    }

    /// Wait until the held call has arrived.
    pub(crate) async fn reached(&self) {
        self.reached.wait().await;
    }

    /// Let the held call continue.
    pub(crate) async fn release(&self) {
        self.release.wait().await;
    }

    async fn pass(&self) {
        self.reached.wait().await;
        self.release.wait().await;
    }
}

/// [`MemoryStore`] wrapper that can park the next call to a write.
#[derive(Default)]
pub(crate) struct GatedStore {
    inner: MemoryStore,
    gates: Mutex<HashMap<&'static str, Arc<Gate>>>,
}

impl GatedStore {
    pub(crate) async fn with_users(names: &[&str]) -> Arc<Self> {
        let store = Self::default();
        for name in names {
            store
                .create_user(name, Some(format!("{name}.png")))
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    /// Park the next call to `op` until the returned gate is released.
    pub(crate) fn hold(&self, op: &'static str) -> Arc<Gate> {
        let gate = Gate::new();
        self.gates.lock().unwrap().insert(op, gate.clone());
        gate
    }

    async fn checkpoint(&self, op: &'static str) {
        let gate = self.gates.lock().unwrap().remove(op);
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn create_user(&self, username: &str, avatar: Option<String>) -> StoreResult<User> {
        self.inner.create_user(username, avatar).await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        self.inner.get_user_by_name(username).await
    }

    async fn set_user_status(&self, id: UserId, status: UserStatus) -> StoreResult<Option<User>> {
        self.checkpoint("set_user_status").await;
        self.inner.set_user_status(id, status).await
    }

    async fn find_friendship(&self, a: UserId, b: UserId) -> StoreResult<Option<Friendship>> {
        self.inner.find_friendship(a, b).await
    }

    async fn get_friendship(&self, id: FriendshipId) -> StoreResult<Option<Friendship>> {
        self.inner.get_friendship(id).await
    }

    async fn create_friend_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> StoreResult<Friendship> {
        self.inner.create_friend_request(requester, recipient).await
    }

    async fn update_friendship_status(
        &self,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> StoreResult<Option<Friendship>> {
        self.inner.update_friendship_status(id, status).await
    }

    async fn respond_to_request(
        &self,
        id: FriendshipId,
        recipient: UserId,
        status: FriendshipStatus,
    ) -> StoreResult<Option<Friendship>> {
        self.checkpoint("respond_to_request").await;
        self.inner.respond_to_request(id, recipient, status).await
    }

    async fn cancel_request(
        &self,
        id: FriendshipId,
        requester: UserId,
    ) -> StoreResult<Option<Friendship>> {
        self.checkpoint("cancel_request").await;
        self.inner.cancel_request(id, requester).await
    }

    async fn delete_friendship(&self, id: FriendshipId) -> StoreResult<()> {
        self.inner.delete_friendship(id).await
    }

    async fn list_friends(&self, user: UserId) -> StoreResult<Vec<FriendEntry>> {
        self.inner.list_friends(user).await
    }

    async fn create_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> StoreResult<Message> {
        self.inner.create_message(sender, receiver, content).await
    }

    async fn get_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        self.inner.get_message(id).await
    }

    async fn advance_message_status(
        &self,
        id: MessageId,
        status: DeliveryStatus,
    ) -> StoreResult<Option<Message>> {
        self.inner.advance_message_status(id, status).await
    }

    async fn list_conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
        self.inner.list_conversation(a, b).await
    }
}
