//! In-memory store.
//!
//! All tables live behind one lock: reads share it, writes serialize on it.
//! That makes pair uniqueness and monotonic delivery status hold under
//! concurrent writers. Friendships are indexed by unordered pair so
//! `find_friendship` is a point lookup; friend lists and conversations are
//! scans.

use async_trait::async_trait;
use murmur_protocol::model::{
    now_millis, DeliveryStatus, FriendEntry, Friendship, FriendshipId, FriendshipStatus, Message,
    MessageId, User, UserId, UserStatus,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::store::{Store, StoreError, StoreResult};

#[derive(Debug)]
struct Tables {
    users: BTreeMap<UserId, User>,
    usernames: HashMap<String, UserId>,
    friendships: BTreeMap<FriendshipId, Friendship>,
    /// Unordered pair (low, high) -> friendship.
    pairs: HashMap<(UserId, UserId), FriendshipId>,
    messages: BTreeMap<MessageId, Message>,
    next_user_id: UserId,
    next_friendship_id: FriendshipId,
    next_message_id: MessageId,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            usernames: HashMap::new(),
            friendships: BTreeMap::new(),
            pairs: HashMap::new(),
            messages: BTreeMap::new(),
            next_user_id: 1,
            next_friendship_id: 1,
            next_message_id: 1,
        }
    }
}

impl Tables {
    fn remove_friendship(&mut self, id: FriendshipId) -> Option<Friendship> {
        let friendship = self.friendships.remove(&id)?;
        let key = pair_key(friendship.requester_id, friendship.recipient_id);
        if self.pairs.get(&key) == Some(&id) {
            self.pairs.remove(&key);
        }
        Some(friendship)
    }
}

fn pair_key(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Store backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, username: &str, avatar: Option<String>) -> StoreResult<User> {
        let mut tables = self.tables.write().await;

        if tables.usernames.contains_key(username) {
            return Err(StoreError::DuplicateUser(username.to_string()));
        }

        let id = tables.next_user_id;
        tables.next_user_id += 1;

        let user = User {
            id,
            username: username.to_string(),
            avatar,
            status: UserStatus::Offline,
            last_seen: now_millis(),
        };
        tables.usernames.insert(user.username.clone(), id);
        tables.users.insert(id, user.clone());

        debug!(user = id, username = %username, "Created user");
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_name(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .usernames
            .get(username)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn set_user_status(&self, id: UserId, status: UserStatus) -> StoreResult<Option<User>> {
        let mut tables = self.tables.write().await;

        Ok(tables.users.get_mut(&id).map(|user| {
            if status == UserStatus::Offline && user.status != UserStatus::Offline {
                user.last_seen = now_millis();
            }
            user.status = status;
            user.clone()
        }))
    }

    async fn find_friendship(&self, a: UserId, b: UserId) -> StoreResult<Option<Friendship>> {
        let tables = self.tables.read().await;
        Ok(tables
            .pairs
            .get(&pair_key(a, b))
            .and_then(|id| tables.friendships.get(id))
            .cloned())
    }

    async fn get_friendship(&self, id: FriendshipId) -> StoreResult<Option<Friendship>> {
        Ok(self.tables.read().await.friendships.get(&id).cloned())
    }

    async fn create_friend_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> StoreResult<Friendship> {
        if requester == recipient {
            return Err(StoreError::SelfRequest(requester));
        }

        let mut tables = self.tables.write().await;

        for user in [requester, recipient] {
            if !tables.users.contains_key(&user) {
                return Err(StoreError::UnknownUser(user));
            }
        }

        let key = pair_key(requester, recipient);
        let existing = tables
            .pairs
            .get(&key)
            .and_then(|id| tables.friendships.get(id))
            .map(|friendship| (friendship.id, friendship.status.is_active()));

        match existing {
            Some((_, true)) => return Err(StoreError::DuplicateRequest(requester, recipient)),
            Some((stale, false)) => {
                // Rejected leftovers do not block a new request
                tables.remove_friendship(stale);
            }
            None => {}
        }

        let id = tables.next_friendship_id;
        tables.next_friendship_id += 1;

        let friendship = Friendship {
            id,
            requester_id: requester,
            recipient_id: recipient,
            status: FriendshipStatus::Pending,
            created_at: now_millis(),
        };
        tables.friendships.insert(id, friendship.clone());
        tables.pairs.insert(key, id);

        debug!(friendship = id, requester, recipient, "Created friend request");
        Ok(friendship)
    }

    async fn update_friendship_status(
        &self,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> StoreResult<Option<Friendship>> {
        let mut tables = self.tables.write().await;

        Ok(tables.friendships.get_mut(&id).map(|friendship| {
            friendship.status = status;
            friendship.clone()
        }))
    }

    async fn respond_to_request(
        &self,
        id: FriendshipId,
        recipient: UserId,
        status: FriendshipStatus,
    ) -> StoreResult<Option<Friendship>> {
        let mut tables = self.tables.write().await;

        Ok(tables
            .friendships
            .get_mut(&id)
            .filter(|f| f.recipient_id == recipient && f.status == FriendshipStatus::Pending)
            .map(|friendship| {
                friendship.status = status;
                debug!(friendship = id, status = %status, "Answered friend request");
                friendship.clone()
            }))
    }

    async fn cancel_request(
        &self,
        id: FriendshipId,
        requester: UserId,
    ) -> StoreResult<Option<Friendship>> {
        let mut tables = self.tables.write().await;

        let cancellable = tables.friendships.get(&id).is_some_and(|f| {
            f.requester_id == requester && f.status == FriendshipStatus::Pending
        });
        if !cancellable {
            return Ok(None);
        }

        debug!(friendship = id, requester, "Cancelled friend request");
        Ok(tables.remove_friendship(id))
    }

    async fn delete_friendship(&self, id: FriendshipId) -> StoreResult<()> {
        let mut tables = self.tables.write().await;

        if tables.remove_friendship(id).is_some() {
            debug!(friendship = id, "Deleted friendship");
        }

        Ok(())
    }

    async fn list_friends(&self, user: UserId) -> StoreResult<Vec<FriendEntry>> {
        let tables = self.tables.read().await;

        let entries = tables
            .friendships
            .values()
            .filter_map(|friendship| {
                let other = match friendship.status {
                    FriendshipStatus::Accepted => friendship.other_party(user)?,
                    FriendshipStatus::Pending if friendship.recipient_id == user => {
                        friendship.requester_id
                    }
                    _ => return None,
                };

                tables.users.get(&other).map(|friend| FriendEntry {
                    friendship_id: friendship.id,
                    friend: friend.clone(),
                    status: friendship.status,
                })
            })
            .collect();

        Ok(entries)
    }

    async fn create_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> StoreResult<Message> {
        let mut tables = self.tables.write().await;

        for user in [sender, receiver] {
            if !tables.users.contains_key(&user) {
                return Err(StoreError::UnknownUser(user));
            }
        }

        let id = tables.next_message_id;
        tables.next_message_id += 1;

        let message = Message {
            id,
            sender_id: sender,
            receiver_id: receiver,
            content,
            created_at: now_millis(),
            status: DeliveryStatus::Sent,
        };
        tables.messages.insert(id, message.clone());

        trace!(message = id, sender, receiver, "Stored message");
        Ok(message)
    }

    async fn get_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn advance_message_status(
        &self,
        id: MessageId,
        status: DeliveryStatus,
    ) -> StoreResult<Option<Message>> {
        let mut tables = self.tables.write().await;

        let Some(message) = tables.messages.get_mut(&id) else {
            return Ok(None);
        };

        if !message.status.can_advance_to(status) {
            return Err(StoreError::InvalidTransition {
                from: message.status,
                to: status,
            });
        }

        message.status = status;
        trace!(message = id, status = %status, "Advanced message status");
        Ok(Some(message.clone()))
    }

    async fn list_conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;

        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b) || (m.sender_id == b && m.receiver_id == a)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.created_at, m.id));

        Ok(messages)
    }
}
