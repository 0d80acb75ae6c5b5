//! Data store interface.
//!
//! The store owns users, friendships, and messages. Everything the relay
//! persists goes through this trait so the in-memory implementation can be
//! swapped for a relational backend without touching the router.

use async_trait::async_trait;
use murmur_protocol::model::{
    DeliveryStatus, FriendEntry, Friendship, FriendshipId, FriendshipStatus, Message, MessageId,
    User, UserId, UserStatus,
};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// An active friendship already exists for the pair.
    #[error("Friendship between {0} and {1} already exists")]
    DuplicateRequest(UserId, UserId),

    /// A user tried to befriend themselves.
    #[error("User {0} cannot send a friend request to themselves")]
    SelfRequest(UserId),

    /// Referenced user does not exist.
    #[error("User not found: {0}")]
    UnknownUser(UserId),

    /// Username already registered.
    #[error("Username already taken: {0}")]
    DuplicateUser(String),

    /// Message status would not strictly advance.
    #[error("Invalid delivery transition from {from} to {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    /// Backend unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the issuing client can fix the problem by changing its request.
    #[must_use]
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateRequest(..)
                | StoreError::SelfRequest(_)
                | StoreError::UnknownUser(_)
                | StoreError::DuplicateUser(_)
        )
    }
}

/// Persistence contract for the relay.
///
/// Lookups return `Ok(None)` for missing entities; errors are reserved for
/// invariant violations and backend failures.
#[async_trait]
pub trait Store: Send + Sync {
    /// Register a new user (initially offline).
    async fn create_user(&self, username: &str, avatar: Option<String>) -> StoreResult<User>;

    /// Find a user by ID.
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Find a user by username.
    async fn get_user_by_name(&self, username: &str) -> StoreResult<Option<User>>;

    /// Update presence status. Last-seen moves only on transition to offline.
    async fn set_user_status(&self, id: UserId, status: UserStatus) -> StoreResult<Option<User>>;

    /// Find the friendship between two users, whichever side requested it.
    async fn find_friendship(&self, a: UserId, b: UserId) -> StoreResult<Option<Friendship>>;

    /// Find a friendship by ID.
    async fn get_friendship(&self, id: FriendshipId) -> StoreResult<Option<Friendship>>;

    /// Create a pending request from `requester` to `recipient`.
    async fn create_friend_request(
        &self,
        requester: UserId,
        recipient: UserId,
    ) -> StoreResult<Friendship>;

    /// Set a friendship's status unconditionally. Callers enforce who may do
    /// this; racing participants should use [`Store::respond_to_request`] or
    /// [`Store::cancel_request`] instead.
    async fn update_friendship_status(
        &self,
        id: FriendshipId,
        status: FriendshipStatus,
    ) -> StoreResult<Option<Friendship>>;

    /// Answer a pending request on behalf of its recipient.
    ///
    /// The role and status check happen in the same write as the update:
    /// returns `None` unless the request exists, is addressed to
    /// `recipient`, and is still pending.
    async fn respond_to_request(
        &self,
        id: FriendshipId,
        recipient: UserId,
        status: FriendshipStatus,
    ) -> StoreResult<Option<Friendship>>;

    /// Withdraw a pending request on behalf of its requester.
    ///
    /// Returns the removed record, or `None` unless the request exists, was
    /// sent by `requester`, and is still pending.
    async fn cancel_request(
        &self,
        id: FriendshipId,
        requester: UserId,
    ) -> StoreResult<Option<Friendship>>;

    /// Delete a friendship. Deleting a missing record is a no-op.
    async fn delete_friendship(&self, id: FriendshipId) -> StoreResult<()>;

    /// Accepted friends of `user` plus requests pending on `user`.
    async fn list_friends(&self, user: UserId) -> StoreResult<Vec<FriendEntry>>;

    /// Store a new message with status `sent`.
    async fn create_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: String,
    ) -> StoreResult<Message>;

    /// Find a message by ID.
    async fn get_message(&self, id: MessageId) -> StoreResult<Option<Message>>;

    /// Move a message forward in its delivery lifecycle.
    async fn advance_message_status(
        &self,
        id: MessageId,
        status: DeliveryStatus,
    ) -> StoreResult<Option<Message>>;

    /// All messages between two users, oldest first.
    async fn list_conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<Message>>;
}
