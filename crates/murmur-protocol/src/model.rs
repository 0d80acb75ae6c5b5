//! Entity types shared between the relay core and the wire.
//!
//! These are the durable records owned by the data store. They are
//! serialized with camelCase field names so they can be embedded directly
//! in outbound event payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A user identifier.
pub type UserId = u64;

/// A friendship record identifier.
pub type FriendshipId = u64;

/// A direct message identifier.
pub type MessageId = u64;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
}

impl UserStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage of a friendship record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendshipStatus {
    /// Pending and accepted records block a new request for the same pair.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, FriendshipStatus::Pending | FriendshipStatus::Accepted)
    }

    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FriendshipStatus::Pending => "pending",
            FriendshipStatus::Accepted => "accepted",
            FriendshipStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FriendshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery stage of a direct message.
///
/// The derived ordering follows the lifecycle: `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    /// Whether moving from `self` to `next` strictly advances the lifecycle.
    #[must_use]
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        next > self
    }

    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub status: UserStatus,
    /// Milliseconds since the epoch; updated when the user goes offline.
    pub last_seen: u64,
}

/// Public identity attached to notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub status: UserStatus,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            status: user.status,
        }
    }
}

/// A directed friendship record between a requester and a recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friendship {
    pub id: FriendshipId,
    pub requester_id: UserId,
    pub recipient_id: UserId,
    pub status: FriendshipStatus,
    pub created_at: u64,
}

impl Friendship {
    /// Whether `user` is either side of this record.
    #[must_use]
    pub fn involves(&self, user: UserId) -> bool {
        self.requester_id == user || self.recipient_id == user
    }

    /// The side of the record that is not `user`.
    #[must_use]
    pub fn other_party(&self, user: UserId) -> Option<UserId> {
        if self.requester_id == user {
            Some(self.recipient_id)
        } else if self.recipient_id == user {
            Some(self.requester_id)
        } else {
            None
        }
    }
}

/// A friend-list entry: the other party and the state of the relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    pub friendship_id: FriendshipId,
    pub friend: User,
    pub status: FriendshipStatus,
}

/// A direct message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: u64,
    pub status: DeliveryStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_ordering() {
        assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Delivered));
        assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Read));
        assert!(DeliveryStatus::Delivered.can_advance_to(DeliveryStatus::Read));

        assert!(!DeliveryStatus::Read.can_advance_to(DeliveryStatus::Delivered));
        assert!(!DeliveryStatus::Delivered.can_advance_to(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_friendship_parties() {
        let friendship = Friendship {
            id: 1,
            requester_id: 10,
            recipient_id: 20,
            status: FriendshipStatus::Pending,
            created_at: 0,
        };

        assert!(friendship.involves(10));
        assert!(friendship.involves(20));
        assert!(!friendship.involves(30));
        assert_eq!(friendship.other_party(10), Some(20));
        assert_eq!(friendship.other_party(20), Some(10));
        assert_eq!(friendship.other_party(30), None);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Delivered).unwrap(),
            "\"delivered\""
        );
        assert_eq!(serde_json::to_string(&UserStatus::Online).unwrap(), "\"online\"");
        assert!(FriendshipStatus::Accepted.is_active());
        assert!(!FriendshipStatus::Rejected.is_active());
    }
}
