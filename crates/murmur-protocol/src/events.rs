//! Event types for the Murmur protocol.
//!
//! Every frame on the wire is an envelope `{ "type": ..., "payload": ... }`.
//! Inbound and outbound traffic each get their own tagged enum so that a
//! handler can only ever produce events a client knows how to read.

use serde::{Deserialize, Serialize};

use crate::model::{
    DeliveryStatus, Friendship, FriendshipId, FriendshipStatus, Message, MessageId, UserId,
    UserStatus, UserSummary,
};

/// `authenticate` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authenticate {
    pub user_id: UserId,
}

/// `message` payload sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub receiver_id: UserId,
    pub content: String,
}

/// `typing` / `stopTyping` payload sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub receiver_id: UserId,
}

/// `friendRequest` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub friend_id: UserId,
}

/// The recipient's answer to a pending friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl From<Decision> for FriendshipStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Accepted => FriendshipStatus::Accepted,
            Decision::Rejected => FriendshipStatus::Rejected,
        }
    }
}

/// `friendRequestResponse` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestResponse {
    pub request_id: FriendshipId,
    pub status: Decision,
}

/// `cancelFriendRequest` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelFriendRequest {
    pub request_id: FriendshipId,
}

/// `messageRead` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub message_id: MessageId,
}

/// A decoded client-to-server event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum InboundEvent {
    Authenticate(Authenticate),
    Message(SendMessage),
    Typing(Typing),
    StopTyping(Typing),
    FriendRequest(FriendRequest),
    FriendRequestResponse(FriendRequestResponse),
    CancelFriendRequest(CancelFriendRequest),
    MessageRead(MessageRead),
}

impl InboundEvent {
    /// The wire `type` of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Authenticate(_) => "authenticate",
            InboundEvent::Message(_) => "message",
            InboundEvent::Typing(_) => "typing",
            InboundEvent::StopTyping(_) => "stopTyping",
            InboundEvent::FriendRequest(_) => "friendRequest",
            InboundEvent::FriendRequestResponse(_) => "friendRequestResponse",
            InboundEvent::CancelFriendRequest(_) => "cancelFriendRequest",
            InboundEvent::MessageRead(_) => "messageRead",
        }
    }

    /// Create an `authenticate` event.
    #[must_use]
    pub fn authenticate(user_id: UserId) -> Self {
        InboundEvent::Authenticate(Authenticate { user_id })
    }

    /// Create a `message` event.
    #[must_use]
    pub fn message(receiver_id: UserId, content: impl Into<String>) -> Self {
        InboundEvent::Message(SendMessage {
            receiver_id,
            content: content.into(),
        })
    }
}

/// A message as delivered to its receiver, with the sender's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserSummary>,
}

/// Typing indicator relayed to the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub sender_id: UserId,
}

/// Answer to a friend request, relayed to the original requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestAnswered {
    pub request_id: FriendshipId,
    pub status: FriendshipStatus,
    pub responder_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder_avatar: Option<String>,
}

/// Cancellation of a pending request, relayed to its recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestCancelled {
    pub request_id: FriendshipId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
}

/// Presence change of a friend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub user_id: UserId,
    pub status: UserStatus,
}

/// Machine-readable reason attached to an `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    DuplicateRequest,
    SelfRequest,
    UnknownUser,
    ContentTooLong,
    NotFriends,
    Internal,
}

/// `error` payload, sent only to the connection that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub code: ErrorCode,
    pub message: String,
}

/// A server-to-client event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum OutboundEvent {
    Message(DeliveredMessage),
    MessageSent(Message),
    MessageStatus(Message),
    Typing(TypingNotice),
    StopTyping(TypingNotice),
    FriendRequest(Friendship),
    FriendRequestResponse(FriendRequestAnswered),
    FriendRequestCancelled(FriendRequestCancelled),
    StatusUpdate(StatusUpdate),
    Error(ErrorNotice),
}

impl OutboundEvent {
    /// The wire `type` of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::Message(_) => "message",
            OutboundEvent::MessageSent(_) => "messageSent",
            OutboundEvent::MessageStatus(_) => "messageStatus",
            OutboundEvent::Typing(_) => "typing",
            OutboundEvent::StopTyping(_) => "stopTyping",
            OutboundEvent::FriendRequest(_) => "friendRequest",
            OutboundEvent::FriendRequestResponse(_) => "friendRequestResponse",
            OutboundEvent::FriendRequestCancelled(_) => "friendRequestCancelled",
            OutboundEvent::StatusUpdate(_) => "statusUpdate",
            OutboundEvent::Error(_) => "error",
        }
    }

    /// Create a `statusUpdate` event.
    #[must_use]
    pub fn status_update(user_id: UserId, status: UserStatus) -> Self {
        OutboundEvent::StatusUpdate(StatusUpdate { user_id, status })
    }

    /// Create an `error` event.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        OutboundEvent::Error(ErrorNotice {
            code,
            message: message.into(),
        })
    }

    /// The delivery status carried by message-bearing events.
    #[must_use]
    pub fn delivery_status(&self) -> Option<DeliveryStatus> {
        match self {
            OutboundEvent::Message(m) => Some(m.message.status),
            OutboundEvent::MessageSent(m) | OutboundEvent::MessageStatus(m) => Some(m.status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_kind_matches_wire_tag() {
        let event = InboundEvent::FriendRequestResponse(FriendRequestResponse {
            request_id: 7,
            status: Decision::Accepted,
        });
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], event.kind());
        assert_eq!(value["payload"]["requestId"], 7);
        assert_eq!(value["payload"]["status"], "accepted");
    }

    #[test]
    fn test_delivered_message_is_flattened() {
        let event = OutboundEvent::Message(DeliveredMessage {
            message: Message {
                id: 3,
                sender_id: 1,
                receiver_id: 2,
                content: "hi".into(),
                created_at: 100,
                status: DeliveryStatus::Sent,
            },
            sender: None,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "payload": {
                    "id": 3,
                    "senderId": 1,
                    "receiverId": 2,
                    "content": "hi",
                    "createdAt": 100,
                    "status": "sent"
                }
            })
        );
        assert_eq!(event.delivery_status(), Some(DeliveryStatus::Sent));
    }

    #[test]
    fn test_error_event_shape() {
        let event = OutboundEvent::error(ErrorCode::DuplicateRequest, "already exists");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "error");
        assert_eq!(value["payload"]["code"], "duplicateRequest");
    }
}
