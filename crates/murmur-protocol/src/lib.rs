//! # murmur-protocol
//!
//! Wire protocol definitions for the Murmur presence and messaging relay.
//!
//! Every frame is an envelope `{ "type": string, "payload": object }`,
//! carried as JSON in WebSocket text frames or MessagePack in binary frames.
//!
//! ## Event Types
//!
//! - `authenticate` - Bind a connection to a user
//! - `message` / `messageRead` - Direct messages and read receipts
//! - `typing` / `stopTyping` - Typing indicators
//! - `friendRequest` / `friendRequestResponse` / `cancelFriendRequest` - Friendship lifecycle
//!
//! ## Example
//!
//! ```rust
//! use murmur_protocol::{codec, InboundEvent};
//!
//! let frame = r#"{"type":"message","payload":{"receiverId":2,"content":"hi"}}"#;
//! let event = codec::decode_text(frame).unwrap();
//! assert_eq!(event, Some(InboundEvent::message(2, "hi")));
//! ```

pub mod codec;
pub mod events;
pub mod model;

pub use codec::{decode_binary, decode_text, encode, Encoded, ProtocolError, WireFormat};
pub use events::{ErrorCode, InboundEvent, OutboundEvent};
pub use model::{
    DeliveryStatus, FriendEntry, Friendship, FriendshipId, FriendshipStatus, Message, MessageId,
    User, UserId, UserStatus, UserSummary,
};
