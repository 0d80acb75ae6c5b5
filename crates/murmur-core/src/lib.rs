//! # murmur-core
//!
//! Presence, routing, and persistence for the Murmur relay.
//!
//! This crate provides the transport-independent building blocks:
//!
//! - **Store** - Users, friendships, and messages behind an async trait
//! - **Presence** - Which user is reachable through which connection
//! - **Router** - Applies inbound events and fans out the results
//! - **Session** - Per-connection authentication state machine
//! - **Liveness** - Heartbeat sweep that evicts silent connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│   Router    │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Liveness   │     │  Notifier   │────▶│  Presence   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod connection;
pub mod liveness;
pub mod memory;
pub mod notifier;
pub mod presence;
pub mod relay;
pub mod router;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use connection::{ConnectionHandle, ConnectionId, Outgoing, SendError};
pub use liveness::{Liveness, SweepReport};
pub use memory::MemoryStore;
pub use notifier::Notifier;
pub use presence::PresenceRegistry;
pub use relay::{Relay, RelayStats};
pub use router::{EventRouter, RouteError, RouterConfig, SentMessage};
pub use session::{Session, SessionState};
pub use store::{Store, StoreError, StoreResult};
