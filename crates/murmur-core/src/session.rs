//! Per-connection session state machine.
//!
//! ```text
//! Unauthenticated ──authenticate──▶ Authenticated(user) ──close──▶ Closed
//!        │                                                     ▲
//!        └──────────────────────close──────────────────────────┘
//! ```

use murmur_protocol::model::{UserId, UserStatus};
use murmur_protocol::{ErrorCode, InboundEvent, OutboundEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::relay::Relay;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no user bound yet.
    Unauthenticated,
    /// Bound to a user.
    Authenticated(UserId),
    /// Terminal.
    Closed,
}

/// One client connection's view of the relay.
///
/// Events must be fed in receipt order; the session does not reorder or
/// buffer them.
pub struct Session {
    relay: Arc<Relay>,
    handle: ConnectionHandle,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(relay: Arc<Relay>, handle: ConnectionHandle) -> Self {
        Self {
            relay,
            handle,
            state: SessionState::Unauthenticated,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Handle used to reach this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound user, once authenticated.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self.state {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Process one decoded inbound event.
    pub async fn handle_event(&mut self, event: InboundEvent) {
        let state = self.state;
        match state {
            SessionState::Closed => {}
            SessionState::Unauthenticated => match event {
                InboundEvent::Authenticate(payload) => self.authenticate(payload.user_id).await,
                other => {
                    debug!(
                        connection = %self.id(),
                        kind = other.kind(),
                        "Ignoring event before authenticate"
                    );
                }
            },
            SessionState::Authenticated(user) => {
                self.relay.router().route(user, &self.handle, event).await;
            }
        }
    }

    /// Record a liveness acknowledgment from the client.
    pub fn acknowledge_liveness(&self) {
        self.handle.mark_alive();
    }

    async fn authenticate(&mut self, user: UserId) {
        let store = self.relay.store();

        match store.get_user(user).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(connection = %self.id(), user, "Authenticate for unknown user");
                self.reply(OutboundEvent::error(
                    ErrorCode::UnknownUser,
                    format!("User not found: {user}"),
                ));
                return;
            }
            Err(e) => {
                error!(connection = %self.id(), user, error = %e, "Authenticate lookup failed");
                self.reply(OutboundEvent::error(ErrorCode::Internal, "Authentication failed"));
                return;
            }
        }

        let _transition = self.relay.lock_presence(user).await;
        self.state = SessionState::Authenticated(user);
        self.relay.presence().register(user, self.handle.clone());

        if let Err(e) = store.set_user_status(user, UserStatus::Online).await {
            error!(user, error = %e, "Failed to mark user online");
        }
        self.relay
            .notifier()
            .broadcast_status(user, UserStatus::Online)
            .await;

        info!(connection = %self.id(), user, "Session authenticated");
    }

    /// Tear down the session. Safe to call more than once.
    ///
    /// A user is only marked offline if this connection was still their
    /// registered one; a connection displaced by a newer login leaves the
    /// user online.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if previous == SessionState::Closed {
            return;
        }

        self.relay.liveness().untrack(self.handle.id());

        let SessionState::Authenticated(user) = previous else {
            debug!(connection = %self.id(), "Unauthenticated session closed");
            return;
        };

        // Held until the offline broadcast is out, so a re-login for the
        // same user cannot interleave with it
        let _transition = self.relay.lock_presence(user).await;
        if !self.relay.presence().unregister(user, &self.handle) {
            debug!(connection = %self.id(), user, "Displaced session closed");
            return;
        }

        if let Err(e) = self
            .relay
            .store()
            .set_user_status(user, UserStatus::Offline)
            .await
        {
            error!(user, error = %e, "Failed to mark user offline");
        }
        self.relay
            .notifier()
            .broadcast_status(user, UserStatus::Offline)
            .await;

        info!(connection = %self.id(), user, "Session closed");
    }

    fn reply(&self, event: OutboundEvent) {
        if self.handle.send(event).is_err() {
            debug!(connection = %self.id(), "Reply dropped, connection closed");
        }
    }
}
