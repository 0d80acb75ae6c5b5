//! Outbound delivery to presence-registered connections.

use murmur_protocol::model::{FriendshipStatus, UserId, UserStatus};
use murmur_protocol::OutboundEvent;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::presence::PresenceRegistry;
use crate::store::Store;

/// Delivers events to online users.
///
/// Offline recipients are not an error: delivery is best effort and
/// nothing is queued for later.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn Store>,
    presence: Arc<PresenceRegistry>,
}

impl Notifier {
    /// Create a notifier over the given store and registry.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, presence: Arc<PresenceRegistry>) -> Self {
        Self { store, presence }
    }

    /// Send `event` to `user` if they are connected.
    ///
    /// Returns `true` if the event was handed to the user's connection. A
    /// handle that fails to accept the event is treated as offline and its
    /// presence entry is dropped.
    pub fn send_to_user(&self, user: UserId, event: OutboundEvent) -> bool {
        let Some(handle) = self.presence.lookup(user) else {
            trace!(user, kind = event.kind(), "Recipient offline");
            return false;
        };

        let kind = event.kind();
        match handle.send(event) {
            Ok(()) => {
                trace!(user, connection = %handle.id(), kind, "Delivered");
                true
            }
            Err(e) => {
                debug!(user, error = %e, "Dropping stale presence entry");
                self.presence.unregister(user, &handle);
                false
            }
        }
    }

    /// Tell every connected, accepted friend of `user` about a status change.
    ///
    /// Returns the number of friends notified.
    pub async fn broadcast_status(&self, user: UserId, status: UserStatus) -> usize {
        let friends = match self.store.list_friends(user).await {
            Ok(friends) => friends,
            Err(e) => {
                error!(user, error = %e, "Failed to load friends for status broadcast");
                return 0;
            }
        };

        let delivered = friends
            .iter()
            .filter(|entry| entry.status == FriendshipStatus::Accepted)
            .filter(|entry| {
                self.send_to_user(entry.friend.id, OutboundEvent::status_update(user, status))
            })
            .count();

        debug!(user, status = %status, recipients = delivered, "Broadcast status");
        delivered
    }
}
