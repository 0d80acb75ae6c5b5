//! Presence tracking for Murmur.
//!
//! The registry maps each online user to the handle of their one active
//! connection. It is the single source of truth for "who is reachable now".

use crate::connection::ConnectionHandle;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use murmur_protocol::UserId;
use std::collections::HashSet;
use tracing::debug;

/// Online users and their connection handles.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` as the connection for `user`.
    ///
    /// A newer connection silently displaces the old mapping; the displaced
    /// handle is returned but not closed.
    pub fn register(&self, user: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection = handle.id();
        let previous = self.entries.insert(user, handle);

        match &previous {
            Some(old) if old.id() != connection => {
                debug!(
                    user,
                    connection = %connection,
                    displaced = %old.id(),
                    "Presence: connection displaced"
                );
            }
            _ => debug!(user, connection = %connection, "Presence: user online"),
        }

        previous
    }

    /// Look up the connection for `user`.
    #[must_use]
    pub fn lookup(&self, user: UserId) -> Option<ConnectionHandle> {
        self.entries.get(&user).map(|entry| entry.value().clone())
    }

    /// Remove `user` only if `handle` is still the registered connection.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unregister(&self, user: UserId, handle: &ConnectionHandle) -> bool {
        match self.entries.entry(user) {
            Entry::Occupied(entry) if entry.get() == handle => {
                entry.remove();
                debug!(user, connection = %handle.id(), "Presence: user offline");
                true
            }
            _ => false,
        }
    }

    /// Check if `user` has a registered connection.
    #[must_use]
    pub fn is_present(&self, user: UserId) -> bool {
        self.entries.contains_key(&user)
    }

    /// All currently registered users.
    #[must_use]
    pub fn snapshot(&self) -> HashSet<UserId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
