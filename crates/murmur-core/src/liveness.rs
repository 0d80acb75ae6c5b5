//! Liveness supervision.
//!
//! Every open connection is tracked here, authenticated or not. A periodic
//! sweep pings each connection after clearing its alive flag; a connection
//! whose flag is still clear at the next sweep missed a full interval and
//! is terminated.

use dashmap::DashMap;
use tracing::{debug, info};

use crate::connection::{ConnectionHandle, ConnectionId};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections pinged this round.
    pub pinged: usize,
    /// Connections terminated for missing the previous ping.
    pub terminated: Vec<ConnectionId>,
}

/// Tracks open connections for the heartbeat sweep.
#[derive(Debug, Default)]
pub struct Liveness {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl Liveness {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start supervising a connection.
    pub fn track(&self, handle: ConnectionHandle) {
        handle.mark_alive();
        self.connections.insert(handle.id(), handle);
    }

    /// Stop supervising a connection.
    pub fn untrack(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Number of supervised connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if nothing is supervised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Run one heartbeat round.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        self.connections.retain(|id, handle| {
            if !handle.take_alive() {
                debug!(connection = %id, "Liveness: no pong since last sweep, terminating");
                handle.close();
                report.terminated.push(*id);
                return false;
            }

            if handle.ping().is_err() {
                // Writer already gone; the session will clean up on its own
                report.terminated.push(*id);
                return false;
            }

            report.pinged += 1;
            true
        });

        if !report.terminated.is_empty() {
            info!(
                pinged = report.pinged,
                terminated = report.terminated.len(),
                "Liveness sweep"
            );
        }
        report
    }
}
