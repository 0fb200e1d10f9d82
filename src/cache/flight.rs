//! Single-flight collapsing of concurrent same-user resolutions
//!
//! When a popular user's cache entry is invalidated, every in-flight
//! request for that user would otherwise re-walk the role graph. The
//! flight table lets the first caller run the resolution while concurrent
//! callers wait for its broadcast result.

use crate::types::ResolvedPermissions;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Outcome broadcast from the leader to waiting followers
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    /// Resolution completed; the shared snapshot
    Resolved(Arc<ResolvedPermissions>),

    /// Resolution failed; followers fail closed with this message
    Failed(String),
}

/// Result of trying to acquire a flight slot
pub enum FlightSlot {
    /// This caller won the race and must run the resolution, then
    /// broadcast the outcome
    Leader(broadcast::Sender<FlightOutcome>),

    /// Another caller is already resolving; wait for its result
    Follower(broadcast::Receiver<FlightOutcome>),
}

/// In-flight resolution table keyed by user id
///
/// Uses the map's entry API for an atomic check-and-insert, so two callers
/// racing on the same user cannot both become leader.
pub struct FlightTable {
    in_flight: DashMap<String, broadcast::Sender<FlightOutcome>>,
}

impl FlightTable {
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically become leader for a user, or subscribe to the current one
    pub fn acquire(&self, user_id: &str) -> FlightSlot {
        use dashmap::mapref::entry::Entry;

        match self.in_flight.entry(user_id.to_string()) {
            Entry::Occupied(entry) => FlightSlot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                FlightSlot::Leader(tx)
            }
        }
    }

    /// Remove a completed flight
    pub fn complete(&self, user_id: &str) {
        self.in_flight.remove(user_id);
    }
}

impl Default for FlightTable {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard clearing the flight entry even when the leader panics or is
/// cancelled, so followers observe a closed channel and retry instead of
/// waiting forever
pub struct FlightGuard<'a> {
    table: &'a FlightTable,
    user_id: String,
    completed: bool,
}

impl<'a> FlightGuard<'a> {
    pub fn new(table: &'a FlightTable, user_id: impl Into<String>) -> Self {
        Self {
            table,
            user_id: user_id.into(),
            completed: false,
        }
    }

    /// Normal completion path
    pub fn complete(mut self) {
        self.table.complete(&self.user_id);
        self.completed = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.table.complete(&self.user_id);
        }
    }
}
