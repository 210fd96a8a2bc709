//! Per-session two-lane change queue.
//!
//! Additions and removals go to the high-priority lane; moves and
//! reclassifications to the normal lane.  Reads always return the high lane
//! first, each lane in insertion order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use arsync_types::ArChange;
use tracing::trace;

#[derive(Debug, Default)]
struct Lanes {
    high: VecDeque<ArChange>,
    normal: VecDeque<ArChange>,
}

impl Lanes {
    fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }
}

/// Thread-safe change queue keyed by session ID.
#[derive(Debug, Default)]
pub struct ChangeQueue {
    sessions: Mutex<HashMap<String, Lanes>>,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Lanes>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `change` under its session, in the lane its type selects.
    pub fn enqueue(&self, change: ArChange) {
        trace!(
            session_id = %change.session_id,
            change_id = %change.id,
            change_type = ?change.change_type,
            "change queued"
        );
        let mut sessions = self.sessions();
        let lanes = sessions.entry(change.session_id.clone()).or_default();
        if change.change_type.is_high_priority() {
            lanes.high.push_back(change);
        } else {
            lanes.normal.push_back(change);
        }
    }

    /// Snapshot of the session's queue: high-priority entries first.
    pub fn get_session_changes(&self, session_id: &str) -> Vec<ArChange> {
        self.sessions()
            .get(session_id)
            .map(|lanes| lanes.high.iter().chain(lanes.normal.iter()).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every queued change for the session, applied or not.
    ///
    /// Returns how many were removed.  Prefer [`remove_changes`] when only a
    /// processed subset should go.
    ///
    /// [`remove_changes`]: ChangeQueue::remove_changes
    pub fn clear_session_changes(&self, session_id: &str) -> usize {
        self.sessions()
            .remove(session_id)
            .map(|lanes| lanes.len())
            .unwrap_or(0)
    }

    /// Remove only the changes whose IDs are in `ids`.  Returns how many
    /// were removed.
    pub fn remove_changes(&self, session_id: &str, ids: &HashSet<String>) -> usize {
        let mut sessions = self.sessions();
        let Some(lanes) = sessions.get_mut(session_id) else {
            return 0;
        };
        let before = lanes.len();
        lanes.high.retain(|c| !ids.contains(&c.id));
        lanes.normal.retain(|c| !ids.contains(&c.id));
        let removed = before - lanes.len();
        if lanes.is_empty() {
            sessions.remove(session_id);
        }
        removed
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.sessions().get(session_id).map_or(0, Lanes::len)
    }
}
