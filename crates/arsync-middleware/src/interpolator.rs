//! Gap filling and time lookup over a rolling history.
//!
//! [`Interpolator::interpolate`] records a flushed batch and, for every
//! adjacent pair *within that batch* more than [`GAP_THRESHOLD_MS`] apart,
//! inserts one synthesised midpoint.  Samples already in the history are
//! never re-smoothed.
//!
//! [`Interpolator::get_position_at`] answers "where was the device at `t`":
//! a linear blend of the bracketing pair when one exists, otherwise the
//! sample nearest in time.

use std::collections::{BTreeMap, VecDeque};

use arsync_types::{ArError, INTERPOLATED_KEY, PositionUpdate, WorldPosition};
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

/// Pairs further apart than this (milliseconds) get a synthesised midpoint.
pub const GAP_THRESHOLD_MS: i64 = 100;

#[derive(Debug)]
pub struct Interpolator {
    history: VecDeque<PositionUpdate>,
    max_history: usize,
}

impl Interpolator {
    /// `max_history` is raised to at least 2 so a bracketing pair can exist.
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(2);
        Self {
            history: VecDeque::with_capacity(max_history),
            max_history,
        }
    }

    /// Record `batch` and return it with midpoints inserted into large gaps.
    /// Batch order is preserved.
    pub fn interpolate(&mut self, batch: Vec<PositionUpdate>) -> Vec<PositionUpdate> {
        for update in &batch {
            self.remember(update.clone());
        }

        let gap = TimeDelta::milliseconds(GAP_THRESHOLD_MS);
        let mut out = Vec::with_capacity(batch.len() * 2);
        let mut iter = batch.into_iter().peekable();
        while let Some(current) = iter.next() {
            let gap_midpoint = iter
                .peek()
                .filter(|next| next.timestamp - current.timestamp > gap)
                .map(|next| blend(&current, next, 0.5));
            out.push(current);
            if let Some(mid) = gap_midpoint {
                out.push(mid);
            }
        }
        out
    }

    /// Position at `t`, blended from history.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::NoHistory`] only when nothing has been recorded.
    pub fn get_position_at(&self, t: DateTime<Utc>) -> Result<PositionUpdate, ArError> {
        if self.history.is_empty() {
            return Err(ArError::NoHistory);
        }

        for (a, b) in self.history.iter().zip(self.history.iter().skip(1)) {
            if a.timestamp <= t && t <= b.timestamp {
                let span = (b.timestamp - a.timestamp).num_microseconds().unwrap_or(0);
                if span == 0 {
                    return Ok(a.clone());
                }
                let into = (t - a.timestamp).num_microseconds().unwrap_or(0);
                return Ok(blend(a, b, into as f64 / span as f64));
            }
        }

        self.history
            .iter()
            .min_by_key(|u| (u.timestamp - t).abs())
            .cloned()
            .ok_or(ArError::NoHistory)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn remember(&mut self, update: PositionUpdate) {
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(update);
    }
}

/// Linear blend of two samples at ratio `t` (0 → `a`, 1 → `b`).
///
/// Rotation and identity fields are copied from `a`; world positions are
/// blended only when both are known.
fn blend(a: &PositionUpdate, b: &PositionUpdate, t: f64) -> PositionUpdate {
    let world_position = match (a.world_position, b.world_position) {
        (WorldPosition::Known(wa), WorldPosition::Known(wb)) => WorldPosition::Known(wa.lerp(&wb, t)),
        _ => WorldPosition::Unavailable,
    };
    let offset_us = ((b.timestamp - a.timestamp).num_microseconds().unwrap_or(0) as f64 * t) as i64;

    let mut metadata = BTreeMap::new();
    metadata.insert(INTERPOLATED_KEY.to_string(), "true".to_string());

    PositionUpdate {
        id: Uuid::new_v4(),
        session_id: a.session_id.clone(),
        device_id: a.device_id.clone(),
        update_type: a.update_type,
        ar_position: a.ar_position.lerp(&b.ar_position, t),
        world_position,
        rotation: a.rotation,
        timestamp: a.timestamp + TimeDelta::microseconds(offset_us),
        sequence: a.sequence,
        confidence: a.confidence + (b.confidence - a.confidence) * t,
        metadata,
    }
}
