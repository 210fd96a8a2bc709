//! Dead-reckoning position prediction.
//!
//! [`Predictor::predict_position`] averages per-axis velocity over the last
//! [`VELOCITY_WINDOW`] transitions with a non-zero duration and extrapolates
//! linearly from the newest sample.  It is not a noise filter: jitter in the
//! history goes straight into the estimate.

use std::collections::VecDeque;
use std::time::Duration;

use arsync_types::{ArError, PositionUpdate, WorldPosition};
use chrono::TimeDelta;

/// Transitions averaged into the velocity estimate.
pub const VELOCITY_WINDOW: usize = 5;

/// Metadata key set on extrapolated samples.
pub const PREDICTED_KEY: &str = "predicted";

#[derive(Debug)]
pub struct Predictor {
    history: VecDeque<PositionUpdate>,
    max_history: usize,
}

impl Predictor {
    /// `max_history` is raised to at least 2.
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(2);
        Self {
            history: VecDeque::with_capacity(max_history),
            max_history,
        }
    }

    pub fn record(&mut self, update: PositionUpdate) {
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history.push_back(update);
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Extrapolate the newest sample `dt` into the future.
    ///
    /// With a single sample (or only zero-duration transitions) the newest
    /// sample is returned unchanged.  World positions are extrapolated only
    /// from transitions whose endpoints both have a known world position;
    /// an unavailable world position stays unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::InsufficientHistory`] when nothing has been recorded.
    pub fn predict_position(&self, dt: Duration) -> Result<PositionUpdate, ArError> {
        let latest = self.history.back().ok_or(ArError::InsufficientHistory)?;
        if self.history.len() == 1 {
            return Ok(latest.clone());
        }

        // Newest transitions first.
        let transitions: Vec<(&PositionUpdate, &PositionUpdate, f64)> = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .rev()
            .filter_map(|(a, b)| {
                let secs = (b.timestamp - a.timestamp).num_microseconds()? as f64 / 1e6;
                (secs > 0.0).then_some((a, b, secs))
            })
            .take(VELOCITY_WINDOW)
            .collect();

        if transitions.is_empty() {
            return Ok(latest.clone());
        }

        let n = transitions.len() as f64;
        let ar_velocity = transitions.iter().fold([0.0; 3], |acc, (a, b, secs)| {
            [
                acc[0] + (b.ar_position.x - a.ar_position.x) / secs / n,
                acc[1] + (b.ar_position.y - a.ar_position.y) / secs / n,
                acc[2] + (b.ar_position.z - a.ar_position.z) / secs / n,
            ]
        });

        let world_steps: Vec<[f64; 3]> = transitions
            .iter()
            .filter_map(|(a, b, secs)| {
                let (wa, wb) = (a.world_position.known()?, b.world_position.known()?);
                Some([(wb.x - wa.x) / secs, (wb.y - wa.y) / secs, (wb.z - wa.z) / secs])
            })
            .collect();

        let horizon = dt.as_secs_f64();
        let mut predicted = latest.clone();
        predicted.ar_position.x += ar_velocity[0] * horizon;
        predicted.ar_position.y += ar_velocity[1] * horizon;
        predicted.ar_position.z += ar_velocity[2] * horizon;

        if let (WorldPosition::Known(mut w), false) = (latest.world_position, world_steps.is_empty()) {
            let m = world_steps.len() as f64;
            for step in &world_steps {
                w.x += step[0] / m * horizon;
                w.y += step[1] / m * horizon;
                w.z += step[2] / m * horizon;
            }
            predicted.world_position = WorldPosition::Known(w);
        }

        predicted.timestamp = latest.timestamp
            + TimeDelta::from_std(dt).unwrap_or(TimeDelta::zero());
        predicted
            .metadata
            .insert(PREDICTED_KEY.to_string(), "true".to_string());
        Ok(predicted)
    }
}
