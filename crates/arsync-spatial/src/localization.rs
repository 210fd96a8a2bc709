//! Anchor-based drift estimation.
//!
//! AR tracking accumulates error over a session.  When anchors with known
//! AR positions come back into view, the difference between where the device
//! now reports them and where they were recorded measures that drift.
//!
//! [`localize_with_anchors`] takes the per-anchor offsets
//! `observed − known.ar_position`, returns their centroid as the correction,
//! and scores it by how well the offsets agree:
//!
//! ```text
//! rms        = sqrt(mean(|offset_i − centroid|²))
//! confidence = 1 / (1 + rms / DRIFT_SPREAD_SCALE)
//! ```
//!
//! Identical offsets give confidence 1; confidence falls monotonically as
//! the offsets scatter.  Three or more non-collinear anchors are recommended
//! but not required.

use std::collections::HashMap;

use arsync_types::{ArError, ArPoint3D, SpatialAnchor};
use tracing::{debug, warn};
use uuid::Uuid;

/// Offset spread (metres RMS) at which confidence drops to one half.
pub const DRIFT_SPREAD_SCALE: f64 = 0.05;

/// Anchors needed before a correction is considered well-conditioned.
pub const RECOMMENDED_ANCHORS: usize = 3;

/// Estimated AR-frame drift.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCorrection {
    /// Centroid of `observed − known` over the matched anchors.
    pub translation: ArPoint3D,
    /// In `(0, 1]`; higher when the per-anchor offsets agree.
    pub confidence: f64,
    pub anchors_used: usize,
    /// RMS distance of the per-anchor offsets from `translation`.
    pub rms_residual: f64,
}

/// Estimate drift from the anchors present in both `observed` and `known`.
///
/// # Errors
///
/// Returns [`ArError::InsufficientAnchors`] when no anchor ID appears in
/// both maps.
pub fn localize_with_anchors(
    observed: &HashMap<Uuid, ArPoint3D>,
    known: &HashMap<Uuid, SpatialAnchor>,
) -> Result<DriftCorrection, ArError> {
    let offsets: Vec<ArPoint3D> = observed
        .iter()
        .filter_map(|(id, seen)| known.get(id).map(|anchor| seen.offset_from(&anchor.ar_position)))
        .collect();

    if offsets.is_empty() {
        return Err(ArError::InsufficientAnchors);
    }
    if offsets.len() < RECOMMENDED_ANCHORS {
        warn!(
            anchors = offsets.len(),
            "localizing with fewer anchors than recommended"
        );
    }

    let n = offsets.len() as f64;
    let sum = offsets
        .iter()
        .fold(ArPoint3D::origin(), |acc, o| acc.translate(o));
    let centroid = ArPoint3D::new(sum.x / n, sum.y / n, sum.z / n);

    let mean_sq = offsets
        .iter()
        .map(|o| o.distance(&centroid).powi(2))
        .sum::<f64>()
        / n;
    let rms = mean_sq.sqrt();
    let confidence = 1.0 / (1.0 + rms / DRIFT_SPREAD_SCALE);

    debug!(
        anchors = offsets.len(),
        dx = centroid.x,
        dy = centroid.y,
        dz = centroid.z,
        rms,
        confidence,
        "drift estimated"
    );

    Ok(DriftCorrection {
        translation: centroid,
        confidence,
        anchors_used: offsets.len(),
        rms_residual: rms,
    })
}
