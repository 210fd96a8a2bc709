//! `arsync-spatial` – frame algebra for AR sessions.
//!
//! Relates what a device reports in its own AR frame to the building's world
//! frame, and keeps that relationship honest as tracking drifts.
//!
//! # Modules
//!
//! - [`transform`] – [`CoordinateTransform`][transform::CoordinateTransform]:
//!   one-anchor calibration plus a fixed per-device axis remap, converting
//!   points between the AR and world frames.
//! - [`anchors`] – [`AnchorStore`][anchors::AnchorStore]: in-memory index of
//!   [`SpatialAnchor`][arsync_types::SpatialAnchor]s backed by an
//!   [`AnchorPersistence`][anchors::AnchorPersistence] collaborator, with
//!   proximity queries.
//! - [`localization`] – [`localize_with_anchors`][localization::localize_with_anchors]:
//!   estimates AR-frame drift from the anchors currently in view.

pub mod anchors;
pub mod localization;
pub mod transform;

pub use anchors::{AnchorPersistence, AnchorStore, InMemoryAnchorPersistence};
pub use localization::{DriftCorrection, localize_with_anchors};
pub use transform::{AxisRemap, CoordinateTransform, Quaternion};
