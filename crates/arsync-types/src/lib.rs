//! `arsync-types` – shared vocabulary for the AR synchronisation core.
//!
//! Every other crate in the workspace speaks in terms of the values defined
//! here: the two coordinate frames ([`ArPoint3D`] for the device-local AR
//! frame, [`WorldPoint3D`] for the building frame), telemetry
//! ([`PositionUpdate`]), reference points ([`SpatialAnchor`]), AR-observed
//! model edits ([`ArChange`]) and the per-session [`SyncStatus`].
//!
//! AR-frame and world-frame points are deliberately distinct types: the only
//! way to turn one into the other is through a calibrated coordinate
//! transform (see `arsync-spatial`).

pub mod envelope;
pub mod error;

pub use envelope::Envelope;
pub use error::ArError;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Points and rotations
// ────────────────────────────────────────────────────────────────────────────

/// A point in the device-local AR frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ArPoint3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ArPoint3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The AR-frame origin (where the device started tracking).
    pub fn origin() -> Self {
        Self::default()
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Self) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Component-wise `self - other`.
    pub fn offset_from(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Component-wise `self + delta`.
    pub fn translate(&self, delta: &Self) -> Self {
        Self::new(self.x + delta.x, self.y + delta.y, self.z + delta.z)
    }

    /// Linear blend: `t = 0` yields `self`, `t = 1` yields `other`.
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }
}

/// A point in the building's world frame (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct WorldPoint3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl WorldPoint3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Linear blend: `t = 0` yields `self`, `t = 1` yields `other`.
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }
}

/// Device orientation as a quaternion (x, y, z, w).
///
/// Expected to be unit length, but nothing on the ingest path enforces it.
/// Calibration normalises the rotation it stores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArRotation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl ArRotation {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Unit-length copy, or `None` for a zero (or non-finite) quaternion.
    pub fn normalized(&self) -> Option<Self> {
        let n = self.norm();
        if n == 0.0 || !n.is_finite() {
            return None;
        }
        Some(Self::new(self.x / n, self.y / n, self.z / n, self.w / n))
    }
}

impl Default for ArRotation {
    fn default() -> Self {
        Self::identity()
    }
}

/// Device axis convention.  Each variant maps to a fixed permutation/sign
/// table between the device's AR axes and the building's world axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSystem {
    /// Right-handed, +Y up, −Z forward (ARKit).
    #[default]
    ArKit,
    /// Right-handed, +Y up, −Z forward (ARCore).
    ArCore,
    /// Left-handed, +Y up, +Z forward (Unity).
    Unity,
    /// Already in world convention: +Z is altitude.
    ZUp,
}

/// Tracking quality reported by the device's tracking subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackingQuality {
    NotAvailable,
    Limited,
    #[default]
    Normal,
}

// ────────────────────────────────────────────────────────────────────────────
// Anchors
// ────────────────────────────────────────────────────────────────────────────

/// Who placed an anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnchorType {
    User,
    System,
}

/// A reference point whose position is known in both frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpatialAnchor {
    pub id: Uuid,
    pub device_id: String,
    pub ar_position: ArPoint3D,
    pub world_position: WorldPoint3D,
    pub rotation: ArRotation,
    pub anchor_type: AnchorType,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry
// ────────────────────────────────────────────────────────────────────────────

/// Kind of telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Position,
    Rotation,
    Interact,
    Gesture,
    Anchor,
    Tracking,
}

impl UpdateType {
    /// Latency-sensitive kinds skip the buffer and go straight to subscribers.
    pub fn is_immediate(&self) -> bool {
        matches!(self, UpdateType::Interact | UpdateType::Gesture)
    }
}

/// World-frame position attached to a [`PositionUpdate`].
///
/// `Unavailable` is carried when the stream could not convert the AR
/// position (e.g. the session has not been calibrated yet).  Downstream
/// spatial math must not treat it as the world origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorldPosition {
    Known(WorldPoint3D),
    Unavailable,
}

impl WorldPosition {
    pub fn known(&self) -> Option<WorldPoint3D> {
        match self {
            WorldPosition::Known(p) => Some(*p),
            WorldPosition::Unavailable => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, WorldPosition::Known(_))
    }
}

/// One telemetry sample after it has passed through an update stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PositionUpdate {
    pub id: Uuid,
    pub session_id: String,
    pub device_id: String,
    pub update_type: UpdateType,
    pub ar_position: ArPoint3D,
    pub world_position: WorldPosition,
    pub rotation: ArRotation,
    pub timestamp: DateTime<Utc>,
    /// Monotonic per stream, starting at 1.  Synthesised (interpolated)
    /// samples repeat the sequence of the sample they were derived from.
    pub sequence: u64,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Metadata key set on samples synthesised by interpolation.
pub const INTERPOLATED_KEY: &str = "interpolated";

impl PositionUpdate {
    /// `true` when this sample was produced by interpolation rather than
    /// reported by a device.
    pub fn is_synthesized(&self) -> bool {
        self.metadata.get(INTERPOLATED_KEY).is_some_and(|v| v == "true")
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sessions
// ────────────────────────────────────────────────────────────────────────────

/// A live AR session: one device walking one building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArSession {
    pub id: String,
    pub device_id: String,
    pub building_id: String,
    pub coordinate_system: CoordinateSystem,
    pub tracking_quality: TrackingQuality,
    pub active_anchors: BTreeSet<Uuid>,
    pub started_at: DateTime<Utc>,
}

impl ArSession {
    pub fn new(
        id: impl Into<String>,
        device_id: impl Into<String>,
        building_id: impl Into<String>,
        coordinate_system: CoordinateSystem,
    ) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            building_id: building_id.into(),
            coordinate_system,
            tracking_quality: TrackingQuality::default(),
            active_anchors: BTreeSet::new(),
            started_at: Utc::now(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Changes and synchronisation
// ────────────────────────────────────────────────────────────────────────────

/// Kind of building-model edit observed through AR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Move,
    Remove,
    Reclassify,
}

impl ChangeType {
    /// Additions and removals jump the queue.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, ChangeType::Add | ChangeType::Remove)
    }
}

/// An AR-observed discrepancy against the canonical building model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ArChange {
    pub id: String,
    pub session_id: String,
    pub equipment_id: String,
    pub change_type: ChangeType,
    pub old_position: Option<WorldPoint3D>,
    pub new_position: Option<WorldPoint3D>,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ArChange {
    /// Build a change with a fresh ID, the current time and full confidence.
    pub fn new(
        session_id: impl Into<String>,
        equipment_id: impl Into<String>,
        change_type: ChangeType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            equipment_id: equipment_id.into(),
            change_type,
            old_position: None,
            new_position: None,
            timestamp: Utc::now(),
            confidence: 1.0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_positions(
        mut self,
        old_position: Option<WorldPoint3D>,
        new_position: Option<WorldPoint3D>,
    ) -> Self {
        self.old_position = old_position;
        self.new_position = new_position;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Check the fields every change must carry before it may be queued.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::Validation`] naming the first missing or invalid field.
    pub fn validate(&self) -> Result<(), ArError> {
        if self.id.trim().is_empty() {
            return Err(ArError::Validation("change id is required".to_string()));
        }
        if self.session_id.trim().is_empty() {
            return Err(ArError::Validation("session_id is required".to_string()));
        }
        if self.equipment_id.trim().is_empty() {
            return Err(ArError::Validation("equipment_id is required".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ArError::Validation(format!(
                "confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        match self.change_type {
            ChangeType::Add | ChangeType::Move if self.new_position.is_none() => Err(
                ArError::Validation(format!("{:?} change requires new_position", self.change_type)),
            ),
            ChangeType::Reclassify if self.attributes.is_empty() => Err(ArError::Validation(
                "Reclassify change requires at least one attribute".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Current value of one equipment item in the canonical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EquipmentState {
    pub equipment_id: String,
    pub position: Option<WorldPoint3D>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Where a session's sync loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    /// The last cycle aborted on a collaborator failure.  The next cycle
    /// starts normally.
    Error,
}

/// Per-session synchronisation status.  Recomputed every cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyncStatus {
    pub session_id: String,
    pub state: SyncState,
    pub pending_changes: usize,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Most recent failures, oldest first.
    pub errors: Vec<String>,
    pub applied_total: u64,
    pub rejected_total: u64,
}

impl SyncStatus {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: SyncState::Idle,
            pending_changes: 0,
            last_sync_at: None,
            errors: Vec::new(),
            applied_total: 0,
            rejected_total: 0,
        }
    }
}
