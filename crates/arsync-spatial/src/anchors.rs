//! Spatial anchor store.
//!
//! [`AnchorStore`] keeps an in-memory index of every [`SpatialAnchor`] known
//! to the process and writes each creation or drift update through to an
//! [`AnchorPersistence`] collaborator.  Anchors are never deleted here.
//!
//! The index sits behind a single [`RwLock`]: proximity and per-device
//! queries take the read side.  Writers (create, update, load) are
//! serialised by a separate gate held across the whole read-modify-persist-
//! write sequence, so persistence is awaited without blocking readers.

use std::collections::HashMap;
use std::sync::Arc;

use arsync_types::{AnchorType, ArError, ArPoint3D, ArRotation, SpatialAnchor, WorldPoint3D};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Persistence contract
// ────────────────────────────────────────────────────────────────────────────

/// Durable storage for anchors, supplied by the host application.
///
/// # Contract
///
/// * `load_anchors` – every anchor previously saved for `device_id`.
/// * `save_anchor` – insert or overwrite the anchor with the same ID.
#[async_trait]
pub trait AnchorPersistence: Send + Sync {
    async fn load_anchors(&self, device_id: &str) -> Result<Vec<SpatialAnchor>, ArError>;

    async fn save_anchor(&self, anchor: &SpatialAnchor) -> Result<(), ArError>;
}

/// Process-local [`AnchorPersistence`], for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryAnchorPersistence {
    anchors: RwLock<HashMap<Uuid, SpatialAnchor>>,
}

impl InMemoryAnchorPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of anchors saved so far.
    pub async fn len(&self) -> usize {
        self.anchors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.anchors.read().await.is_empty()
    }
}

#[async_trait]
impl AnchorPersistence for InMemoryAnchorPersistence {
    async fn load_anchors(&self, device_id: &str) -> Result<Vec<SpatialAnchor>, ArError> {
        Ok(self
            .anchors
            .read()
            .await
            .values()
            .filter(|a| a.device_id == device_id)
            .cloned()
            .collect())
    }

    async fn save_anchor(&self, anchor: &SpatialAnchor) -> Result<(), ArError> {
        self.anchors.write().await.insert(anchor.id, anchor.clone());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AnchorStore
// ────────────────────────────────────────────────────────────────────────────

/// In-memory anchor index with write-through persistence.
pub struct AnchorStore {
    anchors: RwLock<HashMap<Uuid, SpatialAnchor>>,
    write_gate: Mutex<()>,
    persistence: Arc<dyn AnchorPersistence>,
}

impl AnchorStore {
    pub fn new(persistence: Arc<dyn AnchorPersistence>) -> Self {
        Self {
            anchors: RwLock::new(HashMap::new()),
            write_gate: Mutex::new(()),
            persistence,
        }
    }

    /// Allocate a new anchor, persist it, then index it.
    ///
    /// New anchors start at full confidence.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::External`] if persistence fails; the anchor is not
    /// indexed in that case.
    pub async fn create_anchor(
        &self,
        device_id: &str,
        ar_position: ArPoint3D,
        world_position: WorldPoint3D,
        rotation: ArRotation,
        anchor_type: AnchorType,
    ) -> Result<SpatialAnchor, ArError> {
        let _writer = self.write_gate.lock().await;
        let now = Utc::now();
        let anchor = SpatialAnchor {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            ar_position,
            world_position,
            rotation,
            anchor_type,
            confidence: 1.0,
            created_at: now,
            updated_at: now,
        };

        self.persist(&anchor).await?;
        self.anchors.write().await.insert(anchor.id, anchor.clone());
        info!(anchor_id = %anchor.id, device_id, ?anchor_type, "anchor created");
        Ok(anchor)
    }

    /// Overwrite an anchor's AR position and confidence after drift
    /// correction.  Confidence is clamped to `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::NotFound`] for an unknown ID, or
    /// [`ArError::External`] if persistence fails (the index keeps the
    /// previous value).
    pub async fn update_anchor(
        &self,
        id: Uuid,
        new_ar_position: ArPoint3D,
        confidence: f64,
    ) -> Result<SpatialAnchor, ArError> {
        let _writer = self.write_gate.lock().await;
        let mut updated = self
            .anchors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ArError::not_found("anchor", id.to_string()))?;
        updated.ar_position = new_ar_position;
        updated.confidence = confidence.clamp(0.0, 1.0);
        updated.updated_at = Utc::now();

        self.persist(&updated).await?;
        self.anchors.write().await.insert(id, updated.clone());
        debug!(anchor_id = %id, confidence = updated.confidence, "anchor updated");
        Ok(updated)
    }

    pub async fn get_anchor(&self, id: Uuid) -> Result<SpatialAnchor, ArError> {
        self.anchors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| ArError::not_found("anchor", id.to_string()))
    }

    /// Anchors whose AR position lies within `radius` metres of `point`,
    /// nearest first.
    pub async fn find_nearby_anchors(&self, point: &ArPoint3D, radius: f64) -> Vec<SpatialAnchor> {
        let mut nearby: Vec<(f64, SpatialAnchor)> = self
            .anchors
            .read()
            .await
            .values()
            .filter_map(|a| {
                let d = a.ar_position.distance(point);
                (d <= radius).then(|| (d, a.clone()))
            })
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearby.into_iter().map(|(_, a)| a).collect()
    }

    /// Every indexed anchor placed by `device_id`.
    pub async fn get_device_anchors(&self, device_id: &str) -> Vec<SpatialAnchor> {
        self.anchors
            .read()
            .await
            .values()
            .filter(|a| a.device_id == device_id)
            .cloned()
            .collect()
    }

    /// The device's anchors keyed by ID, the shape localization expects.
    pub async fn device_anchor_map(&self, device_id: &str) -> HashMap<Uuid, SpatialAnchor> {
        self.get_device_anchors(device_id)
            .await
            .into_iter()
            .map(|a| (a.id, a))
            .collect()
    }

    /// Load a device's anchors from persistence into the index.  Anchors
    /// already indexed are overwritten by the persisted copy.  Returns the
    /// number loaded.
    pub async fn load_device(&self, device_id: &str) -> Result<usize, ArError> {
        let _writer = self.write_gate.lock().await;
        let loaded = self
            .persistence
            .load_anchors(device_id)
            .await
            .map_err(|e| ArError::external("anchor persistence", format!("load for {device_id}: {e}")))?;
        let count = loaded.len();
        let mut anchors = self.anchors.write().await;
        for anchor in loaded {
            anchors.insert(anchor.id, anchor);
        }
        info!(device_id, count, "anchors loaded from persistence");
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.anchors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.anchors.read().await.is_empty()
    }

    async fn persist(&self, anchor: &SpatialAnchor) -> Result<(), ArError> {
        self.persistence.save_anchor(anchor).await.map_err(|e| {
            warn!(anchor_id = %anchor.id, error = %e, "anchor persistence failed");
            ArError::external("anchor persistence", format!("save {}: {e}", anchor.id))
        })
    }
}
