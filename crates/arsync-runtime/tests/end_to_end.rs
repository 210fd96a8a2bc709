//! Full path: telemetry in, batches out, anchors relocalize the session,
//! AR-observed changes land in the building model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arsync_middleware::ChannelSubscriber;
use arsync_reconcile::{BuildingModel, ChangeDetector, ConflictResolver, Resolution};
use arsync_runtime::{ArRuntime, Config};
use arsync_spatial::{AnchorPersistence, InMemoryAnchorPersistence};
use arsync_types::{
    AnchorType, ArChange, ArError, ArPoint3D, ArRotation, ChangeType, Envelope, EquipmentState,
    SpatialAnchor, SyncState, UpdateType, WorldPoint3D,
};
use async_trait::async_trait;
use tokio::time::timeout;
use uuid::Uuid;

struct AllMaterial;

#[async_trait]
impl ChangeDetector for AllMaterial {
    async fn detect(&self, changes: &[ArChange]) -> Result<Vec<ArChange>, ArError> {
        Ok(changes.to_vec())
    }
}

struct AcceptAll;

#[async_trait]
impl ConflictResolver for AcceptAll {
    async fn resolve(
        &self,
        _change: &ArChange,
        _current: Option<&EquipmentState>,
    ) -> Result<Resolution, ArError> {
        Ok(Resolution::Accept)
    }
}

#[derive(Default)]
struct Model {
    equipment: Mutex<HashMap<String, EquipmentState>>,
}

#[async_trait]
impl BuildingModel for Model {
    async fn current(&self, equipment_id: &str) -> Result<Option<EquipmentState>, ArError> {
        Ok(self.equipment.lock().unwrap().get(equipment_id).cloned())
    }

    async fn apply(&self, change: &ArChange) -> Result<(), ArError> {
        let mut equipment = self.equipment.lock().unwrap();
        match change.change_type {
            ChangeType::Remove => {
                equipment.remove(&change.equipment_id);
            }
            _ => {
                let entry = equipment
                    .entry(change.equipment_id.clone())
                    .or_insert_with(|| EquipmentState {
                        equipment_id: change.equipment_id.clone(),
                        position: None,
                        attributes: Default::default(),
                    });
                if change.new_position.is_some() {
                    entry.position = change.new_position;
                }
                entry.attributes.extend(change.attributes.clone());
            }
        }
        Ok(())
    }
}

/// Fails exactly the `fail_on`-th save (1-based); every other save succeeds.
struct FlakyPersistence {
    inner: InMemoryAnchorPersistence,
    saves: AtomicUsize,
    fail_on: usize,
}

impl FlakyPersistence {
    fn failing_save(fail_on: usize) -> Self {
        Self {
            inner: InMemoryAnchorPersistence::new(),
            saves: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl AnchorPersistence for FlakyPersistence {
    async fn load_anchors(&self, device_id: &str) -> Result<Vec<SpatialAnchor>, ArError> {
        self.inner.load_anchors(device_id).await
    }

    async fn save_anchor(&self, anchor: &SpatialAnchor) -> Result<(), ArError> {
        if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(ArError::external("anchor persistence", "disk full"));
        }
        self.inner.save_anchor(anchor).await
    }
}

fn config(db: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.stream.flush_interval_ms = 20;
    cfg.sync.interval_ms = 60_000;
    cfg.anchor_db_path = Some(db.to_string_lossy().into_owned());
    cfg
}

fn runtime(cfg: Config, model: Arc<Model>) -> Result<ArRuntime, ArError> {
    ArRuntime::new(cfg, Arc::new(AllMaterial), Arc::new(AcceptAll), model)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("anchors.db");
    let model = Arc::new(Model::default());
    let rt = runtime(config(&db), model.clone())?;

    let stream = rt
        .start_session(rt.new_session("walk-1", "ipad-7", "hq"))
        .await?;
    let (sub, mut frames) = ChannelSubscriber::new("viewer", 32);
    stream.subscribe(Arc::new(sub)).await?;
    stream
        .calibrate(ArPoint3D::origin(), WorldPoint3D::new(100.0, 200.0, 10.0), ArRotation::identity())
        .await?;

    // Buffered telemetry arrives as a batch with world positions.
    rt.push_update("walk-1", "ipad-7", UpdateType::Position, ArPoint3D::new(1.0, 2.0, -3.0), ArRotation::identity(), 0.9)
        .await?;
    let batch = match timeout(Duration::from_secs(2), frames.recv()).await?.ok_or("closed")? {
        Envelope::PositionBatch(batch) => batch,
        other => return Err(format!("expected a batch, got {}", other.kind()).into()),
    };
    let world = batch[0].world_position.known().ok_or("world unknown")?;
    assert!((world.x - 101.0).abs() < 1e-9 && (world.y - 203.0).abs() < 1e-9 && (world.z - 12.0).abs() < 1e-9);

    // Gestures skip the buffer.
    rt.push_update("walk-1", "ipad-7", UpdateType::Gesture, ArPoint3D::origin(), ArRotation::identity(), 1.0)
        .await?;
    let frame = timeout(Duration::from_secs(2), frames.recv()).await?.ok_or("closed")?;
    assert_eq!(frame.kind(), "position_update");

    // Three anchors, all seen shifted by (-0.1, -0.1, 0).
    let mut observed = HashMap::new();
    for (x, y, z) in [(1.0, 0.0, 0.0), (0.0, 2.0, 0.0), (0.0, 0.0, 3.0)] {
        let ar = ArPoint3D::new(x, y, z);
        let anchor = rt
            .place_anchor("walk-1", ar, WorldPoint3D::new(x, y, z), ArRotation::identity(), AnchorType::User)
            .await?;
        observed.insert(anchor.id, ar.translate(&ArPoint3D::new(-0.1, -0.1, 0.0)));
    }
    let correction = rt.relocalize("walk-1", &observed).await?;
    assert!((correction.translation.x + 0.1).abs() < 1e-9);
    assert!((correction.translation.y + 0.1).abs() < 1e-9);
    assert!(correction.confidence >= 0.9);
    assert_eq!(stream.session().await.active_anchors.len(), 3);

    // The same AR point now maps to a world point shifted by the drift.
    let after = rt
        .push_update("walk-1", "ipad-7", UpdateType::Interact, ArPoint3D::new(0.9, 1.9, -3.0), ArRotation::identity(), 1.0)
        .await?;
    let world = after.world_position.known().ok_or("world unknown")?;
    assert!((world.x - 101.0).abs() < 1e-9);

    // Changes reach the model on a manual cycle.
    rt.record_change(
        ArChange::new("walk-1", "vav-12", ChangeType::Move)
            .with_positions(None, Some(WorldPoint3D::new(12.0, 4.0, 3.0))),
    )
    .await?;
    rt.record_change(
        ArChange::new("walk-1", "ahu-2", ChangeType::Add)
            .with_positions(None, Some(WorldPoint3D::new(1.0, 1.0, 0.0))),
    )
    .await?;
    assert_eq!(rt.sync_status("walk-1").await?.pending_changes, 2);

    let report = rt.sync_now("walk-1").await?;
    assert_eq!(report.applied, 2);
    let status = rt.sync_status("walk-1").await?;
    assert_eq!(status.state, SyncState::Idle);
    assert_eq!(status.pending_changes, 0);
    assert_eq!(
        model.equipment.lock().unwrap().get("vav-12").and_then(|e| e.position),
        Some(WorldPoint3D::new(12.0, 4.0, 3.0))
    );

    assert_eq!(rt.broadcast_to_device("ipad-7", &after).await, 1);

    rt.end_session("walk-1").await?;
    let err = rt
        .push_update("walk-1", "ipad-7", UpdateType::Position, ArPoint3D::origin(), ArRotation::identity(), 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ArError::NotFound { .. }));
    assert!(rt.sync_status("walk-1").await.is_err());

    rt.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn anchors_survive_a_restart() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db = dir.path().join("anchors.db");

    let placed = {
        let rt = runtime(config(&db), Arc::new(Model::default()))?;
        rt.start_session(rt.new_session("walk-1", "ipad-7", "hq")).await?;
        let anchor = rt
            .place_anchor("walk-1", ArPoint3D::new(1.0, 0.0, 0.0), WorldPoint3D::new(5.0, 5.0, 0.0), ArRotation::identity(), AnchorType::System)
            .await?;
        rt.shutdown().await;
        anchor
    };

    let rt = runtime(config(&db), Arc::new(Model::default()))?;
    assert!(rt.anchors().is_empty().await);
    rt.start_session(rt.new_session("walk-2", "ipad-7", "hq")).await?;
    let reloaded = rt.anchors().get_anchor(placed.id).await?;
    assert_eq!(reloaded.world_position, placed.world_position);
    assert!(rt.anchors().get_anchor(Uuid::new_v4()).await.is_err());
    rt.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn duplicate_sessions_and_cap() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cfg = config(&dir.path().join("anchors.db"));
    cfg.max_sessions = 1;
    let rt = runtime(cfg, Arc::new(Model::default()))?;

    rt.start_session(rt.new_session("a", "ipad-1", "hq")).await?;
    assert!(matches!(
        rt.start_session(rt.new_session("a", "ipad-1", "hq")).await,
        Err(ArError::AlreadyExists { .. })
    ));
    assert!(matches!(
        rt.start_session(rt.new_session("b", "ipad-2", "hq")).await,
        Err(ArError::CapacityExceeded { limit: 1 })
    ));
    // A failed start leaves no sync session behind.
    assert!(rt.sync_status("b").await.is_err());
    rt.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_relocalize_leaves_session_untouched() -> Result<(), Box<dyn std::error::Error>> {
    // Saves 1-3 place the anchors, save 4 re-records one anchor, save 5 fails.
    let persistence = Arc::new(FlakyPersistence::failing_save(5));
    let rt = ArRuntime::with_persistence(
        Config::default(),
        persistence,
        Arc::new(AllMaterial),
        Arc::new(AcceptAll),
        Arc::new(Model::default()),
    );
    let stream = rt.start_session(rt.new_session("walk-1", "ipad-7", "hq")).await?;
    stream
        .calibrate(ArPoint3D::origin(), WorldPoint3D::new(100.0, 200.0, 10.0), ArRotation::identity())
        .await?;

    let mut placed = Vec::new();
    let mut observed = HashMap::new();
    for (x, y, z) in [(1.0, 0.0, 0.0), (0.0, 2.0, 0.0), (0.0, 0.0, 3.0)] {
        let ar = ArPoint3D::new(x, y, z);
        let anchor = rt
            .place_anchor("walk-1", ar, WorldPoint3D::new(x, y, z), ArRotation::identity(), AnchorType::User)
            .await?;
        observed.insert(anchor.id, ar.translate(&ArPoint3D::new(-0.1, -0.1, 0.0)));
        placed.push(anchor);
    }
    let before = stream.transform().await.ar_to_world(&ArPoint3D::origin())?;

    let err = rt.relocalize("walk-1", &observed).await.unwrap_err();
    assert!(matches!(err, ArError::External { .. }));
    assert_eq!(stream.transform().await.ar_to_world(&ArPoint3D::origin())?, before);
    for anchor in &placed {
        assert_eq!(rt.anchors().get_anchor(anchor.id).await?.ar_position, anchor.ar_position);
    }

    // A retry sees the same drift and applies it once.
    let correction = rt.relocalize("walk-1", &observed).await?;
    assert!((correction.translation.x + 0.1).abs() < 1e-9);
    assert!((correction.translation.y + 0.1).abs() < 1e-9);
    let after = stream.transform().await.ar_to_world(&ArPoint3D::new(-0.1, -0.1, 0.0))?;
    assert!((after.x - before.x).abs() < 1e-9 && (after.y - before.y).abs() < 1e-9);

    rt.shutdown().await;
    Ok(())
}
