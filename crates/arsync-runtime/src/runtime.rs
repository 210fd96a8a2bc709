//! [`ArRuntime`] – one process's worth of AR synchronisation.
//!
//! Wires the anchor store (SQLite or in-memory), the stream manager and the
//! sync engine together and exposes the session-level control surface.  The
//! canonical-model collaborators are supplied by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use arsync_memory::AnchorDb;
use arsync_middleware::{StreamManager, UpdateStream};
use arsync_reconcile::{BuildingModel, ChangeDetector, ChangeQueue, ConflictResolver, SyncEngine, SyncReport};
use arsync_spatial::{AnchorPersistence, AnchorStore, DriftCorrection, InMemoryAnchorPersistence, localize_with_anchors};
use arsync_types::{
    AnchorType, ArChange, ArError, ArPoint3D, ArRotation, ArSession, PositionUpdate,
    SpatialAnchor, SyncStatus, UpdateType, WorldPoint3D,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;

pub struct ArRuntime {
    config: Config,
    anchors: Arc<AnchorStore>,
    streams: StreamManager,
    sync: Arc<SyncEngine>,
}

impl ArRuntime {
    /// Build a runtime from `config`.  Anchors persist to SQLite when
    /// `anchor_db_path` is set, otherwise they live in memory.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: Config,
        detector: Arc<dyn ChangeDetector>,
        resolver: Arc<dyn ConflictResolver>,
        model: Arc<dyn BuildingModel>,
    ) -> Result<Self, ArError> {
        let persistence: Arc<dyn AnchorPersistence> = match &config.anchor_db_path {
            Some(path) => {
                info!(path = %path, "anchor persistence: sqlite");
                Arc::new(AnchorDb::open(path)?)
            }
            None => {
                info!("anchor persistence: in-memory");
                Arc::new(InMemoryAnchorPersistence::new())
            }
        };
        Ok(Self::with_persistence(config, persistence, detector, resolver, model))
    }

    pub fn with_persistence(
        config: Config,
        persistence: Arc<dyn AnchorPersistence>,
        detector: Arc<dyn ChangeDetector>,
        resolver: Arc<dyn ConflictResolver>,
        model: Arc<dyn BuildingModel>,
    ) -> Self {
        let sync = SyncEngine::new(
            Arc::new(ChangeQueue::new()),
            detector,
            resolver,
            model,
            config.sync.clone(),
        );
        Self {
            anchors: Arc::new(AnchorStore::new(persistence)),
            streams: StreamManager::new(config.stream.clone(), config.max_sessions),
            sync,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn anchors(&self) -> &Arc<AnchorStore> {
        &self.anchors
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    /// A session descriptor using the configured axis convention.
    pub fn new_session(
        &self,
        session_id: impl Into<String>,
        device_id: impl Into<String>,
        building_id: impl Into<String>,
    ) -> ArSession {
        ArSession::new(session_id, device_id, building_id, self.config.coordinate_system)
    }

    // ── Sessions ────────────────────────────────────────────────────────────

    /// Open a stream and a sync session for `session`, after loading the
    /// device's stored anchors.
    pub async fn start_session(&self, session: ArSession) -> Result<Arc<UpdateStream>, ArError> {
        let session_id = session.id.clone();
        let device_id = session.device_id.clone();
        let loaded = self.anchors.load_device(&device_id).await?;

        let stream = self.streams.create_stream(session).await?;
        if let Err(e) = self.sync.register_session(&session_id).await {
            // Roll back so the session is either fully open or not at all.
            if let Err(close_err) = self.streams.close_stream(&session_id).await {
                warn!(session_id = %session_id, error = %close_err, "rollback of stream failed");
            }
            return Err(e);
        }
        info!(session_id = %session_id, device_id = %device_id, anchors = loaded, "session started");
        Ok(stream)
    }

    /// Close the session's stream and stop its sync task.  Buffered updates
    /// are discarded; changes not yet synced stay queued.
    pub async fn end_session(&self, session_id: &str) -> Result<(), ArError> {
        self.streams.close_stream(session_id).await?;
        self.sync.unregister_session(session_id).await?;
        let pending = self.sync.queue().pending_count(session_id);
        if pending > 0 {
            warn!(session_id, pending, "session ended with unsynced changes");
        }
        info!(session_id, "session ended");
        Ok(())
    }

    // ── Telemetry ───────────────────────────────────────────────────────────

    pub async fn push_update(
        &self,
        session_id: &str,
        device_id: &str,
        update_type: UpdateType,
        ar_position: ArPoint3D,
        rotation: ArRotation,
        confidence: f64,
    ) -> Result<PositionUpdate, ArError> {
        self.streams
            .get_stream(session_id)
            .await?
            .push_update(device_id, update_type, ar_position, rotation, confidence)
            .await
    }

    pub async fn broadcast_to_device(&self, device_id: &str, update: &PositionUpdate) -> usize {
        self.streams.broadcast_to_device(device_id, update).await
    }

    // ── Changes ─────────────────────────────────────────────────────────────

    pub async fn record_change(&self, change: ArChange) -> Result<(), ArError> {
        self.sync.record_change(change).await
    }

    pub async fn sync_status(&self, session_id: &str) -> Result<SyncStatus, ArError> {
        self.sync.get_sync_status(session_id).await
    }

    /// Run a sync cycle now instead of waiting for the next tick.
    pub async fn sync_now(&self, session_id: &str) -> Result<SyncReport, ArError> {
        self.sync.sync_session(session_id).await
    }

    // ── Anchors ─────────────────────────────────────────────────────────────

    /// Place an anchor for the session's device and mark it active.
    pub async fn place_anchor(
        &self,
        session_id: &str,
        ar_position: ArPoint3D,
        world_position: WorldPoint3D,
        rotation: ArRotation,
        anchor_type: AnchorType,
    ) -> Result<SpatialAnchor, ArError> {
        let stream = self.streams.get_stream(session_id).await?;
        let anchor = self
            .anchors
            .create_anchor(stream.device_id(), ar_position, world_position, rotation, anchor_type)
            .await?;
        stream.add_active_anchor(anchor.id).await;
        Ok(anchor)
    }

    /// Estimate drift from the anchors the device currently sees and apply it.
    ///
    /// `observed` maps anchor IDs to where the device reports them now.  On
    /// success the session's transform is corrected, the matched anchors are
    /// re-recorded at their observed AR positions with the correction's
    /// confidence, and they become active on the session.
    ///
    /// The transform only moves once every matched anchor is stored.  If a
    /// store fails, anchors already re-recorded are put back and the session
    /// is left as it was, so a retry computes the same correction.
    pub async fn relocalize(
        &self,
        session_id: &str,
        observed: &HashMap<Uuid, ArPoint3D>,
    ) -> Result<DriftCorrection, ArError> {
        let stream = self.streams.get_stream(session_id).await?;
        let known = self.anchors.device_anchor_map(stream.device_id()).await;
        let correction = localize_with_anchors(observed, &known)?;

        let mut recorded: Vec<&SpatialAnchor> = Vec::new();
        for (id, position) in observed.iter() {
            let Some(previous) = known.get(id) else {
                continue;
            };
            if let Err(e) = self
                .anchors
                .update_anchor(*id, *position, correction.confidence)
                .await
            {
                self.restore_anchors(session_id, &recorded).await;
                return Err(e);
            }
            recorded.push(previous);
        }

        if let Err(e) = stream.apply_drift(&correction).await {
            self.restore_anchors(session_id, &recorded).await;
            return Err(e);
        }
        for anchor in &recorded {
            stream.add_active_anchor(anchor.id).await;
        }
        Ok(correction)
    }

    async fn restore_anchors(&self, session_id: &str, anchors: &[&SpatialAnchor]) {
        for anchor in anchors {
            if let Err(e) = self
                .anchors
                .update_anchor(anchor.id, anchor.ar_position, anchor.confidence)
                .await
            {
                warn!(session_id, anchor_id = %anchor.id, error = %e, "anchor restore failed");
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Close every stream and stop every sync task.  Buffered updates and
    /// unsynced changes are not flushed.
    pub async fn shutdown(&self) {
        self.streams.close_all().await;
        self.sync.close().await;
        info!("runtime shut down");
    }
}
