//! [`UpdateStream`] – the per-session telemetry pipeline.
//!
//! ```text
//! push_update ─► transform ─► predictor ─┬─► (Interact/Gesture) ─► subscribers, one by one
//!                                        └─► buffer ─► interpolator ─► subscribers, batched
//! ```
//!
//! The buffer is drained when it fills, and by a periodic task every
//! `flush_interval` even without new input.  Subscribers are never called
//! with a stream lock held: the subscriber links are copied out first and
//! each delivery goes into that subscriber's bounded queue.
//!
//! # Closing
//!
//! [`UpdateStream::close`] stops the periodic task, waits for it to exit and
//! **discards** whatever is still buffered.  Callers that need the tail of a
//! session should call [`UpdateStream::flush_now`] before closing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;

use arsync_spatial::{CoordinateTransform, DriftCorrection};
use arsync_types::{
    ArError, ArPoint3D, ArRotation, ArSession, PositionUpdate, TrackingQuality, UpdateType,
    WorldPoint3D, WorldPosition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::buffer::UpdateBuffer;
use crate::interpolator::Interpolator;
use crate::predictor::Predictor;
use crate::subscriber::{Delivery, Subscriber, SubscriberHandle, SubscriberLink};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

fn default_buffer_capacity() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    50
}

fn default_interpolation_history() -> usize {
    1000
}

fn default_prediction_history() -> usize {
    100
}

fn default_subscriber_queue() -> usize {
    64
}

/// Tuning shared by every stream a manager opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Buffered updates that force a flush.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Upper bound on how long an update may sit in the buffer.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_interpolation_history")]
    pub interpolation_history: usize,

    #[serde(default = "default_prediction_history")]
    pub prediction_history: usize,

    /// Per-subscriber queue depth before deliveries are dropped.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

impl StreamConfig {
    /// Flush interval, never shorter than one millisecond.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            flush_interval_ms: default_flush_interval_ms(),
            interpolation_history: default_interpolation_history(),
            prediction_history: default_prediction_history(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

/// Counters since the stream started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub pushed: u64,
    pub batches_flushed: u64,
    pub immediate_deliveries: u64,
    /// Deliveries discarded because a subscriber's queue was full.
    pub dropped_deliveries: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal state
// ────────────────────────────────────────────────────────────────────────────

struct StreamState {
    sequence: u64,
    buffer: UpdateBuffer,
    interpolator: Interpolator,
    predictor: Predictor,
}

impl StreamState {
    fn drain(&mut self) -> Vec<PositionUpdate> {
        let batch = self.buffer.flush();
        if batch.is_empty() {
            return batch;
        }
        self.interpolator.interpolate(batch)
    }
}

#[derive(Default)]
struct Counters {
    pushed: AtomicU64,
    batches_flushed: AtomicU64,
    immediate_deliveries: AtomicU64,
    dropped: Arc<AtomicU64>,
}

// ────────────────────────────────────────────────────────────────────────────
// UpdateStream
// ────────────────────────────────────────────────────────────────────────────

/// One AR session's telemetry pipeline.  Always handled through an `Arc`.
pub struct UpdateStream {
    session_id: String,
    device_id: String,
    config: StreamConfig,
    session: RwLock<ArSession>,
    transform: RwLock<CoordinateTransform>,
    state: Mutex<StreamState>,
    subscribers: RwLock<HashMap<String, SubscriberHandle>>,
    counters: Counters,
    shutdown: watch::Sender<bool>,
    flush_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl UpdateStream {
    /// Open a stream for `session` and start its periodic flush task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(session: ArSession, config: StreamConfig) -> Arc<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let stream = Arc::new(Self {
            session_id: session.id.clone(),
            device_id: session.device_id.clone(),
            transform: RwLock::new(CoordinateTransform::new(session.coordinate_system)),
            state: Mutex::new(StreamState {
                sequence: 0,
                buffer: UpdateBuffer::new(config.buffer_capacity, config.flush_interval()),
                interpolator: Interpolator::new(config.interpolation_history),
                predictor: Predictor::new(config.prediction_history),
            }),
            session: RwLock::new(session),
            subscribers: RwLock::new(HashMap::new()),
            counters: Counters::default(),
            shutdown,
            flush_task: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
            config,
        });

        let task = tokio::spawn(flush_loop(
            Arc::downgrade(&stream),
            stream.config.flush_interval(),
            shutdown_rx,
        ));
        *stream
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!(
            session_id = %stream.session_id,
            device_id = %stream.device_id,
            interval_ms = stream.config.flush_interval_ms,
            "update stream opened"
        );
        stream
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── Ingest ──────────────────────────────────────────────────────────────

    /// Ingest one telemetry sample.
    ///
    /// The sample gets the next sequence number and, when the transform is
    /// calibrated, a world position; otherwise its world position is
    /// [`WorldPosition::Unavailable`].  Interact and gesture samples are
    /// delivered to subscribers immediately; everything else is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`ArError::NotFound`] once the stream has been closed.
    pub async fn push_update(
        &self,
        device_id: &str,
        update_type: UpdateType,
        ar_position: ArPoint3D,
        rotation: ArRotation,
        confidence: f64,
    ) -> Result<PositionUpdate, ArError> {
        self.push_update_with_metadata(
            device_id,
            update_type,
            ar_position,
            rotation,
            confidence,
            BTreeMap::new(),
        )
        .await
    }

    /// [`push_update`](Self::push_update) with caller-supplied metadata.
    pub async fn push_update_with_metadata(
        &self,
        device_id: &str,
        update_type: UpdateType,
        ar_position: ArPoint3D,
        rotation: ArRotation,
        confidence: f64,
        metadata: BTreeMap<String, String>,
    ) -> Result<PositionUpdate, ArError> {
        if self.is_closed() {
            return Err(ArError::not_found("stream", &self.session_id));
        }

        let world_position = match self.transform.read().await.ar_to_world(&ar_position) {
            Ok(world) => WorldPosition::Known(world),
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "world position unavailable");
                WorldPosition::Unavailable
            }
        };

        let (update, batch) = {
            let mut state = self.state.lock().await;
            state.sequence += 1;
            let update = PositionUpdate {
                id: Uuid::new_v4(),
                session_id: self.session_id.clone(),
                device_id: device_id.to_string(),
                update_type,
                ar_position,
                world_position,
                rotation,
                timestamp: Utc::now(),
                sequence: state.sequence,
                confidence,
                metadata,
            };
            state.predictor.record(update.clone());

            let batch = if update_type.is_immediate() {
                None
            } else {
                state.buffer.add(update.clone());
                state.buffer.should_flush().then(|| state.drain())
            };
            (update, batch)
        };
        self.counters.pushed.fetch_add(1, Ordering::Relaxed);
        trace!(
            session_id = %self.session_id,
            sequence = update.sequence,
            update_type = ?update.update_type,
            "update ingested"
        );

        if update_type.is_immediate() {
            self.deliver_immediate(update.clone()).await;
        } else if let Some(batch) = batch {
            self.deliver_batch(batch).await;
        }
        Ok(update)
    }

    /// Drain the buffer now.  Returns the number of updates delivered,
    /// including synthesised midpoints; zero when nothing was buffered.
    pub async fn flush_now(&self) -> usize {
        let batch = self.state.lock().await.drain();
        let delivered = batch.len();
        if delivered > 0 {
            self.deliver_batch(batch).await;
        }
        delivered
    }

    /// Hand `update` to every subscriber on the immediate path.  Returns how
    /// many subscribers it was queued for.
    pub async fn deliver_immediate(&self, update: PositionUpdate) -> usize {
        self.counters.immediate_deliveries.fetch_add(1, Ordering::Relaxed);
        self.dispatch(Delivery::One(update)).await
    }

    async fn deliver_batch(&self, batch: Vec<PositionUpdate>) {
        self.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
        debug!(session_id = %self.session_id, size = batch.len(), "batch flushed");
        self.dispatch(Delivery::Batch(Arc::new(batch))).await;
    }

    async fn dispatch(&self, delivery: Delivery) -> usize {
        let links: Vec<SubscriberLink> = self
            .subscribers
            .read()
            .await
            .values()
            .map(SubscriberHandle::link)
            .collect();

        links
            .iter()
            .filter(|link| {
                let queued = link.offer(delivery.clone());
                if !queued {
                    trace!(session_id = %self.session_id, subscriber = %link.id(), "delivery not queued");
                }
                queued
            })
            .count()
    }

    // ── Estimation ──────────────────────────────────────────────────────────

    /// Extrapolate the latest sample `dt` ahead.
    pub async fn predict_position(&self, dt: Duration) -> Result<PositionUpdate, ArError> {
        self.state.lock().await.predictor.predict_position(dt)
    }

    /// Where the device was at `t`, from flushed history.
    pub async fn position_at(&self, t: DateTime<Utc>) -> Result<PositionUpdate, ArError> {
        self.state.lock().await.interpolator.get_position_at(t)
    }

    // ── Transform ───────────────────────────────────────────────────────────

    pub async fn calibrate(
        &self,
        ar_anchor: ArPoint3D,
        world_anchor: WorldPoint3D,
        rotation: ArRotation,
    ) -> Result<(), ArError> {
        self.transform
            .write()
            .await
            .calibrate(ar_anchor, world_anchor, rotation)
    }

    /// Apply a localization result to this session's transform.
    pub async fn apply_drift(&self, correction: &DriftCorrection) -> Result<(), ArError> {
        self.transform
            .write()
            .await
            .apply_drift(&correction.translation)?;
        info!(
            session_id = %self.session_id,
            anchors = correction.anchors_used,
            confidence = correction.confidence,
            "drift correction applied"
        );
        Ok(())
    }

    /// Snapshot of the current transform.
    pub async fn transform(&self) -> CoordinateTransform {
        self.transform.read().await.clone()
    }

    // ── Session ─────────────────────────────────────────────────────────────

    pub async fn session(&self) -> ArSession {
        self.session.read().await.clone()
    }

    pub async fn set_tracking_quality(&self, quality: TrackingQuality) {
        let mut session = self.session.write().await;
        if session.tracking_quality != quality {
            debug!(session_id = %self.session_id, from = ?session.tracking_quality, to = ?quality, "tracking quality changed");
            session.tracking_quality = quality;
        }
    }

    /// Returns `false` if the anchor was already active.
    pub async fn add_active_anchor(&self, anchor_id: Uuid) -> bool {
        self.session.write().await.active_anchors.insert(anchor_id)
    }

    pub async fn remove_active_anchor(&self, anchor_id: &Uuid) -> bool {
        self.session.write().await.active_anchors.remove(anchor_id)
    }

    // ── Subscribers ─────────────────────────────────────────────────────────

    /// Attach `subscriber` with its own bounded delivery queue.
    ///
    /// # Errors
    ///
    /// [`ArError::AlreadyExists`] for a duplicate subscriber ID,
    /// [`ArError::NotFound`] if the stream is closed.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Result<(), ArError> {
        if self.is_closed() {
            return Err(ArError::not_found("stream", &self.session_id));
        }
        let id = subscriber.id().to_string();
        let mut subscribers = self.subscribers.write().await;
        if subscribers.contains_key(&id) {
            return Err(ArError::already_exists("subscriber", id));
        }
        let handle = SubscriberHandle::spawn(
            subscriber,
            self.config.subscriber_queue,
            self.counters.dropped.clone(),
        );
        subscribers.insert(id.clone(), handle);
        debug!(session_id = %self.session_id, subscriber = %id, "subscriber attached");
        Ok(())
    }

    /// Detach a subscriber.  Deliveries already queued for it still run.
    pub async fn unsubscribe(&self, subscriber_id: &str) -> Result<(), ArError> {
        let handle = self
            .subscribers
            .write()
            .await
            .remove(subscriber_id)
            .ok_or_else(|| ArError::not_found("subscriber", subscriber_id))?;
        drop(handle.detach());
        debug!(session_id = %self.session_id, subscriber = %subscriber_id, "subscriber detached");
        Ok(())
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            pushed: self.counters.pushed.load(Ordering::Relaxed),
            batches_flushed: self.counters.batches_flushed.load(Ordering::Relaxed),
            immediate_deliveries: self.counters.immediate_deliveries.load(Ordering::Relaxed),
            dropped_deliveries: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Stop the flush task, discard buffered updates and detach every
    /// subscriber.  Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Only fails when the flush task has already exited.
        let _ = self.shutdown.send(true);

        let task = self
            .flush_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(session_id = %self.session_id, error = %e, "flush task ended abnormally");
            }
        }

        let discarded = self.state.lock().await.buffer.flush().len();
        let handles: Vec<SubscriberHandle> = self
            .subscribers
            .write()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            drop(handle.detach());
        }

        info!(
            session_id = %self.session_id,
            discarded,
            pushed = self.counters.pushed.load(Ordering::Relaxed),
            "update stream closed"
        );
    }
}

/// Periodic flush.  Exits on the shutdown signal or once the stream is gone.
async fn flush_loop(stream: Weak<UpdateStream>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(stream) = stream.upgrade() else { break };
                stream.flush_now().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    trace!("flush task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::ChannelSubscriber;
    use arsync_types::{CoordinateSystem, Envelope};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn session() -> ArSession {
        ArSession::new("session-1", "ipad-1", "hq", CoordinateSystem::ArKit)
    }

    /// No time-based flush within a test's lifetime.
    fn slow_config(capacity: usize) -> StreamConfig {
        StreamConfig {
            buffer_capacity: capacity,
            flush_interval_ms: 60_000,
            ..StreamConfig::default()
        }
    }

    async fn attach(stream: &UpdateStream, id: &str) -> mpsc::Receiver<Envelope> {
        let (sub, rx) = ChannelSubscriber::new(id, 16);
        stream.subscribe(Arc::new(sub)).await.unwrap();
        rx
    }

    async fn next_frame(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open")
    }

    #[tokio::test]
    async fn sequence_starts_at_one_and_world_is_marked() -> Result<(), Box<dyn std::error::Error>> {
        let stream = UpdateStream::start(session(), slow_config(100));

        let first = stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::new(1.0, 2.0, -3.0), ArRotation::identity(), 0.9)
            .await?;
        assert_eq!(first.sequence, 1);
        assert_eq!(first.world_position, WorldPosition::Unavailable);

        stream
            .calibrate(ArPoint3D::origin(), WorldPoint3D::new(100.0, 200.0, 10.0), ArRotation::identity())
            .await?;
        let second = stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::new(1.0, 2.0, -3.0), ArRotation::identity(), 0.9)
            .await?;
        assert_eq!(second.sequence, 2);
        let world = second.world_position.known().ok_or("world unknown")?;
        assert!((world.x - 101.0).abs() < 1e-9);
        assert!((world.y - 203.0).abs() < 1e-9);
        assert!((world.z - 12.0).abs() < 1e-9);

        stream.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn full_buffer_flushes_one_batch() {
        let stream = UpdateStream::start(session(), slow_config(3));
        let mut rx = attach(&stream, "dash").await;

        for i in 0..3 {
            stream
                .push_update("ipad-1", UpdateType::Position, ArPoint3D::new(i as f64, 0.0, 0.0), ArRotation::identity(), 1.0)
                .await
                .unwrap();
        }

        match next_frame(&mut rx).await {
            Envelope::PositionBatch(batch) => {
                let real: Vec<u64> = batch
                    .iter()
                    .filter(|u| !u.is_synthesized())
                    .map(|u| u.sequence)
                    .collect();
                assert_eq!(real, vec![1, 2, 3]);
            }
            other => panic!("expected batch, got {other:?}"),
        }
        let stats = stream.stats();
        assert_eq!(stats.pushed, 3);
        assert_eq!(stats.batches_flushed, 1);
        stream.close().await;
    }

    #[tokio::test]
    async fn interactions_bypass_the_buffer() {
        let stream = UpdateStream::start(session(), slow_config(100));
        let mut rx = attach(&stream, "dash").await;

        stream
            .push_update("ipad-1", UpdateType::Interact, ArPoint3D::origin(), ArRotation::identity(), 1.0)
            .await
            .unwrap();

        match next_frame(&mut rx).await {
            Envelope::PositionUpdate(update) => assert_eq!(update.update_type, UpdateType::Interact),
            other => panic!("expected single update, got {other:?}"),
        }
        assert_eq!(stream.flush_now().await, 0);
        assert_eq!(stream.stats().immediate_deliveries, 1);
        stream.close().await;
    }

    #[tokio::test]
    async fn periodic_task_flushes_without_new_input() {
        let config = StreamConfig {
            flush_interval_ms: 20,
            ..StreamConfig::default()
        };
        let stream = UpdateStream::start(session(), config);
        let mut rx = attach(&stream, "dash").await;

        stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::origin(), ArRotation::identity(), 1.0)
            .await
            .unwrap();

        match next_frame(&mut rx).await {
            Envelope::PositionBatch(batch) => assert_eq!(batch.len(), 1),
            other => panic!("expected batch, got {other:?}"),
        }
        stream.close().await;
    }

    #[tokio::test]
    async fn close_discards_buffer_and_rejects_pushes() {
        let stream = UpdateStream::start(session(), slow_config(100));
        let mut rx = attach(&stream, "dash").await;
        stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::origin(), ArRotation::identity(), 1.0)
            .await
            .unwrap();

        stream.close().await;
        assert!(stream.is_closed());
        assert_eq!(stream.subscriber_count().await, 0);
        // Nothing was delivered and the channel closes with the worker.
        assert!(timeout(Duration::from_secs(2), rx.recv()).await.unwrap().is_none());

        let err = stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::origin(), ArRotation::identity(), 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ArError::NotFound { .. }));

        // Second close is a no-op.
        stream.close().await;
    }

    #[tokio::test]
    async fn duplicate_and_unknown_subscribers() {
        let stream = UpdateStream::start(session(), slow_config(100));
        let _rx = attach(&stream, "dash").await;

        let (dup, _dup_rx) = ChannelSubscriber::new("dash", 4);
        let err = stream.subscribe(Arc::new(dup)).await.unwrap_err();
        assert!(matches!(err, ArError::AlreadyExists { .. }));

        assert!(matches!(
            stream.unsubscribe("nobody").await,
            Err(ArError::NotFound { .. })
        ));
        stream.unsubscribe("dash").await.unwrap();
        assert_eq!(stream.subscriber_count().await, 0);
        stream.close().await;
    }

    #[tokio::test]
    async fn prediction_needs_history() {
        let stream = UpdateStream::start(session(), slow_config(100));
        assert_eq!(
            stream.predict_position(Duration::from_millis(100)).await,
            Err(ArError::InsufficientHistory)
        );
        let pushed = stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::new(1.0, 1.0, 1.0), ArRotation::identity(), 1.0)
            .await
            .unwrap();
        assert_eq!(stream.predict_position(Duration::from_millis(100)).await.unwrap(), pushed);
        stream.close().await;
    }

    #[tokio::test]
    async fn drift_shifts_subsequent_conversions() -> Result<(), Box<dyn std::error::Error>> {
        let stream = UpdateStream::start(session(), slow_config(100));
        stream
            .calibrate(ArPoint3D::origin(), WorldPoint3D::new(100.0, 200.0, 10.0), ArRotation::identity())
            .await?;
        stream
            .apply_drift(&DriftCorrection {
                translation: ArPoint3D::new(1.0, 0.0, 0.0),
                confidence: 1.0,
                anchors_used: 3,
                rms_residual: 0.0,
            })
            .await?;

        let update = stream
            .push_update("ipad-1", UpdateType::Position, ArPoint3D::new(2.0, 2.0, -3.0), ArRotation::identity(), 1.0)
            .await?;
        let world = update.world_position.known().ok_or("world unknown")?;
        assert!((world.x - 101.0).abs() < 1e-9);
        stream.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn session_tracking_and_anchors() {
        let stream = UpdateStream::start(session(), slow_config(100));
        stream.set_tracking_quality(TrackingQuality::Limited).await;
        let anchor = Uuid::new_v4();
        assert!(stream.add_active_anchor(anchor).await);
        assert!(!stream.add_active_anchor(anchor).await);

        let snapshot = stream.session().await;
        assert_eq!(snapshot.tracking_quality, TrackingQuality::Limited);
        assert!(snapshot.active_anchors.contains(&anchor));
        stream.close().await;
    }
}
