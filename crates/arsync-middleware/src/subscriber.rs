//! Subscriber contract and bounded per-subscriber delivery.
//!
//! Every subscriber attached to a stream gets its own bounded queue and a
//! worker task that drains it.  A slow subscriber therefore only delays
//! itself: when its queue is full the newest delivery is dropped (and
//! counted) instead of blocking the producer or the other subscribers.
//! Errors returned by a subscriber are logged and otherwise ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arsync_types::{ArError, Envelope, PositionUpdate};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Contract
// ────────────────────────────────────────────────────────────────────────────

/// A consumer of a stream's output.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Unique within one stream.
    fn id(&self) -> &str;

    /// A single latency-sensitive update (interactions, gestures, broadcasts).
    async fn on_update(&self, update: &PositionUpdate) -> Result<(), ArError>;

    /// A flushed, interpolated batch in timestamp order.
    async fn on_batch(&self, batch: &[PositionUpdate]) -> Result<(), ArError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Delivery queue
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) enum Delivery {
    One(PositionUpdate),
    Batch(Arc<Vec<PositionUpdate>>),
}

/// Sending side of one subscriber's queue.  Cheap to clone so the stream can
/// copy the link set out of its lock before dispatching.
#[derive(Clone)]
pub(crate) struct SubscriberLink {
    id: String,
    tx: mpsc::Sender<Delivery>,
    dropped: Arc<AtomicU64>,
}

impl SubscriberLink {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Queue `delivery` without waiting.  Returns `false` if it was dropped.
    pub(crate) fn offer(&self, delivery: Delivery) -> bool {
        match self.tx.try_send(delivery) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subscriber = %self.id, "subscriber queue full; delivery dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = %self.id, "subscriber worker gone; delivery dropped");
                false
            }
        }
    }
}

/// A subscriber's queue plus the worker draining it.
pub(crate) struct SubscriberHandle {
    link: SubscriberLink,
    worker: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Spawn a worker for `subscriber` with a queue of `capacity` deliveries.
    /// Dropped deliveries are added to `dropped`.
    pub(crate) fn spawn(
        subscriber: Arc<dyn Subscriber>,
        capacity: usize,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Delivery>(capacity.max(1));
        let id = subscriber.id().to_string();

        let worker = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let result = match &delivery {
                    Delivery::One(update) => subscriber.on_update(update).await,
                    Delivery::Batch(batch) => subscriber.on_batch(batch).await,
                };
                if let Err(e) = result {
                    warn!(subscriber = %subscriber.id(), error = %e, "subscriber callback failed");
                }
            }
            debug!(subscriber = %subscriber.id(), "subscriber worker stopped");
        });

        Self {
            link: SubscriberLink { id, tx, dropped },
            worker,
        }
    }

    pub(crate) fn link(&self) -> SubscriberLink {
        self.link.clone()
    }

    /// Stop accepting deliveries.  Already-queued deliveries are still
    /// handed to the subscriber before the worker exits.
    pub(crate) fn detach(self) -> JoinHandle<()> {
        drop(self.link);
        self.worker
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ChannelSubscriber
// ────────────────────────────────────────────────────────────────────────────

/// Forwards deliveries as [`Envelope`] frames into an mpsc channel, for
/// transports that push frames to a remote client.
///
/// # Example
///
/// ```
/// use arsync_middleware::ChannelSubscriber;
///
/// let (sub, mut frames) = ChannelSubscriber::new("dashboard", 16);
/// # let _ = (&sub, &mut frames);
/// ```
pub struct ChannelSubscriber {
    id: String,
    tx: mpsc::Sender<Envelope>,
}

impl ChannelSubscriber {
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id: id.into(), tx }, rx)
    }

    async fn forward(&self, envelope: Envelope) -> Result<(), ArError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| ArError::external("subscriber channel", format!("{} receiver closed", self.id)))
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn id(&self) -> &str {
        &self.id
    }

    async fn on_update(&self, update: &PositionUpdate) -> Result<(), ArError> {
        self.forward(Envelope::PositionUpdate(update.clone())).await
    }

    async fn on_batch(&self, batch: &[PositionUpdate]) -> Result<(), ArError> {
        self.forward(Envelope::PositionBatch(batch.to_vec())).await
    }
}
