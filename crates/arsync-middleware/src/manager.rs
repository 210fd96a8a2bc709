//! [`StreamManager`] – session ID → [`UpdateStream`] registry.

use std::collections::HashMap;
use std::sync::Arc;

use arsync_types::{ArError, ArSession, PositionUpdate};
use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::stream::{StreamConfig, UpdateStream};

/// Owns one stream per open AR session.
///
/// The registry lock is only held for lookups and membership changes;
/// closing a stream (which waits for its flush task) happens after the
/// entry has been removed.
pub struct StreamManager {
    streams: RwLock<HashMap<String, Arc<UpdateStream>>>,
    config: StreamConfig,
    max_sessions: usize,
}

impl StreamManager {
    pub fn new(config: StreamConfig, max_sessions: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Open a stream for `session`.
    ///
    /// # Errors
    ///
    /// - [`ArError::AlreadyExists`] if the session already has a stream.
    /// - [`ArError::CapacityExceeded`] when `max_sessions` streams are open.
    pub async fn create_stream(&self, session: ArSession) -> Result<Arc<UpdateStream>, ArError> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(&session.id) {
            return Err(ArError::already_exists("stream", session.id));
        }
        if streams.len() >= self.max_sessions {
            return Err(ArError::CapacityExceeded {
                limit: self.max_sessions,
            });
        }
        let id = session.id.clone();
        let stream = UpdateStream::start(session, self.config.clone());
        streams.insert(id, stream.clone());
        Ok(stream)
    }

    /// Remove the session's stream and close it.
    ///
    /// # Errors
    ///
    /// [`ArError::NotFound`] for an unknown session.
    pub async fn close_stream(&self, session_id: &str) -> Result<(), ArError> {
        let stream = self
            .streams
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ArError::not_found("stream", session_id))?;
        stream.close().await;
        Ok(())
    }

    pub async fn get_stream(&self, session_id: &str) -> Result<Arc<UpdateStream>, ArError> {
        self.streams
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ArError::not_found("stream", session_id))
    }

    /// Deliver `update` on the immediate path of every stream bound to
    /// `device_id`.  Returns the number of sessions reached.
    pub async fn broadcast_to_device(&self, device_id: &str, update: &PositionUpdate) -> usize {
        let targets: Vec<Arc<UpdateStream>> = self
            .streams
            .read()
            .await
            .values()
            .filter(|s| s.device_id() == device_id)
            .cloned()
            .collect();

        for stream in &targets {
            stream.deliver_immediate(update.clone()).await;
        }
        debug!(device_id, sessions = targets.len(), "broadcast delivered");
        targets.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }

    /// Close every stream concurrently and empty the registry.
    pub async fn close_all(&self) {
        let streams: Vec<Arc<UpdateStream>> = self
            .streams
            .write()
            .await
            .drain()
            .map(|(_, stream)| stream)
            .collect();
        let count = streams.len();
        join_all(streams.iter().map(|s| s.close())).await;
        info!(closed = count, "all update streams closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::ChannelSubscriber;
    use arsync_types::{ArPoint3D, ArRotation, CoordinateSystem, Envelope, UpdateType};
    use std::collections::HashSet;
    use std::time::Duration;

    fn session(id: &str, device: &str) -> ArSession {
        ArSession::new(id, device, "hq", CoordinateSystem::ArKit)
    }

    fn manager(max_sessions: usize) -> StreamManager {
        let config = StreamConfig {
            flush_interval_ms: 60_000,
            ..StreamConfig::default()
        };
        StreamManager::new(config, max_sessions)
    }

    #[tokio::test]
    async fn create_get_close() -> Result<(), Box<dyn std::error::Error>> {
        let mgr = manager(8);
        mgr.create_stream(session("s1", "ipad-1")).await?;

        assert!(matches!(
            mgr.create_stream(session("s1", "ipad-1")).await,
            Err(ArError::AlreadyExists { .. })
        ));
        assert_eq!(mgr.get_stream("s1").await?.session_id(), "s1");

        mgr.close_stream("s1").await?;
        assert!(matches!(mgr.get_stream("s1").await, Err(ArError::NotFound { .. })));
        assert!(matches!(mgr.close_stream("s1").await, Err(ArError::NotFound { .. })));
        assert!(mgr.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn session_cap_is_enforced() {
        let mgr = manager(2);
        mgr.create_stream(session("a", "d")).await.unwrap();
        mgr.create_stream(session("b", "d")).await.unwrap();
        assert_eq!(
            mgr.create_stream(session("c", "d")).await.err(),
            Some(ArError::CapacityExceeded { limit: 2 })
        );
        mgr.close_stream("a").await.unwrap();
        mgr.create_stream(session("c", "d")).await.unwrap();
        assert_eq!(mgr.session_ids().await, vec!["b".to_string(), "c".to_string()]);
        mgr.close_all().await;
    }

    #[tokio::test]
    async fn broadcast_reaches_only_that_device() -> Result<(), Box<dyn std::error::Error>> {
        let mgr = manager(8);
        let a = mgr.create_stream(session("s1", "ipad-1")).await?;
        let b = mgr.create_stream(session("s2", "ipad-1")).await?;
        let other = mgr.create_stream(session("s3", "hololens-2")).await?;

        let (sa, mut ra) = ChannelSubscriber::new("a", 4);
        let (sb, mut rb) = ChannelSubscriber::new("b", 4);
        let (so, mut ro) = ChannelSubscriber::new("o", 4);
        a.subscribe(Arc::new(sa)).await?;
        b.subscribe(Arc::new(sb)).await?;
        other.subscribe(Arc::new(so)).await?;

        let update = a
            .push_update("ipad-1", UpdateType::Anchor, ArPoint3D::origin(), ArRotation::identity(), 1.0)
            .await?;
        assert_eq!(mgr.broadcast_to_device("ipad-1", &update).await, 2);

        for rx in [&mut ra, &mut rb] {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await?
                .ok_or("closed")?;
            assert!(matches!(frame, Envelope::PositionUpdate(u) if u.id == update.id));
        }
        assert!(ro.try_recv().is_err());
        assert_eq!(mgr.broadcast_to_device("nobody", &update).await, 0);

        mgr.close_all().await;
        assert_eq!(mgr.len().await, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pushes_get_distinct_sequences() -> Result<(), Box<dyn std::error::Error>> {
        const N: u64 = 200;
        let mgr = manager(8);
        let stream = mgr.create_stream(session("s1", "ipad-1")).await?;

        let tasks: Vec<_> = (0..N)
            .map(|i| {
                let stream = stream.clone();
                tokio::spawn(async move {
                    stream
                        .push_update("ipad-1", UpdateType::Position, ArPoint3D::new(i as f64, 0.0, 0.0), ArRotation::identity(), 1.0)
                        .await
                        .map(|u| u.sequence)
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in join_all(tasks).await {
            assert!(seen.insert(task??));
        }
        assert_eq!(seen, (1..=N).collect::<HashSet<_>>());
        assert_eq!(stream.stats().pushed, N);

        mgr.close_all().await;
        Ok(())
    }
}
