//! [`SyncEngine`] – per-session reconciliation of queued AR changes.
//!
//! # Cycle
//!
//! ```text
//! Idle ──► Syncing ──► Idle      (cycle completed)
//!             └──────► Error     (a collaborator failed; next cycle starts normally)
//! ```
//!
//! One cycle snapshots the session's queue, asks the [`ChangeDetector`] for
//! the material subset, resolves each material change against the model's
//! current value and applies the accepted (or merged) ones.  Only the changes
//! in the snapshot are removed afterwards, so anything recorded while the
//! cycle ran waits for the next one.  If any collaborator fails the cycle
//! aborts, nothing is removed and the error is recorded in the session's
//! [`SyncStatus`].
//!
//! Each registered session has its own periodic task; cycles of one session
//! never overlap.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arsync_types::{ArChange, ArError, SyncState, SyncStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as CycleLock, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::change_queue::ChangeQueue;
use crate::collaborators::{BuildingModel, ChangeDetector, ConflictResolver, Resolution};

// ────────────────────────────────────────────────────────────────────────────
// Configuration and reports
// ────────────────────────────────────────────────────────────────────────────

fn default_interval_ms() -> u64 {
    5000
}

fn default_max_recorded_errors() -> usize {
    16
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period of each session's sync task.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// How many recent errors a [`SyncStatus`] keeps.
    #[serde(default = "default_max_recorded_errors")]
    pub max_recorded_errors: usize,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_recorded_errors: default_max_recorded_errors(),
        }
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Changes in the snapshot.
    pub examined: usize,
    /// Changes the detector judged material.
    pub material: usize,
    /// Changes written to the model (accepted plus merged).
    pub applied: usize,
    pub rejected: usize,
    /// Subset of `applied` that went in as a merged value.
    pub merged: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Registry entry
// ────────────────────────────────────────────────────────────────────────────

struct SessionEntry {
    status: Arc<Mutex<SyncStatus>>,
    cycle: Arc<CycleLock<()>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionEntry {
    async fn stop(self, session_id: &str) {
        // Fails only if the task has already exited.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(session_id, error = %e, "sync task ended abnormally");
        }
    }
}

fn lock_status(status: &Mutex<SyncStatus>) -> MutexGuard<'_, SyncStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// SyncEngine
// ────────────────────────────────────────────────────────────────────────────

pub struct SyncEngine {
    queue: Arc<ChangeQueue>,
    detector: Arc<dyn ChangeDetector>,
    resolver: Arc<dyn ConflictResolver>,
    model: Arc<dyn BuildingModel>,
    config: SyncConfig,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<ChangeQueue>,
        detector: Arc<dyn ChangeDetector>,
        resolver: Arc<dyn ConflictResolver>,
        model: Arc<dyn BuildingModel>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            detector,
            resolver,
            model,
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn queue(&self) -> &Arc<ChangeQueue> {
        &self.queue
    }

    /// Start periodic syncing for `session_id` and enable manual cycles.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ArError::AlreadyExists`] if the session is already registered.
    pub async fn register_session(self: &Arc<Self>, session_id: &str) -> Result<(), ArError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            return Err(ArError::already_exists("sync session", session_id));
        }

        let mut status = SyncStatus::new(session_id);
        status.pending_changes = self.queue.pending_count(session_id);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sync_loop(
            Arc::downgrade(self),
            session_id.to_string(),
            self.config.interval(),
            shutdown_rx,
        ));
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                status: Arc::new(Mutex::new(status)),
                cycle: Arc::new(CycleLock::new(())),
                shutdown,
                task,
            },
        );
        info!(session_id, interval_ms = self.config.interval_ms, "sync session registered");
        Ok(())
    }

    /// Stop the session's periodic task.  Its queued changes stay queued.
    pub async fn unregister_session(&self, session_id: &str) -> Result<(), ArError> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| ArError::not_found("sync session", session_id))?;
        entry.stop(session_id).await;
        info!(session_id, "sync session unregistered");
        Ok(())
    }

    /// Validate `change` and queue it for its session.
    ///
    /// # Errors
    ///
    /// [`ArError::Validation`] for an incomplete change,
    /// [`ArError::NotFound`] if its session is not registered.
    pub async fn record_change(&self, change: ArChange) -> Result<(), ArError> {
        change.validate()?;
        let status = self.status_handle(&change.session_id).await?;
        let session_id = change.session_id.clone();
        self.queue.enqueue(change);
        lock_status(&status).pending_changes = self.queue.pending_count(&session_id);
        Ok(())
    }

    pub async fn get_sync_status(&self, session_id: &str) -> Result<SyncStatus, ArError> {
        let status = self.status_handle(session_id).await?;
        let snapshot = lock_status(&status).clone();
        Ok(snapshot)
    }

    /// Run one cycle for `session_id` now.
    ///
    /// An empty queue is a no-op that leaves the status untouched apart from
    /// the pending count.
    ///
    /// # Errors
    ///
    /// [`ArError::NotFound`] for an unregistered session, or the
    /// [`ArError::External`] error of the collaborator that aborted the cycle.
    pub async fn sync_session(&self, session_id: &str) -> Result<SyncReport, ArError> {
        let (status, cycle) = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| ArError::not_found("sync session", session_id))?;
            (entry.status.clone(), entry.cycle.clone())
        };
        let _cycle = cycle.lock().await;

        let snapshot = self.queue.get_session_changes(session_id);
        if snapshot.is_empty() {
            let mut s = lock_status(&status);
            s.pending_changes = 0;
            s.state = SyncState::Idle;
            trace!(session_id, "nothing to sync");
            return Ok(SyncReport::default());
        }

        lock_status(&status).state = SyncState::Syncing;
        debug!(session_id, changes = snapshot.len(), "sync cycle started");

        match self.reconcile(&snapshot).await {
            Ok(report) => {
                let processed: HashSet<String> = snapshot.iter().map(|c| c.id.clone()).collect();
                self.queue.remove_changes(session_id, &processed);

                let mut s = lock_status(&status);
                s.state = SyncState::Idle;
                s.pending_changes = self.queue.pending_count(session_id);
                s.last_sync_at = Some(Utc::now());
                s.errors.clear();
                s.applied_total += report.applied as u64;
                s.rejected_total += report.rejected as u64;
                info!(
                    session_id,
                    examined = report.examined,
                    material = report.material,
                    applied = report.applied,
                    rejected = report.rejected,
                    merged = report.merged,
                    "sync cycle completed"
                );
                Ok(report)
            }
            Err(e) => {
                let mut s = lock_status(&status);
                s.state = SyncState::Error;
                s.pending_changes = self.queue.pending_count(session_id);
                s.errors.push(e.to_string());
                while s.errors.len() > self.config.max_recorded_errors {
                    s.errors.remove(0);
                }
                warn!(session_id, error = %e, pending = s.pending_changes, "sync cycle aborted");
                Err(e)
            }
        }
    }

    /// Stop every session's periodic task.  Pending changes are not synced.
    pub async fn close(&self) {
        let entries: Vec<(String, SessionEntry)> = self.sessions.write().await.drain().collect();
        let count = entries.len();
        for (_, entry) in &entries {
            let _ = entry.shutdown.send(true);
        }
        for (session_id, entry) in entries {
            entry.stop(&session_id).await;
        }
        info!(sessions = count, "sync engine closed");
    }

    async fn status_handle(&self, session_id: &str) -> Result<Arc<Mutex<SyncStatus>>, ArError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| ArError::not_found("sync session", session_id))
    }

    async fn reconcile(&self, snapshot: &[ArChange]) -> Result<SyncReport, ArError> {
        let mut report = SyncReport {
            examined: snapshot.len(),
            ..SyncReport::default()
        };

        let material = self
            .detector
            .detect(snapshot)
            .await
            .map_err(|e| ArError::external("change detector", e))?;
        report.material = material.len();

        for change in &material {
            let current = self
                .model
                .current(&change.equipment_id)
                .await
                .map_err(|e| ArError::external("building model", format!("lookup {}: {e}", change.equipment_id)))?;

            let resolution = self
                .resolver
                .resolve(change, current.as_ref())
                .await
                .map_err(|e| ArError::external("conflict resolver", format!("change {}: {e}", change.id)))?;

            let to_apply = match resolution {
                Resolution::Accept => change.clone(),
                Resolution::Merge(mut merged) => {
                    if merged.id != change.id {
                        debug!(change_id = %change.id, merged_id = %merged.id, "merged change re-keyed to the observed change id");
                        merged.id = change.id.clone();
                    }
                    report.merged += 1;
                    merged
                }
                Resolution::Reject { reason } => {
                    debug!(change_id = %change.id, equipment_id = %change.equipment_id, %reason, "change rejected");
                    report.rejected += 1;
                    continue;
                }
            };

            self.model
                .apply(&to_apply)
                .await
                .map_err(|e| ArError::external("building model", format!("apply {}: {e}", to_apply.id)))?;
            report.applied += 1;
        }
        Ok(report)
    }
}

/// Periodic sync for one session.  Exits on the shutdown signal or once the
/// engine is gone.
async fn sync_loop(
    engine: Weak<SyncEngine>,
    session_id: String,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(engine) = engine.upgrade() else { break };
                // Failures are already recorded in the session status.
                if let Err(e) = engine.sync_session(&session_id).await {
                    trace!(session_id = %session_id, error = %e, "scheduled sync failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    trace!(session_id = %session_id, "sync task stopped");
}
