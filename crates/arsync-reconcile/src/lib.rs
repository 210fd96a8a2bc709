//! `arsync-reconcile` – AR-observed edits → canonical building model.
//!
//! # Modules
//!
//! - [`change_queue`] – [`ChangeQueue`]: per-session two-lane queue
//!   (additions/removals ahead of moves/reclassifications).
//! - [`collaborators`] – the contracts the engine consumes:
//!   [`ChangeDetector`], [`ConflictResolver`] and [`BuildingModel`].
//! - [`engine`] – [`SyncEngine`]: per-session sync state machine and its
//!   periodic tasks.

pub mod change_queue;
pub mod collaborators;
pub mod engine;

pub use change_queue::ChangeQueue;
pub use collaborators::{BuildingModel, ChangeDetector, ConflictResolver, Resolution};
pub use engine::{SyncConfig, SyncEngine, SyncReport};
