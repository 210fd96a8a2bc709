//! Contracts the sync engine consumes from the canonical-model side.
//!
//! Implementations live outside this workspace (the building-model service
//! owns them); the engine only sees these traits.

use arsync_types::{ArChange, ArError, EquipmentState};
use async_trait::async_trait;

/// Filters a batch down to the changes worth reconciling.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Returns the material subset of `changes`, in input order.
    async fn detect(&self, changes: &[ArChange]) -> Result<Vec<ArChange>, ArError>;
}

/// Outcome of resolving one material change against the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Accept,
    Reject { reason: String },
    /// Apply this value instead of the observed change.
    ///
    /// The merged change must keep the observed change's `id`: a cycle that
    /// fails partway re-applies its accepted changes, and
    /// [`BuildingModel::apply`] dedupes on that id.  The engine overwrites a
    /// different id with the observed one.
    Merge(ArChange),
}

/// Decides accept / reject / merge for a change given the model's current value.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(
        &self,
        change: &ArChange,
        current: Option<&EquipmentState>,
    ) -> Result<Resolution, ArError>;
}

/// Read and write access to the canonical building model.
#[async_trait]
pub trait BuildingModel: Send + Sync {
    /// Current state of one equipment item; `None` if the model has no such item.
    async fn current(&self, equipment_id: &str) -> Result<Option<EquipmentState>, ArError>;

    /// Apply `change`.  Must be idempotent on `change.id`.
    async fn apply(&self, change: &ArChange) -> Result<(), ArError>;
}
