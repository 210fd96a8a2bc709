//! Workspace-wide error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Global error type spanning calibration, registry lookups, history-based
/// estimation, validation and failures of external collaborators.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArError {
    #[error("Coordinate transform is not calibrated")]
    NotCalibrated,

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("Insufficient history for prediction")]
    InsufficientHistory,

    #[error("No history recorded")]
    NoHistory,

    #[error("No anchors in common between observed and known sets")]
    InsufficientAnchors,

    #[error("Validation Error: {0}")]
    Validation(String),

    #[error("Rotation quaternion has zero or non-finite norm")]
    InvalidRotation,

    #[error("Capacity exceeded: at most {limit} allowed")]
    CapacityExceeded { limit: usize },

    #[error("{collaborator} failed: {context}")]
    External { collaborator: String, context: String },

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

impl ArError {
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        ArError::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    pub fn already_exists(kind: &str, id: impl Into<String>) -> Self {
        ArError::AlreadyExists {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    /// Wrap a collaborator failure with the operation it interrupted.
    pub fn external(collaborator: &str, context: impl std::fmt::Display) -> Self {
        ArError::External {
            collaborator: collaborator.to_string(),
            context: context.to_string(),
        }
    }
}
