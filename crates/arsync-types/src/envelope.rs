//! Type-tagged wire envelope.
//!
//! Several message kinds share one channel, so every frame is wrapped as
//! `{"type": "<kind>", "payload": <body>}`:
//!
//! | `type` | payload |
//! |---|---|
//! | `position_update` | [`PositionUpdate`] |
//! | `position_batch` | array of [`PositionUpdate`] |
//! | `ar_change` | [`ArChange`] |
//! | `sync_status` | [`SyncStatus`] |

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ArChange, ArError, PositionUpdate, SyncStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    PositionUpdate(PositionUpdate),
    PositionBatch(Vec<PositionUpdate>),
    ArChange(ArChange),
    SyncStatus(SyncStatus),
}

impl Envelope {
    /// Encode as a JSON frame.
    pub fn encode(&self) -> Result<String, ArError> {
        serde_json::to_string(self).map_err(|e| ArError::Serialization(e.to_string()))
    }

    /// Decode a JSON frame.
    pub fn decode(frame: &str) -> Result<Self, ArError> {
        serde_json::from_str(frame).map_err(|e| ArError::Serialization(e.to_string()))
    }

    /// The `type` tag this envelope is sent under.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::PositionUpdate(_) => "position_update",
            Envelope::PositionBatch(_) => "position_batch",
            Envelope::ArChange(_) => "ar_change",
            Envelope::SyncStatus(_) => "sync_status",
        }
    }

    /// JSON Schema describing every envelope kind, for client code generation.
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(Envelope)
    }
}
