//! SQLite anchor database.
//!
//! # Storage layout
//!
//! A single table `spatial_anchors` is created (if it does not already
//! exist) with the following columns:
//!
//! | column        | type | description                                  |
//! |---------------|------|----------------------------------------------|
//! | id            | TEXT | anchor UUID, primary key                     |
//! | device_id     | TEXT | device that placed the anchor (indexed)      |
//! | ar_x/y/z      | REAL | AR-frame position (metres)                   |
//! | world_x/y/z   | REAL | world-frame position (metres)                |
//! | rot_x/y/z/w   | REAL | orientation quaternion                       |
//! | anchor_type   | TEXT | `"user"` or `"system"`                       |
//! | confidence    | REAL | `[0, 1]`                                     |
//! | created_at    | TEXT | RFC-3339 creation timestamp (UTC)            |
//! | updated_at    | TEXT | RFC-3339 last-update timestamp (UTC)         |
//!
//! Saving an anchor whose ID already exists overwrites the row.
//!
//! # Example
//!
//! ```rust
//! use arsync_memory::AnchorDb;
//!
//! let db = AnchorDb::open_in_memory().unwrap();
//! assert!(db.load_for_device("ipad-1").unwrap().is_empty());
//! ```

use std::sync::Mutex;

use arsync_spatial::AnchorPersistence;
use arsync_types::{
    AnchorType, ArError, ArPoint3D, ArRotation, SpatialAnchor, WorldPoint3D,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from anchor database operations.
#[derive(Error, Debug)]
pub enum AnchorDbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Anchor not found: {0}")]
    NotFound(Uuid),
    #[error("Anchor database lock poisoned")]
    Poisoned,
}

impl From<AnchorDbError> for ArError {
    fn from(e: AnchorDbError) -> Self {
        match e {
            AnchorDbError::NotFound(id) => ArError::not_found("anchor", id.to_string()),
            other => ArError::external("anchor database", other),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AnchorDb
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed anchor store.
///
/// The connection sits behind a mutex so one `AnchorDb` can be shared by every
/// session in the process.
pub struct AnchorDb {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "SELECT id, device_id, ar_x, ar_y, ar_z, world_x, world_y, world_z,
        rot_x, rot_y, rot_z, rot_w, anchor_type, confidence, created_at, updated_at
 FROM spatial_anchors";

impl AnchorDb {
    /// Open (or create) a persistent anchor database at `path`.
    pub fn open(path: &str) -> Result<Self, AnchorDbError> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, AnchorDbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), AnchorDbError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS spatial_anchors (
                id          TEXT NOT NULL PRIMARY KEY,
                device_id   TEXT NOT NULL,
                ar_x        REAL NOT NULL,
                ar_y        REAL NOT NULL,
                ar_z        REAL NOT NULL,
                world_x     REAL NOT NULL,
                world_y     REAL NOT NULL,
                world_z     REAL NOT NULL,
                rot_x       REAL NOT NULL,
                rot_y       REAL NOT NULL,
                rot_z       REAL NOT NULL,
                rot_w       REAL NOT NULL,
                anchor_type TEXT NOT NULL,
                confidence  REAL NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_spatial_anchors_device
                ON spatial_anchors (device_id);",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AnchorDbError> {
        self.conn.lock().map_err(|_| AnchorDbError::Poisoned)
    }

    /// Insert or overwrite an anchor.
    pub fn save(&self, anchor: &SpatialAnchor) -> Result<(), AnchorDbError> {
        self.conn()?.execute(
            "INSERT INTO spatial_anchors
                 (id, device_id, ar_x, ar_y, ar_z, world_x, world_y, world_z,
                  rot_x, rot_y, rot_z, rot_w, anchor_type, confidence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
             ON CONFLICT(id) DO UPDATE SET
                 device_id = excluded.device_id,
                 ar_x = excluded.ar_x, ar_y = excluded.ar_y, ar_z = excluded.ar_z,
                 world_x = excluded.world_x, world_y = excluded.world_y, world_z = excluded.world_z,
                 rot_x = excluded.rot_x, rot_y = excluded.rot_y,
                 rot_z = excluded.rot_z, rot_w = excluded.rot_w,
                 anchor_type = excluded.anchor_type,
                 confidence = excluded.confidence,
                 updated_at = excluded.updated_at",
            params![
                anchor.id.to_string(),
                anchor.device_id,
                anchor.ar_position.x,
                anchor.ar_position.y,
                anchor.ar_position.z,
                anchor.world_position.x,
                anchor.world_position.y,
                anchor.world_position.z,
                anchor.rotation.x,
                anchor.rotation.y,
                anchor.rotation.z,
                anchor.rotation.w,
                anchor_type_str(anchor.anchor_type),
                anchor.confidence,
                anchor.created_at.to_rfc3339(),
                anchor.updated_at.to_rfc3339(),
            ],
        )?;
        debug!(anchor_id = %anchor.id, "anchor row saved");
        Ok(())
    }

    /// Fetch one anchor by ID.
    pub fn get(&self, id: Uuid) -> Result<SpatialAnchor, AnchorDbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], row_to_anchor)?;
        rows.next()
            .ok_or(AnchorDbError::NotFound(id))?
            .map_err(AnchorDbError::Sqlite)
    }

    /// All anchors placed by `device_id`, oldest first.
    pub fn load_for_device(&self, device_id: &str) -> Result<Vec<SpatialAnchor>, AnchorDbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE device_id = ?1 ORDER BY created_at ASC"
        ))?;
        let rows = stmt.query_map(params![device_id], row_to_anchor)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(AnchorDbError::Sqlite)
    }

    /// Total number of stored anchors.
    pub fn count(&self) -> Result<usize, AnchorDbError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM spatial_anchors", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[async_trait]
impl AnchorPersistence for AnchorDb {
    async fn load_anchors(&self, device_id: &str) -> Result<Vec<SpatialAnchor>, ArError> {
        Ok(self.load_for_device(device_id)?)
    }

    async fn save_anchor(&self, anchor: &SpatialAnchor) -> Result<(), ArError> {
        Ok(self.save(anchor)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn anchor_type_str(t: AnchorType) -> &'static str {
    match t {
        AnchorType::User => "user",
        AnchorType::System => "system",
    }
}

fn parse_timestamp(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::InvalidColumnType(idx, e.to_string(), rusqlite::types::Type::Text)
    })
}

fn row_to_anchor(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpatialAnchor> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::InvalidColumnType(0, e.to_string(), rusqlite::types::Type::Text)
    })?;
    let type_str: String = row.get(12)?;
    let anchor_type = match type_str.as_str() {
        "user" => AnchorType::User,
        "system" => AnchorType::System,
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                12,
                type_str,
                rusqlite::types::Type::Text,
            ));
        }
    };
    Ok(SpatialAnchor {
        id,
        device_id: row.get(1)?,
        ar_position: ArPoint3D::new(row.get(2)?, row.get(3)?, row.get(4)?),
        world_position: WorldPoint3D::new(row.get(5)?, row.get(6)?, row.get(7)?),
        rotation: ArRotation::new(row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?),
        anchor_type,
        confidence: row.get(13)?,
        created_at: parse_timestamp(14, row.get(14)?)?,
        updated_at: parse_timestamp(15, row.get(15)?)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use arsync_spatial::AnchorStore;
    use std::sync::Arc;

    fn anchor(device: &str, x: f64) -> SpatialAnchor {
        let now = Utc::now();
        SpatialAnchor {
            id: Uuid::new_v4(),
            device_id: device.to_string(),
            ar_position: ArPoint3D::new(x, 1.0, -2.0),
            world_position: WorldPoint3D::new(100.0 + x, 200.0, 10.0),
            rotation: ArRotation::new(0.0, 0.0, 0.0, 1.0),
            anchor_type: AnchorType::User,
            confidence: 0.75,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn save_and_get_roundtrip() {
        let db = AnchorDb::open_in_memory().unwrap();
        let a = anchor("ipad-1", 1.0);
        db.save(&a).unwrap();

        let back = db.get(a.id).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn get_missing_is_not_found() {
        let db = AnchorDb::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(db.get(id), Err(AnchorDbError::NotFound(missing)) if missing == id));
    }

    #[test]
    fn save_overwrites_existing_row() {
        let db = AnchorDb::open_in_memory().unwrap();
        let mut a = anchor("ipad-1", 1.0);
        db.save(&a).unwrap();

        a.ar_position = ArPoint3D::new(9.0, 9.0, 9.0);
        a.confidence = 0.2;
        db.save(&a).unwrap();

        assert_eq!(db.count().unwrap(), 1);
        let back = db.get(a.id).unwrap();
        assert_eq!(back.ar_position, ArPoint3D::new(9.0, 9.0, 9.0));
        assert_eq!(back.confidence, 0.2);
    }

    #[test]
    fn load_for_device_filters() {
        let db = AnchorDb::open_in_memory().unwrap();
        db.save(&anchor("ipad-1", 1.0)).unwrap();
        db.save(&anchor("ipad-1", 2.0)).unwrap();
        db.save(&anchor("hololens-2", 3.0)).unwrap();

        assert_eq!(db.load_for_device("ipad-1").unwrap().len(), 2);
        assert_eq!(db.load_for_device("hololens-2").unwrap().len(), 1);
        assert!(db.load_for_device("ghost").unwrap().is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("anchors.db");
        let path = path.to_string_lossy();
        let a = anchor("ipad-1", 4.0);

        {
            let db = AnchorDb::open(&path).unwrap();
            db.save(&a).unwrap();
        }

        let reopened = AnchorDb::open(&path).unwrap();
        assert_eq!(reopened.get(a.id).unwrap(), a);
    }

    #[tokio::test]
    async fn backs_an_anchor_store() {
        let db = Arc::new(AnchorDb::open_in_memory().unwrap());
        let store = AnchorStore::new(db.clone());
        let created = store
            .create_anchor(
                "ipad-1",
                ArPoint3D::origin(),
                WorldPoint3D::new(100.0, 200.0, 10.0),
                ArRotation::identity(),
                AnchorType::System,
            )
            .await
            .unwrap();

        assert_eq!(db.get(created.id).unwrap().anchor_type, AnchorType::System);

        let fresh = AnchorStore::new(db);
        assert_eq!(fresh.load_device("ipad-1").await.unwrap(), 1);
    }
}
