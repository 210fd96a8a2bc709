//! `arsync-memory` – durable storage for spatial anchors.
//!
//! # Modules
//!
//! - [`anchor_db`] – [`AnchorDb`][anchor_db::AnchorDb]: SQLite-backed
//!   implementation of the
//!   [`AnchorPersistence`][arsync_spatial::AnchorPersistence] contract.

pub mod anchor_db;

pub use anchor_db::{AnchorDb, AnchorDbError};
