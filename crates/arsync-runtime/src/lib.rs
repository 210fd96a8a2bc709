//! `arsync-runtime` – process-level wiring.
//!
//! # Modules
//!
//! - [`config`] – [`Config`][config::Config]: TOML configuration at
//!   `~/.arsync/config.toml` with `ARSYNC_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.
//! - [`runtime`] – [`ArRuntime`][runtime::ArRuntime]: owns the anchor store,
//!   the stream manager and the sync engine, and exposes the session-level
//!   control surface.

pub mod config;
pub mod runtime;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use runtime::ArRuntime;
pub use telemetry::{TracerProviderGuard, init_tracing};
