//! Runtime configuration – reads/writes `~/.arsync/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use arsync_middleware::StreamConfig;
use arsync_reconcile::SyncConfig;
use arsync_types::CoordinateSystem;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn default_max_sessions() -> usize {
    256
}

/// Persisted runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Upper bound on concurrently open sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Axis convention for sessions that do not state one.
    #[serde(default)]
    pub coordinate_system: CoordinateSystem,

    /// SQLite file for anchors.  Anchors live in memory only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_db_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            sync: SyncConfig::default(),
            max_sessions: default_max_sessions(),
            coordinate_system: CoordinateSystem::default(),
            anchor_db_path: None,
        }
    }
}

/// Return the path to `~/.arsync/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".arsync").join("config.toml")
}

/// Load the config from the default location.  `Ok(None)` if there is no file.
pub fn load() -> Result<Option<Config>, ConfigError> {
    load_from(&config_path())
}

/// Load the config from `path`, then apply environment overrides.
pub fn load_from(path: &Path) -> Result<Option<Config>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cfg: Config = toml::from_str(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ARSYNC_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ARSYNC_BUFFER_CAPACITY` | `stream.buffer_capacity` |
/// | `ARSYNC_FLUSH_INTERVAL_MS` | `stream.flush_interval_ms` |
/// | `ARSYNC_SYNC_INTERVAL_MS` | `sync.interval_ms` |
/// | `ARSYNC_MAX_SESSIONS` | `max_sessions` |
/// | `ARSYNC_ANCHOR_DB` | `anchor_db_path` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_number("ARSYNC_BUFFER_CAPACITY") {
        cfg.stream.buffer_capacity = v;
    }
    if let Some(v) = env_number("ARSYNC_FLUSH_INTERVAL_MS") {
        cfg.stream.flush_interval_ms = v;
    }
    if let Some(v) = env_number("ARSYNC_SYNC_INTERVAL_MS") {
        cfg.sync.interval_ms = v;
    }
    if let Some(v) = env_number("ARSYNC_MAX_SESSIONS") {
        cfg.max_sessions = v;
    }
    if let Ok(v) = std::env::var("ARSYNC_ANCHOR_DB")
        && !v.is_empty()
    {
        cfg.anchor_db_path = Some(v);
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Save the config to the default location.
pub fn save(cfg: &Config) -> Result<(), ConfigError> {
    save_to(cfg, &config_path())
}

/// Save the config as pretty TOML, creating the parent directory.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let raw = toml::to_string_pretty(cfg)?;
    fs::write(path, raw).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.stream.buffer_capacity, 100);
        assert_eq!(cfg.stream.flush_interval_ms, 50);
        assert_eq!(cfg.stream.interpolation_history, 1000);
        assert_eq!(cfg.stream.prediction_history, 100);
        assert_eq!(cfg.stream.subscriber_queue, 64);
        assert_eq!(cfg.sync.interval_ms, 5000);
        assert_eq!(cfg.sync.max_recorded_errors, 16);
        assert_eq!(cfg.max_sessions, 256);
        assert_eq!(cfg.coordinate_system, CoordinateSystem::ArKit);
        assert!(cfg.anchor_db_path.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            coordinate_system = "unity"

            [stream]
            subscriber_queue = 8
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.coordinate_system, CoordinateSystem::Unity);
        assert_eq!(cfg.stream.subscriber_queue, 8);
        assert_eq!(cfg.stream.interpolation_history, 1000);
        assert_eq!(cfg.sync.max_recorded_errors, 16);
    }

    #[test]
    fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.coordinate_system = CoordinateSystem::ZUp;
        cfg.stream.interpolation_history = 42;
        cfg.sync.max_recorded_errors = 3;
        save_to(&cfg, &path).expect("save");

        // Only fields no environment override touches are compared.
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.coordinate_system, CoordinateSystem::ZUp);
        assert_eq!(loaded.stream.interpolation_history, 42);
        assert_eq!(loaded.sync.max_recorded_errors, 3);
    }

    #[test]
    fn config_path_points_to_arsync_dir() {
        let p = config_path_for_home("/home/surveyor");
        assert!(p.to_string_lossy().contains(".arsync"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_sessions = \"many\"").expect("write");
        assert!(matches!(load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn apply_env_overrides_changes_stream_and_sync() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("ARSYNC_BUFFER_CAPACITY", "250");
            std::env::set_var("ARSYNC_SYNC_INTERVAL_MS", "750");
            std::env::set_var("ARSYNC_ANCHOR_DB", "/var/lib/arsync/anchors.db");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.stream.buffer_capacity, 250);
        assert_eq!(cfg.sync.interval_ms, 750);
        assert_eq!(cfg.anchor_db_path.as_deref(), Some("/var/lib/arsync/anchors.db"));
        unsafe {
            std::env::remove_var("ARSYNC_BUFFER_CAPACITY");
            std::env::remove_var("ARSYNC_SYNC_INTERVAL_MS");
            std::env::remove_var("ARSYNC_ANCHOR_DB");
        }
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_number() {
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("ARSYNC_MAX_SESSIONS", "lots") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.max_sessions, 256);
        unsafe { std::env::remove_var("ARSYNC_MAX_SESSIONS") };
    }

    #[test]
    fn apply_env_overrides_changes_flush_interval() {
        // SAFETY: this variable is only touched by this test.
        unsafe { std::env::set_var("ARSYNC_FLUSH_INTERVAL_MS", " 20 ") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.stream.flush_interval_ms, 20);
        unsafe { std::env::remove_var("ARSYNC_FLUSH_INTERVAL_MS") };
    }
}
