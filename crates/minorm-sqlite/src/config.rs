//! SQLite connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use minorm_core::{Error, Result};
use serde::Deserialize;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqliteLocation {
    /// A private in-memory database.
    Memory,
    /// A database file, created if missing.
    File(PathBuf),
}

/// Configuration for [`SqliteConnection`](crate::SqliteConnection).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database location.
    pub location: SqliteLocation,
    /// Enforce foreign key constraints (`PRAGMA foreign_keys`).
    pub foreign_keys: bool,
    /// How long to wait on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            location: SqliteLocation::Memory,
            foreign_keys: true,
            busy_timeout_ms: 5_000,
        }
    }
}

impl SqliteConfig {
    /// In-memory database with default settings.
    pub fn memory() -> Self {
        Self::default()
    }

    /// File-backed database with default settings.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: SqliteLocation::File(path.into()),
            ..Self::default()
        }
    }

    /// Set foreign key enforcement.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Set the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The busy timeout as a `Duration`.
    pub fn busy_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Connection(format!("invalid SQLite configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SqliteConfig::default();
        assert_eq!(config.location, SqliteLocation::Memory);
        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_json() {
        let config =
            SqliteConfig::from_json(r#"{"location": {"file": "/tmp/demo.db"}, "foreign_keys": false}"#)
                .unwrap();
        assert_eq!(config.location, SqliteLocation::File("/tmp/demo.db".into()));
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, 5_000);

        assert!(SqliteConfig::from_json("{\"location\": 3}").is_err());
    }

    #[test]
    fn test_builders() {
        let config = SqliteConfig::file("a.db")
            .foreign_keys(false)
            .busy_timeout(Duration::from_millis(250));
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(!config.foreign_keys);
    }
}
