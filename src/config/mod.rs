//! Configuration system.
//!
//! Configuration is merged field-by-field from these tiers, lowest first:
//! 1. **Defaults** - `Config::default()`
//! 2. **Project** - `$CWD/context-store/config.yaml`
//! 3. **User** - `~/.context-store/config.yaml`
//! 4. **Explicit** - `--config` or `CONTEXT_STORE_CONFIG`
//! 5. **Environment** - variables below
//!
//! ## Environment Variables
//! - `CONTEXT_STORE_CONFIG` - Explicit config file (merged over the file tiers)
//! - `CONTEXT_STORE_DB_PATH` - Database path
//! - `CONTEXT_STORE_DIALECT` - Expected database dialect
//! - `CONTEXT_STORE_REBUILD_BATCH_SIZE` - Rows per batch when a migration rebuilds a table
//! - `CONTEXT_STORE_USER_DIR` - User config dir (default: `~/.context-store`)
//! - `CONTEXT_STORE_PROJECT_DIR` - Project config dir (default: `./context-store`)

mod loader;

pub use loader::{deep_merge, ConfigLoader, ConfigPaths, ConfigTier};

use crate::db::dialect::Dialect;
use crate::db::migrations::DEFAULT_REBUILD_BATCH_SIZE;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub migrations: MigrationConfig,
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Dialect the connection is expected to speak. Unset accepts whatever
    /// the connection reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,

    /// How long a writer waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            dialect: None,
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("context-store/store.db")
}

fn default_busy_timeout() -> u32 {
    5000
}

/// Defaults for snapshot imports; CLI flags override them per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_true")]
    pub skip_if_exists: bool,

    #[serde(default)]
    pub strict_cycles: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            skip_if_exists: true,
            strict_cycles: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_rebuild_batch_size")]
    pub rebuild_batch_size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            rebuild_batch_size: default_rebuild_batch_size(),
        }
    }
}

fn default_rebuild_batch_size() -> usize {
    DEFAULT_REBUILD_BATCH_SIZE
}

impl Config {
    /// Load configuration from all tiers, falling back to defaults.
    pub fn load_or_default() -> Self {
        match ConfigLoader::load() {
            Ok(loader) => loader.into_config(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load configuration, using defaults");
                let mut config = Self::default();
                config.apply_overrides(|key| std::env::var(key).ok());
                config
            }
        }
    }

    /// Apply environment-style overrides. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CONTEXT_STORE_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(dialect) = lookup("CONTEXT_STORE_DIALECT").and_then(|d| d.parse().ok()) {
            self.database.dialect = Some(dialect);
        }
        if let Some(size) = lookup("CONTEXT_STORE_REBUILD_BATCH_SIZE").and_then(|s| s.parse().ok())
        {
            self.migrations.rebuild_batch_size = size;
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.database.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database.path, PathBuf::from("context-store/store.db"));
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.database.dialect.is_none());
        assert!(config.import.skip_if_exists);
        assert!(!config.import.strict_cycles);
        assert_eq!(config.migrations.rebuild_batch_size, DEFAULT_REBUILD_BATCH_SIZE);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "database:\n  dialect: postgresql\nimport:\n  strict_cycles: true\n",
        )
        .unwrap();
        assert_eq!(config.database.dialect, Some(Dialect::Postgres));
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.import.strict_cycles);
        assert!(config.import.skip_if_exists);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("CONTEXT_STORE_DB_PATH", "/tmp/other.db"),
            ("CONTEXT_STORE_DIALECT", "mysql"),
            ("CONTEXT_STORE_REBUILD_BATCH_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.database.dialect, Some(Dialect::MySql));
        assert_eq!(config.migrations.rebuild_batch_size, DEFAULT_REBUILD_BATCH_SIZE);
    }

    #[test]
    fn test_ensure_db_dir() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = temp.path().join("nested/dir/store.db");
        config.ensure_db_dir().unwrap();
        assert!(temp.path().join("nested/dir").is_dir());
    }
}
