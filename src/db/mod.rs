//! Database layer for the context store.

pub mod deps;
pub mod dialect;
pub mod export;
pub mod import;
pub mod migrations;
pub mod projects;
pub mod remap;
pub mod rows;
pub mod tables;
pub mod tasks;

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use dialect::{Dialect, DialectAdapter};
use migrations::{
    builtin, Migration, MigrationRunReport, MigrationRunner, MigrationStatus,
    DEFAULT_REBUILD_BATCH_SIZE,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    dialect: DialectAdapter,
    rebuild_batch_size: usize,
}

impl Database {
    /// Open or create the database at the given path and apply pending
    /// migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = Self::open_unmigrated(path)?;
        db.migrate()?;
        Ok(db)
    }

    /// Open the database described by `config` and apply pending migrations.
    pub fn open_with_config(config: &Config) -> StoreResult<Self> {
        let conn = Connection::open(&config.database.path)?;
        let mut db = Self::from_connection(conn, config.database.busy_timeout_ms, true)?;
        if let Some(expected) = config.database.dialect {
            db.require_dialect(expected)?;
        }
        db.rebuild_batch_size = config.migrations.rebuild_batch_size.max(1);
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database with the full schema (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let db = Self::open_in_memory_unmigrated()?;
        db.migrate()?;
        Ok(db)
    }

    /// Open without touching the schema.
    pub fn open_unmigrated<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT_MS, true)
    }

    pub fn open_in_memory_unmigrated() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT_MS, false)
    }

    fn from_connection(conn: Connection, busy_timeout_ms: u32, wal: bool) -> StoreResult<Self> {
        if wal {
            // Enable WAL mode for concurrent readers
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout={};",
            busy_timeout_ms
        ))?;
        let dialect = DialectAdapter::detect(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dialect,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        })
    }

    fn require_dialect(&self, expected: Dialect) -> StoreResult<()> {
        if self.dialect.dialect() != expected {
            return Err(StoreError::unsupported(
                expected.name(),
                format!("connection speaks {}", self.dialect.dialect()),
            ));
        }
        Ok(())
    }

    pub fn dialect(&self) -> &DialectAdapter {
        &self.dialect
    }

    pub fn migration_runner(&self) -> MigrationRunner {
        MigrationRunner::new(self.dialect).with_batch_size(self.rebuild_batch_size)
    }

    /// Apply pending built-in migrations.
    pub fn migrate(&self) -> StoreResult<MigrationRunReport> {
        let report = self.run_migrations(&builtin::all_migrations())?;
        if report.is_noop() {
            debug!("Schema up to date");
        } else {
            info!(applied = report.applied.len(), "Schema migrated");
        }
        Ok(report)
    }

    /// Apply pending descriptors from an explicit list.
    pub fn run_migrations(&self, migrations: &[Migration]) -> StoreResult<MigrationRunReport> {
        let runner = self.migration_runner();
        self.with_conn_mut(|conn| runner.apply_pending(conn, migrations))
    }

    pub fn migration_status(&self) -> StoreResult<Vec<MigrationStatus>> {
        let runner = self.migration_runner();
        self.with_conn(|conn| runner.status(conn, &builtin::all_migrations()))
    }

    /// Revert the most recent batch of built-in migrations.
    pub fn rollback_last_batch(&self) -> StoreResult<Vec<String>> {
        let runner = self.migration_runner();
        self.with_conn_mut(|conn| runner.revert_last_batch(conn, &builtin::all_migrations()))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self.lock();
        f(&mut conn)
    }
}

/// Current time in epoch seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
