//! Versioned schema migrations with an applied-migrations ledger.
//!
//! Each descriptor runs at most once per database. The ledger table
//! `schema_migrations` records which ones have run and in which batch; a
//! descriptor and its ledger row commit together, so a failure leaves the
//! ledger untouched for that descriptor while earlier ones of the same run
//! stay applied.
//!
//! # Example
//!
//! ```ignore
//! use context_store::db::migrations::{builtin, MigrationRunner};
//!
//! let runner = MigrationRunner::new(adapter);
//! let report = runner.apply_pending(&mut conn, &builtin::all_migrations())?;
//! println!("applied {:?}", report.applied);
//! ```

pub mod builtin;
pub mod rebuild;

use crate::db::dialect::{Dialect, DialectAdapter};
use crate::db::now_secs;
use crate::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

pub use rebuild::{
    apply_constraint_change, rebuild_table, ConstraintChange, ConstraintPath, RebuildReport,
    TableRebuild,
};

/// Name of the applied-migrations ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// Default number of rows per reinsert statement during a table rebuild.
pub const DEFAULT_REBUILD_BATCH_SIZE: usize = 100;

/// Handles passed to a migration body.
pub struct MigrationContext<'a> {
    pub conn: &'a Connection,
    pub dialect: &'a DialectAdapter,
    pub rebuild_batch_size: usize,
}

/// A migration body. Runs inside the descriptor's transaction when the
/// dialect has transactional DDL.
pub type MigrationFn = fn(&MigrationContext<'_>) -> StoreResult<()>;

/// A migration descriptor.
#[derive(Clone)]
pub struct Migration {
    /// Fixed-width `YYYYMMDDHHMMSS_name`; lexical order is application order.
    pub id: &'static str,
    pub description: &'static str,
    pub up: MigrationFn,
    pub down: MigrationFn,
    /// Turn referential integrity enforcement off around this descriptor.
    pub disable_foreign_keys: bool,
}

impl Migration {
    pub fn new(id: &'static str, description: &'static str, up: MigrationFn, down: MigrationFn) -> Self {
        Self {
            id,
            description,
            up,
            down,
            disable_foreign_keys: false,
        }
    }

    pub fn without_foreign_keys(mut self) -> Self {
        self.disable_foreign_keys = true;
        self
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("disable_foreign_keys", &self.disable_foreign_keys)
            .finish()
    }
}

/// A row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: String,
    pub description: String,
    pub applied_at: i64,
    pub batch: i64,
}

/// Applied state of a known descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub id: String,
    pub description: String,
    pub applied_at: Option<i64>,
    pub batch: Option<i64>,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Outcome of `apply_pending`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationRunReport {
    /// Batch number assigned to this run, absent when nothing was pending.
    pub batch: Option<i64>,
    pub applied: Vec<String>,
    /// Descriptors already present in the ledger.
    pub already_applied: usize,
}

impl MigrationRunReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Applies and reverts migration descriptors against one connection.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    adapter: DialectAdapter,
    rebuild_batch_size: usize,
}

impl MigrationRunner {
    pub fn new(adapter: DialectAdapter) -> Self {
        Self {
            adapter,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.rebuild_batch_size = size.max(1);
        self
    }

    pub fn adapter(&self) -> &DialectAdapter {
        &self.adapter
    }

    /// Create the ledger table if it does not exist.
    pub fn ensure_ledger(&self, conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id VARCHAR(255) NOT NULL PRIMARY KEY,
                description VARCHAR(255) NOT NULL,
                applied_at BIGINT NOT NULL,
                batch INTEGER NOT NULL
            )",
            LEDGER_TABLE
        ))?;
        Ok(())
    }

    pub fn ledger(&self, conn: &Connection) -> StoreResult<Vec<LedgerEntry>> {
        self.ensure_ledger(conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, description, applied_at, batch FROM {} ORDER BY id",
            LEDGER_TABLE
        ))?;
        let entries = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    description: row.get(1)?,
                    applied_at: row.get(2)?,
                    batch: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn applied_ids(&self, conn: &Connection) -> StoreResult<Vec<String>> {
        Ok(self.ledger(conn)?.into_iter().map(|e| e.id).collect())
    }

    /// Apply every descriptor whose id is absent from the ledger, in id order.
    ///
    /// Stops at the first failure; the error carries the failing id.
    pub fn apply_pending(
        &self,
        conn: &mut Connection,
        migrations: &[Migration],
    ) -> StoreResult<MigrationRunReport> {
        let ordered = sorted_unique(migrations)?;
        self.ensure_ledger(conn)?;

        let applied: HashSet<String> = self.applied_ids(conn)?.into_iter().collect();
        let pending: Vec<&Migration> = ordered
            .iter()
            .copied()
            .filter(|m| !applied.contains(m.id))
            .collect();

        let mut report = MigrationRunReport {
            already_applied: ordered.len() - pending.len(),
            ..Default::default()
        };

        if pending.is_empty() {
            debug!(known = ordered.len(), "No pending migrations");
            return Ok(report);
        }

        let batch = self.next_batch(conn)?;
        report.batch = Some(batch);
        info!(count = pending.len(), batch, "Applying migrations");

        for migration in pending {
            self.run_guarded(conn, migration, |runner, conn| {
                runner.apply_one(conn, migration, batch)
            })
            .map_err(|e| {
                warn!(id = migration.id, error = %e, "Migration failed");
                StoreError::migration(migration.id, e)
            })?;
            info!(id = migration.id, "Applied migration");
            report.applied.push(migration.id.to_string());
        }

        Ok(report)
    }

    /// Revert every descriptor of the highest batch, newest first.
    pub fn revert_last_batch(
        &self,
        conn: &mut Connection,
        migrations: &[Migration],
    ) -> StoreResult<Vec<String>> {
        self.ensure_ledger(conn)?;
        let last_batch: Option<i64> = conn.query_row(
            &format!("SELECT MAX(batch) FROM {}", LEDGER_TABLE),
            [],
            |row| row.get(0),
        )?;
        let Some(batch) = last_batch else {
            debug!("Nothing to revert");
            return Ok(Vec::new());
        };

        let ids: Vec<String> = {
            let mut stmt = conn.prepare(&format!(
                "SELECT id FROM {} WHERE batch = ?1 ORDER BY id DESC",
                LEDGER_TABLE
            ))?;
            stmt.query_map(params![batch], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut reverted = Vec::with_capacity(ids.len());
        for id in ids {
            let migration = migrations.iter().find(|m| m.id == id).ok_or_else(|| {
                StoreError::SchemaMismatch(format!(
                    "applied migration {} has no registered descriptor",
                    id
                ))
            })?;
            self.run_guarded(conn, migration, |runner, conn| {
                runner.revert_one(conn, migration)
            })
            .map_err(|e| StoreError::migration(migration.id, e))?;
            info!(id = migration.id, batch, "Reverted migration");
            reverted.push(id);
        }

        Ok(reverted)
    }

    /// Applied state of every known descriptor, in id order.
    pub fn status(
        &self,
        conn: &Connection,
        migrations: &[Migration],
    ) -> StoreResult<Vec<MigrationStatus>> {
        let ordered = sorted_unique(migrations)?;
        let ledger: BTreeMap<String, LedgerEntry> = self
            .ledger(conn)?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        Ok(ordered
            .into_iter()
            .map(|m| {
                let entry = ledger.get(m.id);
                MigrationStatus {
                    id: m.id.to_string(),
                    description: m.description.to_string(),
                    applied_at: entry.map(|e| e.applied_at),
                    batch: entry.map(|e| e.batch),
                }
            })
            .collect())
    }

    fn next_batch(&self, conn: &Connection) -> StoreResult<i64> {
        let current: Option<i64> = conn.query_row(
            &format!("SELECT MAX(batch) FROM {}", LEDGER_TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(current.unwrap_or(0) + 1)
    }

    /// Run `body`, toggling referential integrity off around it when the
    /// descriptor asks for it. Enforcement is restored on both paths.
    fn run_guarded<F>(&self, conn: &mut Connection, migration: &Migration, body: F) -> StoreResult<()>
    where
        F: FnOnce(&Self, &mut Connection) -> StoreResult<()>,
    {
        if !migration.disable_foreign_keys {
            return body(self, &mut *conn);
        }

        // SQLite ignores this pragma inside a transaction, so it is set here.
        self.adapter.set_foreign_key_checks(&*conn, false)?;
        let result = body(self, &mut *conn);
        let restored = self.adapter.set_foreign_key_checks(&*conn, true);
        result.and(restored)
    }

    fn apply_one(&self, conn: &mut Connection, migration: &Migration, batch: i64) -> StoreResult<()> {
        let step = |conn: &Connection| -> StoreResult<()> {
            let ctx = self.context(conn);
            (migration.up)(&ctx)?;
            if migration.disable_foreign_keys {
                self.audit_foreign_keys(conn)?;
            }
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, description, applied_at, batch) VALUES (?1, ?2, ?3, ?4)",
                    LEDGER_TABLE
                ),
                params![migration.id, migration.description, now_secs(), batch],
            )?;
            Ok(())
        };
        self.in_transaction(conn, step)
    }

    fn revert_one(&self, conn: &mut Connection, migration: &Migration) -> StoreResult<()> {
        let step = |conn: &Connection| -> StoreResult<()> {
            let ctx = self.context(conn);
            (migration.down)(&ctx)?;
            if migration.disable_foreign_keys {
                self.audit_foreign_keys(conn)?;
            }
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", LEDGER_TABLE),
                params![migration.id],
            )?;
            Ok(())
        };
        self.in_transaction(conn, step)
    }

    fn in_transaction<F>(&self, conn: &mut Connection, step: F) -> StoreResult<()>
    where
        F: FnOnce(&Connection) -> StoreResult<()>,
    {
        if !self.adapter.capabilities().transactional_ddl {
            // DDL auto-commits on this engine; only the ledger write is atomic.
            return step(conn);
        }
        let tx = conn.transaction()?;
        step(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn context<'a>(&'a self, conn: &'a Connection) -> MigrationContext<'a> {
        MigrationContext {
            conn,
            dialect: &self.adapter,
            rebuild_batch_size: self.rebuild_batch_size,
        }
    }

    /// Fail if any row violates a foreign key. Runs before commit.
    fn audit_foreign_keys(&self, conn: &Connection) -> StoreResult<()> {
        if self.adapter.dialect() != Dialect::Sqlite {
            return Ok(());
        }
        let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
        let violations: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        match violations.first() {
            None => Ok(()),
            Some((table, parent)) => Err(StoreError::SchemaMismatch(format!(
                "{} foreign key violation(s); first in '{}' referencing '{}'",
                violations.len(),
                table,
                parent
            ))),
        }
    }
}

/// Sort descriptors by id and reject duplicates.
fn sorted_unique(migrations: &[Migration]) -> StoreResult<Vec<&Migration>> {
    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(b.id));
    for pair in ordered.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(StoreError::SchemaMismatch(format!(
                "duplicate migration id {}",
                pair[0].id
            )));
        }
    }
    Ok(ordered)
}

/// Whether `table` exists (SQLite catalog).
pub fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Column names of `table` in declaration order (SQLite catalog).
pub fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(columns)
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c == column))
}
