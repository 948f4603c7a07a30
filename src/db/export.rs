//! Export of one project into a snapshot.
//!
//! Each table is queried with deterministic ordering to produce stable,
//! diffable output. Rows keep their database ids, which become the snapshot's
//! source ids; the owning `project_id` column is left out since the importer
//! supplies its own.

use super::projects::find_project_by_name;
use super::rows::query_json_rows;
use super::tables::{
    JUNCTION_TABLES, MASTER_TABLES, TASK_DEPENDENCIES_TABLE, TRANSACTION_TABLES,
};
use super::Database;
use crate::error::{StoreError, StoreResult};
use crate::export::{get_table_ordering, Snapshot, SnapshotProject};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::info;

const OMITTED: &[&str] = &["project_id"];

impl Database {
    /// Export the named project.
    pub fn export_project(&self, name: &str) -> StoreResult<Snapshot> {
        self.with_conn(|conn| {
            let project = find_project_by_name(conn, name)?
                .ok_or_else(|| StoreError::ProjectNotFound(name.to_string()))?;

            let mut snapshot = Snapshot::new(&project.name);
            snapshot.projects.push(SnapshotProject {
                name: project.name.clone(),
                display_name: project.display_name.clone(),
            });

            for table in MASTER_TABLES {
                let rows = if table.is_project_scoped() {
                    export_owned(conn, table.name, project.id)?
                } else {
                    export_referenced_keys(conn, table.name, project.id)?
                };
                snapshot.master_tables.insert(table.name.to_string(), rows);
            }

            for table in TRANSACTION_TABLES {
                let rows = if table.project_owned {
                    export_owned(conn, table.name, project.id)?
                } else if table.name == TASK_DEPENDENCIES_TABLE {
                    export_edges(conn, project.id)?
                } else {
                    continue;
                };
                snapshot.transaction_tables.insert(table.name.to_string(), rows);
            }

            for junction in JUNCTION_TABLES {
                let sql = format!(
                    "SELECT * FROM {table} WHERE {col} IN
                         (SELECT id FROM {parent} WHERE project_id = ?1)
                     {order}",
                    table = junction.name,
                    col = junction.left.column,
                    parent = junction.left.references,
                    order = get_table_ordering(junction.name),
                );
                let rows = query_json_rows(conn, &sql, params![project.id], OMITTED)?;
                snapshot.junction_tables.insert(junction.name.to_string(), rows);
            }

            info!(project = %name, rows = snapshot.row_count(), "Exported project");
            Ok(snapshot)
        })
    }
}

fn export_owned(conn: &Connection, table: &str, project_id: i64) -> StoreResult<Vec<Value>> {
    let sql = format!(
        "SELECT * FROM {} WHERE project_id = ?1 {}",
        table,
        get_table_ordering(table)
    );
    query_json_rows(conn, &sql, params![project_id], OMITTED)
}

/// Global rows are shared between projects; only those the project's
/// decisions point at are exported.
fn export_referenced_keys(
    conn: &Connection,
    table: &str,
    project_id: i64,
) -> StoreResult<Vec<Value>> {
    let sql = format!(
        "SELECT * FROM {} WHERE id IN
             (SELECT key_id FROM decisions WHERE project_id = ?1)
         {}",
        table,
        get_table_ordering(table)
    );
    query_json_rows(conn, &sql, params![project_id], OMITTED)
}

fn export_edges(conn: &Connection, project_id: i64) -> StoreResult<Vec<Value>> {
    let sql = format!(
        "SELECT * FROM {} WHERE blocker_task_id IN
             (SELECT id FROM tasks WHERE project_id = ?1)
         {}",
        TASK_DEPENDENCIES_TABLE,
        get_table_ordering(TASK_DEPENDENCIES_TABLE)
    );
    query_json_rows(conn, &sql, params![project_id], OMITTED)
}
