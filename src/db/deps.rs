//! Dependency operations and cycle detection.

use super::tasks::task_exists;
use super::{now_secs, Database};
use crate::error::{StoreError, StoreResult};
use crate::graph::{would_create_cycle, DependencyEdge};
use crate::types::TaskDependency;
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::debug;

/// All blocker -> blocked edges whose blocker belongs to `project_id`.
pub(crate) fn project_edges(
    conn: &Connection,
    project_id: i64,
) -> StoreResult<Vec<DependencyEdge<i64>>> {
    let mut stmt = conn.prepare(
        "SELECT d.blocker_task_id, d.blocked_task_id
         FROM task_dependencies d
         JOIN tasks t ON t.id = d.blocker_task_id
         WHERE t.project_id = ?1",
    )?;
    let edges = stmt
        .query_map(params![project_id], |row| {
            Ok(DependencyEdge::new(row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(edges)
}

fn project_of(conn: &Connection, task_id: i64) -> StoreResult<i64> {
    if !task_exists(conn, task_id)? {
        return Err(StoreError::TaskNotFound(task_id));
    }
    Ok(conn.query_row(
        "SELECT project_id FROM tasks WHERE id = ?1",
        params![task_id],
        |row| row.get(0),
    )?)
}

impl Database {
    /// Record that `blocker` blocks `blocked`.
    ///
    /// Both tasks must belong to the same project, so the project's edge
    /// set is the whole graph the new edge can join. The check and the
    /// insert share one write transaction, so two concurrent calls cannot
    /// together close a cycle. Adding an edge that already exists is a no-op.
    pub fn add_task_dependency(&self, blocker: i64, blocked: i64) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let project_id = project_of(&tx, blocker)?;
            let blocked_project = project_of(&tx, blocked)?;
            if blocked_project != project_id {
                return Err(StoreError::CrossProjectDependency {
                    blocker,
                    blocker_project: project_id,
                    blocked,
                    blocked_project,
                });
            }

            let edges = project_edges(&tx, project_id)?;
            if would_create_cycle(&edges, &DependencyEdge::new(blocker, blocked)) {
                return Err(StoreError::dependency_cycle(blocker, blocked));
            }

            tx.execute(
                "INSERT OR IGNORE INTO task_dependencies (blocker_task_id, blocked_task_id, created_at)
                 VALUES (?1, ?2, ?3)",
                params![blocker, blocked, now_secs()],
            )?;
            tx.commit()?;
            debug!(blocker, blocked, "Added dependency");
            Ok(())
        })
    }

    /// Remove an edge. Returns whether it existed.
    pub fn remove_task_dependency(&self, blocker: i64, blocked: i64) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM task_dependencies WHERE blocker_task_id = ?1 AND blocked_task_id = ?2",
                params![blocker, blocked],
            )?;
            Ok(removed > 0)
        })
    }

    /// Edges among the project's tasks, ordered by blocker then blocked.
    pub fn get_dependencies(&self, project_id: i64) -> StoreResult<Vec<TaskDependency>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.blocker_task_id, d.blocked_task_id, d.created_at
                 FROM task_dependencies d
                 JOIN tasks t ON t.id = d.blocker_task_id
                 WHERE t.project_id = ?1
                 ORDER BY d.blocker_task_id, d.blocked_task_id",
            )?;
            let deps = stmt
                .query_map(params![project_id], |row| {
                    Ok(TaskDependency {
                        blocker_task_id: row.get(0)?,
                        blocked_task_id: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(deps)
        })
    }

    /// Ids of the tasks that block `task_id`.
    pub fn blockers_of(&self, task_id: i64) -> StoreResult<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT blocker_task_id FROM task_dependencies
                 WHERE blocked_task_id = ?1 ORDER BY blocker_task_id",
            )?;
            let ids = stmt
                .query_map(params![task_id], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}
