//! Task CRUD operations.

use super::{now_secs, Database};
use crate::error::{StoreError, StoreResult};
use crate::types::{Task, TASK_STATUSES};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TASK_COLUMNS: &str =
    "id, project_id, title, description, status, priority, origin, created_at, updated_at";

pub(crate) fn parse_task_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        priority: row.get("priority")?,
        origin: row.get("origin")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub(crate) fn task_exists(conn: &Connection, task_id: i64) -> StoreResult<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", params![task_id], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

impl Database {
    pub fn create_task(
        &self,
        project_id: i64,
        title: &str,
        description: Option<&str>,
    ) -> StoreResult<Task> {
        let now = now_secs();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (project_id, title, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![project_id, title, description, now],
            )?;
            let id = conn.last_insert_rowid();
            let task = conn.query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id],
                parse_task_row,
            )?;
            Ok(task)
        })
    }

    pub fn get_task(&self, task_id: i64) -> StoreResult<Option<Task>> {
        self.with_conn(|conn| {
            let task = conn
                .query_row(
                    &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                    params![task_id],
                    parse_task_row,
                )
                .optional()?;
            Ok(task)
        })
    }

    pub fn list_tasks(&self, project_id: i64) -> StoreResult<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks WHERE project_id = ?1 ORDER BY id",
                TASK_COLUMNS
            ))?;
            let tasks = stmt
                .query_map(params![project_id], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    pub fn set_task_status(&self, task_id: i64, status: &str) -> StoreResult<()> {
        if !TASK_STATUSES.contains(&status) {
            return Err(StoreError::SchemaMismatch(format!(
                "unknown task status '{}'",
                status
            )));
        }
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, now_secs(), task_id],
            )?;
            if changed == 0 {
                return Err(StoreError::TaskNotFound(task_id));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_list_tasks() {
        let db = Database::open_in_memory().unwrap();
        let project = db.create_project("alpha", None).unwrap();
        let a = db.create_task(project.id, "first", None).unwrap();
        let b = db.create_task(project.id, "second", Some("details")).unwrap();

        assert_eq!(a.status, "todo");
        assert_eq!(a.origin, "local");
        assert_eq!(b.description.as_deref(), Some("details"));

        let tasks = db.list_tasks(project.id).unwrap();
        assert_eq!(tasks, vec![a.clone(), b]);
        assert_eq!(db.get_task(a.id).unwrap(), Some(a));
    }

    #[test]
    fn test_task_requires_existing_project() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.create_task(999, "orphan", None),
            Err(StoreError::Database(_))
        ));
    }

    #[test]
    fn test_set_task_status() {
        let db = Database::open_in_memory().unwrap();
        let project = db.create_project("alpha", None).unwrap();
        let task = db.create_task(project.id, "t", None).unwrap();

        db.set_task_status(task.id, "done").unwrap();
        assert_eq!(db.get_task(task.id).unwrap().unwrap().status, "done");
        assert!(db.set_task_status(task.id, "exploded").is_err());
        assert!(matches!(
            db.set_task_status(12345, "done"),
            Err(StoreError::TaskNotFound(12345))
        ));
    }
}
