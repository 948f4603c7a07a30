//! Project lookup and creation.

use super::{now_secs, Database};
use crate::error::{StoreError, StoreResult};
use crate::types::Project;
use regex_lite::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::LazyLock;

pub const MAX_PROJECT_NAME_LEN: usize = 64;

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("project name pattern compiles"));

/// Project names are 1-64 characters of ASCII letters, digits, `_` and `-`.
pub fn validate_project_name(name: &str) -> StoreResult<()> {
    if name.is_empty() {
        return Err(StoreError::invalid_project_name(name, "name is empty"));
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(StoreError::invalid_project_name(
            name,
            format!("longer than {} characters", MAX_PROJECT_NAME_LEN),
        ));
    }
    if !PROJECT_NAME.is_match(name) {
        return Err(StoreError::invalid_project_name(
            name,
            "only letters, digits, '_' and '-' are allowed",
        ));
    }
    Ok(())
}

fn parse_project_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        display_name: row.get("display_name")?,
        detection_source: row.get("detection_source")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_project_by_name(conn: &Connection, name: &str) -> StoreResult<Option<Project>> {
    let project = conn
        .query_row(
            "SELECT id, name, display_name, detection_source, created_at
             FROM projects WHERE name = ?1",
            params![name],
            parse_project_row,
        )
        .optional()?;
    Ok(project)
}

/// Insert a project row. Fails with `ProjectConflict` if the name is taken.
pub fn insert_project(
    conn: &Connection,
    name: &str,
    display_name: Option<&str>,
    detection_source: &str,
) -> StoreResult<Project> {
    validate_project_name(name)?;
    if find_project_by_name(conn, name)?.is_some() {
        return Err(StoreError::ProjectConflict(name.to_string()));
    }
    let created_at = now_secs();
    conn.execute(
        "INSERT INTO projects (name, display_name, detection_source, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![name, display_name, detection_source, created_at],
    )?;
    Ok(Project {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        display_name: display_name.map(str::to_string),
        detection_source: detection_source.to_string(),
        created_at,
    })
}

impl Database {
    pub fn create_project(&self, name: &str, display_name: Option<&str>) -> StoreResult<Project> {
        self.with_conn(|conn| insert_project(conn, name, display_name, "manual"))
    }

    pub fn get_project(&self, name: &str) -> StoreResult<Option<Project>> {
        self.with_conn(|conn| find_project_by_name(conn, name))
    }

    pub fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, display_name, detection_source, created_at
                 FROM projects ORDER BY name",
            )?;
            let projects = stmt
                .query_map([], parse_project_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(projects)
        })
    }
}
