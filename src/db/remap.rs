//! Source-to-target identifier translation during import.
//!
//! Snapshot rows carry the identifiers of the database they came from. The
//! remapper resolves each master-table row to a row in the target database,
//! reusing a project-scoped row with the same natural key when one exists,
//! and remembers the answer so every later reference to the same source id
//! lands on the same target id.

use super::rows::{get_string, insert_row, JsonRow};
use super::tables::{EntityClass, MasterTable};
use crate::error::StoreResult;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::trace;

/// Per-table source id -> target id map.
#[derive(Debug, Default, Clone)]
pub struct IdentityMapping {
    tables: HashMap<String, HashMap<i64, i64>>,
}

impl IdentityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, source_id: i64) -> Option<i64> {
        self.tables.get(table).and_then(|m| m.get(&source_id)).copied()
    }

    pub fn insert(&mut self, table: &str, source_id: i64, target_id: i64) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(source_id, target_id);
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(HashMap::is_empty)
    }
}

/// How a master-table row was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A new row was inserted.
    Created(i64),
    /// An existing row with the same natural key was reused.
    Reused(i64),
    /// The source id had already been resolved earlier in this import.
    Memoized(i64),
}

impl Resolution {
    pub fn id(self) -> i64 {
        match self {
            Resolution::Created(id) | Resolution::Reused(id) | Resolution::Memoized(id) => id,
        }
    }
}

/// Resolves source identifiers for one import into one target project.
pub struct IdentityRemapper<'a> {
    conn: &'a Connection,
    project_id: i64,
    mapping: IdentityMapping,
}

impl<'a> IdentityRemapper<'a> {
    pub fn new(conn: &'a Connection, project_id: i64) -> Self {
        Self {
            conn,
            project_id,
            mapping: IdentityMapping::new(),
        }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub fn project_id(&self) -> i64 {
        self.project_id
    }

    pub fn mapping(&self) -> &IdentityMapping {
        &self.mapping
    }

    /// Target id previously recorded for `source_id`, if any.
    pub fn translate(&self, table: &str, source_id: i64) -> Option<i64> {
        self.mapping.get(table, source_id)
    }

    /// Record a translation for a row the caller inserted itself.
    pub fn record(&mut self, table: &str, source_id: i64, target_id: i64) {
        self.mapping.insert(table, source_id, target_id);
    }

    /// Resolve a master-table row to a target id, inserting it if needed.
    pub fn resolve(
        &mut self,
        table: &MasterTable,
        source_id: i64,
        row: &JsonRow,
    ) -> StoreResult<Resolution> {
        if let Some(id) = self.mapping.get(table.name, source_id) {
            return Ok(Resolution::Memoized(id));
        }

        let resolution = match table.class {
            EntityClass::Global => {
                Resolution::Created(insert_row(self.conn, table.name, table.columns, row, &[])?)
            }
            EntityClass::ProjectScoped { natural_key } => {
                let key = get_string(row, natural_key)?;
                match self.find_scoped(table.name, natural_key, &key)? {
                    Some(id) => Resolution::Reused(id),
                    None => Resolution::Created(insert_row(
                        self.conn,
                        table.name,
                        table.columns,
                        row,
                        &[("project_id", SqlValue::Integer(self.project_id))],
                    )?),
                }
            }
        };

        trace!(table = table.name, source_id, target_id = resolution.id(), "Resolved identity");
        self.mapping.insert(table.name, source_id, resolution.id());
        Ok(resolution)
    }

    fn find_scoped(&self, table: &str, natural_key: &str, key: &str) -> StoreResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE project_id = ?1 AND {} = ?2",
                    table, natural_key
                ),
                params![self.project_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::projects::insert_project;
    use crate::db::tables::master_table;
    use crate::db::Database;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> JsonRow {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_project_scoped_reuse_and_memo() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let project = insert_project(conn, "alpha", None, "manual")?;
            let files = master_table("files").unwrap();
            let mut remapper = IdentityRemapper::new(conn, project.id);

            let first = remapper.resolve(files, 10, &obj(json!({"id": 10, "path": "src/a.rs"})))?;
            let again = remapper.resolve(files, 10, &obj(json!({"id": 10, "path": "src/a.rs"})))?;
            let same_key = remapper.resolve(files, 11, &obj(json!({"id": 11, "path": "src/a.rs"})))?;

            assert!(matches!(first, Resolution::Created(_)));
            assert_eq!(again, Resolution::Memoized(first.id()));
            assert_eq!(same_key, Resolution::Reused(first.id()));
            assert_eq!(remapper.translate("files", 11), Some(first.id()));
            assert_eq!(remapper.mapping().len("files"), 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_global_rows_always_created() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let project = insert_project(conn, "alpha", None, "manual")?;
            let keys = master_table("context_keys").unwrap();
            let mut remapper = IdentityRemapper::new(conn, project.id);

            let a = remapper.resolve(keys, 1, &obj(json!({"id": 1, "key_name": "db"})))?;
            let b = remapper.resolve(keys, 2, &obj(json!({"id": 2, "key_name": "db"})))?;
            assert!(matches!(a, Resolution::Created(_)));
            assert!(matches!(b, Resolution::Created(_)));
            assert_ne!(a.id(), b.id());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_scoped_lookup_ignores_other_projects() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let other = insert_project(conn, "other", None, "manual")?;
            conn.execute(
                "INSERT INTO tags (project_id, name) VALUES (?1, 'backend')",
                params![other.id],
            )?;
            let project = insert_project(conn, "alpha", None, "manual")?;
            let tags = master_table("tags").unwrap();
            let mut remapper = IdentityRemapper::new(conn, project.id);

            let resolved = remapper.resolve(tags, 5, &obj(json!({"id": 5, "name": "backend"})))?;
            assert!(matches!(resolved, Resolution::Created(_)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_missing_natural_key_is_invalid() {
        let db = Database::open_in_memory().unwrap();
        let result = db.with_conn(|conn| {
            let project = insert_project(conn, "alpha", None, "manual")?;
            let mut remapper = IdentityRemapper::new(conn, project.id);
            remapper.resolve(master_table("tags").unwrap(), 1, &obj(json!({"id": 1})))
        });
        assert!(matches!(
            result,
            Err(crate::error::StoreError::InvalidSnapshot(_))
        ));
    }
}
