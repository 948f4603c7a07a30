//! Static description of the business tables moved by import and export.
//!
//! Order within each list is insertion order: a table only references tables
//! listed before it (or in an earlier group).

/// How a master-table row is matched against existing rows on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityClass {
    /// Shared across projects; imports always insert a fresh row.
    Global,
    /// Owned by one project and unique within it on `natural_key`.
    ProjectScoped { natural_key: &'static str },
}

/// A single-column reference to another table's `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct MasterTable {
    pub name: &'static str,
    pub class: EntityClass,
    /// Data columns, excluding `id` and `project_id`.
    pub columns: &'static [&'static str],
}

impl MasterTable {
    pub fn is_project_scoped(&self) -> bool {
        matches!(self.class, EntityClass::ProjectScoped { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionTable {
    pub name: &'static str,
    /// Data columns, excluding `id`, `project_id` and the foreign key columns.
    pub columns: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    /// Whether rows carry their own `id` (edge tables do not).
    pub has_id: bool,
    /// Whether rows carry `project_id`.
    pub project_owned: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct JunctionTable {
    pub name: &'static str,
    pub left: ForeignKey,
    pub right: ForeignKey,
    pub columns: &'static [&'static str],
}

pub const PROJECTS_TABLE: &str = "projects";
pub const TASKS_TABLE: &str = "tasks";
pub const TASK_DEPENDENCIES_TABLE: &str = "task_dependencies";

pub const MASTER_TABLES: &[MasterTable] = &[
    MasterTable {
        name: "context_keys",
        class: EntityClass::Global,
        columns: &["key_name", "created_at"],
    },
    MasterTable {
        name: "files",
        class: EntityClass::ProjectScoped { natural_key: "path" },
        columns: &["path", "created_at"],
    },
    MasterTable {
        name: "tags",
        class: EntityClass::ProjectScoped { natural_key: "name" },
        columns: &["name"],
    },
    MasterTable {
        name: "scopes",
        class: EntityClass::ProjectScoped { natural_key: "name" },
        columns: &["name"],
    },
];

pub const TRANSACTION_TABLES: &[TransactionTable] = &[
    TransactionTable {
        name: "decisions",
        columns: &["value", "status", "version", "agent", "updated_at"],
        foreign_keys: &[ForeignKey {
            column: "key_id",
            references: "context_keys",
        }],
        has_id: true,
        project_owned: true,
    },
    TransactionTable {
        name: "constraints",
        columns: &["category", "text", "priority", "active", "created_at"],
        foreign_keys: &[],
        has_id: true,
        project_owned: true,
    },
    TransactionTable {
        name: TASKS_TABLE,
        columns: &[
            "title",
            "description",
            "status",
            "priority",
            "origin",
            "created_at",
            "updated_at",
        ],
        foreign_keys: &[],
        has_id: true,
        project_owned: true,
    },
    TransactionTable {
        name: TASK_DEPENDENCIES_TABLE,
        columns: &["created_at"],
        foreign_keys: &[
            ForeignKey {
                column: "blocker_task_id",
                references: TASKS_TABLE,
            },
            ForeignKey {
                column: "blocked_task_id",
                references: TASKS_TABLE,
            },
        ],
        has_id: false,
        project_owned: false,
    },
];

pub const JUNCTION_TABLES: &[JunctionTable] = &[
    JunctionTable {
        name: "decision_tags",
        left: ForeignKey {
            column: "decision_id",
            references: "decisions",
        },
        right: ForeignKey {
            column: "tag_id",
            references: "tags",
        },
        columns: &[],
    },
    JunctionTable {
        name: "decision_scopes",
        left: ForeignKey {
            column: "decision_id",
            references: "decisions",
        },
        right: ForeignKey {
            column: "scope_id",
            references: "scopes",
        },
        columns: &[],
    },
    JunctionTable {
        name: "constraint_tags",
        left: ForeignKey {
            column: "constraint_id",
            references: "constraints",
        },
        right: ForeignKey {
            column: "tag_id",
            references: "tags",
        },
        columns: &[],
    },
    JunctionTable {
        name: "task_tags",
        left: ForeignKey {
            column: "task_id",
            references: TASKS_TABLE,
        },
        right: ForeignKey {
            column: "tag_id",
            references: "tags",
        },
        columns: &[],
    },
    JunctionTable {
        name: "task_file_links",
        left: ForeignKey {
            column: "task_id",
            references: TASKS_TABLE,
        },
        right: ForeignKey {
            column: "file_id",
            references: "files",
        },
        columns: &["action"],
    },
];

pub fn master_table(name: &str) -> Option<&'static MasterTable> {
    MASTER_TABLES.iter().find(|t| t.name == name)
}

pub fn is_known_table(name: &str) -> bool {
    MASTER_TABLES.iter().any(|t| t.name == name)
        || TRANSACTION_TABLES.iter().any(|t| t.name == name)
        || JUNCTION_TABLES.iter().any(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_references_point_backwards() {
        let mut seen: HashSet<&str> = MASTER_TABLES.iter().map(|t| t.name).collect();
        for table in TRANSACTION_TABLES {
            for fk in table.foreign_keys {
                assert!(
                    seen.contains(fk.references),
                    "{} references {} before it is loaded",
                    table.name,
                    fk.references
                );
            }
            seen.insert(table.name);
        }
        for junction in JUNCTION_TABLES {
            assert!(seen.contains(junction.left.references));
            assert!(seen.contains(junction.right.references));
        }
    }

    #[test]
    fn test_lookup() {
        assert!(master_table("files").unwrap().is_project_scoped());
        assert!(!master_table("context_keys").unwrap().is_project_scoped());
        assert!(master_table("tasks").is_none());
        assert!(is_known_table("task_file_links"));
        assert!(!is_known_table("agents"));
    }
}
