//! Dialect detection, capability flags and dialect-specific SQL fragments.
//!
//! The adapter is the only place that knows how the three supported engines
//! differ. Migrations and the rebuild procedure ask it for SQL text and for
//! capability flags instead of branching on the engine themselves.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
}

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    pub fn capabilities(self) -> Capabilities {
        match self {
            Dialect::Sqlite => Capabilities {
                transactional_ddl: true,
                alter_add_constraint: false,
                create_index_if_not_exists: true,
                create_or_replace_view: false,
            },
            Dialect::MySql => Capabilities {
                transactional_ddl: false,
                alter_add_constraint: true,
                create_index_if_not_exists: false,
                create_or_replace_view: true,
            },
            Dialect::Postgres => Capabilities {
                transactional_ddl: true,
                alter_add_constraint: true,
                create_index_if_not_exists: true,
                create_or_replace_view: true,
            },
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            other => Err(StoreError::unsupported(
                "unknown",
                format!("unrecognized dialect '{}'", other),
            )),
        }
    }
}

/// What the active engine can do natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// DDL statements participate in transactions.
    pub transactional_ddl: bool,
    /// `ALTER TABLE .. ADD CONSTRAINT` is available.
    pub alter_add_constraint: bool,
    /// `CREATE INDEX IF NOT EXISTS` is available.
    pub create_index_if_not_exists: bool,
    /// `CREATE OR REPLACE VIEW` is available.
    pub create_or_replace_view: bool,
}

/// Something that can run a DDL statement.
///
/// Implemented for `rusqlite::Connection`; other drivers map their failures
/// into `StoreError::Driver` so that the already-exists check still works.
pub trait DdlExecutor {
    fn execute_ddl(&self, sql: &str) -> StoreResult<()>;
}

impl DdlExecutor for Connection {
    fn execute_ddl(&self, sql: &str) -> StoreResult<()> {
        self.execute_batch(sql)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Defaults to `idx_<table>_<col1>_<col2>`.
    pub name: Option<String>,
    pub unique: bool,
}

impl IndexOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A foreign key to be added to an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub name: String,
    pub columns: Vec<String>,
    pub references: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<String>,
}

/// A constraint to be added to an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    ForeignKey(ForeignKeySpec),
    Unique { name: String, columns: Vec<String> },
}

impl Constraint {
    pub fn name(&self) -> &str {
        match self {
            Constraint::ForeignKey(fk) => &fk.name,
            Constraint::Unique { name, .. } => name,
        }
    }
}

/// Dialect-aware SQL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectAdapter {
    dialect: Dialect,
}

impl DialectAdapter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Identify the engine behind a live connection.
    pub fn detect(conn: &Connection) -> StoreResult<Self> {
        let version: String = conn
            .query_row("SELECT sqlite_version()", [], |row| row.get(0))
            .map_err(|e| {
                StoreError::unsupported("unknown", format!("unable to identify engine: {}", e))
            })?;
        debug!(version = %version, "Detected SQLite connection");
        Ok(Self::new(Dialect::Sqlite))
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn capabilities(&self) -> Capabilities {
        self.dialect.capabilities()
    }

    /// Case-insensitive name check; accepts aliases such as `mariadb` or `pg`.
    pub fn is_dialect(&self, name: &str) -> bool {
        name.parse::<Dialect>()
            .map(|d| d == self.dialect)
            .unwrap_or(false)
    }

    /// Expression yielding the current time as integer epoch seconds.
    pub fn now_timestamp_expression(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => "CAST(strftime('%s', 'now') AS INTEGER)",
            Dialect::MySql => "UNIX_TIMESTAMP()",
            Dialect::Postgres => "EXTRACT(EPOCH FROM NOW())::INTEGER",
        }
    }

    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self.dialect, value) {
            (Dialect::Postgres, true) => "TRUE",
            (Dialect::Postgres, false) => "FALSE",
            (_, true) => "1",
            (_, false) => "0",
        }
    }

    /// Column type for an auto-assigned integer primary key.
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self.dialect {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::MySql => "INTEGER PRIMARY KEY AUTO_INCREMENT",
            Dialect::Postgres => "SERIAL PRIMARY KEY",
        }
    }

    /// Aggregate concatenating `column` across a group with `separator`.
    pub fn string_agg_expression(&self, column: &str, separator: &str) -> String {
        let sep = self.quote_literal(separator);
        match self.dialect {
            Dialect::Sqlite => format!("GROUP_CONCAT({}, {})", column, sep),
            Dialect::MySql => format!("GROUP_CONCAT({} SEPARATOR {})", column, sep),
            Dialect::Postgres => format!("STRING_AGG({}, {})", column, sep),
        }
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        match self.dialect {
            Dialect::MySql => format!("`{}`", name.replace('`', "``")),
            Dialect::Sqlite | Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn quote_literal(&self, value: &str) -> String {
        let escaped = value.replace('\'', "''");
        match self.dialect {
            Dialect::MySql => format!("'{}'", escaped.replace('\\', "\\\\")),
            Dialect::Sqlite | Dialect::Postgres => format!("'{}'", escaped),
        }
    }

    /// Statement toggling referential integrity enforcement for the session.
    pub fn foreign_key_checks_sql(&self, enabled: bool) -> &'static str {
        match (self.dialect, enabled) {
            (Dialect::Sqlite, true) => "PRAGMA foreign_keys = ON",
            (Dialect::Sqlite, false) => "PRAGMA foreign_keys = OFF",
            (Dialect::MySql, true) => "SET FOREIGN_KEY_CHECKS = 1",
            (Dialect::MySql, false) => "SET FOREIGN_KEY_CHECKS = 0",
            (Dialect::Postgres, true) => "SET session_replication_role = 'origin'",
            (Dialect::Postgres, false) => "SET session_replication_role = 'replica'",
        }
    }

    pub fn set_foreign_key_checks(&self, exec: &dyn DdlExecutor, enabled: bool) -> StoreResult<()> {
        debug!(dialect = %self.dialect, enabled, "Setting foreign key enforcement");
        exec.execute_ddl(self.foreign_key_checks_sql(enabled))
    }

    /// Upper bound on bind parameters in a single statement.
    pub fn max_bind_parameters(&self) -> usize {
        match self.dialect {
            Dialect::Sqlite => 999,
            Dialect::MySql | Dialect::Postgres => 65_535,
        }
    }

    pub fn default_index_name(table: &str, columns: &[&str]) -> String {
        format!("idx_{}_{}", table, columns.join("_"))
    }

    pub fn create_index_sql(
        &self,
        table: &str,
        columns: &[&str],
        options: &IndexOptions,
    ) -> StoreResult<String> {
        if columns.is_empty() {
            return Err(StoreError::SchemaMismatch(format!(
                "index on '{}' needs at least one column",
                table
            )));
        }
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| Self::default_index_name(table, columns));
        let cols: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        Ok(format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            if options.unique { "UNIQUE " } else { "" },
            if self.capabilities().create_index_if_not_exists {
                "IF NOT EXISTS "
            } else {
                ""
            },
            self.quote_identifier(&name),
            self.quote_identifier(table),
            cols.join(", ")
        ))
    }

    /// Create an index, treating an existing index of the same name as success.
    pub fn create_index_if_absent(
        &self,
        exec: &dyn DdlExecutor,
        table: &str,
        columns: &[&str],
        options: &IndexOptions,
    ) -> StoreResult<()> {
        let sql = self.create_index_sql(table, columns, options)?;
        self.execute_tolerant(exec, &sql)
    }

    /// Create or replace a view. Dialects without `CREATE OR REPLACE VIEW`
    /// get a drop followed by a create.
    pub fn create_or_replace_view(
        &self,
        exec: &dyn DdlExecutor,
        name: &str,
        select_sql: &str,
    ) -> StoreResult<()> {
        let view = self.quote_identifier(name);
        if self.capabilities().create_or_replace_view {
            return exec.execute_ddl(&format!("CREATE OR REPLACE VIEW {} AS {}", view, select_sql));
        }
        exec.execute_ddl(&format!("DROP VIEW IF EXISTS {}", view))?;
        self.execute_tolerant(exec, &format!("CREATE VIEW {} AS {}", view, select_sql))
    }

    /// Recognize this dialect's "object already exists" failure.
    ///
    /// MySQL: errno 1050 (table) and 1061 (key name). PostgreSQL: SQLSTATE
    /// 42P07 (relation) and 42710 (object). Codes only count in the positions
    /// the drivers print them, never as bare digits inside an identifier.
    pub fn is_already_exists_error(&self, message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        match self.dialect {
            Dialect::Sqlite => lower.contains("already exists"),
            Dialect::MySql => {
                lower.contains("already exists")
                    || lower.contains("duplicate key name")
                    || has_error_code(&lower, "1050")
                    || has_error_code(&lower, "1061")
            }
            Dialect::Postgres => {
                lower.contains("already exists")
                    || has_error_code(&lower, "42p07")
                    || has_error_code(&lower, "42710")
            }
        }
    }

    fn execute_tolerant(&self, exec: &dyn DdlExecutor, sql: &str) -> StoreResult<()> {
        match exec.execute_ddl(sql) {
            Err(e) if self.is_already_exists_error(&e.to_string()) => {
                debug!(sql = %sql, "Object already exists, skipping");
                Ok(())
            }
            other => other,
        }
    }

    pub fn add_constraint_sql(&self, table: &str, constraint: &Constraint) -> StoreResult<String> {
        if !self.capabilities().alter_add_constraint {
            return Err(StoreError::unsupported(
                self.dialect.name(),
                format!("ALTER TABLE {} ADD CONSTRAINT {}", table, constraint.name()),
            ));
        }
        let body = match constraint {
            Constraint::ForeignKey(fk) => {
                let mut sql = format!(
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    self.identifier_list(&fk.columns),
                    self.quote_identifier(&fk.references),
                    self.identifier_list(&fk.referenced_columns)
                );
                if let Some(action) = &fk.on_delete {
                    sql.push_str(" ON DELETE ");
                    sql.push_str(action);
                }
                sql
            }
            Constraint::Unique { columns, .. } => {
                format!("UNIQUE ({})", self.identifier_list(columns))
            }
        };
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.quote_identifier(table),
            self.quote_identifier(constraint.name()),
            body
        ))
    }

    pub fn drop_constraint_sql(&self, table: &str, constraint: &Constraint) -> StoreResult<String> {
        let table = self.quote_identifier(table);
        let name = self.quote_identifier(constraint.name());
        match (self.dialect, constraint) {
            (Dialect::Sqlite, _) => Err(StoreError::unsupported(
                self.dialect.name(),
                format!("ALTER TABLE {} DROP CONSTRAINT {}", table, name),
            )),
            (Dialect::MySql, Constraint::ForeignKey(_)) => {
                Ok(format!("ALTER TABLE {} DROP FOREIGN KEY {}", table, name))
            }
            (Dialect::MySql, Constraint::Unique { .. }) => {
                Ok(format!("ALTER TABLE {} DROP INDEX {}", table, name))
            }
            (Dialect::Postgres, _) => Ok(format!("ALTER TABLE {} DROP CONSTRAINT {}", table, name)),
        }
    }

    pub fn drop_index_sql(&self, table: &str, name: &str) -> String {
        match self.dialect {
            Dialect::MySql => format!(
                "DROP INDEX {} ON {}",
                self.quote_identifier(name),
                self.quote_identifier(table)
            ),
            Dialect::Sqlite | Dialect::Postgres => {
                format!("DROP INDEX IF EXISTS {}", self.quote_identifier(name))
            }
        }
    }

    /// Delete rows of `table` whose foreign key columns point at no parent row.
    pub fn delete_orphans_sql(&self, table: &str, fk: &ForeignKeySpec) -> String {
        let child = self.quote_identifier(table);
        let parent = self.quote_identifier(&fk.references);
        let not_null: Vec<String> = fk
            .columns
            .iter()
            .map(|c| format!("{}.{} IS NOT NULL", child, self.quote_identifier(c)))
            .collect();
        let join: Vec<String> = fk
            .columns
            .iter()
            .zip(&fk.referenced_columns)
            .map(|(c, r)| {
                format!(
                    "{}.{} = {}.{}",
                    parent,
                    self.quote_identifier(r),
                    child,
                    self.quote_identifier(c)
                )
            })
            .collect();
        format!(
            "DELETE FROM {} WHERE {} AND NOT EXISTS (SELECT 1 FROM {} WHERE {})",
            child,
            not_null.join(" AND "),
            parent,
            join.join(" AND ")
        )
    }

    fn identifier_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `code` as printed by a driver: `ERROR 1061`, `(1061)`, `SQLSTATE 42P07`.
fn has_error_code(lower: &str, code: &str) -> bool {
    ["error ", "(", "sqlstate ", "sqlstate: ", "code "]
        .iter()
        .any(|prefix| {
            let needle = format!("{}{}", prefix, code);
            lower.match_indices(&needle).any(|(at, _)| {
                lower[at + needle.len()..]
                    .chars()
                    .next()
                    .is_none_or(|c| !c.is_ascii_alphanumeric())
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records statements and fails those containing `fail_on`.
    struct FakeExecutor {
        statements: RefCell<Vec<String>>,
        fail_on: Option<(&'static str, &'static str)>,
    }

    impl FakeExecutor {
        fn new() -> Self {
            Self {
                statements: RefCell::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing(pattern: &'static str, message: &'static str) -> Self {
            Self {
                statements: RefCell::new(Vec::new()),
                fail_on: Some((pattern, message)),
            }
        }
    }

    impl DdlExecutor for FakeExecutor {
        fn execute_ddl(&self, sql: &str) -> StoreResult<()> {
            self.statements.borrow_mut().push(sql.to_string());
            match self.fail_on {
                Some((pattern, message)) if sql.contains(pattern) => {
                    Err(StoreError::Driver(message.to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_dialect_parsing_accepts_aliases() {
        assert_eq!("MariaDB".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("pg".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_is_dialect() {
        let adapter = DialectAdapter::new(Dialect::MySql);
        assert!(adapter.is_dialect("mysql"));
        assert!(adapter.is_dialect("MARIADB"));
        assert!(!adapter.is_dialect("sqlite"));
        assert!(!adapter.is_dialect("nonsense"));
    }

    #[test]
    fn test_detect_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        let adapter = DialectAdapter::detect(&conn).unwrap();
        assert_eq!(adapter.dialect(), Dialect::Sqlite);
    }

    #[test]
    fn test_timestamp_and_bool_fragments() {
        let sqlite = DialectAdapter::new(Dialect::Sqlite);
        let mysql = DialectAdapter::new(Dialect::MySql);
        let pg = DialectAdapter::new(Dialect::Postgres);

        assert!(sqlite.now_timestamp_expression().contains("strftime"));
        assert_eq!(mysql.now_timestamp_expression(), "UNIX_TIMESTAMP()");
        assert!(pg.now_timestamp_expression().contains("EXTRACT(EPOCH"));

        assert_eq!(sqlite.bool_literal(true), "1");
        assert_eq!(mysql.bool_literal(false), "0");
        assert_eq!(pg.bool_literal(true), "TRUE");
    }

    #[test]
    fn test_string_agg_fragments() {
        assert_eq!(
            DialectAdapter::new(Dialect::Sqlite).string_agg_expression("name", ", "),
            "GROUP_CONCAT(name, ', ')"
        );
        assert_eq!(
            DialectAdapter::new(Dialect::MySql).string_agg_expression("name", ", "),
            "GROUP_CONCAT(name SEPARATOR ', ')"
        );
        assert_eq!(
            DialectAdapter::new(Dialect::Postgres).string_agg_expression("name", ", "),
            "STRING_AGG(name, ', ')"
        );
    }

    #[test]
    fn test_sqlite_timestamp_expression_evaluates() {
        let conn = Connection::open_in_memory().unwrap();
        let adapter = DialectAdapter::new(Dialect::Sqlite);
        let now: i64 = conn
            .query_row(
                &format!("SELECT {}", adapter.now_timestamp_expression()),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(now > 1_600_000_000);
    }

    #[test]
    fn test_quote_identifier_escapes() {
        let sqlite = DialectAdapter::new(Dialect::Sqlite);
        assert_eq!(sqlite.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        let mysql = DialectAdapter::new(Dialect::MySql);
        assert_eq!(mysql.quote_identifier("tasks"), "`tasks`");
    }

    #[test]
    fn test_create_index_if_absent_is_idempotent_on_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let adapter = DialectAdapter::detect(&conn).unwrap();
        let opts = IndexOptions::default();

        adapter
            .create_index_if_absent(&conn, "items", &["name"], &opts)
            .unwrap();
        adapter
            .create_index_if_absent(&conn, "items", &["name"], &opts)
            .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_items_name'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_mysql_index_tolerates_duplicate_key_name() {
        let adapter = DialectAdapter::new(Dialect::MySql);
        let exec = FakeExecutor::failing(
            "CREATE INDEX",
            "ERROR 1061 (42000): Duplicate key name 'idx_tasks_status'",
        );

        adapter
            .create_index_if_absent(&exec, "tasks", &["status"], &IndexOptions::default())
            .unwrap();

        let statements = exec.statements.borrow();
        assert_eq!(statements.len(), 1);
        assert!(!statements[0].contains("IF NOT EXISTS"));
    }

    #[test]
    fn test_other_errors_propagate() {
        let adapter = DialectAdapter::new(Dialect::MySql);
        let exec = FakeExecutor::failing("CREATE INDEX", "ERROR 1146: Table 'tasks' doesn't exist");

        let result =
            adapter.create_index_if_absent(&exec, "tasks", &["status"], &IndexOptions::default());
        assert!(matches!(result, Err(StoreError::Driver(_))));
    }

    #[test]
    fn test_index_requires_columns() {
        let adapter = DialectAdapter::new(Dialect::Sqlite);
        let result = adapter.create_index_sql("tasks", &[], &IndexOptions::default());
        assert!(matches!(result, Err(StoreError::SchemaMismatch(_))));
    }

    #[test]
    fn test_view_replacement_on_sqlite() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
        let adapter = DialectAdapter::detect(&conn).unwrap();

        adapter
            .create_or_replace_view(&conn, "v_items", "SELECT id FROM items")
            .unwrap();
        adapter
            .create_or_replace_view(&conn, "v_items", "SELECT id, name FROM items")
            .unwrap();

        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = 'v_items'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(sql.contains("name FROM items"));
    }

    #[test]
    fn test_view_uses_or_replace_when_supported() {
        let adapter = DialectAdapter::new(Dialect::Postgres);
        let exec = FakeExecutor::new();
        adapter
            .create_or_replace_view(&exec, "v_board", "SELECT 1")
            .unwrap();
        let statements = exec.statements.borrow();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("CREATE OR REPLACE VIEW"));
    }

    #[test]
    fn test_add_constraint_unsupported_on_sqlite() {
        let adapter = DialectAdapter::new(Dialect::Sqlite);
        let constraint = Constraint::Unique {
            name: "uq_files_path".into(),
            columns: vec!["path".into()],
        };
        let result = adapter.add_constraint_sql("files", &constraint);
        assert!(matches!(
            result,
            Err(StoreError::DialectUnsupportedOperation { dialect: "sqlite", .. })
        ));
    }

    #[test]
    fn test_add_foreign_key_sql() {
        let adapter = DialectAdapter::new(Dialect::Postgres);
        let fk = ForeignKeySpec {
            name: "fk_tasks_project".into(),
            columns: vec!["project_id".into()],
            references: "projects".into(),
            referenced_columns: vec!["id".into()],
            on_delete: Some("CASCADE".into()),
        };
        let sql = adapter
            .add_constraint_sql("tasks", &Constraint::ForeignKey(fk.clone()))
            .unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"tasks\" ADD CONSTRAINT \"fk_tasks_project\" FOREIGN KEY (\"project_id\") REFERENCES \"projects\" (\"id\") ON DELETE CASCADE"
        );

        let delete = adapter.delete_orphans_sql("tasks", &fk);
        assert!(delete.starts_with("DELETE FROM \"tasks\""));
        assert!(delete.contains("NOT EXISTS"));
    }

    #[test]
    fn test_already_exists_detection() {
        let adapter = DialectAdapter::new(Dialect::MySql);
        assert!(adapter.is_already_exists_error("index idx_a already exists"));
        assert!(adapter.is_already_exists_error("Duplicate key name 'idx_a'"));
        assert!(adapter.is_already_exists_error("ERROR 1050 (42S01): Table 'x' exists"));
        assert!(adapter.is_already_exists_error("Server error (1061)"));
        assert!(!adapter.is_already_exists_error("syntax error"));
        assert!(!adapter.is_already_exists_error(
            "ERROR 1146 (42S02): Table 'db.archive_1050' doesn't exist"
        ));
        assert!(!adapter.is_already_exists_error("ERROR 10610: unknown"));

        let pg = DialectAdapter::new(Dialect::Postgres);
        assert!(pg.is_already_exists_error("relation \"idx_a\" already exists"));
        assert!(pg.is_already_exists_error("db error: SQLSTATE 42P07"));
        assert!(!pg.is_already_exists_error("Duplicate key name 'idx_a'"));
        assert!(!pg.is_already_exists_error("relation \"archive_42p07\" does not exist"));

        let sqlite = DialectAdapter::new(Dialect::Sqlite);
        assert!(sqlite.is_already_exists_error("index idx_a already exists"));
        assert!(!sqlite.is_already_exists_error("Duplicate key name 'idx_a'"));
        assert!(!sqlite.is_already_exists_error("no such table: main.archive_1050"));
    }

    #[test]
    fn test_missing_table_with_code_like_name_surfaces() {
        let conn = Connection::open_in_memory().unwrap();
        let adapter = DialectAdapter::detect(&conn).unwrap();
        let result =
            adapter.create_index_if_absent(&conn, "archive_1050", &["id"], &IndexOptions::default());
        assert!(result.is_err());

        let mysql = DialectAdapter::new(Dialect::MySql);
        let exec = FakeExecutor::failing(
            "CREATE INDEX",
            "ERROR 1146 (42S02): Table 'db.archive_1050' doesn't exist",
        );
        let result =
            mysql.create_index_if_absent(&exec, "archive_1050", &["id"], &IndexOptions::default());
        assert!(matches!(result, Err(StoreError::Driver(_))));
    }
}
