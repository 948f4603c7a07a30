//! Table rebuild for engines that cannot add a constraint in place.
//!
//! The rebuild copies the target table and every table holding a foreign key
//! into it, drops them (and the views that read them), recreates the target
//! with its new definition, and restores rows. Rows whose foreign keys no
//! longer resolve are dropped and counted.
//!
//! Callers must have turned referential integrity enforcement off; the
//! migration runner does this for descriptors built with
//! `Migration::without_foreign_keys`.

use super::{table_columns, table_exists, MigrationContext};
use crate::db::dialect::{Constraint, DdlExecutor, DialectAdapter, IndexOptions};
use crate::error::{StoreError, StoreResult};
use regex_lite::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info};

static VIEW_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:TEMP\s+|TEMPORARY\s+)?VIEW\s+(?:IF\s+NOT\s+EXISTS\s+)?(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|\S+?)\s+AS\s+(.+)$"#,
    )
    .expect("view definition pattern compiles")
});

/// Description of a table rebuild.
#[derive(Debug, Clone)]
pub struct TableRebuild {
    pub table: String,
    /// Full `CREATE TABLE` statement for the new definition.
    pub create_sql: String,
    /// Values for columns the old definition did not have.
    pub column_defaults: Vec<(String, Value)>,
    /// Indexes to create on the new table.
    pub indexes: Vec<(Vec<String>, IndexOptions)>,
}

impl TableRebuild {
    pub fn new(table: impl Into<String>, create_sql: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            create_sql: create_sql.into(),
            column_defaults: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_default(mut self, column: impl Into<String>, value: Value) -> Self {
        self.column_defaults.push((column.into(), value));
        self
    }

    pub fn with_index(mut self, columns: &[&str], options: IndexOptions) -> Self {
        self.indexes
            .push((columns.iter().map(|c| c.to_string()).collect(), options));
        self
    }
}

/// What a rebuild did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub table: String,
    pub rows_before: usize,
    pub rows_restored: usize,
    /// Dependent tables that were dropped and recreated.
    pub dependents: Vec<String>,
    /// Views that were dropped and recreated.
    pub views: Vec<String>,
    /// Triggers on the rebuilt tables and views, replayed after the rows.
    pub triggers: Vec<String>,
    /// Rows dropped per table because a foreign key no longer resolved.
    pub orphans_dropped: BTreeMap<String, usize>,
}

impl RebuildReport {
    pub fn total_orphans(&self) -> usize {
        self.orphans_dropped.values().sum()
    }
}

/// A constraint addition with its rebuild fallback.
#[derive(Debug, Clone)]
pub struct ConstraintChange {
    pub table: String,
    pub constraint: Constraint,
    /// Used when the dialect cannot `ALTER TABLE .. ADD CONSTRAINT`.
    pub rebuild: TableRebuild,
}

/// How a constraint change was carried out.
#[derive(Debug, Clone)]
pub enum ConstraintPath {
    AlterTable,
    Rebuilt(RebuildReport),
}

/// Add a constraint natively when the dialect can, otherwise rebuild.
pub fn apply_constraint_change(
    ctx: &MigrationContext<'_>,
    change: &ConstraintChange,
) -> StoreResult<ConstraintPath> {
    if ctx.dialect.capabilities().alter_add_constraint {
        add_constraint_in_place(ctx.conn, ctx.dialect, &change.table, &change.constraint)?;
        return Ok(ConstraintPath::AlterTable);
    }
    rebuild_table(ctx, &change.rebuild).map(ConstraintPath::Rebuilt)
}

/// `ALTER TABLE` path. Orphans are deleted first so the new foreign key
/// validates.
pub fn add_constraint_in_place(
    exec: &dyn DdlExecutor,
    adapter: &DialectAdapter,
    table: &str,
    constraint: &Constraint,
) -> StoreResult<()> {
    let alter = adapter.add_constraint_sql(table, constraint)?;
    if let Constraint::ForeignKey(fk) = constraint {
        exec.execute_ddl(&adapter.delete_orphans_sql(table, fk))?;
    }
    debug!(table, constraint = constraint.name(), "Adding constraint in place");
    exec.execute_ddl(&alter)
}

/// Rebuild `plan.table` under its new definition.
pub fn rebuild_table(ctx: &MigrationContext<'_>, plan: &TableRebuild) -> StoreResult<RebuildReport> {
    let conn = ctx.conn;
    if !ctx.dialect.is_dialect("sqlite") {
        return Err(StoreError::unsupported(
            ctx.dialect.dialect().name(),
            format!("catalog-driven rebuild of '{}'", plan.table),
        ));
    }
    if foreign_keys_enforced(conn)? {
        return Err(StoreError::SchemaMismatch(format!(
            "foreign key enforcement must be off to rebuild '{}'",
            plan.table
        )));
    }
    if !table_exists(conn, &plan.table)? {
        return Err(StoreError::SchemaMismatch(format!(
            "table '{}' does not exist",
            plan.table
        )));
    }

    // Discover and copy
    let dependents = dependent_tables(conn, &plan.table)?;
    let mut watched = dependents.clone();
    watched.push(plan.table.clone());
    let views = dependent_views(conn, &watched)?;
    let mut owners = watched.clone();
    owners.extend(views.iter().map(|v| v.name.clone()));
    let triggers = owned_triggers(conn, &owners)?;

    let target = TableCopy::capture(conn, &plan.table)?;
    let copies = dependents
        .iter()
        .map(|t| TableCopy::capture(conn, t))
        .collect::<StoreResult<Vec<_>>>()?;

    debug!(
        table = %plan.table,
        rows = target.rows.len(),
        dependents = ?dependents,
        views = views.len(),
        triggers = triggers.len(),
        "Rebuilding table"
    );

    // Drop
    for view in &views {
        conn.execute_batch(&format!(
            "DROP VIEW IF EXISTS {}",
            ctx.dialect.quote_identifier(&view.name)
        ))?;
    }
    for copy in &copies {
        conn.execute_batch(&format!(
            "DROP TABLE {}",
            ctx.dialect.quote_identifier(&copy.name)
        ))?;
    }
    conn.execute_batch(&format!(
        "DROP TABLE {}",
        ctx.dialect.quote_identifier(&plan.table)
    ))?;

    // Recreate the target
    conn.execute_batch(&plan.create_sql)?;
    let mut report = RebuildReport {
        table: plan.table.clone(),
        rows_before: target.rows.len(),
        dependents: dependents.clone(),
        views: views.iter().map(|v| v.name.clone()).collect(),
        triggers: triggers.iter().map(|t| t.name.clone()).collect(),
        ..Default::default()
    };
    let restored = restore_rows(ctx, &target, &plan.column_defaults)?;
    report.rows_restored = restored;
    note_orphans(&mut report, &plan.table, target.rows.len(), restored);

    for (columns, options) in &plan.indexes {
        let cols: Vec<&str> = columns.iter().map(String::as_str).collect();
        ctx.dialect
            .create_index_if_absent(conn, &plan.table, &cols, options)?;
    }

    // Restore dependents with their original definitions
    for copy in &copies {
        conn.execute_batch(&copy.create_sql)?;
        let restored = restore_rows(ctx, copy, &[])?;
        note_orphans(&mut report, &copy.name, copy.rows.len(), restored);
        for index_sql in &copy.index_sql {
            conn.execute_batch(index_sql)?;
        }
    }

    for view in &views {
        ctx.dialect
            .create_or_replace_view(conn, &view.name, &view.select_sql())?;
    }

    // DROP TABLE and DROP VIEW take their triggers with them
    for trigger in &triggers {
        conn.execute_batch(&trigger.sql)?;
    }

    info!(
        table = %plan.table,
        restored = report.rows_restored,
        orphans = report.total_orphans(),
        "Table rebuilt"
    );
    Ok(report)
}

fn note_orphans(report: &mut RebuildReport, table: &str, before: usize, restored: usize) {
    if before > restored {
        report
            .orphans_dropped
            .insert(table.to_string(), before - restored);
    }
}

fn foreign_keys_enforced(conn: &Connection) -> StoreResult<bool> {
    let enabled: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    Ok(enabled != 0)
}

/// Tables other than `table` with a foreign key into it.
fn dependent_tables(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name <> ?1
         ORDER BY name",
    )?;
    let candidates = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut dependents = Vec::new();
    for candidate in candidates {
        if foreign_keys_of(conn, &candidate)?
            .iter()
            .any(|fk| fk.parent.eq_ignore_ascii_case(table))
        {
            dependents.push(candidate);
        }
    }
    Ok(dependents)
}

struct ViewCopy {
    name: String,
    sql: String,
}

impl ViewCopy {
    fn select_sql(&self) -> String {
        VIEW_BODY
            .captures(&self.sql)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| self.sql.clone())
    }
}

/// Views whose definition mentions any of `tables` as a whole word.
fn dependent_views(conn: &Connection, tables: &[String]) -> StoreResult<Vec<ViewCopy>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type = 'view' AND sql IS NOT NULL ORDER BY name",
    )?;
    let views = stmt
        .query_map([], |row| {
            Ok(ViewCopy {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(views
        .into_iter()
        .filter(|v| tables.iter().any(|t| mentions_identifier(&v.sql, t)))
        .collect())
}

struct TriggerCopy {
    name: String,
    sql: String,
}

/// Triggers attached to any of `owners`, in creation order.
fn owned_triggers(conn: &Connection, owners: &[String]) -> StoreResult<Vec<TriggerCopy>> {
    let mut stmt = conn.prepare(
        "SELECT name, tbl_name, sql FROM sqlite_master
         WHERE type = 'trigger' AND sql IS NOT NULL
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|(_, owner, _)| owners.iter().any(|o| o.eq_ignore_ascii_case(owner)))
        .map(|(name, _, sql)| TriggerCopy { name, sql })
        .collect())
}

/// Case-insensitive whole-word search for `name` in `sql`.
fn mentions_identifier(sql: &str, name: &str) -> bool {
    let haystack = sql.to_ascii_lowercase();
    let needle = name.to_ascii_lowercase();
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(&needle) {
        let begin = start + pos;
        let end = begin + needle.len();
        let before_ok = haystack[..begin].chars().next_back().is_none_or(|c| !is_word(c));
        let after_ok = haystack[end..].chars().next().is_none_or(|c| !is_word(c));
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
    }
    false
}

/// A foreign key as reported by `PRAGMA foreign_key_list`, grouped by id.
#[derive(Debug, Clone)]
struct ForeignKeyRef {
    parent: String,
    from: Vec<String>,
    /// Empty entries mean "the parent's primary key".
    to: Vec<Option<String>>,
}

fn foreign_keys_of(conn: &Connection, table: &str) -> StoreResult<Vec<ForeignKeyRef>> {
    let mut stmt =
        conn.prepare("SELECT id, seq, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1) ORDER BY id, seq")?;
    let rows = stmt
        .query_map(params![table], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut grouped: BTreeMap<i64, ForeignKeyRef> = BTreeMap::new();
    for (id, parent, from, to) in rows {
        let fk = grouped.entry(id).or_insert_with(|| ForeignKeyRef {
            parent,
            from: Vec::new(),
            to: Vec::new(),
        });
        fk.from.push(from);
        fk.to.push(to);
    }
    Ok(grouped.into_values().collect())
}

fn primary_key_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
    let cols = stmt
        .query_map(params![table], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(cols)
}

/// In-memory copy of a table's definition and rows.
struct TableCopy {
    name: String,
    create_sql: String,
    index_sql: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TableCopy {
    fn capture(conn: &Connection, table: &str) -> StoreResult<Self> {
        let create_sql: String = conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )?;

        let index_sql = {
            let mut stmt = conn.prepare(
                "SELECT sql FROM sqlite_master
                 WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL
                 ORDER BY name",
            )?;
            stmt.query_map(params![table], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?
        };

        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table.replace('"', "\"\"")))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: table.to_string(),
            create_sql,
            index_sql,
            columns,
            rows,
        })
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }
}

/// Hashable projection of a SQLite value for key matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyValue {
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl KeyValue {
    /// `None` for NULL, which never needs a parent.
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Integer(i) => Some(KeyValue::Int(*i)),
            Value::Real(f) if f.fract() == 0.0 => Some(KeyValue::Int(*f as i64)),
            Value::Real(f) => Some(KeyValue::Text(f.to_string())),
            Value::Text(s) => Some(KeyValue::Text(s.clone())),
            Value::Blob(b) => Some(KeyValue::Blob(b.clone())),
        }
    }
}

/// A foreign key check against a known set of parent keys.
struct ParentCheck {
    positions: Vec<usize>,
    keys: HashSet<Vec<KeyValue>>,
}

impl ParentCheck {
    fn accepts(&self, row: &[Value]) -> bool {
        let mut key = Vec::with_capacity(self.positions.len());
        for &pos in &self.positions {
            match KeyValue::from_value(&row[pos]) {
                Some(k) => key.push(k),
                None => return true,
            }
        }
        self.keys.contains(&key)
    }
}

/// Reinsert `copy.rows` into the freshly created table of the same name.
/// Returns the number of rows written.
fn restore_rows(
    ctx: &MigrationContext<'_>,
    copy: &TableCopy,
    defaults: &[(String, Value)],
) -> StoreResult<usize> {
    let conn = ctx.conn;
    let new_columns = table_columns(conn, &copy.name)?;

    enum Source<'a> {
        Old(usize),
        Default(&'a Value),
    }

    let mut insert_columns = Vec::new();
    let mut sources = Vec::new();
    for column in &new_columns {
        if let Some(i) = copy.column_index(column) {
            insert_columns.push(column.clone());
            sources.push(Source::Old(i));
        } else if let Some((_, value)) = defaults.iter().find(|(c, _)| c.eq_ignore_ascii_case(column)) {
            insert_columns.push(column.clone());
            sources.push(Source::Default(value));
        }
    }
    if insert_columns.is_empty() || copy.rows.is_empty() {
        return Ok(0);
    }

    let rows: Vec<Vec<Value>> = copy
        .rows
        .iter()
        .map(|old| {
            sources
                .iter()
                .map(|s| match s {
                    Source::Old(i) => old[*i].clone(),
                    Source::Default(v) => (*v).clone(),
                })
                .collect()
        })
        .collect();

    let checks = parent_checks(conn, &copy.name, &insert_columns, &rows)?;
    let kept: Vec<&Vec<Value>> = rows
        .iter()
        .filter(|row| checks.iter().all(|c| c.accepts(row)))
        .collect();

    let dropped = rows.len() - kept.len();
    if dropped > 0 {
        debug!(table = %copy.name, dropped, "Dropping rows with unresolved foreign keys");
    }

    let width = insert_columns.len();
    let per_statement = (ctx.dialect.max_bind_parameters() / width)
        .min(ctx.rebuild_batch_size)
        .max(1);
    let column_list = insert_columns
        .iter()
        .map(|c| ctx.dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let row_placeholder = format!("({})", vec!["?"; width].join(", "));

    for chunk in kept.chunks(per_statement) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            ctx.dialect.quote_identifier(&copy.name),
            column_list,
            vec![row_placeholder.as_str(); chunk.len()].join(", ")
        );
        conn.execute(&sql, params_from_iter(chunk.iter().flat_map(|row| row.iter())))?;
    }

    Ok(kept.len())
}

/// Parent key sets for every foreign key of `table` whose columns are
/// being restored.
fn parent_checks(
    conn: &Connection,
    table: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> StoreResult<Vec<ParentCheck>> {
    let position = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));
    let mut checks = Vec::new();

    for fk in foreign_keys_of(conn, table)? {
        let Some(positions) = fk.from.iter().map(|c| position(c)).collect::<Option<Vec<_>>>() else {
            continue;
        };

        let mut parent_columns = Vec::with_capacity(fk.to.len());
        let pk = if fk.to.iter().any(Option::is_none) {
            primary_key_columns(conn, &fk.parent)?
        } else {
            Vec::new()
        };
        for (i, to) in fk.to.iter().enumerate() {
            match to.clone().or_else(|| pk.get(i).cloned()) {
                Some(col) => parent_columns.push(col),
                None => {
                    // Parent without an explicit key; SQLite matches its rowid.
                    parent_columns.push("rowid".to_string());
                }
            }
        }

        let keys = if fk.parent.eq_ignore_ascii_case(table) {
            self_keys(columns, rows, &parent_columns)
        } else {
            parent_keys(conn, &fk.parent, &parent_columns)?
        };
        checks.push(ParentCheck { positions, keys });
    }

    Ok(checks)
}

fn parent_keys(
    conn: &Connection,
    parent: &str,
    columns: &[String],
) -> StoreResult<HashSet<Vec<KeyValue>>> {
    if !table_exists(conn, parent)? {
        return Ok(HashSet::new());
    }
    let list = columns
        .iter()
        .map(|c| format!("\"{}\"", c.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM \"{}\"",
        list,
        parent.replace('"', "\"\"")
    ))?;
    let width = columns.len();
    let mut keys = HashSet::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut key = Vec::with_capacity(width);
        for i in 0..width {
            match KeyValue::from_value(&row.get::<_, Value>(i)?) {
                Some(k) => key.push(k),
                None => break,
            }
        }
        if key.len() == width {
            keys.insert(key);
        }
    }
    Ok(keys)
}

/// Keys of a self-referencing table, taken from the rows being restored.
fn self_keys(columns: &[String], rows: &[Vec<Value>], key_columns: &[String]) -> HashSet<Vec<KeyValue>> {
    let positions: Option<Vec<usize>> = key_columns
        .iter()
        .map(|k| columns.iter().position(|c| c.eq_ignore_ascii_case(k)))
        .collect();
    let Some(positions) = positions else {
        return HashSet::new();
    };
    rows.iter()
        .filter_map(|row| {
            positions
                .iter()
                .map(|&p| KeyValue::from_value(&row[p]))
                .collect::<Option<Vec<_>>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::{Dialect, ForeignKeySpec};
    use crate::db::migrations::DEFAULT_REBUILD_BATCH_SIZE;
    use std::cell::RefCell;

    fn setup() -> (Connection, DialectAdapter) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE owners (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE items (id INTEGER PRIMARY KEY, owner_id INTEGER NOT NULL, label TEXT);
             CREATE TABLE notes (id INTEGER PRIMARY KEY,
                                 item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                                 body TEXT);
             CREATE INDEX idx_notes_item ON notes(item_id);
             CREATE VIEW v_item_notes AS
                 SELECT i.id, i.label, COUNT(n.id) AS notes
                 FROM items i LEFT JOIN notes n ON n.item_id = i.id
                 GROUP BY i.id, i.label;

             INSERT INTO owners (id, name) VALUES (1, 'ana'), (2, 'bo');
             INSERT INTO items (id, owner_id, label) VALUES
                 (10, 1, 'a'), (11, 2, 'b'), (12, 99, 'orphan');
             INSERT INTO notes (id, item_id, body) VALUES
                 (100, 10, 'x'), (101, 12, 'y'), (102, 12, 'z');
             CREATE TRIGGER trg_items_touch AFTER UPDATE OF label ON items BEGIN
                 UPDATE notes SET body = body || '!' WHERE item_id = NEW.id;
             END;
             CREATE TRIGGER trg_notes_stamp AFTER INSERT ON notes BEGIN
                 UPDATE notes SET body = upper(body) WHERE id = NEW.id;
             END;
             PRAGMA foreign_keys = OFF;",
        )
        .unwrap();
        (conn, DialectAdapter::new(Dialect::Sqlite))
    }

    fn items_with_owner_fk() -> TableRebuild {
        TableRebuild::new(
            "items",
            "CREATE TABLE items (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
                label TEXT,
                kind TEXT NOT NULL
            )",
        )
        .with_default("kind", Value::Text("plain".into()))
        .with_index(&["owner_id"], IndexOptions::default())
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_rebuild_drops_orphans_and_cascades() {
        let (conn, adapter) = setup();
        let ctx = MigrationContext {
            conn: &conn,
            dialect: &adapter,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        };

        let report = rebuild_table(&ctx, &items_with_owner_fk()).unwrap();

        assert_eq!(report.rows_before, 3);
        assert_eq!(report.rows_restored, 2);
        assert_eq!(report.dependents, vec!["notes"]);
        assert_eq!(report.views, vec!["v_item_notes"]);
        assert_eq!(report.triggers, vec!["trg_items_touch", "trg_notes_stamp"]);
        assert_eq!(report.orphans_dropped.get("items"), Some(&1));
        assert_eq!(report.orphans_dropped.get("notes"), Some(&2));

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM items"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM notes"), 1);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM items WHERE kind = 'plain'"),
            2
        );
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM v_item_notes"), 2);
        assert_eq!(
            count(
                &conn,
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name IN ('idx_notes_item', 'idx_items_owner_id')"
            ),
            2
        );

        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        let mut stmt = conn.prepare("PRAGMA foreign_key_check").unwrap();
        let violations = stmt.query_map([], |_| Ok(())).unwrap().count();
        assert_eq!(violations, 0);
    }

    #[test]
    fn test_rebuild_restores_triggers() {
        let (conn, adapter) = setup();
        let ctx = MigrationContext {
            conn: &conn,
            dialect: &adapter,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        };
        rebuild_table(&ctx, &items_with_owner_fk()).unwrap();

        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger'"),
            2
        );
        // replayed after the restore, so restored rows were not rewritten
        let body: String = conn
            .query_row("SELECT body FROM notes WHERE id = 100", [], |row| row.get(0))
            .unwrap();
        assert_eq!(body, "x");

        conn.execute("UPDATE items SET label = 'a2' WHERE id = 10", []).unwrap();
        conn.execute("INSERT INTO notes (id, item_id, body) VALUES (103, 11, 'new')", [])
            .unwrap();
        let bodies: Vec<String> = conn
            .prepare("SELECT body FROM notes ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(bodies, vec!["x!", "NEW"]);
    }

    #[test]
    fn test_rebuild_batches_small() {
        let (conn, adapter) = setup();
        let ctx = MigrationContext {
            conn: &conn,
            dialect: &adapter,
            rebuild_batch_size: 1,
        };
        let report = rebuild_table(&ctx, &items_with_owner_fk()).unwrap();
        assert_eq!(report.rows_restored, 2);
    }

    #[test]
    fn test_rebuild_requires_enforcement_off() {
        let (conn, adapter) = setup();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        let ctx = MigrationContext {
            conn: &conn,
            dialect: &adapter,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        };
        let err = rebuild_table(&ctx, &items_with_owner_fk()).unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch(_)));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM items"), 3);
    }

    #[test]
    fn test_rebuild_missing_table() {
        let (conn, adapter) = setup();
        let ctx = MigrationContext {
            conn: &conn,
            dialect: &adapter,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        };
        let plan = TableRebuild::new("ghosts", "CREATE TABLE ghosts (id INTEGER PRIMARY KEY)");
        assert!(matches!(
            rebuild_table(&ctx, &plan),
            Err(StoreError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_constraint_change_uses_rebuild_on_sqlite() {
        let (conn, adapter) = setup();
        let ctx = MigrationContext {
            conn: &conn,
            dialect: &adapter,
            rebuild_batch_size: DEFAULT_REBUILD_BATCH_SIZE,
        };
        let change = ConstraintChange {
            table: "items".into(),
            constraint: Constraint::ForeignKey(ForeignKeySpec {
                name: "fk_items_owner".into(),
                columns: vec!["owner_id".into()],
                references: "owners".into(),
                referenced_columns: vec!["id".into()],
                on_delete: Some("CASCADE".into()),
            }),
            rebuild: items_with_owner_fk(),
        };
        let path = apply_constraint_change(&ctx, &change).unwrap();
        assert!(matches!(path, ConstraintPath::Rebuilt(ref r) if r.total_orphans() == 3));
    }

    struct Recorder(RefCell<Vec<String>>);

    impl DdlExecutor for Recorder {
        fn execute_ddl(&self, sql: &str) -> StoreResult<()> {
            self.0.borrow_mut().push(sql.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_in_place_path_deletes_orphans_first() {
        let adapter = DialectAdapter::new(Dialect::MySql);
        let recorder = Recorder(RefCell::new(Vec::new()));
        let constraint = Constraint::ForeignKey(ForeignKeySpec {
            name: "fk_items_owner".into(),
            columns: vec!["owner_id".into()],
            references: "owners".into(),
            referenced_columns: vec!["id".into()],
            on_delete: None,
        });

        add_constraint_in_place(&recorder, &adapter, "items", &constraint).unwrap();

        let statements = recorder.0.borrow();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("DELETE FROM `items`"));
        assert!(statements[1].starts_with("ALTER TABLE `items` ADD CONSTRAINT"));
    }

    #[test]
    fn test_mentions_identifier() {
        assert!(mentions_identifier("SELECT * FROM tasks t", "tasks"));
        assert!(mentions_identifier("select * from \"TASKS\"", "tasks"));
        assert!(!mentions_identifier("SELECT * FROM task_tags", "tasks"));
        assert!(!mentions_identifier("SELECT * FROM subtasks", "tasks"));
    }

    #[test]
    fn test_view_select_extraction() {
        let view = ViewCopy {
            name: "v".into(),
            sql: "CREATE VIEW v AS SELECT 1 AS one".into(),
        };
        assert_eq!(view.select_sql(), "SELECT 1 AS one");
        let quoted = ViewCopy {
            name: "v board".into(),
            sql: "CREATE VIEW \"v board\" AS\n  SELECT id FROM t".into(),
        };
        assert_eq!(quoted.select_sql(), "SELECT id FROM t");
    }
}
