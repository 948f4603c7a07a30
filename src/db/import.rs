//! Snapshot import into a target project.
//!
//! An import either lands completely or leaves no trace:
//! - The project name is resolved and checked before any write
//! - All inserts happen inside one `IMMEDIATE` transaction, which also
//!   re-checks the name so concurrent imports cannot both create it
//! - Master tables are resolved through the identity remapper, then
//!   transaction tables are inserted with translated foreign keys (tasks in
//!   dependency order), then junction tables
//!
//! Rows whose references cannot be resolved are skipped and counted rather
//! than failing the import.

use super::deps::project_edges;
use super::projects::{find_project_by_name, insert_project, validate_project_name};
use super::remap::{IdentityRemapper, Resolution};
use super::rows::{as_object, get_i64, get_opt_i64, insert_row, JsonRow};
use super::tables::{
    is_known_table, JunctionTable, TransactionTable, JUNCTION_TABLES, MASTER_TABLES,
    PROJECTS_TABLE, TASKS_TABLE, TASK_DEPENDENCIES_TABLE, TRANSACTION_TABLES,
};
use super::Database;
use crate::error::{ErrorCode, StoreError, StoreResult};
use crate::export::Snapshot;
use crate::graph::{self, DependencyEdge};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Options controlling an import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Overrides the project name recorded in the snapshot.
    pub target_project_name: Option<String>,
    /// Report success without writing when the project already exists.
    pub skip_if_exists: bool,
    /// Run the full import and roll it back, reporting what would happen.
    pub dry_run: bool,
    /// Fail on dependency cycles instead of skipping the closing edges.
    pub strict_cycles: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            target_project_name: None,
            skip_if_exists: true,
            dry_run: false,
            strict_cycles: false,
        }
    }
}

impl ImportOptions {
    pub fn into_project(mut self, name: impl Into<String>) -> Self {
        self.target_project_name = Some(name.into());
        self
    }

    pub fn without_skip(mut self) -> Self {
        self.skip_if_exists = false;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_cycles = true;
        self
    }
}

/// Per-table counters for one import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Rows inserted per table.
    pub created: BTreeMap<String, usize>,
    /// Master rows matched to an existing row per table.
    pub reused: BTreeMap<String, usize>,
    /// Rows not written per table (unresolved references, duplicates,
    /// cycle-closing edges).
    pub skipped: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

impl ImportStats {
    fn bump(map: &mut BTreeMap<String, usize>, table: &str) {
        *map.entry(table.to_string()).or_insert(0) += 1;
    }

    pub fn record_created(&mut self, table: &str) {
        Self::bump(&mut self.created, table);
    }

    pub fn record_reused(&mut self, table: &str) {
        Self::bump(&mut self.reused, table);
    }

    pub fn record_skipped(&mut self, table: &str) {
        Self::bump(&mut self.skipped, table);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn created_in(&self, table: &str) -> usize {
        self.created.get(table).copied().unwrap_or(0)
    }

    pub fn reused_in(&self, table: &str) -> usize {
        self.reused.get(table).copied().unwrap_or(0)
    }

    pub fn skipped_in(&self, table: &str) -> usize {
        self.skipped.get(table).copied().unwrap_or(0)
    }

    /// Total number of rows created.
    pub fn total_created(&self) -> usize {
        self.created.values().sum()
    }

    /// Total number of rows reused.
    pub fn total_reused(&self) -> usize {
        self.reused.values().sum()
    }

    /// Total number of rows skipped.
    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Outcome of an import. Failures carry only the error, never partial ids.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ImportStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl ImportResult {
    fn imported(project_id: i64, project_name: &str, stats: ImportStats) -> Self {
        Self {
            success: true,
            project_id: Some(project_id),
            project_name: Some(project_name.to_string()),
            stats: Some(stats),
            ..Default::default()
        }
    }

    fn skipped(project_name: &str, reason: String) -> Self {
        Self {
            success: true,
            skipped: true,
            skip_reason: Some(reason),
            project_name: Some(project_name.to_string()),
            ..Default::default()
        }
    }

    fn previewed(project_name: &str, stats: ImportStats) -> Self {
        Self {
            success: true,
            dry_run: true,
            project_name: Some(project_name.to_string()),
            stats: Some(stats),
            ..Default::default()
        }
    }

    fn failed(err: &StoreError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_code: Some(err.code()),
            ..Default::default()
        }
    }
}

/// Pick the target project name: explicit option, then the snapshot's
/// `project`, then its first `projects` entry.
pub fn resolve_project_name(snapshot: &Snapshot, options: &ImportOptions) -> StoreResult<String> {
    let name = options
        .target_project_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| snapshot.default_project_name().map(str::trim))
        .ok_or_else(|| {
            StoreError::InvalidSnapshot(
                "snapshot names no project and no target project was given".into(),
            )
        })?;
    validate_project_name(name)?;
    Ok(name.to_string())
}

impl Database {
    /// Import a snapshot as a new project.
    ///
    /// Never returns `Err`; failures are reported in the result and leave the
    /// database unchanged.
    pub fn import_snapshot(&self, snapshot: &Snapshot, options: &ImportOptions) -> ImportResult {
        let name = match snapshot
            .check_format()
            .and_then(|_| resolve_project_name(snapshot, options))
        {
            Ok(name) => name,
            Err(err) => {
                warn!(error = %err, "Import rejected");
                return ImportResult::failed(&err);
            }
        };

        match self.with_conn_mut(|conn| run_import(conn, snapshot, options, &name)) {
            Ok(result) => result,
            Err(err) => {
                warn!(project = %name, error = %err, "Import rolled back");
                ImportResult::failed(&err)
            }
        }
    }
}

/// `Some(result)` when the name is taken and the import should stop.
fn check_conflict(
    conn: &Connection,
    name: &str,
    options: &ImportOptions,
) -> StoreResult<Option<ImportResult>> {
    let Some(existing) = find_project_by_name(conn, name)? else {
        return Ok(None);
    };
    if options.skip_if_exists {
        info!(project = %name, id = existing.id, "Project exists, skipping import");
        return Ok(Some(ImportResult::skipped(
            name,
            format!("project '{}' already exists (id {})", name, existing.id),
        )));
    }
    Err(StoreError::ProjectConflict(name.to_string()))
}

fn run_import(
    conn: &mut Connection,
    snapshot: &Snapshot,
    options: &ImportOptions,
    name: &str,
) -> StoreResult<ImportResult> {
    if let Some(skipped) = check_conflict(conn, name, options)? {
        return Ok(skipped);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if let Some(skipped) = check_conflict(&tx, name, options)? {
        return Ok(skipped);
    }

    let project = insert_project(&tx, name, snapshot.display_name(), "import")?;
    let mut stats = ImportStats::default();
    stats.record_created(PROJECTS_TABLE);

    {
        let mut remapper = IdentityRemapper::new(&tx, project.id);
        warn_unknown_tables(snapshot, &mut stats);
        import_master_tables(&mut remapper, snapshot, &mut stats)?;
        import_transaction_tables(&mut remapper, snapshot, options, &mut stats)?;
        import_junction_tables(&remapper, snapshot, &mut stats)?;
    }

    if options.dry_run {
        // Dropping the transaction rolls it back.
        drop(tx);
        info!(project = %name, rows = stats.total_created(), "Dry run complete");
        return Ok(ImportResult::previewed(name, stats));
    }

    tx.commit()?;
    info!(
        project = %name,
        id = project.id,
        created = stats.total_created(),
        reused = stats.total_reused(),
        skipped = stats.total_skipped(),
        "Import committed"
    );
    Ok(ImportResult::imported(project.id, name, stats))
}

fn warn_unknown_tables(snapshot: &Snapshot, stats: &mut ImportStats) {
    for table in snapshot.table_names() {
        if !is_known_table(table) {
            stats.warn(format!("ignoring unknown table '{}'", table));
        }
    }
}

fn source_id(table: &str, obj: &JsonRow) -> StoreResult<i64> {
    get_i64(obj, "id").map_err(|_| {
        StoreError::InvalidSnapshot(format!("row in '{}' has no integer id", table))
    })
}

fn import_master_tables(
    remapper: &mut IdentityRemapper<'_>,
    snapshot: &Snapshot,
    stats: &mut ImportStats,
) -> StoreResult<()> {
    for table in MASTER_TABLES {
        for row in snapshot.master_rows(table.name) {
            let obj = as_object(table.name, row)?;
            let id = source_id(table.name, obj)?;
            match remapper.resolve(table, id, obj)? {
                Resolution::Created(_) => stats.record_created(table.name),
                Resolution::Reused(_) => stats.record_reused(table.name),
                Resolution::Memoized(_) => {
                    stats.record_skipped(table.name);
                    stats.warn(format!("duplicate id {} in '{}'", id, table.name));
                }
            }
        }
    }
    Ok(())
}

fn import_transaction_tables(
    remapper: &mut IdentityRemapper<'_>,
    snapshot: &Snapshot,
    options: &ImportOptions,
    stats: &mut ImportStats,
) -> StoreResult<()> {
    for table in TRANSACTION_TABLES {
        match table.name {
            TASKS_TABLE => import_tasks(remapper, table, snapshot, options, stats)?,
            TASK_DEPENDENCIES_TABLE => import_edges(remapper, snapshot, options, stats)?,
            _ => {
                for row in snapshot.transaction_rows(table.name) {
                    import_owned_row(remapper, table, as_object(table.name, row)?, stats)?;
                }
            }
        }
    }
    Ok(())
}

/// Translate the row's foreign keys; `None` if any is missing or unknown.
fn translate_references(
    remapper: &IdentityRemapper<'_>,
    table: &TransactionTable,
    obj: &JsonRow,
) -> Option<Vec<(&'static str, SqlValue)>> {
    let mut fixed = Vec::with_capacity(table.foreign_keys.len() + 1);
    for fk in table.foreign_keys {
        let source = get_opt_i64(obj, fk.column)?;
        let target = remapper.translate(fk.references, source)?;
        fixed.push((fk.column, SqlValue::Integer(target)));
    }
    Some(fixed)
}

fn import_owned_row(
    remapper: &mut IdentityRemapper<'_>,
    table: &TransactionTable,
    obj: &JsonRow,
    stats: &mut ImportStats,
) -> StoreResult<()> {
    let id = if table.has_id {
        Some(source_id(table.name, obj)?)
    } else {
        None
    };
    if let Some(id) = id.filter(|&id| remapper.translate(table.name, id).is_some()) {
        stats.record_skipped(table.name);
        stats.warn(format!("duplicate id {} in '{}'", id, table.name));
        return Ok(());
    }

    let Some(mut fixed) = translate_references(remapper, table, obj) else {
        debug!(table = table.name, id = ?id, "Skipping row with unresolved reference");
        stats.record_skipped(table.name);
        return Ok(());
    };
    if table.project_owned {
        fixed.push(("project_id", SqlValue::Integer(remapper.project_id())));
    }

    let target = insert_row(remapper.conn(), table.name, table.columns, obj, &fixed)?;
    if let Some(id) = id {
        remapper.record(table.name, id, target);
    }
    stats.record_created(table.name);
    Ok(())
}

/// Snapshot edges between task ids, in snapshot order.
fn snapshot_edges(snapshot: &Snapshot) -> StoreResult<Vec<(DependencyEdge<i64>, &JsonRow)>> {
    snapshot
        .transaction_rows(TASK_DEPENDENCIES_TABLE)
        .iter()
        .map(|row| -> StoreResult<_> {
            let obj = as_object(TASK_DEPENDENCIES_TABLE, row)?;
            let edge = DependencyEdge::new(
                get_i64(obj, "blocker_task_id")?,
                get_i64(obj, "blocked_task_id")?,
            );
            Ok((edge, obj))
        })
        .collect()
}

fn import_tasks(
    remapper: &mut IdentityRemapper<'_>,
    table: &TransactionTable,
    snapshot: &Snapshot,
    options: &ImportOptions,
    stats: &mut ImportStats,
) -> StoreResult<()> {
    let rows = snapshot.transaction_rows(TASKS_TABLE);
    let mut by_id: HashMap<i64, &JsonRow> = HashMap::with_capacity(rows.len());
    let mut order: Vec<i64> = Vec::with_capacity(rows.len());
    for row in rows {
        let obj = as_object(TASKS_TABLE, row)?;
        let id = source_id(TASKS_TABLE, obj)?;
        if by_id.contains_key(&id) {
            stats.record_skipped(TASKS_TABLE);
            stats.warn(format!("duplicate id {} in '{}'", id, TASKS_TABLE));
            continue;
        }
        by_id.insert(id, obj);
        order.push(id);
    }

    let edges: Vec<DependencyEdge<i64>> = snapshot_edges(snapshot)?
        .into_iter()
        .map(|(edge, _)| edge)
        .collect();
    let (mut ordered, stuck) = graph::partial_order(&order, &edges);
    if !stuck.is_empty() {
        let err = graph::CycleError { nodes: stuck.clone() };
        if options.strict_cycles {
            return Err(err.into());
        }
        stats.warn(format!("{}; inserting those tasks in snapshot order", err));
        ordered.extend(stuck);
    }

    for id in ordered {
        if let Some(obj) = by_id.get(&id) {
            import_owned_row(remapper, table, obj, stats)?;
        }
    }
    Ok(())
}

fn import_edges(
    remapper: &mut IdentityRemapper<'_>,
    snapshot: &Snapshot,
    options: &ImportOptions,
    stats: &mut ImportStats,
) -> StoreResult<()> {
    let table = TRANSACTION_TABLES
        .iter()
        .find(|t| t.name == TASK_DEPENDENCIES_TABLE)
        .ok_or_else(|| StoreError::SchemaMismatch("edge table not registered".into()))?;

    let mut written: Vec<DependencyEdge<i64>> = project_edges(remapper.conn(), remapper.project_id())?;
    let mut seen: HashSet<DependencyEdge<i64>> = written.iter().copied().collect();

    for (source, obj) in snapshot_edges(snapshot)? {
        let (Some(blocker), Some(blocked)) = (
            remapper.translate(TASKS_TABLE, source.blocker),
            remapper.translate(TASKS_TABLE, source.blocked),
        ) else {
            stats.record_skipped(TASK_DEPENDENCIES_TABLE);
            continue;
        };
        let edge = DependencyEdge::new(blocker, blocked);

        if seen.contains(&edge) {
            stats.record_skipped(TASK_DEPENDENCIES_TABLE);
            continue;
        }
        if graph::would_create_cycle(&written, &edge) {
            if options.strict_cycles {
                return Err(StoreError::dependency_cycle(source.blocker, source.blocked));
            }
            stats.record_skipped(TASK_DEPENDENCIES_TABLE);
            stats.warn(format!(
                "skipping dependency {} -> {}: it would close a cycle",
                source.blocker, source.blocked
            ));
            continue;
        }

        let fixed = [
            ("blocker_task_id", SqlValue::Integer(blocker)),
            ("blocked_task_id", SqlValue::Integer(blocked)),
        ];
        insert_row(remapper.conn(), table.name, table.columns, obj, &fixed)?;
        stats.record_created(TASK_DEPENDENCIES_TABLE);
        written.push(edge);
        seen.insert(edge);
    }
    Ok(())
}

fn import_junction_tables(
    remapper: &IdentityRemapper<'_>,
    snapshot: &Snapshot,
    stats: &mut ImportStats,
) -> StoreResult<()> {
    for junction in JUNCTION_TABLES {
        // Reused master rows can fold two source links onto one target pair.
        let mut seen: HashSet<(i64, i64)> = HashSet::new();
        for row in snapshot.junction_rows(junction.name) {
            let obj = as_object(junction.name, row)?;
            let Some((left, right)) = translate_link(remapper, junction, obj)? else {
                stats.record_skipped(junction.name);
                continue;
            };
            if !seen.insert((left, right)) {
                stats.record_skipped(junction.name);
                continue;
            }
            let fixed = [
                (junction.left.column, SqlValue::Integer(left)),
                (junction.right.column, SqlValue::Integer(right)),
            ];
            insert_row(remapper.conn(), junction.name, junction.columns, obj, &fixed)?;
            stats.record_created(junction.name);
        }
    }
    Ok(())
}

/// Target ids of the link's two ends, if both were imported.
fn translate_link(
    remapper: &IdentityRemapper<'_>,
    junction: &JunctionTable,
    obj: &JsonRow,
) -> StoreResult<Option<(i64, i64)>> {
    let left = get_i64(obj, junction.left.column)?;
    let right = get_i64(obj, junction.right.column)?;
    Ok(remapper
        .translate(junction.left.references, left)
        .zip(remapper.translate(junction.right.references, right)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_project_name_resolution_order() {
        let snap = snapshot(json!({"project": "from-field", "projects": [{"name": "from-list"}]}));
        let opts = ImportOptions::default();
        assert_eq!(resolve_project_name(&snap, &opts).unwrap(), "from-field");
        assert_eq!(
            resolve_project_name(&snap, &opts.clone().into_project("explicit")).unwrap(),
            "explicit"
        );

        let listed = snapshot(json!({"projects": [{"name": "from-list"}]}));
        assert_eq!(resolve_project_name(&listed, &opts).unwrap(), "from-list");

        let unnamed = snapshot(json!({}));
        assert!(matches!(
            resolve_project_name(&unnamed, &opts),
            Err(StoreError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_invalid_name_fails_without_writes() {
        let db = Database::open_in_memory().unwrap();
        let result = db.import_snapshot(
            &snapshot(json!({"project": "bad name!"})),
            &ImportOptions::default(),
        );
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::InvalidProjectName));
        assert!(db.list_projects().unwrap().is_empty());
    }

    #[test]
    fn test_empty_snapshot_creates_project() {
        let db = Database::open_in_memory().unwrap();
        let result = db.import_snapshot(&snapshot(json!({"project": "empty"})), &ImportOptions::default());
        assert!(result.success);
        assert!(!result.skipped);
        let stats = result.stats.unwrap();
        assert_eq!(stats.created_in("projects"), 1);
        assert_eq!(stats.total_created(), 1);
        let project = db.get_project("empty").unwrap().unwrap();
        assert_eq!(project.detection_source, "import");
        assert_eq!(result.project_id, Some(project.id));
    }

    #[test]
    fn test_unknown_tables_warn() {
        let db = Database::open_in_memory().unwrap();
        let result = db.import_snapshot(
            &snapshot(json!({"project": "p", "master_tables": {"agents": [{"id": 1}]}})),
            &ImportOptions::default(),
        );
        assert!(result.success);
        let stats = result.stats.unwrap();
        assert!(stats.warnings.iter().any(|w| w.contains("agents")));
    }

    #[test]
    fn test_duplicate_task_id_keeps_first_row() {
        let db = Database::open_in_memory().unwrap();
        let result = db.import_snapshot(
            &snapshot(json!({
                "project": "dupes",
                "transaction_tables": {"tasks": [
                    {"id": 7, "title": "first"},
                    {"id": 7, "title": "second"}
                ]}
            })),
            &ImportOptions::default(),
        );
        assert!(result.success, "{:?}", result.error);
        let stats = result.stats.unwrap();
        assert_eq!(stats.created_in("tasks"), 1);
        assert_eq!(stats.skipped_in("tasks"), 1);

        let titles: Vec<String> = db
            .list_tasks(result.project_id.unwrap())
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["first"]);
    }

    #[test]
    fn test_failed_result_serializes_without_ids() {
        let result = ImportResult::failed(&StoreError::ProjectConflict("p".into()));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error_code"], json!("PROJECT_CONFLICT"));
        assert!(value.get("project_id").is_none());
        assert!(value.get("stats").is_none());
    }
}
