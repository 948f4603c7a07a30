//! Built-in schema migrations.
//!
//! Statements are generated through the dialect adapter so the same
//! descriptors describe the schema on every supported engine.

use super::{apply_constraint_change, rebuild_table, Migration, MigrationContext, TableRebuild};
use crate::db::dialect::{Constraint, DdlExecutor, DialectAdapter, ForeignKeySpec, IndexOptions};
use crate::db::migrations::ConstraintChange;
use crate::error::StoreResult;
use rusqlite::types::Value;

pub const TASK_BOARD_VIEW: &str = "v_task_board";

/// Every built-in descriptor.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            "20240101000000_create_projects",
            "Projects and master tables",
            create_projects_up,
            create_projects_down,
        ),
        Migration::new(
            "20240102000000_create_records",
            "Decisions, constraints, tasks and task dependencies",
            create_records_up,
            create_records_down,
        ),
        Migration::new(
            "20240103000000_create_links",
            "Junction tables",
            create_links_up,
            create_links_down,
        ),
        Migration::new(
            "20240110000000_task_board",
            "Lookup indexes and task board view",
            task_board_up,
            task_board_down,
        ),
        Migration::new(
            "20240120000000_tasks_project_fk",
            "Tie tasks to their project and record task origin",
            tasks_project_fk_up,
            tasks_project_fk_down,
        )
        .without_foreign_keys(),
    ]
}

fn run(ctx: &MigrationContext<'_>, statements: &[String]) -> StoreResult<()> {
    for sql in statements {
        ctx.conn.execute_ddl(sql)?;
    }
    Ok(())
}

fn drop_tables(ctx: &MigrationContext<'_>, tables: &[&str]) -> StoreResult<()> {
    let statements: Vec<String> = tables
        .iter()
        .map(|t| format!("DROP TABLE IF EXISTS {}", ctx.dialect.quote_identifier(t)))
        .collect();
    run(ctx, &statements)
}

fn project_fk() -> &'static str {
    "FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE"
}

fn create_projects_up(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    let d = ctx.dialect;
    let pk = d.auto_increment_primary_key();
    let now = d.now_timestamp_expression();
    run(
        ctx,
        &[
            format!(
                "CREATE TABLE projects (
                    id {pk},
                    name VARCHAR(64) NOT NULL UNIQUE,
                    display_name VARCHAR(255),
                    detection_source VARCHAR(32) NOT NULL DEFAULT 'manual',
                    created_at BIGINT NOT NULL DEFAULT ({now})
                )"
            ),
            format!(
                "CREATE TABLE context_keys (
                    id {pk},
                    key_name VARCHAR(255) NOT NULL,
                    created_at BIGINT NOT NULL DEFAULT ({now})
                )"
            ),
            format!(
                "CREATE TABLE files (
                    id {pk},
                    project_id INTEGER NOT NULL,
                    path VARCHAR(255) NOT NULL,
                    created_at BIGINT NOT NULL DEFAULT ({now}),
                    UNIQUE (project_id, path),
                    {fk}
                )",
                fk = project_fk()
            ),
            format!(
                "CREATE TABLE tags (
                    id {pk},
                    project_id INTEGER NOT NULL,
                    name VARCHAR(128) NOT NULL,
                    UNIQUE (project_id, name),
                    {fk}
                )",
                fk = project_fk()
            ),
            format!(
                "CREATE TABLE scopes (
                    id {pk},
                    project_id INTEGER NOT NULL,
                    name VARCHAR(128) NOT NULL,
                    UNIQUE (project_id, name),
                    {fk}
                )",
                fk = project_fk()
            ),
        ],
    )
}

fn create_projects_down(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    drop_tables(ctx, &["scopes", "tags", "files", "context_keys", "projects"])
}

/// `CREATE TABLE tasks`, before and after the project foreign key was added.
fn tasks_table_sql(d: &DialectAdapter, with_project_fk: bool) -> String {
    let pk = d.auto_increment_primary_key();
    let now = d.now_timestamp_expression();
    let tail = if with_project_fk {
        format!(
            ",
                origin VARCHAR(16) NOT NULL DEFAULT 'local',
                created_at BIGINT NOT NULL DEFAULT ({now}),
                updated_at BIGINT NOT NULL DEFAULT ({now}),
                CONSTRAINT fk_tasks_project {fk}",
            fk = project_fk()
        )
    } else {
        format!(
            ",
                created_at BIGINT NOT NULL DEFAULT ({now}),
                updated_at BIGINT NOT NULL DEFAULT ({now})"
        )
    };
    format!(
        "CREATE TABLE tasks (
                id {pk},
                project_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                description TEXT,
                status VARCHAR(16) NOT NULL DEFAULT 'todo',
                priority INTEGER NOT NULL DEFAULT 2{tail}
            )"
    )
}

fn create_records_up(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    let d = ctx.dialect;
    let pk = d.auto_increment_primary_key();
    let now = d.now_timestamp_expression();
    let yes = d.bool_literal(true);
    run(
        ctx,
        &[
            format!(
                "CREATE TABLE decisions (
                    id {pk},
                    project_id INTEGER NOT NULL,
                    key_id INTEGER NOT NULL,
                    value TEXT NOT NULL,
                    status VARCHAR(16) NOT NULL DEFAULT 'active',
                    version VARCHAR(32) NOT NULL DEFAULT '1.0.0',
                    agent VARCHAR(128),
                    updated_at BIGINT NOT NULL DEFAULT ({now}),
                    {fk},
                    FOREIGN KEY (key_id) REFERENCES context_keys(id)
                )",
                fk = project_fk()
            ),
            format!(
                "CREATE TABLE constraints (
                    id {pk},
                    project_id INTEGER NOT NULL,
                    category VARCHAR(32) NOT NULL DEFAULT 'architecture',
                    text TEXT NOT NULL,
                    priority INTEGER NOT NULL DEFAULT 2,
                    active BOOLEAN NOT NULL DEFAULT {yes},
                    created_at BIGINT NOT NULL DEFAULT ({now}),
                    {fk}
                )",
                fk = project_fk()
            ),
            tasks_table_sql(d, false),
            format!(
                "CREATE TABLE task_dependencies (
                    blocker_task_id INTEGER NOT NULL,
                    blocked_task_id INTEGER NOT NULL,
                    created_at BIGINT NOT NULL DEFAULT ({now}),
                    PRIMARY KEY (blocker_task_id, blocked_task_id),
                    FOREIGN KEY (blocker_task_id) REFERENCES tasks(id) ON DELETE CASCADE,
                    FOREIGN KEY (blocked_task_id) REFERENCES tasks(id) ON DELETE CASCADE,
                    CHECK (blocker_task_id <> blocked_task_id)
                )"
            ),
        ],
    )
}

fn create_records_down(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    drop_tables(ctx, &["task_dependencies", "tasks", "constraints", "decisions"])
}

fn junction_sql(
    table: &str,
    left: (&str, &str),
    right: (&str, &str),
    extra: &str,
) -> String {
    format!(
        "CREATE TABLE {table} (
            {l} INTEGER NOT NULL,
            {r} INTEGER NOT NULL,{extra}
            PRIMARY KEY ({l}, {r}),
            FOREIGN KEY ({l}) REFERENCES {lt}(id) ON DELETE CASCADE,
            FOREIGN KEY ({r}) REFERENCES {rt}(id) ON DELETE CASCADE
        )",
        l = left.0,
        lt = left.1,
        r = right.0,
        rt = right.1,
    )
}

fn create_links_up(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    run(
        ctx,
        &[
            junction_sql("decision_tags", ("decision_id", "decisions"), ("tag_id", "tags"), ""),
            junction_sql(
                "decision_scopes",
                ("decision_id", "decisions"),
                ("scope_id", "scopes"),
                "",
            ),
            junction_sql(
                "constraint_tags",
                ("constraint_id", "constraints"),
                ("tag_id", "tags"),
                "",
            ),
            junction_sql("task_tags", ("task_id", "tasks"), ("tag_id", "tags"), ""),
            junction_sql(
                "task_file_links",
                ("task_id", "tasks"),
                ("file_id", "files"),
                "\n            action VARCHAR(16) NOT NULL DEFAULT 'edit',",
            ),
        ],
    )
}

fn create_links_down(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    drop_tables(
        ctx,
        &[
            "task_file_links",
            "task_tags",
            "constraint_tags",
            "decision_scopes",
            "decision_tags",
        ],
    )
}

const BOARD_INDEXES: &[(&str, &[&str], &str)] = &[
    ("decisions", &["project_id"], "idx_decisions_project"),
    ("tasks", &["project_id", "status"], "idx_tasks_project_status"),
    ("task_dependencies", &["blocked_task_id"], "idx_task_deps_blocked"),
];

fn task_board_select(d: &DialectAdapter) -> String {
    format!(
        "SELECT t.id AS task_id, t.project_id, t.title, t.status, t.priority, {tags} AS tags
         FROM tasks t
         LEFT JOIN task_tags tt ON tt.task_id = t.id
         LEFT JOIN tags tg ON tg.id = tt.tag_id
         GROUP BY t.id, t.project_id, t.title, t.status, t.priority",
        tags = d.string_agg_expression("tg.name", ", ")
    )
}

fn task_board_up(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    for (table, columns, name) in BOARD_INDEXES {
        ctx.dialect
            .create_index_if_absent(ctx.conn, table, columns, &IndexOptions::named(*name))?;
    }
    ctx.dialect
        .create_or_replace_view(ctx.conn, TASK_BOARD_VIEW, &task_board_select(ctx.dialect))
}

fn task_board_down(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    ctx.conn.execute_ddl(&format!(
        "DROP VIEW IF EXISTS {}",
        ctx.dialect.quote_identifier(TASK_BOARD_VIEW)
    ))?;
    for (table, _, name) in BOARD_INDEXES {
        ctx.conn.execute_ddl(&ctx.dialect.drop_index_sql(table, name))?;
    }
    Ok(())
}

fn tasks_project_constraint() -> Constraint {
    Constraint::ForeignKey(ForeignKeySpec {
        name: "fk_tasks_project".into(),
        columns: vec!["project_id".into()],
        references: "projects".into(),
        referenced_columns: vec!["id".into()],
        on_delete: Some("CASCADE".into()),
    })
}

fn tasks_index() -> (&'static [&'static str], IndexOptions) {
    (&["project_id", "status"], IndexOptions::named("idx_tasks_project_status"))
}

fn tasks_project_fk_up(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    if ctx.dialect.capabilities().alter_add_constraint {
        ctx.conn.execute_ddl(
            "ALTER TABLE tasks ADD COLUMN origin VARCHAR(16) NOT NULL DEFAULT 'local'",
        )?;
    }
    let (columns, options) = tasks_index();
    let change = ConstraintChange {
        table: "tasks".into(),
        constraint: tasks_project_constraint(),
        rebuild: TableRebuild::new("tasks", tasks_table_sql(ctx.dialect, true))
            .with_default("origin", Value::Text("local".into()))
            .with_index(columns, options),
    };
    apply_constraint_change(ctx, &change)?;
    Ok(())
}

fn tasks_project_fk_down(ctx: &MigrationContext<'_>) -> StoreResult<()> {
    if ctx.dialect.capabilities().alter_add_constraint {
        let drop_fk = ctx
            .dialect
            .drop_constraint_sql("tasks", &tasks_project_constraint())?;
        ctx.conn.execute_ddl(&drop_fk)?;
        ctx.conn.execute_ddl("ALTER TABLE tasks DROP COLUMN origin")?;
        return Ok(());
    }
    let (columns, options) = tasks_index();
    let plan = TableRebuild::new("tasks", tasks_table_sql(ctx.dialect, false)).with_index(columns, options);
    rebuild_table(ctx, &plan)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::Dialect;
    use crate::db::migrations::{table_exists, table_has_column, MigrationRunner};
    use rusqlite::Connection;

    fn fresh() -> (Connection, MigrationRunner) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON").unwrap();
        (conn, MigrationRunner::new(DialectAdapter::new(Dialect::Sqlite)))
    }

    #[test]
    fn test_ids_are_fixed_width_and_sorted() {
        let migrations = all_migrations();
        let ids: Vec<&str> = migrations.iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        for id in ids {
            let (stamp, name) = id.split_at(14);
            assert!(stamp.chars().all(|c| c.is_ascii_digit()), "{}", id);
            assert!(name.starts_with('_') && name.len() > 1, "{}", id);
        }
    }

    #[test]
    fn test_full_schema_applies() {
        let (mut conn, runner) = fresh();
        let report = runner.apply_pending(&mut conn, &all_migrations()).unwrap();
        assert_eq!(report.applied.len(), all_migrations().len());

        for table in ["projects", "context_keys", "files", "tasks", "task_file_links"] {
            assert!(table_exists(&conn, table).unwrap(), "{}", table);
        }
        assert!(table_has_column(&conn, "tasks", "origin").unwrap());

        let view_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'view' AND name = ?1",
                [TASK_BOARD_VIEW],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(view_count, 1);
    }

    #[test]
    fn test_tasks_fk_revert_restores_old_shape() {
        let (mut conn, runner) = fresh();
        let migrations = all_migrations();
        runner.apply_pending(&mut conn, &migrations[..4]).unwrap();
        runner.apply_pending(&mut conn, &migrations).unwrap();

        let reverted = runner.revert_last_batch(&mut conn, &migrations).unwrap();
        assert_eq!(reverted, vec!["20240120000000_tasks_project_fk"]);
        assert!(!table_has_column(&conn, "tasks", "origin").unwrap());

        runner.apply_pending(&mut conn, &migrations).unwrap();
        assert!(table_has_column(&conn, "tasks", "origin").unwrap());
    }
}
