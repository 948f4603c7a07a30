//! Migrate subcommand: apply, inspect, or roll back schema migrations.

use crate::db::Database;
use anyhow::Result;
use clap::Args;

/// Arguments for the migrate command.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Show which migrations are applied without changing anything.
    #[arg(long, conflicts_with = "rollback")]
    pub status: bool,

    /// Revert the most recently applied batch.
    #[arg(long)]
    pub rollback: bool,
}

/// Run the migration command and return the lines to print.
pub fn run_migrate(args: &MigrateArgs, db: &Database) -> Result<Vec<String>> {
    if args.status {
        return Ok(db
            .migration_status()?
            .into_iter()
            .map(|s| match s.batch {
                Some(batch) => format!("[x] {} (batch {}) {}", s.id, batch, s.description),
                None => format!("[ ] {} {}", s.id, s.description),
            })
            .collect());
    }

    if args.rollback {
        let reverted = db.rollback_last_batch()?;
        if reverted.is_empty() {
            return Ok(vec!["Nothing to roll back.".to_string()]);
        }
        return Ok(reverted
            .into_iter()
            .map(|id| format!("Reverted {}", id))
            .collect());
    }

    let report = db.migrate()?;
    if report.is_noop() {
        return Ok(vec!["Schema is up to date.".to_string()]);
    }
    let batch = report.batch.unwrap_or_default();
    Ok(report
        .applied
        .into_iter()
        .map(|id| format!("Applied {} (batch {})", id, batch))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_rollback() {
        let db = Database::open_in_memory().unwrap();
        let apply = MigrateArgs {
            status: false,
            rollback: false,
        };
        assert_eq!(run_migrate(&apply, &db).unwrap(), vec!["Schema is up to date."]);

        let status = MigrateArgs {
            status: true,
            rollback: false,
        };
        let lines = run_migrate(&status, &db).unwrap();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.starts_with("[x]")));

        let rollback = MigrateArgs {
            status: false,
            rollback: true,
        };
        let reverted = run_migrate(&rollback, &db).unwrap();
        assert!(reverted.iter().all(|l| l.starts_with("Reverted")));

        let lines = run_migrate(&status, &db).unwrap();
        assert!(lines.iter().all(|l| l.starts_with("[ ]")));
    }
}
