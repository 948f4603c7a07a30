//! Import subcommand.
//!
//! Reads a snapshot file (plain or gzipped JSON) and merges it into the
//! database as a new project.

use crate::config::ImportConfig;
use crate::db::import::{ImportOptions, ImportResult};
use crate::db::Database;
use crate::export::Snapshot;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Arguments for the import subcommand
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Path to the snapshot file to import
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Import under this project name instead of the one in the snapshot
    #[arg(short, long, value_name = "NAME")]
    pub project: Option<String>,

    /// Fail instead of skipping when the project already exists
    #[arg(long)]
    pub no_skip: bool,

    /// Run the import and roll it back, reporting what would change
    #[arg(long)]
    pub dry_run: bool,

    /// Reject snapshots whose task dependencies contain a cycle
    #[arg(long)]
    pub strict: bool,
}

impl ImportArgs {
    /// Build import options from these flags layered over config defaults.
    pub fn options(&self, defaults: &ImportConfig) -> ImportOptions {
        ImportOptions {
            target_project_name: self.project.clone(),
            skip_if_exists: defaults.skip_if_exists && !self.no_skip,
            dry_run: self.dry_run,
            strict_cycles: defaults.strict_cycles || self.strict,
        }
    }

    /// Describe the import mode for logging
    pub fn import_mode(&self) -> &'static str {
        match (self.dry_run, self.no_skip) {
            (true, _) => "dry-run",
            (false, true) => "fail-if-exists",
            (false, false) => "skip-if-exists",
        }
    }

    pub fn run(&self, db: &Database, defaults: &ImportConfig) -> Result<ImportResult> {
        let snapshot = Snapshot::from_file(&self.file)
            .with_context(|| format!("reading snapshot {}", self.file.display()))?;
        tracing::info!(
            file = %self.file.display(),
            mode = self.import_mode(),
            rows = snapshot.row_count(),
            "Importing snapshot"
        );
        Ok(db.import_snapshot(&snapshot, &self.options(defaults)))
    }
}
