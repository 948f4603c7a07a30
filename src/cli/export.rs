//! Export subcommand.
//!
//! Writes one project as a snapshot that can be version-controlled, diffed,
//! and imported into another database.

use crate::db::Database;
use anyhow::Result;
use clap::Args;
use std::io::Write;
use std::path::PathBuf;

/// Arguments for the export subcommand
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Name of the project to export
    #[arg(value_name = "PROJECT")]
    pub project: String,

    /// Output file path (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Force gzip compression (auto-detected from .gz extension otherwise)
    #[arg(long)]
    pub gzip: bool,
}

impl ExportArgs {
    /// Determine if output should be compressed based on args and filename
    pub fn should_compress(&self) -> bool {
        self.gzip
            || self
                .output
                .as_ref()
                .is_some_and(|path| path.extension().is_some_and(|ext| ext == "gz"))
    }

    /// Export the project; returns the number of rows written.
    pub fn run(&self, db: &Database) -> Result<usize> {
        let snapshot = db.export_project(&self.project)?;
        match &self.output {
            Some(path) => snapshot.write_to_file(path, self.should_compress())?,
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(snapshot.to_json_pretty()?.as_bytes())?;
                writeln!(stdout)?;
            }
        }
        Ok(snapshot.row_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Snapshot;

    #[test]
    fn test_should_compress() {
        let mut args = ExportArgs {
            project: "alpha".into(),
            output: Some(PathBuf::from("alpha.json")),
            gzip: false,
        };
        assert!(!args.should_compress());
        args.output = Some(PathBuf::from("alpha.json.gz"));
        assert!(args.should_compress());
        args.output = None;
        args.gzip = true;
        assert!(args.should_compress());
    }

    #[test]
    fn test_run_writes_file() {
        let temp = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let project = db.create_project("alpha", None).unwrap();
        db.create_task(project.id, "only", None).unwrap();

        let args = ExportArgs {
            project: "alpha".into(),
            output: Some(temp.path().join("alpha.json.gz")),
            gzip: false,
        };
        assert_eq!(args.run(&db).unwrap(), 1);
        let loaded = Snapshot::from_file(&temp.path().join("alpha.json.gz")).unwrap();
        assert_eq!(loaded.transaction_rows("tasks").len(), 1);
    }
}
