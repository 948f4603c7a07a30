//! CLI command definitions for context-store.
//!
//! The entry point is the `Cli` struct; each subcommand module holds its
//! arguments and the code that runs it against a `Database`.

pub mod export;
pub mod import;
pub mod migrate;

use clap::{Parser, Subcommand};
use export::ExportArgs;
use import::ImportArgs;
use migrate::MigrateArgs;
use std::path::PathBuf;

/// Project context store: schema migrations and project snapshots
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending schema migrations, show their status, or roll back
    Migrate(MigrateArgs),

    /// Import a project snapshot into the database
    Import(ImportArgs),

    /// Export one project to a snapshot file
    Export(ExportArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "context-store",
            "import",
            "snap.json",
            "--database",
            "x.db",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.database, Some(PathBuf::from("x.db")));
        assert_eq!(cli.log, "2");
        assert!(matches!(cli.command, Command::Import(_)));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["context-store"]).is_err());
    }
}
