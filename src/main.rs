//! context-store CLI
//!
//! Applies schema migrations and moves projects between databases as
//! snapshots.

use anyhow::{Result, bail};
use clap::Parser;
use context_store::cli::export::ExportArgs;
use context_store::cli::import::ImportArgs;
use context_store::cli::{Cli, Command, migrate};
use context_store::config::{Config, ConfigLoader, ConfigPaths};
use context_store::db::Database;
use context_store::logging::{self, LogTarget};
use std::path::PathBuf;
use tracing::{debug, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let target = cli.log.parse::<LogTarget>().unwrap_or(LogTarget::Stderr);
    logging::init(&target, cli.verbose)?;

    let explicit = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("CONTEXT_STORE_CONFIG").map(PathBuf::from));
    let loader = ConfigLoader::load_from(explicit.as_deref(), ConfigPaths::discover(), |key| {
        std::env::var(key).ok()
    })?;
    for (tier, path) in loader.sources() {
        debug!(tier = %tier, path = %path.display(), "Loaded config");
    }
    let mut config = loader.into_config();

    if let Some(db_path) = &cli.database {
        config.database.path = db_path.clone();
    }
    config.ensure_db_dir()?;

    match cli.command {
        Command::Migrate(args) => {
            let db = Database::open_with_config(&config)?;
            for line in migrate::run_migrate(&args, &db)? {
                println!("{}", line);
            }
        }
        Command::Import(args) => run_import(&config, &args)?,
        Command::Export(args) => run_export(&config, &args)?,
    }

    Ok(())
}

fn run_import(config: &Config, args: &ImportArgs) -> Result<()> {
    let db = Database::open_with_config(config)?;
    let result = args.run(&db, &config.import)?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!(
            "import failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(stats) = &result.stats {
        for warning in &stats.warnings {
            eprintln!("Warning: {}", warning);
        }
    }
    Ok(())
}

fn run_export(config: &Config, args: &ExportArgs) -> Result<()> {
    let db = Database::open_with_config(config)?;
    let rows = args.run(&db)?;
    match &args.output {
        Some(path) => info!(project = %args.project, rows, path = %path.display(), "Exported"),
        None => debug!(project = %args.project, rows, "Exported to stdout"),
    }
    Ok(())
}
