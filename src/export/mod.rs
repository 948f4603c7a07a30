//! Project snapshot format.
//!
//! A snapshot carries one project's data in three groupings: master tables
//! (identity-bearing rows matched or created on import), transaction tables
//! (rows owned by the project) and junction tables (links between the two).
//! Row ids are local to the snapshot; the importer remaps them.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Snapshot format version (semver).
pub const FORMAT_VERSION: &str = "1.0.0";

fn default_format_version() -> String {
    FORMAT_VERSION.to_string()
}

/// Project entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A structured export of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version (semver)
    #[serde(default = "default_format_version")]
    pub format_version: String,

    /// ISO 8601 timestamp of export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,

    /// Tool name and version that created this export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_by: Option<String>,

    /// Name of the exported project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<SnapshotProject>,

    #[serde(default)]
    pub master_tables: BTreeMap<String, Vec<Value>>,

    #[serde(default)]
    pub transaction_tables: BTreeMap<String, Vec<Value>>,

    #[serde(default)]
    pub junction_tables: BTreeMap<String, Vec<Value>>,
}

impl Snapshot {
    /// Create an empty snapshot for `project` with current metadata.
    pub fn new(project: &str) -> Self {
        Self {
            format_version: FORMAT_VERSION.to_string(),
            exported_at: Some(chrono::Utc::now().to_rfc3339()),
            exported_by: Some(format!("context-store v{}", env!("CARGO_PKG_VERSION"))),
            project: Some(project.to_string()),
            projects: Vec::new(),
            master_tables: BTreeMap::new(),
            transaction_tables: BTreeMap::new(),
            junction_tables: BTreeMap::new(),
        }
    }

    /// Load a snapshot from JSON data.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load a snapshot from a file (supports both plain JSON and gzip).
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        // Check for gzip magic bytes
        let mut magic = [0u8; 2];
        let read = reader.read(&mut magic)?;

        // Reset to start
        drop(reader);
        let reader = BufReader::new(File::open(path)?);

        let snapshot = if read == 2 && magic == [0x1f, 0x8b] {
            serde_json::from_reader(flate2::read::GzDecoder::new(reader))?
        } else {
            serde_json::from_reader(reader)?
        };
        Ok(snapshot)
    }

    /// Serialize to JSON with pretty formatting.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write pretty JSON to `path`, gzip-compressed when `gzip` is set.
    pub fn write_to_file(&self, path: &Path, gzip: bool) -> StoreResult<()> {
        let json = self.to_json_pretty()?;
        let file = File::create(path)?;
        if gzip {
            let mut encoder =
                flate2::write::GzEncoder::new(BufWriter::new(file), flate2::Compression::default());
            encoder.write_all(json.as_bytes())?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            writer.write_all(json.as_bytes())?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Name of the project this snapshot describes, if it names one.
    pub fn default_project_name(&self) -> Option<&str> {
        self.project
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.projects.first().map(|p| p.name.as_str()))
    }

    pub fn display_name(&self) -> Option<&str> {
        self.projects.first().and_then(|p| p.display_name.as_deref())
    }

    pub fn master_rows(&self, table: &str) -> &[Value] {
        self.master_tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn transaction_rows(&self, table: &str) -> &[Value] {
        self.transaction_tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn junction_rows(&self, table: &str) -> &[Value] {
        self.junction_tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total rows across all groupings.
    pub fn row_count(&self) -> usize {
        [&self.master_tables, &self.transaction_tables, &self.junction_tables]
            .iter()
            .flat_map(|group| group.values())
            .map(Vec::len)
            .sum()
    }

    /// Get the list of tables present in this snapshot.
    pub fn table_names(&self) -> Vec<&str> {
        self.master_tables
            .keys()
            .chain(self.transaction_tables.keys())
            .chain(self.junction_tables.keys())
            .map(|s| s.as_str())
            .collect()
    }

    /// Reject snapshots written by an incompatible major format version.
    pub fn check_format(&self) -> StoreResult<()> {
        let major = |v: &str| v.split('.').next().map(str::to_string);
        if major(&self.format_version) != major(FORMAT_VERSION) {
            return Err(StoreError::InvalidSnapshot(format!(
                "unsupported format version {} (expected {}.x)",
                self.format_version,
                FORMAT_VERSION.split('.').next().unwrap_or("1")
            )));
        }
        Ok(())
    }
}

/// Row ordering for each exported table.
/// These ensure deterministic ordering for diffs.
pub fn get_table_ordering(table: &str) -> &'static str {
    match table {
        "task_dependencies" => "ORDER BY blocker_task_id, blocked_task_id",
        "decision_tags" => "ORDER BY decision_id, tag_id",
        "decision_scopes" => "ORDER BY decision_id, scope_id",
        "constraint_tags" => "ORDER BY constraint_id, tag_id",
        "task_tags" => "ORDER BY task_id, tag_id",
        "task_file_links" => "ORDER BY task_id, file_id",
        _ => "ORDER BY id",
    }
}
