//! Structured error types for migration and import operations.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Schema errors
    SchemaMismatch,
    DialectUnsupported,
    MigrationFailed,

    // Conflict errors
    DependencyCycle,
    ProjectConflict,

    // Validation errors
    CrossProjectDependency,
    InvalidProjectName,
    InvalidSnapshot,

    // Not found errors
    ProjectNotFound,
    TaskNotFound,

    // Internal errors
    DatabaseError,
    InternalError,
}

/// Errors raised by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A migration precondition (table, column, pragma state) does not hold.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The requested DDL path has no safe implementation on this dialect.
    #[error("Operation not supported on {dialect}: {operation}")]
    DialectUnsupportedOperation {
        dialect: &'static str,
        operation: String,
    },

    /// An edge insertion or an imported edge set would create a cycle.
    #[error("Dependency cycle: {0}")]
    CycleDetected(String),

    /// Both ends of a dependency edge must belong to the same project.
    #[error("Task {blocker} (project {blocker_project}) cannot block task {blocked} (project {blocked_project})")]
    CrossProjectDependency {
        blocker: i64,
        blocker_project: i64,
        blocked: i64,
        blocked_project: i64,
    },

    /// The target project name is already taken.
    #[error("Project '{0}' already exists")]
    ProjectConflict(String),

    #[error("Invalid project name '{name}': {reason}")]
    InvalidProjectName { name: String, reason: String },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    /// A migration descriptor failed; earlier descriptors of the run stay applied.
    #[error("Migration {id} failed: {source}")]
    Migration {
        id: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Error reported by a non-SQLite driver behind a `DdlExecutor`.
    #[error("Driver error: {0}")]
    Driver(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    // Convenience constructors

    pub fn dependency_cycle(blocker: impl fmt::Display, blocked: impl fmt::Display) -> Self {
        Self::CycleDetected(format!(
            "adding dependency {} -> {} would create a cycle",
            blocker, blocked
        ))
    }

    pub fn invalid_project_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProjectName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(dialect: &'static str, operation: impl Into<String>) -> Self {
        Self::DialectUnsupportedOperation {
            dialect,
            operation: operation.into(),
        }
    }

    pub fn migration(id: &str, source: StoreError) -> Self {
        Self::Migration {
            id: id.to_string(),
            source: Box::new(source),
        }
    }

    /// The identifier of the failing migration, if this error came from one.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            StoreError::Migration { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::SchemaMismatch(_) => ErrorCode::SchemaMismatch,
            StoreError::DialectUnsupportedOperation { .. } => ErrorCode::DialectUnsupported,
            StoreError::CycleDetected(_) => ErrorCode::DependencyCycle,
            StoreError::CrossProjectDependency { .. } => ErrorCode::CrossProjectDependency,
            StoreError::ProjectConflict(_) => ErrorCode::ProjectConflict,
            StoreError::InvalidProjectName { .. } => ErrorCode::InvalidProjectName,
            StoreError::ProjectNotFound(_) => ErrorCode::ProjectNotFound,
            StoreError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            StoreError::Migration { .. } => ErrorCode::MigrationFailed,
            StoreError::InvalidSnapshot(_) | StoreError::Json(_) => ErrorCode::InvalidSnapshot,
            StoreError::Database(_) | StoreError::Driver(_) => ErrorCode::DatabaseError,
            StoreError::Io(_) => ErrorCode::InternalError,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
