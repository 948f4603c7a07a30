//! Core types for the context store.

use serde::{Deserialize, Serialize};

/// A named project owning scoped records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    /// How the project came to exist, e.g. `manual` or `import`.
    pub detection_source: String,
    pub created_at: i64,
}

/// Task status values.
pub const TASK_STATUSES: &[&str] = &["todo", "in_progress", "blocked", "done"];

/// A unit of work within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: i64,
    /// Where the task was first recorded; defaults to `local`.
    pub origin: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A directed blocker -> blocked edge between two tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    pub blocker_task_id: i64,
    pub blocked_task_id: i64,
    pub created_at: i64,
}
