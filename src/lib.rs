//! Project context store.
//!
//! A multi-project SQLite store for decisions, constraints and tasks, with a
//! dialect-aware migration runner and snapshot export/import between
//! databases.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod graph;
pub mod logging;
pub mod types;
