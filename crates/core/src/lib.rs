//! camsync core library.
//!
//! This crate provides the building blocks for collaborative camera editing:
//! per-user workspaces forked from a shared model, field-level three-way
//! merging of camera collections, validated conflict resolution, SQLite
//! persistence, and configuration.

pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod fields;
pub mod merge_engine;
pub mod models;
pub mod store;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use errors::{CoreError, ErrorKind, MergeError};
pub use merge_engine::{MergeEngine, MergeOutcome, MergeResponse, ResolveOutcome};
