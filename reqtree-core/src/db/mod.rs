//! Database abstraction layer for reqtree
//!
//! This module provides a trait-based abstraction for storage backends,
//! allowing the engine to run against a SQLite file or a process-local
//! store while keeping the same uniqueness, cascade and atomicity rules.

mod lock;
mod memory_backend;
mod migration;
mod sqlite_backend;
mod traits;

pub use lock::{WriteLock, DEFAULT_LOCK_TIMEOUT};
pub use memory_backend::MemoryBackend;
pub use migration::{
    export_to_json, import_database, import_from_json, load_snapshot, migrate_legacy_layout,
    save_database_copy, save_target, validate_database_file, validate_snapshot,
    DATABASE_EXTENSION,
};
pub use sqlite_backend::SqliteBackend;
pub use traits::{BackendType, DatabaseConfig, DatabaseStats, RequirementStore};

use std::path::Path;

use crate::error::Result;

/// Infers the backend from a file extension. Unknown extensions use SQLite.
pub fn infer_backend_type(path: &Path) -> BackendType {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("db") | Some("sqlite") | Some("sqlite3") | Some("reqdb") => BackendType::Sqlite,
        Some("memory") => BackendType::Memory,
        _ => BackendType::Sqlite,
    }
}

/// Creates a database backend based on the file extension or explicit type
pub fn create_backend(
    path: &Path,
    backend_type: Option<BackendType>,
) -> Result<Box<dyn RequirementStore>> {
    open_with(&DatabaseConfig {
        path: path.to_path_buf(),
        backend_type: backend_type.unwrap_or_else(|| infer_backend_type(path)),
        reset_defaults: false,
    })
}

/// Opens a backend from a full configuration
pub fn open_with(config: &DatabaseConfig) -> Result<Box<dyn RequirementStore>> {
    match config.backend_type {
        BackendType::Sqlite => Ok(Box::new(SqliteBackend::open(config)?)),
        BackendType::Memory => Ok(Box::new(MemoryBackend::new())),
    }
}
