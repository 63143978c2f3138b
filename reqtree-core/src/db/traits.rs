//! Database abstraction traits
//!
//! This module defines the persistence contract every storage backend
//! implements. The engine never talks to SQLite directly; it reads
//! snapshots and issues writes through [`RequirementStore`].

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{
    OrderUpdate, Requirement, RequirementChanges, RequirementId, RequirementInsert,
    RequirementType, Snapshot, Status, StatusFields, StatusId, TypeFields, TypeId,
};

/// Types of database backends available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// SQLite database file
    Sqlite,
    /// Process-local, nothing written to disk
    Memory,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Sqlite => write!(f, "SQLite"),
            BackendType::Memory => write!(f, "Memory"),
        }
    }
}

/// Configuration for database backends
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Backend type
    pub backend_type: BackendType,
    /// Wipe all rows and re-seed defaults on open
    pub reset_defaults: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("requirements.db"),
            backend_type: BackendType::Sqlite,
            reset_defaults: false,
        }
    }
}

/// Persistence contract for requirement data
///
/// Backends must enforce:
/// - `(type_id, num_path)` uniqueness on insert and update, reported as
///   [`ReqError::DuplicateCode`](crate::ReqError::DuplicateCode)
/// - cascading deletes of whole subtrees
/// - all-or-nothing application of [`apply_order_updates`](Self::apply_order_updates)
pub trait RequirementStore: Send + Sync {
    /// Returns the backend type
    fn backend_type(&self) -> BackendType;

    /// Returns the path to the database file, if any
    fn path(&self) -> Option<&Path>;

    // =========================================================================
    // Requirement CRUD Operations
    // =========================================================================

    /// Lists every requirement, ordered by parent then `order_index`
    fn list_requirements(&self) -> Result<Vec<Requirement>>;

    /// Gets a requirement by id
    fn get_requirement(&self, id: RequirementId) -> Result<Option<Requirement>>;

    /// Inserts a requirement and returns its new id
    fn insert_requirement(&self, insert: &RequirementInsert) -> Result<RequirementId>;

    /// Applies a partial update. Returns false if the id does not exist.
    fn update_requirement(&self, id: RequirementId, changes: &RequirementChanges) -> Result<bool>;

    /// Deletes a requirement and all of its descendants in one operation.
    /// Returns the number of removed records (0 if the id did not exist).
    fn delete_requirement_cascade(&self, id: RequirementId) -> Result<usize>;

    /// Writes a batch of `order_index` values atomically: either every
    /// update lands or none does.
    fn apply_order_updates(&self, updates: &[OrderUpdate]) -> Result<()>;

    // =========================================================================
    // Type and Status Operations
    // =========================================================================

    /// Lists types ordered by `order_index`
    fn list_types(&self) -> Result<Vec<RequirementType>>;

    fn insert_type(&self, fields: &TypeFields) -> Result<TypeId>;

    fn update_type(&self, id: TypeId, fields: &TypeFields) -> Result<bool>;

    fn delete_type(&self, id: TypeId) -> Result<bool>;

    /// Lists statuses ordered by `order_index`
    fn list_statuses(&self) -> Result<Vec<Status>>;

    fn insert_status(&self, fields: &StatusFields) -> Result<StatusId>;

    fn update_status(&self, id: StatusId, fields: &StatusFields) -> Result<bool>;

    fn delete_status(&self, id: StatusId) -> Result<bool>;

    /// Number of requirements referencing the type
    fn count_requirements_with_type(&self, id: TypeId) -> Result<usize> {
        Ok(self
            .list_requirements()?
            .iter()
            .filter(|r| r.type_id == id)
            .count())
    }

    /// Number of requirements referencing the status
    fn count_requirements_with_status(&self, id: StatusId) -> Result<usize> {
        Ok(self
            .list_requirements()?
            .iter()
            .filter(|r| r.status_id == id)
            .count())
    }

    // =========================================================================
    // Metadata Operations
    // =========================================================================

    /// Reads a `db_version` metadata value
    fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Writes (upserts) a `db_version` metadata value
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Lists all metadata pairs sorted by key
    fn list_meta(&self) -> Result<Vec<(String, String)>>;

    /// Deletes everything and re-seeds default types, statuses and version
    fn reset_defaults(&self) -> Result<()>;

    /// Replaces every type, status and requirement with the snapshot's
    /// rows, keeping their ids. Metadata is kept.
    ///
    /// Requirements must be ordered parents first. Either the whole
    /// snapshot lands or the previous contents stay untouched.
    fn replace_contents(&self, snapshot: &Snapshot) -> Result<()>;

    // =========================================================================
    // Utility Operations
    // =========================================================================

    /// Reads types, statuses and requirements in one pass
    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            types: self.list_types()?,
            statuses: self.list_statuses()?,
            requirements: self.list_requirements()?,
        })
    }

    /// Returns statistics about the database
    fn stats(&self) -> Result<DatabaseStats> {
        let snapshot = self.snapshot()?;
        Ok(DatabaseStats {
            requirement_count: snapshot.requirements.len(),
            type_count: snapshot.types.len(),
            status_count: snapshot.statuses.len(),
            backend_type: self.backend_type(),
        })
    }
}

/// Statistics about a database
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub requirement_count: usize,
    pub type_count: usize,
    pub status_count: usize,
    pub backend_type: BackendType,
}
