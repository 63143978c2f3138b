//! Error types for the requirement engine
//!
//! Every fallible operation in the library returns [`ReqError`]. Storage
//! failures are wrapped rather than flattened so callers can still tell a
//! code collision apart from an I/O problem.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::models::{RequirementId, StatusId, TypeId};

/// Convenience alias used throughout the crate
pub type Result<T, E = ReqError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ReqError {
    #[error("Parent requirement #{0} not found")]
    ParentNotFound(RequirementId),

    #[error("Requirement #{0} not found")]
    RequirementNotFound(RequirementId),

    #[error("Type #{0} not found")]
    TypeNotFound(TypeId),

    #[error("Status #{0} not found")]
    StatusNotFound(StatusId),

    #[error("A requirement with type #{type_id} and number {num_path} already exists")]
    DuplicateCode { type_id: TypeId, num_path: String },

    #[error(
        "Drag-and-drop is only supported within the same parent \
         (#{dragged} and #{target} have different parents)"
    )]
    CrossParentMoveUnsupported {
        dragged: RequirementId,
        target: RequirementId,
    },

    #[error("Reordering failed and was rolled back: {0}")]
    ReorderFailed(#[source] Box<ReqError>),

    #[error("Override mode required to change {0}")]
    OverrideRequired(&'static str),

    #[error("Moving #{requirement} under #{new_parent} would create a cycle")]
    CycleDetected {
        requirement: RequirementId,
        new_parent: RequirementId,
    },

    #[error("Invalid number path '{0}': expected dot-separated non-negative integers")]
    InvalidNumPath(String),

    #[error("Invalid type code '{0}': expected one or more uppercase letters")]
    InvalidTypeCode(String),

    #[error("Type code '{0}' already exists")]
    DuplicateTypeCode(String),

    #[error("Status name must not be empty")]
    EmptyStatusName,

    #[error("Type #{0} is in use")]
    TypeInUse(TypeId),

    #[error("Status #{0} is in use")]
    StatusInUse(StatusId),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Incompatible database version or file format: {0}")]
    IncompatibleDatabase(String),

    #[error("Timeout waiting for lock on {path:?} after {waited:?}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ReqError {
    /// True when the error is a `(type_id, num_path)` collision, including
    /// one that surfaced inside a rolled-back reorder.
    pub fn is_duplicate_code(&self) -> bool {
        match self {
            ReqError::DuplicateCode { .. } => true,
            ReqError::ReorderFailed(inner) => inner.is_duplicate_code(),
            _ => false,
        }
    }
}
