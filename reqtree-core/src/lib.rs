pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod numbering;
pub mod references;
pub mod render;
pub mod reorder;
pub mod tree;

// Re-export commonly used types
pub use config::{resolve_db_path, Settings, DB_ENV_VAR, SETTINGS_ENV_VAR};
pub use db::{
    create_backend, BackendType, DatabaseConfig, DatabaseStats, MemoryBackend, RequirementStore,
    SqliteBackend, WriteLock,
};
pub use engine::RequirementEngine;
pub use error::{ReqError, Result};
pub use models::{
    default_statuses, default_types, Direction, NewRequirement, OrderUpdate, Requirement,
    RequirementChanges, RequirementId, RequirementType, Snapshot, Status, StatusFields, StatusId,
    TypeFields, TypeId, DB_VERSION, REQUIREMENT_VERSION_KEY,
};
pub use references::{resolve_references, suggest_codes, CodeSet, Segment, SUGGESTION_LIMIT};
pub use render::{
    InteractiveView, RenderMode, Rendered, RenderedDocument, RenderedNode, RootSet,
    StaticDocument, StaticOptions, Theme, VisibleRow,
};
pub use tree::TreeStore;
