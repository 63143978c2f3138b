use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database identity of a requirement (SQLite rowid)
pub type RequirementId = i64;
/// Database identity of a requirement type
pub type TypeId = i64;
/// Database identity of a status
pub type StatusId = i64;

/// A single requirement record as held by the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub id: RequirementId,

    pub type_id: TypeId,

    /// Dot-separated zero-based numbering, e.g. "0.2.1"
    pub num_path: String,

    /// Cosmetic label shown next to the code; never used for linking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_code: Option<String>,

    pub title: String,

    pub description_md: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale_md: Option<String>,

    /// `None` for root requirements
    #[serde(default)]
    pub parent_id: Option<RequirementId>,

    /// Position within the sibling group
    #[serde(default)]
    pub order_index: i64,

    pub status_id: StatusId,

    /// Free-text provenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Requirement {
    /// Builds the code (`type_code + num_path`) for this requirement
    pub fn code_with(&self, type_code: &str) -> String {
        format!("{}{}", type_code, self.num_path)
    }

    /// Label shown in trees and documents: `"<display> (<code>)"` or the code
    pub fn label_with(&self, type_code: &str) -> String {
        let code = self.code_with(type_code);
        match self.display_code.as_deref().map(str::trim) {
            Some(display) if !display.is_empty() => format!("{} ({})", display, code),
            _ => code,
        }
    }

    /// Applies a change set in place, leaving `updated_at` to the caller
    pub fn apply(&mut self, changes: &RequirementChanges) {
        if let Some(type_id) = changes.type_id {
            self.type_id = type_id;
        }
        if let Some(num_path) = &changes.num_path {
            self.num_path = num_path.clone();
        }
        if let Some(display_code) = &changes.display_code {
            self.display_code = display_code.clone();
        }
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(description_md) = &changes.description_md {
            self.description_md = description_md.clone();
        }
        if let Some(rationale_md) = &changes.rationale_md {
            self.rationale_md = rationale_md.clone();
        }
        if let Some(parent_id) = changes.parent_id {
            self.parent_id = parent_id;
        }
        if let Some(order_index) = changes.order_index {
            self.order_index = order_index;
        }
        if let Some(status_id) = changes.status_id {
            self.status_id = status_id;
        }
        if let Some(source) = &changes.source {
            self.source = source.clone();
        }
    }
}

/// Fields supplied by a caller creating a requirement
///
/// `num_path` is normally left empty so the numbering engine assigns it;
/// supplying one requires override mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRequirement {
    pub type_id: TypeId,
    #[serde(default)]
    pub num_path: Option<String>,
    #[serde(default)]
    pub display_code: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description_md: String,
    #[serde(default)]
    pub rationale_md: Option<String>,
    #[serde(default)]
    pub parent_id: Option<RequirementId>,
    #[serde(default)]
    pub order_index: Option<i64>,
    #[serde(default)]
    pub status_id: Option<StatusId>,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewRequirement {
    pub fn new(type_id: TypeId, title: impl Into<String>) -> Self {
        Self {
            type_id,
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn under(mut self, parent_id: RequirementId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description_md = description.into();
        self
    }
}

/// Fully resolved insert, as handed to a storage backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementInsert {
    pub type_id: TypeId,
    pub num_path: String,
    pub display_code: Option<String>,
    pub title: String,
    pub description_md: String,
    pub rationale_md: Option<String>,
    pub parent_id: Option<RequirementId>,
    pub order_index: i64,
    pub status_id: StatusId,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RequirementInsert {
    pub fn into_requirement(self, id: RequirementId) -> Requirement {
        Requirement {
            id,
            type_id: self.type_id,
            num_path: self.num_path,
            display_code: self.display_code,
            title: self.title,
            description_md: self.description_md,
            rationale_md: self.rationale_md,
            parent_id: self.parent_id,
            order_index: self.order_index,
            status_id: self.status_id,
            source: self.source,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Partial update of a requirement
///
/// Nullable columns use `Option<Option<_>>`: the outer `None` leaves the
/// field alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementChanges {
    #[serde(default)]
    pub type_id: Option<TypeId>,
    #[serde(default)]
    pub num_path: Option<String>,
    #[serde(default)]
    pub display_code: Option<Option<String>>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description_md: Option<String>,
    #[serde(default)]
    pub rationale_md: Option<Option<String>>,
    #[serde(default)]
    pub parent_id: Option<Option<RequirementId>>,
    #[serde(default)]
    pub order_index: Option<i64>,
    #[serde(default)]
    pub status_id: Option<StatusId>,
    #[serde(default)]
    pub source: Option<Option<String>>,
}

impl RequirementChanges {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Name of the first engine-managed field this change set touches
    pub fn protected_field(&self) -> Option<&'static str> {
        if self.type_id.is_some() {
            Some("type_id")
        } else if self.num_path.is_some() {
            Some("num_path")
        } else if self.parent_id.is_some() {
            Some("parent_id")
        } else {
            None
        }
    }
}

/// A requirement type (e.g. CORE, F, M)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequirementType {
    pub id: TypeId,
    /// Uppercase prefix forming the first half of every code
    pub type_code: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub order_index: i64,
}

/// A workflow status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub id: StatusId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub order_index: i64,
}

/// Fields for creating or editing a type. `id` is ignored on insert.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeFields {
    pub type_code: Option<String>,
    pub name: Option<String>,
    pub color: Option<Option<String>>,
    pub icon: Option<Option<String>>,
    pub order_index: Option<i64>,
}

/// Fields for creating or editing a status
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusFields {
    pub name: Option<String>,
    pub color: Option<Option<String>>,
    pub order_index: Option<i64>,
}

/// Direction for single-step reordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(format!("direction must be 'up' or 'down', got '{}'", other)),
        }
    }
}

/// One `order_index` assignment within an atomic batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderUpdate {
    pub id: RequirementId,
    pub order_index: i64,
}

/// Everything needed to build a tree store, read in one pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub types: Vec<RequirementType>,
    pub statuses: Vec<Status>,
    pub requirements: Vec<Requirement>,
}

/// Schema version written to and expected in the `db_version` table
pub const DB_VERSION: &str = "1.1";

/// Metadata key holding the user's requirement-set version label
pub const REQUIREMENT_VERSION_KEY: &str = "requirement_version";

/// Built-in statuses seeded into a fresh database
pub fn default_statuses() -> Vec<Status> {
    [
        (1, "Draft", "#9aa2b1"),
        (2, "Proposed", "#7b8cff"),
        (3, "Approved", "#3f8cff"),
        (4, "In-Progress", "#f2b01e"),
        (5, "Verified", "#2e7d32"),
        (6, "Deferred", "#b00020"),
    ]
    .into_iter()
    .enumerate()
    .map(|(order, (id, name, color))| Status {
        id,
        name: name.to_string(),
        color: Some(color.to_string()),
        order_index: order as i64,
    })
    .collect()
}

/// Built-in requirement types seeded into a fresh database
pub fn default_types() -> Vec<RequirementType> {
    [
        (1, "CORE", "Core", "#b00020", "flag"),
        (2, "F", "Functional", "#1976d2", "chip"),
        (3, "M", "Mechanical", "#388e3c", "ruler"),
    ]
    .into_iter()
    .enumerate()
    .map(|(order, (id, code, name, color, icon))| RequirementType {
        id,
        type_code: code.to_string(),
        name: name.to_string(),
        color: Some(color.to_string()),
        icon: Some(icon.to_string()),
        order_index: order as i64,
    })
    .collect()
}

/// Checks a type code is one or more ASCII uppercase letters
pub fn is_valid_type_code(code: &str) -> bool {
    !code.is_empty() && code.chars().all(|c| c.is_ascii_uppercase())
}

/// Checks a number path is dot-separated non-negative integers
pub fn is_valid_num_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_digit()))
}
