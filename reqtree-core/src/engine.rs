//! Requirement engine
//!
//! [`RequirementEngine`] is the single entry point callers mutate through.
//! Every operation reads a fresh [`TreeStore`] snapshot, validates against
//! it, and then writes through the [`RequirementStore`]. The store stays the
//! authority on uniqueness: a path computed here can still lose a race and
//! come back as [`ReqError::DuplicateCode`].

use std::path::Path;

use chrono::Utc;
use log::{debug, warn};

use crate::db::{create_backend, MemoryBackend, RequirementStore};
use crate::error::{ReqError, Result};
use crate::models::{
    is_valid_type_code, Direction, NewRequirement, Requirement, RequirementChanges,
    RequirementId, RequirementInsert, RequirementType, Snapshot, Status, StatusFields, StatusId,
    TypeFields, TypeId, REQUIREMENT_VERSION_KEY,
};
use crate::numbering::{self, validate_num_path};
use crate::references::{self, Segment};
use crate::render::{self, RenderMode, Rendered, RootSet};
use crate::reorder;
use crate::tree::TreeStore;

pub struct RequirementEngine {
    store: Box<dyn RequirementStore>,
}

impl RequirementEngine {
    pub fn new(store: Box<dyn RequirementStore>) -> Self {
        Self { store }
    }

    /// Opens the database at `path`, inferring the backend from its extension
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(create_backend(path, None)?))
    }

    /// Engine over a fresh, seeded, process-local store
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn store(&self) -> &dyn RequirementStore {
        self.store.as_ref()
    }

    /// Rebuilds the tree store from the current contents of the database
    pub fn tree(&self) -> Result<TreeStore> {
        Ok(TreeStore::from_snapshot(self.store.snapshot()?))
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.store.snapshot()
    }

    // =========================================================================
    // Requirements
    // =========================================================================

    pub fn get_requirement(&self, id: RequirementId) -> Result<Requirement> {
        self.store
            .get_requirement(id)?
            .ok_or(ReqError::RequirementNotFound(id))
    }

    /// Next path a new `type_id` child of `parent_id` would receive
    pub fn compute_next_path(
        &self,
        parent_id: Option<RequirementId>,
        type_id: TypeId,
    ) -> Result<String> {
        numbering::compute_next_path(&self.tree()?, parent_id, type_id)
    }

    /// Creates a requirement and returns its id.
    ///
    /// Without an explicit `num_path` the next free path is assigned. An
    /// explicit path needs `override_mode`.
    pub fn create_requirement(
        &self,
        new: NewRequirement,
        override_mode: bool,
    ) -> Result<RequirementId> {
        let tree = self.tree()?;

        if tree.type_by_id(new.type_id).is_none() {
            return Err(ReqError::TypeNotFound(new.type_id));
        }
        if let Some(parent_id) = new.parent_id {
            if !tree.contains(parent_id) {
                return Err(ReqError::ParentNotFound(parent_id));
            }
        }
        let status_id = match new.status_id {
            Some(id) => tree
                .status_by_id(id)
                .map(|s| s.id)
                .ok_or(ReqError::StatusNotFound(id))?,
            None => tree
                .default_status()
                .map(|s| s.id)
                .ok_or(ReqError::StatusNotFound(0))?,
        };

        let num_path = match new.num_path {
            Some(path) => {
                if !override_mode {
                    warn!("Rejected explicit num_path {} without override", path);
                    return Err(ReqError::OverrideRequired("num_path"));
                }
                validate_num_path(&path)?;
                path
            }
            None => numbering::compute_next_path(&tree, new.parent_id, new.type_id)?,
        };
        let order_index = new
            .order_index
            .unwrap_or(tree.child_ids(new.parent_id).len() as i64);

        let insert = RequirementInsert {
            type_id: new.type_id,
            num_path,
            display_code: new.display_code,
            title: new.title,
            description_md: new.description_md,
            rationale_md: new.rationale_md,
            parent_id: new.parent_id,
            order_index,
            status_id,
            source: new.source,
            created_at: Utc::now(),
        };
        match self.store.insert_requirement(&insert) {
            Ok(id) => {
                debug!(
                    "Created requirement #{} (type #{}, path {})",
                    id, insert.type_id, insert.num_path
                );
                Ok(id)
            }
            Err(e) => {
                warn!("Insert of path {} failed: {}", insert.num_path, e);
                Err(e)
            }
        }
    }

    /// Applies a partial update. Type, path and parent changes need
    /// `override_mode`; a new parent is checked for cycles.
    pub fn update_requirement(
        &self,
        id: RequirementId,
        changes: &RequirementChanges,
        override_mode: bool,
    ) -> Result<()> {
        let tree = self.tree()?;
        if !tree.contains(id) {
            return Err(ReqError::RequirementNotFound(id));
        }
        if let Some(field) = changes.protected_field() {
            if !override_mode {
                warn!("Rejected change of {} on #{} without override", field, id);
                return Err(ReqError::OverrideRequired(field));
            }
        }
        if let Some(type_id) = changes.type_id {
            if tree.type_by_id(type_id).is_none() {
                return Err(ReqError::TypeNotFound(type_id));
            }
        }
        if let Some(status_id) = changes.status_id {
            if tree.status_by_id(status_id).is_none() {
                return Err(ReqError::StatusNotFound(status_id));
            }
        }
        if let Some(num_path) = &changes.num_path {
            validate_num_path(num_path)?;
        }
        let mut changes = changes.clone();
        if let Some(parent_id) = changes.parent_id {
            if let Err(e) = reorder::check_reparent(&tree, id, parent_id) {
                warn!("Rejected reparent of #{}: {}", id, e);
                return Err(e);
            }
            // A record joining another group goes to its end.
            let moving = tree.get(id).is_some_and(|r| r.parent_id != parent_id);
            if moving && changes.order_index.is_none() {
                changes.order_index = Some(reorder::next_order_index(&tree, parent_id));
            }
        }

        if !self.store.update_requirement(id, &changes)? {
            return Err(ReqError::RequirementNotFound(id));
        }
        debug!("Updated requirement #{}", id);
        Ok(())
    }

    /// Deletes a requirement with its whole subtree; returns the count removed
    pub fn delete_requirement(&self, id: RequirementId) -> Result<usize> {
        let removed = self.store.delete_requirement_cascade(id)?;
        if removed == 0 {
            return Err(ReqError::RequirementNotFound(id));
        }
        debug!("Deleted requirement #{} and {} descendants", id, removed - 1);
        Ok(removed)
    }

    /// Swaps a requirement with its neighbour. Returns false when it is
    /// already at that end of its sibling group.
    pub fn reorder(&self, id: RequirementId, direction: Direction) -> Result<bool> {
        let updates = reorder::plan_reorder(&self.tree()?, id, direction)?;
        if updates.is_empty() {
            return Ok(false);
        }
        self.store.apply_order_updates(&updates)?;
        debug!("Moved #{} {:?}", id, direction);
        Ok(true)
    }

    /// Moves `dragged` to `position` in the sibling group it shares with
    /// `target`, renumbering the group. Storage failures roll the whole
    /// group back and surface as [`ReqError::ReorderFailed`].
    pub fn move_requirement(
        &self,
        dragged: RequirementId,
        target: RequirementId,
        position: usize,
    ) -> Result<()> {
        let updates = match reorder::plan_move(&self.tree()?, dragged, target, position) {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Rejected move of #{} onto #{}: {}", dragged, target, e);
                return Err(e);
            }
        };
        if let Err(e) = self.store.apply_order_updates(&updates) {
            warn!("Move of #{} rolled back: {}", dragged, e);
            return Err(ReqError::ReorderFailed(Box::new(e)));
        }
        debug!("Moved #{} to position {}", dragged, position);
        Ok(())
    }

    /// Drag-and-drop: `dragged` takes the place `target` currently holds
    pub fn move_onto(&self, dragged: RequirementId, target: RequirementId) -> Result<()> {
        let position = reorder::position_of(&self.tree()?, target)?;
        self.move_requirement(dragged, target, position)
    }

    /// Looks a requirement up by its code (e.g. `F0.1`)
    pub fn find_by_code(&self, code: &str) -> Result<Option<Requirement>> {
        Ok(self.tree()?.find_by_code(code).cloned())
    }

    /// Resolves `text` against the codes currently in the database
    pub fn resolve_references(&self, text: &str) -> Result<Vec<Segment>> {
        Ok(references::resolve_references(text, &self.tree()?.code_set()))
    }

    /// Completions for the code being typed at the end of `text`
    pub fn suggest_codes(&self, text: &str, limit: usize) -> Result<Vec<String>> {
        let codes = self.tree()?.code_set();
        Ok(references::suggest_codes(text, &codes, limit)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    pub fn render_tree(&self, roots: &RootSet, mode: &RenderMode) -> Result<Rendered> {
        render::render_tree(&self.tree()?, roots, mode)
    }

    // =========================================================================
    // Types
    // =========================================================================

    pub fn list_types(&self) -> Result<Vec<RequirementType>> {
        self.store.list_types()
    }

    pub fn create_type(&self, fields: &TypeFields, override_mode: bool) -> Result<TypeId> {
        if !override_mode {
            return Err(ReqError::OverrideRequired("types"));
        }
        let code = fields.type_code.clone().unwrap_or_default();
        if !is_valid_type_code(&code) {
            return Err(ReqError::InvalidTypeCode(code));
        }

        let mut fields = fields.clone();
        if fields.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            fields.name = Some(code.clone());
        }
        if fields.order_index.is_none() {
            fields.order_index = Some(self.store.list_types()?.len() as i64);
        }
        let id = self.store.insert_type(&fields)?;
        debug!("Created type #{} ({})", id, code);
        Ok(id)
    }

    pub fn update_type(&self, id: TypeId, fields: &TypeFields, override_mode: bool) -> Result<()> {
        if !override_mode {
            return Err(ReqError::OverrideRequired("types"));
        }
        if let Some(code) = &fields.type_code {
            if !is_valid_type_code(code) {
                return Err(ReqError::InvalidTypeCode(code.clone()));
            }
        }
        if !self.store.update_type(id, fields)? {
            return Err(ReqError::TypeNotFound(id));
        }
        debug!("Updated type #{}", id);
        Ok(())
    }

    pub fn delete_type(&self, id: TypeId, override_mode: bool) -> Result<()> {
        if !override_mode {
            return Err(ReqError::OverrideRequired("types"));
        }
        if !self.store.delete_type(id)? {
            return Err(ReqError::TypeNotFound(id));
        }
        debug!("Deleted type #{}", id);
        Ok(())
    }

    // =========================================================================
    // Statuses
    // =========================================================================

    pub fn list_statuses(&self) -> Result<Vec<Status>> {
        self.store.list_statuses()
    }

    pub fn create_status(&self, fields: &StatusFields) -> Result<StatusId> {
        let name = fields.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(ReqError::EmptyStatusName);
        }
        let mut fields = fields.clone();
        fields.name = Some(name.to_string());
        if fields.order_index.is_none() {
            fields.order_index = Some(self.store.list_statuses()?.len() as i64);
        }
        let id = self.store.insert_status(&fields)?;
        debug!("Created status #{} ({})", id, name);
        Ok(id)
    }

    pub fn update_status(&self, id: StatusId, fields: &StatusFields) -> Result<()> {
        if fields.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ReqError::EmptyStatusName);
        }
        if !self.store.update_status(id, fields)? {
            return Err(ReqError::StatusNotFound(id));
        }
        debug!("Updated status #{}", id);
        Ok(())
    }

    pub fn delete_status(&self, id: StatusId) -> Result<()> {
        if !self.store.delete_status(id)? {
            return Err(ReqError::StatusNotFound(id));
        }
        debug!("Deleted status #{}", id);
        Ok(())
    }

    // =========================================================================
    // Database metadata
    // =========================================================================

    /// The user's requirement-set version label, if set
    pub fn requirement_version(&self) -> Result<Option<String>> {
        self.store.get_meta(REQUIREMENT_VERSION_KEY)
    }

    pub fn set_requirement_version(&self, version: &str) -> Result<()> {
        self.store.set_meta(REQUIREMENT_VERSION_KEY, version)
    }

    /// Wipes the database back to the seeded defaults
    pub fn reset(&self) -> Result<()> {
        warn!("Resetting database to defaults");
        self.store.reset_defaults()
    }
}
