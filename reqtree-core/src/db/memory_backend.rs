//! In-memory storage backend
//!
//! Holds the same tables as the SQLite schema in plain vectors. Constraint
//! checks mirror the SQLite indexes and foreign keys so the engine behaves
//! identically on both backends.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::error::{ReqError, Result};
use crate::models::{
    default_statuses, default_types, OrderUpdate, Requirement, RequirementChanges,
    RequirementId, RequirementInsert, RequirementType, Snapshot, Status, StatusFields,
    StatusId, TypeFields, TypeId, DB_VERSION,
};

use super::traits::{BackendType, RequirementStore};

#[derive(Debug, Default)]
struct Tables {
    requirements: Vec<Requirement>,
    types: Vec<RequirementType>,
    statuses: Vec<Status>,
    meta: BTreeMap<String, String>,
    next_requirement_id: RequirementId,
    next_type_id: TypeId,
    next_status_id: StatusId,
}

impl Tables {
    fn seeded() -> Self {
        let types = default_types();
        let statuses = default_statuses();
        let mut meta = BTreeMap::new();
        meta.insert("db_version".to_string(), DB_VERSION.to_string());
        Self {
            next_type_id: types.iter().map(|t| t.id).max().unwrap_or(0) + 1,
            next_status_id: statuses.iter().map(|s| s.id).max().unwrap_or(0) + 1,
            next_requirement_id: 1,
            requirements: Vec::new(),
            types,
            statuses,
            meta,
        }
    }

    fn code_taken(&self, type_id: TypeId, num_path: &str, except: Option<RequirementId>) -> bool {
        self.requirements
            .iter()
            .any(|r| r.type_id == type_id && r.num_path == num_path && Some(r.id) != except)
    }

    fn check_references(&self, type_id: TypeId, status_id: StatusId, parent_id: Option<RequirementId>) -> Result<()> {
        if !self.types.iter().any(|t| t.id == type_id) {
            return Err(ReqError::TypeNotFound(type_id));
        }
        if !self.statuses.iter().any(|s| s.id == status_id) {
            return Err(ReqError::StatusNotFound(status_id));
        }
        if let Some(parent_id) = parent_id {
            if !self.requirements.iter().any(|r| r.id == parent_id) {
                return Err(ReqError::ParentNotFound(parent_id));
            }
        }
        Ok(())
    }
}

/// In-memory backend implementation
#[derive(Debug)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a backend seeded with the default types and statuses
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::seeded()),
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| ReqError::Poisoned)
    }
}

fn sort_types(types: &mut [RequirementType]) {
    types.sort_by_key(|t| (t.order_index, t.id));
}

fn sort_statuses(statuses: &mut [Status]) {
    statuses.sort_by_key(|s| (s.order_index, s.id));
}

impl RequirementStore for MemoryBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    fn path(&self) -> Option<&Path> {
        None
    }

    fn list_requirements(&self) -> Result<Vec<Requirement>> {
        let mut requirements = self.tables()?.requirements.clone();
        requirements.sort_by_key(|r| (r.parent_id, r.order_index, r.id));
        Ok(requirements)
    }

    fn get_requirement(&self, id: RequirementId) -> Result<Option<Requirement>> {
        Ok(self.tables()?.requirements.iter().find(|r| r.id == id).cloned())
    }

    fn insert_requirement(&self, insert: &RequirementInsert) -> Result<RequirementId> {
        let mut tables = self.tables()?;
        tables.check_references(insert.type_id, insert.status_id, insert.parent_id)?;
        if tables.code_taken(insert.type_id, &insert.num_path, None) {
            return Err(ReqError::DuplicateCode {
                type_id: insert.type_id,
                num_path: insert.num_path.clone(),
            });
        }
        let id = tables.next_requirement_id;
        tables.next_requirement_id += 1;
        tables.requirements.push(insert.clone().into_requirement(id));
        Ok(id)
    }

    fn update_requirement(&self, id: RequirementId, changes: &RequirementChanges) -> Result<bool> {
        let mut tables = self.tables()?;
        let Some(current) = tables.requirements.iter().find(|r| r.id == id) else {
            return Ok(false);
        };
        let mut updated = current.clone();
        updated.apply(changes);
        tables.check_references(updated.type_id, updated.status_id, updated.parent_id)?;
        if tables.code_taken(updated.type_id, &updated.num_path, Some(id)) {
            return Err(ReqError::DuplicateCode {
                type_id: updated.type_id,
                num_path: updated.num_path,
            });
        }
        updated.updated_at = Utc::now();
        if let Some(slot) = tables.requirements.iter_mut().find(|r| r.id == id) {
            *slot = updated;
        }
        Ok(true)
    }

    fn delete_requirement_cascade(&self, id: RequirementId) -> Result<usize> {
        let mut tables = self.tables()?;
        if !tables.requirements.iter().any(|r| r.id == id) {
            return Ok(0);
        }
        let mut doomed: HashSet<RequirementId> = HashSet::from([id]);
        // Fixed point over parent links; the table is small and unsorted.
        loop {
            let before = doomed.len();
            for req in &tables.requirements {
                if req.parent_id.is_some_and(|p| doomed.contains(&p)) {
                    doomed.insert(req.id);
                }
            }
            if doomed.len() == before {
                break;
            }
        }
        tables.requirements.retain(|r| !doomed.contains(&r.id));
        Ok(doomed.len())
    }

    fn apply_order_updates(&self, updates: &[OrderUpdate]) -> Result<()> {
        let mut tables = self.tables()?;
        // Validate the whole batch before touching anything.
        for update in updates {
            if !tables.requirements.iter().any(|r| r.id == update.id) {
                return Err(ReqError::RequirementNotFound(update.id));
            }
        }
        let now = Utc::now();
        for update in updates {
            if let Some(req) = tables.requirements.iter_mut().find(|r| r.id == update.id) {
                req.order_index = update.order_index;
                req.updated_at = now;
            }
        }
        Ok(())
    }

    fn list_types(&self) -> Result<Vec<RequirementType>> {
        let mut types = self.tables()?.types.clone();
        sort_types(&mut types);
        Ok(types)
    }

    fn insert_type(&self, fields: &TypeFields) -> Result<TypeId> {
        let mut tables = self.tables()?;
        let type_code = fields.type_code.clone().unwrap_or_default();
        if tables.types.iter().any(|t| t.type_code == type_code) {
            return Err(ReqError::DuplicateTypeCode(type_code));
        }
        let id = tables.next_type_id;
        tables.next_type_id += 1;
        tables.types.push(RequirementType {
            id,
            type_code,
            name: fields.name.clone().unwrap_or_default(),
            color: fields.color.clone().flatten(),
            icon: fields.icon.clone().flatten(),
            order_index: fields.order_index.unwrap_or(0),
        });
        Ok(id)
    }

    fn update_type(&self, id: TypeId, fields: &TypeFields) -> Result<bool> {
        let mut tables = self.tables()?;
        if !tables.types.iter().any(|t| t.id == id) {
            return Ok(false);
        }
        if let Some(code) = &fields.type_code {
            if tables.types.iter().any(|t| &t.type_code == code && t.id != id) {
                return Err(ReqError::DuplicateTypeCode(code.clone()));
            }
        }
        let Some(ty) = tables.types.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        if let Some(code) = &fields.type_code {
            ty.type_code = code.clone();
        }
        if let Some(name) = &fields.name {
            ty.name = name.clone();
        }
        if let Some(color) = &fields.color {
            ty.color = color.clone();
        }
        if let Some(icon) = &fields.icon {
            ty.icon = icon.clone();
        }
        if let Some(order_index) = fields.order_index {
            ty.order_index = order_index;
        }
        Ok(true)
    }

    fn delete_type(&self, id: TypeId) -> Result<bool> {
        let mut tables = self.tables()?;
        if tables.requirements.iter().any(|r| r.type_id == id) {
            return Err(ReqError::TypeInUse(id));
        }
        let before = tables.types.len();
        tables.types.retain(|t| t.id != id);
        Ok(tables.types.len() != before)
    }

    fn list_statuses(&self) -> Result<Vec<Status>> {
        let mut statuses = self.tables()?.statuses.clone();
        sort_statuses(&mut statuses);
        Ok(statuses)
    }

    fn insert_status(&self, fields: &StatusFields) -> Result<StatusId> {
        let mut tables = self.tables()?;
        let id = tables.next_status_id;
        tables.next_status_id += 1;
        tables.statuses.push(Status {
            id,
            name: fields.name.clone().unwrap_or_default(),
            color: fields.color.clone().flatten(),
            order_index: fields.order_index.unwrap_or(0),
        });
        Ok(id)
    }

    fn update_status(&self, id: StatusId, fields: &StatusFields) -> Result<bool> {
        let mut tables = self.tables()?;
        let Some(status) = tables.statuses.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        if let Some(name) = &fields.name {
            status.name = name.clone();
        }
        if let Some(color) = &fields.color {
            status.color = color.clone();
        }
        if let Some(order_index) = fields.order_index {
            status.order_index = order_index;
        }
        Ok(true)
    }

    fn delete_status(&self, id: StatusId) -> Result<bool> {
        let mut tables = self.tables()?;
        if tables.requirements.iter().any(|r| r.status_id == id) {
            return Err(ReqError::StatusInUse(id));
        }
        let before = tables.statuses.len();
        tables.statuses.retain(|s| s.id != id);
        Ok(tables.statuses.len() != before)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.tables()?.meta.get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.tables()?.meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn list_meta(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .tables()?
            .meta
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn reset_defaults(&self) -> Result<()> {
        *self.tables()? = Tables::seeded();
        Ok(())
    }

    fn replace_contents(&self, snapshot: &Snapshot) -> Result<()> {
        // Build the new tables aside so a rejected snapshot changes nothing.
        let mut staged = Tables {
            types: snapshot.types.clone(),
            statuses: snapshot.statuses.clone(),
            next_type_id: snapshot.types.iter().map(|t| t.id).max().unwrap_or(0) + 1,
            next_status_id: snapshot.statuses.iter().map(|s| s.id).max().unwrap_or(0) + 1,
            next_requirement_id: snapshot.requirements.iter().map(|r| r.id).max().unwrap_or(0) + 1,
            ..Default::default()
        };
        for req in &snapshot.requirements {
            staged.check_references(req.type_id, req.status_id, req.parent_id)?;
            if staged.code_taken(req.type_id, &req.num_path, None) {
                return Err(ReqError::DuplicateCode {
                    type_id: req.type_id,
                    num_path: req.num_path.clone(),
                });
            }
            staged.requirements.push(req.clone());
        }

        let mut tables = self.tables()?;
        staged.meta = std::mem::take(&mut tables.meta);
        staged
            .meta
            .entry("db_version".to_string())
            .or_insert_with(|| DB_VERSION.to_string());
        *tables = staged;
        Ok(())
    }
}
