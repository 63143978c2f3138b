//! In-memory index over one snapshot of the requirement forest
//!
//! A [`TreeStore`] is rebuilt from scratch after every mutation; nothing in
//! it is ever patched in place. All engine reads go through it.

use std::collections::HashMap;

use crate::models::{
    Requirement, RequirementId, RequirementType, Snapshot, Status, StatusId, TypeId,
};
use crate::references::CodeSet;

#[derive(Debug, Clone, Default)]
pub struct TreeStore {
    requirements: HashMap<RequirementId, Requirement>,
    /// Sibling groups keyed by parent, each sorted by `(order_index, id)`
    children: HashMap<Option<RequirementId>, Vec<RequirementId>>,
    types: Vec<RequirementType>,
    statuses: Vec<Status>,
    codes: HashMap<String, RequirementId>,
}

impl TreeStore {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let Snapshot {
            mut types,
            mut statuses,
            requirements,
        } = snapshot;
        types.sort_by_key(|t| (t.order_index, t.id));
        statuses.sort_by_key(|s| (s.order_index, s.id));

        let type_codes: HashMap<TypeId, &str> =
            types.iter().map(|t| (t.id, t.type_code.as_str())).collect();

        let mut children: HashMap<Option<RequirementId>, Vec<RequirementId>> = HashMap::new();
        let mut codes = HashMap::new();
        for req in &requirements {
            children.entry(req.parent_id).or_default().push(req.id);
            if let Some(type_code) = type_codes.get(&req.type_id) {
                codes.insert(req.code_with(type_code), req.id);
            }
        }

        let requirements: HashMap<_, _> = requirements.into_iter().map(|r| (r.id, r)).collect();
        for group in children.values_mut() {
            group.sort_by_key(|id| (requirements[id].order_index, *id));
        }

        Self {
            requirements,
            children,
            types,
            statuses,
            codes,
        }
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn get(&self, id: RequirementId) -> Option<&Requirement> {
        self.requirements.get(&id)
    }

    pub fn contains(&self, id: RequirementId) -> bool {
        self.requirements.contains_key(&id)
    }

    /// Ids of the sibling group under `parent_id`, in display order
    pub fn child_ids(&self, parent_id: Option<RequirementId>) -> &[RequirementId] {
        self.children
            .get(&parent_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The sibling group under `parent_id`, in display order
    pub fn children(&self, parent_id: Option<RequirementId>) -> Vec<&Requirement> {
        self.child_ids(parent_id)
            .iter()
            .filter_map(|id| self.requirements.get(id))
            .collect()
    }

    pub fn roots(&self) -> Vec<&Requirement> {
        self.children(None)
    }

    pub fn has_children(&self, id: RequirementId) -> bool {
        !self.child_ids(Some(id)).is_empty()
    }

    /// Every requirement in pre-order (roots first, children by order)
    pub fn iter_preorder(&self) -> Vec<&Requirement> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack: Vec<RequirementId> = self.child_ids(None).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if let Some(req) = self.get(id) {
                out.push(req);
                stack.extend(self.child_ids(Some(id)).iter().rev());
            }
        }
        out
    }

    pub fn types(&self) -> &[RequirementType] {
        &self.types
    }

    pub fn statuses(&self) -> &[Status] {
        &self.statuses
    }

    pub fn type_by_id(&self, id: TypeId) -> Option<&RequirementType> {
        self.types.iter().find(|t| t.id == id)
    }

    pub fn type_by_code(&self, code: &str) -> Option<&RequirementType> {
        self.types.iter().find(|t| t.type_code == code)
    }

    pub fn status_by_id(&self, id: StatusId) -> Option<&Status> {
        self.statuses.iter().find(|s| s.id == id)
    }

    pub fn status_by_name(&self, name: &str) -> Option<&Status> {
        self.statuses
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// First status by order; used when a new requirement names none
    pub fn default_status(&self) -> Option<&Status> {
        self.statuses.first()
    }

    /// `type_code + num_path` of a requirement
    pub fn code_of(&self, id: RequirementId) -> Option<String> {
        let req = self.get(id)?;
        let ty = self.type_by_id(req.type_id)?;
        Some(req.code_with(&ty.type_code))
    }

    pub fn label_of(&self, id: RequirementId) -> Option<String> {
        let req = self.get(id)?;
        let ty = self.type_by_id(req.type_id)?;
        Some(req.label_with(&ty.type_code))
    }

    pub fn find_by_code(&self, code: &str) -> Option<&Requirement> {
        self.codes.get(code).and_then(|id| self.get(*id))
    }

    /// Snapshot of every live code, for the reference resolver
    pub fn code_set(&self) -> CodeSet {
        self.codes.keys().cloned().collect()
    }

    /// Ancestor ids from the direct parent up to the root.
    ///
    /// Stops at a missing parent or after visiting every node once, so a
    /// corrupt cycle in storage cannot loop forever.
    pub fn ancestors(&self, id: RequirementId) -> Vec<RequirementId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|r| r.parent_id);
        while let Some(parent) = current {
            if out.len() > self.len() || out.contains(&parent) {
                break;
            }
            out.push(parent);
            current = self.get(parent).and_then(|r| r.parent_id);
        }
        out
    }

    /// True when `id` lies strictly below `ancestor`
    pub fn is_descendant(&self, id: RequirementId, ancestor: RequirementId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Ids of the subtree rooted at `id` in pre-order, `id` first
    pub fn subtree_ids(&self, id: RequirementId) -> Vec<RequirementId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.contains(current) {
                out.push(current);
                stack.extend(self.child_ids(Some(current)).iter().rev());
            }
        }
        out
    }

    /// Number of records in the subtree rooted at `id`, including itself
    pub fn subtree_size(&self, id: RequirementId) -> usize {
        if !self.contains(id) {
            return 0;
        }
        1 + self
            .child_ids(Some(id))
            .iter()
            .map(|child| self.subtree_size(*child))
            .sum::<usize>()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{default_statuses, default_types};
    use chrono::Utc;

    /// Builds a requirement row for tree-level tests
    pub(crate) fn req(
        id: RequirementId,
        type_id: TypeId,
        num_path: &str,
        parent_id: Option<RequirementId>,
        order_index: i64,
    ) -> Requirement {
        let now = Utc::now();
        Requirement {
            id,
            type_id,
            num_path: num_path.to_string(),
            display_code: None,
            title: format!("Requirement {}", id),
            description_md: String::new(),
            rationale_md: None,
            parent_id,
            order_index,
            status_id: 1,
            source: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn tree_of(requirements: Vec<Requirement>) -> TreeStore {
        TreeStore::from_snapshot(Snapshot {
            types: default_types(),
            statuses: default_statuses(),
            requirements,
        })
    }

    #[test]
    fn test_children_sorted_by_order_then_id() {
        let tree = tree_of(vec![
            req(1, 1, "0", None, 0),
            req(4, 2, "0.2", Some(1), 1),
            req(3, 2, "0.1", Some(1), 1),
            req(2, 2, "0.0", Some(1), 0),
        ]);
        assert_eq!(tree.child_ids(Some(1)), &[2, 3, 4]);
        assert_eq!(tree.roots().len(), 1);
        assert!(tree.child_ids(Some(99)).is_empty());
    }

    #[test]
    fn test_codes_and_lookup() {
        let tree = tree_of(vec![req(1, 1, "0", None, 0), req(2, 2, "0.1", Some(1), 0)]);
        assert_eq!(tree.code_of(1).as_deref(), Some("CORE0"));
        assert_eq!(tree.code_of(2).as_deref(), Some("F0.1"));
        assert_eq!(tree.find_by_code("F0.1").map(|r| r.id), Some(2));
        assert!(tree.find_by_code("F0.2").is_none());

        let codes = tree.code_set();
        assert!(codes.contains("CORE0"));
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn test_ancestry() {
        let tree = tree_of(vec![
            req(1, 1, "0", None, 0),
            req(2, 2, "0.0", Some(1), 0),
            req(3, 2, "0.0.0", Some(2), 0),
            req(4, 1, "1", None, 1),
        ]);
        assert_eq!(tree.ancestors(3), vec![2, 1]);
        assert!(tree.is_descendant(3, 1));
        assert!(!tree.is_descendant(1, 3));
        assert!(!tree.is_descendant(4, 1));
        assert_eq!(tree.subtree_size(1), 3);
        assert_eq!(tree.subtree_ids(1), vec![1, 2, 3]);
        assert!(tree.subtree_ids(9).is_empty());
    }

    #[test]
    fn test_preorder_walk() {
        let tree = tree_of(vec![
            req(1, 1, "0", None, 0),
            req(2, 2, "0.0", Some(1), 1),
            req(3, 2, "0.1", Some(1), 0),
            req(4, 1, "1", None, 1),
            req(5, 3, "0.1.0", Some(3), 0),
        ]);
        let ids: Vec<_> = tree.iter_preorder().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 5, 2, 4]);
    }

    #[test]
    fn test_status_defaults_and_lookup() {
        let tree = tree_of(Vec::new());
        assert_eq!(tree.default_status().map(|s| s.name.as_str()), Some("Draft"));
        assert_eq!(tree.status_by_name("approved").map(|s| s.id), Some(3));
        assert_eq!(tree.type_by_code("M").map(|t| t.id), Some(3));
    }
}
