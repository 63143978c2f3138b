//! Live tree view state: expansion, selection and code navigation

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::RequirementId;

use super::{LinkPair, RenderedDocument, RenderedNode};

/// One row a terminal or GUI would draw right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub id: RequirementId,
    pub depth: usize,
    pub label: String,
    pub title: String,
    pub status: String,
    pub has_children: bool,
    pub expanded: bool,
    pub selected: bool,
}

#[derive(Debug, Clone)]
pub struct InteractiveView {
    document: RenderedDocument,
    parents: HashMap<RequirementId, Option<RequirementId>>,
    by_code: HashMap<String, RequirementId>,
    expanded: HashSet<RequirementId>,
    selected: Option<RequirementId>,
}

impl InteractiveView {
    /// Starts with everything collapsed and nothing selected
    pub fn new(document: RenderedDocument) -> Self {
        let mut view = Self {
            document: RenderedDocument::default(),
            parents: HashMap::new(),
            by_code: HashMap::new(),
            expanded: HashSet::new(),
            selected: None,
        };
        view.load(document);
        view
    }

    fn load(&mut self, document: RenderedDocument) {
        self.parents.clear();
        self.by_code.clear();
        for node in document.preorder() {
            self.parents.insert(node.id, node.parent.as_ref().map(|p| p.id));
            self.by_code.insert(node.code.clone(), node.id);
        }
        self.document = document;
    }

    /// Swaps in a freshly built document. Expansion and selection survive
    /// for every id that still exists.
    pub fn refresh(&mut self, document: RenderedDocument) {
        self.load(document);
        let parents = &self.parents;
        self.expanded.retain(|id| parents.contains_key(id));
        if self.selected.is_some_and(|id| !parents.contains_key(&id)) {
            self.selected = None;
        }
    }

    pub fn document(&self) -> &RenderedDocument {
        &self.document
    }

    pub fn node(&self, id: RequirementId) -> Option<&RenderedNode> {
        self.document.find(id)
    }

    pub fn selected(&self) -> Option<RequirementId> {
        self.selected
    }

    pub fn selected_node(&self) -> Option<&RenderedNode> {
        self.selected.and_then(|id| self.node(id))
    }

    /// Selects a node; false when the id is not in the view
    pub fn select(&mut self, id: RequirementId) -> bool {
        if self.parents.contains_key(&id) {
            self.selected = Some(id);
            true
        } else {
            false
        }
    }

    pub fn is_expanded(&self, id: RequirementId) -> bool {
        self.expanded.contains(&id)
    }

    /// Flips a node's expansion and returns the new state. Leaves stay
    /// collapsed.
    pub fn toggle(&mut self, id: RequirementId) -> bool {
        if self.expanded.remove(&id) {
            return false;
        }
        if self.node(id).is_some_and(|n| !n.children.is_empty()) {
            self.expanded.insert(id);
            return true;
        }
        false
    }

    pub fn expand_all(&mut self) {
        self.expanded = self
            .document
            .preorder()
            .into_iter()
            .filter(|n| !n.children.is_empty())
            .map(|n| n.id)
            .collect();
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    /// Follows a code link: selects the target and expands every ancestor
    /// so it becomes visible. Returns the target id, or `None` for a code
    /// that is not in the view.
    pub fn navigate(&mut self, code: &str) -> Option<RequirementId> {
        let target = *self.by_code.get(code)?;
        let mut current = self.parents.get(&target).copied().flatten();
        while let Some(parent) = current {
            self.expanded.insert(parent);
            current = self.parents.get(&parent).copied().flatten();
        }
        self.selected = Some(target);
        Some(target)
    }

    pub fn visible_rows(&self) -> Vec<VisibleRow> {
        let mut rows = Vec::new();
        for root in &self.document.roots {
            self.collect_rows(root, &mut rows);
        }
        rows
    }

    fn collect_rows(&self, node: &RenderedNode, rows: &mut Vec<VisibleRow>) {
        let expanded = self.is_expanded(node.id);
        rows.push(VisibleRow {
            id: node.id,
            depth: node.depth,
            label: node.label.clone(),
            title: node.title.clone(),
            status: node.status.name.clone(),
            has_children: !node.children.is_empty(),
            expanded,
            selected: self.selected == Some(node.id),
        });
        if expanded {
            for child in &node.children {
                self.collect_rows(child, rows);
            }
        }
    }

    /// Every navigate action the view offers, as `(source, target code)`
    pub fn link_pairs(&self) -> BTreeSet<LinkPair> {
        self.document.link_pairs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::build_document;
    use crate::render::tests::sample_tree;
    use crate::render::RootSet;
    use crate::tree::tests::{req, tree_of};

    fn view() -> InteractiveView {
        InteractiveView::new(build_document(&sample_tree(), &RootSet::All).unwrap())
    }

    fn visible_ids(view: &InteractiveView) -> Vec<RequirementId> {
        view.visible_rows().iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_starts_collapsed() {
        let view = view();
        assert_eq!(visible_ids(&view), vec![1, 4]);
        assert!(view.visible_rows()[0].has_children);
        assert!(!view.visible_rows()[1].has_children);
    }

    #[test]
    fn test_toggle_and_expand_all() {
        let mut view = view();
        assert!(view.toggle(1));
        assert_eq!(visible_ids(&view), vec![1, 2, 3, 4]);
        assert!(!view.toggle(1));
        assert_eq!(visible_ids(&view), vec![1, 4]);
        assert!(!view.toggle(4), "leaves never expand");

        view.expand_all();
        assert_eq!(visible_ids(&view).len(), 4);
        view.collapse_all();
        assert_eq!(visible_ids(&view), vec![1, 4]);
    }

    #[test]
    fn test_navigate_reveals_target() {
        let mut view = view();
        assert_eq!(view.navigate("F0.1"), Some(3));
        assert_eq!(view.selected(), Some(3));
        assert!(view.is_expanded(1));
        let row = view.visible_rows().into_iter().find(|r| r.id == 3).unwrap();
        assert!(row.selected);

        assert_eq!(view.navigate("F9.9"), None);
        assert_eq!(view.selected(), Some(3));
    }

    #[test]
    fn test_refresh_keeps_surviving_state() {
        let mut view = view();
        view.toggle(1);
        view.select(3);

        // Node 3 is gone, node 1 survives with a new child.
        let tree = tree_of(vec![
            req(1, 1, "0", None, 0),
            req(2, 2, "0.0", Some(1), 0),
            req(5, 3, "0.0", Some(1), 1),
        ]);
        view.refresh(build_document(&tree, &RootSet::All).unwrap());
        assert!(view.is_expanded(1));
        assert_eq!(view.selected(), None);
        assert_eq!(visible_ids(&view), vec![1, 2, 5]);

        view.select(5);
        view.refresh(build_document(&tree, &RootSet::All).unwrap());
        assert_eq!(view.selected_node().map(|n| n.code.as_str()), Some("M0.0"));
    }

    #[test]
    fn test_select_unknown_id() {
        let mut view = view();
        assert!(!view.select(42));
        assert_eq!(view.selected(), None);
    }
}
