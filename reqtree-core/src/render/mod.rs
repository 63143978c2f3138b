//! Tree rendering
//!
//! One pre-order traversal ([`build_document`]) resolves every node's text
//! against the tree's code set. The interactive view and the static HTML
//! document are thin adapters over the resulting [`RenderedDocument`], so
//! they always make the same linking decisions.

mod html;
mod interactive;

pub use html::{escape_html, render_static, StaticDocument, StaticOptions, Theme};
pub use interactive::{InteractiveView, VisibleRow};

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{ReqError, Result};
use crate::models::RequirementId;
use crate::references::{link_targets, resolve_references, CodeSet, Segment};
use crate::tree::TreeStore;

/// `(source node id, target code)`
pub type LinkPair = (RequirementId, String);

const UNKNOWN_STATUS_COLOR: &str = "#9aa2b1";

/// Which part of the forest to render
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RootSet {
    /// Every root requirement
    #[default]
    All,
    /// Only the subtrees under the given requirements, in the given order
    Subtrees(Vec<RequirementId>),
}

/// Output requested from [`render_tree`]
#[derive(Debug, Clone)]
pub enum RenderMode {
    Interactive,
    Static(StaticOptions),
}

/// Result of [`render_tree`]
#[derive(Debug, Clone)]
pub enum Rendered {
    Interactive(InteractiveView),
    Static(StaticDocument),
}

impl Rendered {
    pub fn link_pairs(&self) -> BTreeSet<LinkPair> {
        match self {
            Rendered::Interactive(view) => view.link_pairs(),
            Rendered::Static(doc) => doc.link_pairs().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusBadge {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentRef {
    pub id: RequirementId,
    pub code: String,
}

/// One requirement, ready for presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedNode {
    pub id: RequirementId,
    pub code: String,
    pub anchor: String,
    pub label: String,
    pub title: String,
    pub type_code: String,
    pub num_path: String,
    pub status: StatusBadge,
    pub parent: Option<ParentRef>,
    pub description: Vec<Segment>,
    pub rationale: Option<Vec<Segment>>,
    pub depth: usize,
    pub children: Vec<RenderedNode>,
}

impl RenderedNode {
    /// Codes linked from this node's own text, in order
    pub fn link_targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = link_targets(&self.description).collect();
        if let Some(rationale) = &self.rationale {
            out.extend(link_targets(rationale));
        }
        out
    }
}

/// The shared traversal result both presentations consume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedDocument {
    pub roots: Vec<RenderedNode>,
}

impl RenderedDocument {
    /// All nodes in pre-order
    pub fn preorder(&self) -> Vec<&RenderedNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&RenderedNode> = self.roots.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn find(&self, id: RequirementId) -> Option<&RenderedNode> {
        self.preorder().into_iter().find(|n| n.id == id)
    }

    pub fn link_pairs(&self) -> BTreeSet<LinkPair> {
        self.preorder()
            .into_iter()
            .flat_map(|node| {
                node.link_targets()
                    .into_iter()
                    .map(move |code| (node.id, code.to_string()))
            })
            .collect()
    }
}

/// HTML anchor for a code: `req-` + code with dots turned into dashes
pub fn anchor_for(code: &str) -> String {
    format!("req-{}", code.replace('.', "-"))
}

/// Walks the requested part of the tree in pre-order.
///
/// Text links only to codes inside the rendered part, so a partial
/// document never points at a node it leaves out.
pub fn build_document(tree: &TreeStore, roots: &RootSet) -> Result<RenderedDocument> {
    let (root_ids, codes): (Vec<RequirementId>, CodeSet) = match roots {
        RootSet::All => (tree.child_ids(None).to_vec(), tree.code_set()),
        RootSet::Subtrees(ids) => {
            if let Some(missing) = ids.iter().find(|id| !tree.contains(**id)) {
                return Err(ReqError::RequirementNotFound(*missing));
            }
            let codes = ids
                .iter()
                .flat_map(|id| tree.subtree_ids(*id))
                .filter_map(|id| tree.code_of(id))
                .collect();
            (ids.clone(), codes)
        }
    };

    Ok(RenderedDocument {
        roots: root_ids
            .into_iter()
            .filter_map(|id| build_node(tree, &codes, id, 0))
            .collect(),
    })
}

fn build_node(
    tree: &TreeStore,
    codes: &CodeSet,
    id: RequirementId,
    depth: usize,
) -> Option<RenderedNode> {
    let req = tree.get(id)?;
    let type_code = tree
        .type_by_id(req.type_id)
        .map(|t| t.type_code.clone())
        .unwrap_or_default();
    let code = req.code_with(&type_code);
    let status = match tree.status_by_id(req.status_id) {
        Some(s) => StatusBadge {
            name: s.name.clone(),
            color: s.color.clone().unwrap_or_else(|| UNKNOWN_STATUS_COLOR.to_string()),
        },
        None => StatusBadge {
            name: "Unknown".to_string(),
            color: UNKNOWN_STATUS_COLOR.to_string(),
        },
    };
    let parent = req.parent_id.and_then(|parent_id| {
        tree.code_of(parent_id).map(|code| ParentRef {
            id: parent_id,
            code,
        })
    });

    Some(RenderedNode {
        id,
        anchor: anchor_for(&code),
        label: req.label_with(&type_code),
        title: req.title.clone(),
        num_path: req.num_path.clone(),
        status,
        parent,
        description: resolve_references(&req.description_md, codes),
        rationale: req
            .rationale_md
            .as_deref()
            .map(|text| resolve_references(text, codes)),
        depth,
        children: tree
            .child_ids(Some(id))
            .iter()
            .filter_map(|child| build_node(tree, codes, *child, depth + 1))
            .collect(),
        type_code,
        code,
    })
}

/// Renders the tree in the requested mode
pub fn render_tree(tree: &TreeStore, roots: &RootSet, mode: &RenderMode) -> Result<Rendered> {
    let document = build_document(tree, roots)?;
    Ok(match mode {
        RenderMode::Interactive => Rendered::Interactive(InteractiveView::new(document)),
        RenderMode::Static(options) => Rendered::Static(render_static(&document, options)),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tree::tests::{req, tree_of};

    pub(crate) fn sample_tree() -> TreeStore {
        let mut root = req(1, 1, "0", None, 0);
        root.description_md = "Parent of F0.0 and F0.1; see `F0.0` docs".to_string();
        let mut a = req(2, 2, "0.0", Some(1), 0);
        a.description_md = "Depends on F0.1 & CORE0 <strict>".to_string();
        a.rationale_md = Some("Mirrors M9 and CORE0".to_string());
        a.display_code = Some("BOOT".to_string());
        let mut b = req(3, 2, "0.1", Some(1), 1);
        b.description_md = "Leaf".to_string();
        let mut c = req(4, 3, "0", None, 1);
        c.description_md = "Mechanical root, cf. F0.0".to_string();
        tree_of(vec![root, a, b, c])
    }

    #[test]
    fn test_anchor_replaces_dots() {
        assert_eq!(anchor_for("F0.1"), "req-F0-1");
        assert_eq!(anchor_for("CORE0"), "req-CORE0");
    }

    #[test]
    fn test_document_nesting_and_metadata() {
        let doc = build_document(&sample_tree(), &RootSet::All).unwrap();
        let ids: Vec<_> = doc.preorder().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        let boot = doc.find(2).unwrap();
        assert_eq!(boot.label, "BOOT (F0.0)");
        assert_eq!(boot.anchor, "req-F0-0");
        assert_eq!(boot.depth, 1);
        assert_eq!(boot.status.name, "Draft");
        assert_eq!(boot.parent, Some(ParentRef { id: 1, code: "CORE0".to_string() }));
        assert_eq!(boot.link_targets(), vec!["F0.1", "CORE0", "CORE0"]);

        // The backticked F0.0 stays verbatim.
        assert_eq!(doc.find(1).unwrap().link_targets(), vec!["F0.0", "F0.1"]);
    }

    #[test]
    fn test_subtree_roots() {
        let tree = sample_tree();
        let doc = build_document(&tree, &RootSet::Subtrees(vec![4, 2])).unwrap();
        let ids: Vec<_> = doc.preorder().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![4, 2]);
        assert_eq!(doc.roots[1].depth, 0);

        // Only codes inside the rendered subtrees become links.
        assert_eq!(doc.find(4).unwrap().link_targets(), vec!["F0.0"]);
        assert!(doc.find(2).unwrap().link_targets().is_empty());
        assert!(doc.link_pairs().iter().all(|(_, code)| code != "CORE0"));

        assert!(matches!(
            build_document(&tree, &RootSet::Subtrees(vec![9])),
            Err(ReqError::RequirementNotFound(9))
        ));
    }

    #[test]
    fn test_both_modes_agree_on_links() {
        let tree = sample_tree();
        let interactive = render_tree(&tree, &RootSet::All, &RenderMode::Interactive).unwrap();
        let static_doc = render_tree(
            &tree,
            &RootSet::All,
            &RenderMode::Static(StaticOptions::new("1.0")),
        )
        .unwrap();

        let pairs = interactive.link_pairs();
        assert_eq!(pairs, static_doc.link_pairs());
        assert!(pairs.contains(&(1, "F0.1".to_string())));
        assert!(pairs.contains(&(4, "F0.0".to_string())));
        assert!(!pairs.iter().any(|(_, code)| code == "M9"));
    }
}
