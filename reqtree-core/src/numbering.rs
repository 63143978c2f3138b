//! Hierarchical path assignment
//!
//! Paths are advisory: [`compute_next_path`] only reads the tree, and the
//! storage layer's `(type_id, num_path)` uniqueness stays the authority.

use crate::error::{ReqError, Result};
use crate::models::{is_valid_num_path, RequirementId, TypeId};
use crate::tree::TreeStore;

/// Computes the next zero-based path for a new child of `parent_id`.
///
/// Only siblings with the same `type_id` count, so each type numbers
/// independently under a shared parent. The parent's own type does not
/// matter: an `F` child of `CORE0` becomes `F0.0`.
pub fn compute_next_path(
    tree: &TreeStore,
    parent_id: Option<RequirementId>,
    type_id: TypeId,
) -> Result<String> {
    let base = match parent_id {
        None => None,
        Some(id) => Some(
            tree.get(id)
                .ok_or(ReqError::ParentNotFound(id))?
                .num_path
                .as_str(),
        ),
    };

    let next = tree
        .children(parent_id)
        .into_iter()
        .filter(|r| r.type_id == type_id)
        .filter_map(|r| last_segment(&r.num_path))
        .max()
        .map_or(0, |max| max + 1);

    Ok(match base {
        Some(base) if !base.is_empty() => format!("{}.{}", base, next),
        _ => next.to_string(),
    })
}

/// Final numeric segment of a path; `None` when it does not parse
pub fn last_segment(num_path: &str) -> Option<i64> {
    num_path.rsplit('.').next()?.parse::<i64>().ok().filter(|n| *n >= 0)
}

/// Rejects anything but dot-separated non-negative integers
pub fn validate_num_path(num_path: &str) -> Result<()> {
    if is_valid_num_path(num_path) {
        Ok(())
    } else {
        Err(ReqError::InvalidNumPath(num_path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{req, tree_of};

    const CORE: TypeId = 1;
    const F: TypeId = 2;
    const M: TypeId = 3;

    #[test]
    fn test_first_path_is_zero() {
        let tree = tree_of(vec![req(1, CORE, "4", None, 0)]);
        assert_eq!(compute_next_path(&tree, None, F).unwrap(), "0");
        assert_eq!(compute_next_path(&tree, Some(1), F).unwrap(), "4.0");
    }

    #[test]
    fn test_types_number_independently_under_one_parent() {
        let tree = tree_of(vec![
            req(1, CORE, "0", None, 0),
            req(2, F, "0.0", Some(1), 0),
            req(3, F, "0.1", Some(1), 1),
        ]);
        assert_eq!(compute_next_path(&tree, Some(1), F).unwrap(), "0.2");
        assert_eq!(compute_next_path(&tree, Some(1), M).unwrap(), "0.0");
        assert_eq!(compute_next_path(&tree, None, CORE).unwrap(), "1");
    }

    #[test]
    fn test_next_follows_max_not_count() {
        let tree = tree_of(vec![
            req(1, F, "0", None, 0),
            req(2, F, "7", None, 1),
            req(3, F, "x", None, 2),
        ]);
        assert_eq!(compute_next_path(&tree, None, F).unwrap(), "8");
    }

    #[test]
    fn test_missing_parent() {
        let tree = tree_of(Vec::new());
        assert!(matches!(
            compute_next_path(&tree, Some(5), F),
            Err(ReqError::ParentNotFound(5))
        ));
    }

    #[test]
    fn test_last_segment_and_validation() {
        assert_eq!(last_segment("0.2.11"), Some(11));
        assert_eq!(last_segment("3"), Some(3));
        assert_eq!(last_segment("0.a"), None);
        assert!(validate_num_path("0.1").is_ok());
        assert!(matches!(validate_num_path("1."), Err(ReqError::InvalidNumPath(_))));
    }
}
