//! Sibling reordering and reparent checks
//!
//! Everything here is a pure plan over a [`TreeStore`]: the functions return
//! the `order_index` writes a move needs and leave applying them (atomically)
//! to the caller.

use crate::error::{ReqError, Result};
use crate::models::{Direction, OrderUpdate, RequirementId};
use crate::tree::TreeStore;

/// Index of a requirement inside its sibling group
pub fn position_of(tree: &TreeStore, id: RequirementId) -> Result<usize> {
    let req = tree.get(id).ok_or(ReqError::RequirementNotFound(id))?;
    tree.child_ids(req.parent_id)
        .iter()
        .position(|sibling| *sibling == id)
        .ok_or(ReqError::RequirementNotFound(id))
}

/// Plans a one-step move. Returns the two swapped `order_index` values, or
/// nothing when the requirement already sits at that end of its group.
///
/// Siblings sharing an `order_index` cannot be told apart by a swap, so a
/// tie renumbers the whole group `0..n` with the two exchanged.
pub fn plan_reorder(
    tree: &TreeStore,
    id: RequirementId,
    direction: Direction,
) -> Result<Vec<OrderUpdate>> {
    let index = position_of(tree, id)?;
    let parent_id = tree.get(id).and_then(|r| r.parent_id);
    let siblings = tree.child_ids(parent_id);

    let neighbour = match direction {
        Direction::Up if index > 0 => index - 1,
        Direction::Down if index + 1 < siblings.len() => index + 1,
        _ => return Ok(Vec::new()),
    };

    let this = tree.get(id).ok_or(ReqError::RequirementNotFound(id))?;
    let other_id = siblings[neighbour];
    let other = tree
        .get(other_id)
        .ok_or(ReqError::RequirementNotFound(other_id))?;

    if this.order_index == other.order_index {
        let mut order = siblings.to_vec();
        order.swap(index, neighbour);
        return Ok(renumber(order));
    }

    Ok(vec![
        OrderUpdate {
            id,
            order_index: other.order_index,
        },
        OrderUpdate {
            id: other_id,
            order_index: this.order_index,
        },
    ])
}

/// `order_index` that places a record after every current child of `parent_id`
pub fn next_order_index(tree: &TreeStore, parent_id: Option<RequirementId>) -> i64 {
    tree.children(parent_id)
        .iter()
        .map(|r| r.order_index)
        .max()
        .map_or(0, |max| max + 1)
}

fn renumber(order: Vec<RequirementId>) -> Vec<OrderUpdate> {
    order
        .into_iter()
        .enumerate()
        .map(|(index, id)| OrderUpdate {
            id,
            order_index: index as i64,
        })
        .collect()
}

/// Plans a drag-and-drop move of `dragged` to `position` within the sibling
/// group it shares with `target`. The whole group is renumbered `0..n`.
pub fn plan_move(
    tree: &TreeStore,
    dragged: RequirementId,
    target: RequirementId,
    position: usize,
) -> Result<Vec<OrderUpdate>> {
    let dragged_req = tree
        .get(dragged)
        .ok_or(ReqError::RequirementNotFound(dragged))?;
    let target_req = tree
        .get(target)
        .ok_or(ReqError::RequirementNotFound(target))?;
    if dragged_req.parent_id != target_req.parent_id {
        return Err(ReqError::CrossParentMoveUnsupported { dragged, target });
    }

    let mut order: Vec<RequirementId> = tree
        .child_ids(dragged_req.parent_id)
        .iter()
        .copied()
        .filter(|id| *id != dragged)
        .collect();
    order.insert(position.min(order.len()), dragged);
    Ok(renumber(order))
}

/// Checks that `id` may hang under `new_parent`: the parent must exist and
/// must not be `id` itself or anything below it.
pub fn check_reparent(
    tree: &TreeStore,
    id: RequirementId,
    new_parent: Option<RequirementId>,
) -> Result<()> {
    let Some(parent) = new_parent else {
        return Ok(());
    };
    if !tree.contains(parent) {
        return Err(ReqError::ParentNotFound(parent));
    }
    if parent == id || tree.is_descendant(parent, id) {
        return Err(ReqError::CycleDetected {
            requirement: id,
            new_parent: parent,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{req, tree_of};

    fn group() -> TreeStore {
        tree_of(vec![
            req(1, 1, "0", None, 0),
            req(10, 2, "0.0", Some(1), 0),
            req(11, 2, "0.1", Some(1), 1),
            req(12, 2, "0.2", Some(1), 2),
            req(20, 2, "0.2.0", Some(12), 0),
        ])
    }

    fn apply(tree: &TreeStore, updates: &[OrderUpdate]) -> TreeStore {
        let mut reqs: Vec<_> = tree.iter_preorder().into_iter().cloned().collect();
        for update in updates {
            if let Some(r) = reqs.iter_mut().find(|r| r.id == update.id) {
                r.order_index = update.order_index;
            }
        }
        tree_of(reqs)
    }

    #[test]
    fn test_reorder_swaps_neighbours_only() {
        let tree = group();
        let updates = plan_reorder(&tree, 11, Direction::Up).unwrap();
        assert_eq!(
            updates,
            vec![
                OrderUpdate { id: 11, order_index: 0 },
                OrderUpdate { id: 10, order_index: 1 },
            ]
        );
        assert_eq!(apply(&tree, &updates).child_ids(Some(1)), &[11, 10, 12]);
    }

    #[test]
    fn test_reorder_at_boundary_is_noop() {
        let tree = group();
        assert!(plan_reorder(&tree, 10, Direction::Up).unwrap().is_empty());
        assert!(plan_reorder(&tree, 12, Direction::Down).unwrap().is_empty());
        assert!(plan_reorder(&tree, 20, Direction::Up).unwrap().is_empty());
    }

    #[test]
    fn test_reorder_breaks_order_index_tie() {
        let tree = tree_of(vec![
            req(1, 2, "0", None, 0),
            req(2, 2, "1", None, 1),
            req(3, 2, "2", None, 1),
        ]);
        assert_eq!(tree.child_ids(None), &[1, 2, 3]);

        let updates = plan_reorder(&tree, 3, Direction::Up).unwrap();
        let tree = apply(&tree, &updates);
        assert_eq!(tree.child_ids(None), &[1, 3, 2]);
        let tree = apply(&tree, &plan_reorder(&tree, 3, Direction::Up).unwrap());
        assert_eq!(tree.child_ids(None), &[3, 1, 2]);
    }

    #[test]
    fn test_next_order_index_follows_largest() {
        let tree = tree_of(vec![req(1, 2, "0", None, 0), req(2, 2, "1", None, 4)]);
        assert_eq!(next_order_index(&tree, None), 5);
        assert_eq!(next_order_index(&tree, Some(2)), 0);
    }

    #[test]
    fn test_repeated_up_reaches_fixed_point() {
        let mut tree = group();
        for _ in 0..5 {
            let updates = plan_reorder(&tree, 12, Direction::Up).unwrap();
            tree = apply(&tree, &updates);
        }
        assert_eq!(position_of(&tree, 12).unwrap(), 0);
        assert!(plan_reorder(&tree, 12, Direction::Up).unwrap().is_empty());
    }

    #[test]
    fn test_move_to_front_renumbers_group() {
        let tree = group();
        let updates = plan_move(&tree, 12, 10, 0).unwrap();
        assert_eq!(
            updates,
            vec![
                OrderUpdate { id: 12, order_index: 0 },
                OrderUpdate { id: 10, order_index: 1 },
                OrderUpdate { id: 11, order_index: 2 },
            ]
        );
    }

    #[test]
    fn test_move_is_a_permutation_for_every_position() {
        let tree = group();
        for dragged in [10, 11, 12] {
            for position in 0..5 {
                let updates = plan_move(&tree, dragged, 10, position).unwrap();
                let mut ids: Vec<_> = updates.iter().map(|u| u.id).collect();
                ids.sort();
                assert_eq!(ids, vec![10, 11, 12]);
                let indices: Vec<_> = updates.iter().map(|u| u.order_index).collect();
                assert_eq!(indices, vec![0, 1, 2]);
            }
        }
    }

    #[test]
    fn test_move_across_parents_is_rejected() {
        let tree = group();
        assert!(matches!(
            plan_move(&tree, 20, 10, 0),
            Err(ReqError::CrossParentMoveUnsupported { dragged: 20, target: 10 })
        ));
        assert!(matches!(
            plan_move(&tree, 99, 10, 0),
            Err(ReqError::RequirementNotFound(99))
        ));
    }

    #[test]
    fn test_reparent_cycle_detection() {
        let tree = group();
        assert!(check_reparent(&tree, 10, Some(12)).is_ok());
        assert!(check_reparent(&tree, 20, None).is_ok());
        assert!(matches!(
            check_reparent(&tree, 12, Some(12)),
            Err(ReqError::CycleDetected { .. })
        ));
        assert!(matches!(
            check_reparent(&tree, 1, Some(20)),
            Err(ReqError::CycleDetected { requirement: 1, new_parent: 20 })
        ));
        assert!(matches!(
            check_reparent(&tree, 10, Some(77)),
            Err(ReqError::ParentNotFound(77))
        ));
    }
}
