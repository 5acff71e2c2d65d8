//! Sibling position allocation.
//!
//! # Responsibility
//! - Hand out the next free sibling slot.
//! - Rewrite a sibling group into an explicit, gap-free order.
//!
//! # Invariants
//! - Assigned positions are `0..n-1` with no gaps or repeats.
//! - Only nodes whose position actually changes are saved.

use crate::model::node::{Node, NodeId};
use crate::repo::hierarchy_repo::HierarchyRepository;
use crate::service::error::{HierarchyError, HierarchyResult, OrderingIssue, OrderingViolation};
use log::info;
use std::collections::HashSet;

/// Sibling ordering service.
pub struct SortOrderAllocator<R: HierarchyRepository> {
    repo: R,
}

impl<R: HierarchyRepository> SortOrderAllocator<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// One past the highest sibling position under `parent_id`, or 0.
    ///
    /// # Errors
    /// - `OrderingViolation` (`Exhausted`) when a sibling already holds
    ///   `i64::MAX`; `compact` the group first.
    pub fn next_sort_order(&self, parent_id: Option<NodeId>) -> HierarchyResult<i64> {
        let Some(max) = self.repo.find_max_sort_order(parent_id)? else {
            return Ok(0);
        };
        if let Some(next) = max.checked_add(1) {
            return Ok(next.max(0));
        }

        let holders = self
            .repo
            .find_children(parent_id, None)?
            .into_iter()
            .filter(|node| node.sort_order == Some(max))
            .map(|node| node.id)
            .collect();
        Err(HierarchyError::OrderingViolation(OrderingViolation {
            parent_id,
            issue: OrderingIssue::Exhausted(max),
            node_ids: holders,
        }))
    }

    /// Assigns `0..n-1` to `ordered_ids` in the given order.
    ///
    /// Active siblings missing from `ordered_ids` follow the listed ones in
    /// their current relative order. Empty input is a no-op.
    ///
    /// # Errors
    /// - `OrderingViolation` when an id is listed twice.
    /// - `NotFound` for an unknown or deleted id.
    /// - `OwnershipViolation` for a node under another parent.
    pub fn reorder(&self, parent_id: Option<NodeId>, ordered_ids: &[NodeId]) -> HierarchyResult<()> {
        if ordered_ids.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::with_capacity(ordered_ids.len());
        for id in ordered_ids {
            if !seen.insert(*id) {
                return Err(HierarchyError::OrderingViolation(OrderingViolation {
                    parent_id,
                    issue: OrderingIssue::RepeatedId,
                    node_ids: vec![*id],
                }));
            }
        }

        let mut siblings = self.repo.find_children(parent_id, None)?;
        siblings.sort_by_key(sibling_sort_key);

        let mut ordered = Vec::with_capacity(siblings.len());
        for id in ordered_ids {
            match siblings.iter().position(|node| node.id == *id) {
                Some(index) => ordered.push(siblings.remove(index)),
                None => {
                    return Err(match self.repo.find_by_id(*id)? {
                        None => HierarchyError::NotFound(*id),
                        Some(_) => HierarchyError::OwnershipViolation {
                            node_id: *id,
                            parent_id,
                        },
                    });
                }
            }
        }
        ordered.extend(siblings);

        let mut changed = resequence(ordered);
        self.repo.save_all(&mut changed)?;
        info!(
            "event=sort_reorder module=hierarchy status=ok parent_id={} listed={} changed={}",
            display_parent(parent_id),
            ordered_ids.len(),
            changed.len()
        );
        Ok(())
    }

    /// Re-sequences the active siblings under `parent_id` in their current
    /// order. Returns how many nodes moved.
    pub fn compact(&self, parent_id: Option<NodeId>) -> HierarchyResult<usize> {
        let mut siblings = self.repo.find_children(parent_id, None)?;
        siblings.sort_by_key(sibling_sort_key);
        let mut changed = resequence(siblings);
        self.repo.save_all(&mut changed)?;
        Ok(changed.len())
    }
}

/// Current-order key: ordered rows first by position, legacy NULL rows last.
pub(crate) fn sibling_sort_key(node: &Node) -> (bool, i64, NodeId) {
    (node.sort_order.is_none(), node.sort_order.unwrap_or(0), node.id)
}

/// Assigns positions by index and keeps only nodes whose position changed.
fn resequence(nodes: Vec<Node>) -> Vec<Node> {
    nodes
        .into_iter()
        .enumerate()
        .filter_map(|(index, mut node)| {
            let target = index as i64;
            if node.sort_order == Some(target) {
                return None;
            }
            node.sort_order = Some(target);
            Some(node)
        })
        .collect()
}

pub(crate) fn display_parent(parent_id: Option<NodeId>) -> String {
    parent_id.map_or_else(|| "root".to_string(), |id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::{resequence, sibling_sort_key};
    use crate::model::node::{Node, NodeKind};

    fn task(sort_order: Option<i64>) -> Node {
        let mut node = Node::new(NodeKind::Task, None, "t");
        node.sort_order = sort_order;
        node
    }

    #[test]
    fn resequence_skips_nodes_already_in_place() {
        let nodes = vec![task(Some(0)), task(Some(4)), task(Some(2))];
        let moved_id = nodes[1].id;
        let changed = resequence(nodes);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, moved_id);
        assert_eq!(changed[0].sort_order, Some(1));
    }

    #[test]
    fn sort_key_puts_unordered_rows_last() {
        let mut nodes = vec![task(None), task(Some(3)), task(Some(1))];
        nodes.sort_by_key(sibling_sort_key);
        assert_eq!(nodes[0].sort_order, Some(1));
        assert_eq!(nodes[1].sort_order, Some(3));
        assert_eq!(nodes[2].sort_order, None);
    }
}
