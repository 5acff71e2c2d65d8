//! Tree restructuring.
//!
//! # Responsibility
//! - Move a story or task under a new parent after type, cycle and depth
//!   checks.
//! - Keep both affected sibling groups gap-free and both ancestor chains'
//!   progress fresh.
//!
//! # Invariants
//! - Epics never move; stories go under an epic or to root; tasks go under
//!   a story.
//! - A node never becomes its own ancestor.
//! - Resulting depth never exceeds `MAX_HIERARCHY_DEPTH`.
//! - Recalculation failures follow `RecalculationPolicy`, never silently.

use crate::config::{HierarchyRules, RecalculationPolicy, MAX_HIERARCHY_DEPTH, MAX_TRAVERSAL_HOPS};
use crate::model::node::{Node, NodeId, NodeKind};
use crate::repo::hierarchy_repo::HierarchyRepository;
use crate::service::error::{ExpectedParent, HierarchyError, HierarchyResult};
use crate::service::progress_service::ProgressPropagationService;
use crate::service::sort_order::{display_parent, SortOrderAllocator};
use log::{error, info, warn};
use std::collections::{HashSet, VecDeque};

/// Progress recalculation that failed after a committed move.
#[derive(Debug)]
pub struct RecalculationFailure {
    /// Ancestor whose chain could not be recalculated.
    pub node_id: NodeId,
    pub error: HierarchyError,
}

/// Result of a successful move.
#[derive(Debug)]
pub struct MoveOutcome {
    /// Moved node as stored after the move.
    pub node: Node,
    pub previous_parent_id: Option<NodeId>,
    /// Empty unless `RecalculationPolicy::BestEffort` swallowed failures.
    pub recalculation_failures: Vec<RecalculationFailure>,
}

impl MoveOutcome {
    pub fn is_fully_recalculated(&self) -> bool {
        self.recalculation_failures.is_empty()
    }
}

/// Hierarchy restructuring service.
pub struct HierarchyMutationService<R: HierarchyRepository> {
    repo: R,
    rules: HierarchyRules,
}

impl<R: HierarchyRepository> HierarchyMutationService<R> {
    /// Creates service with default rules.
    pub fn new(repo: R) -> Self {
        Self::with_rules(repo, HierarchyRules::default())
    }

    pub fn with_rules(repo: R, rules: HierarchyRules) -> Self {
        Self { repo, rules }
    }

    /// Moves `task_id` under `new_parent_id` (`None` = root).
    ///
    /// The moved node takes the next free slot under its new parent and its
    /// old sibling group is compacted. Old and new ancestor chains are then
    /// recalculated.
    ///
    /// # Errors
    /// - `NotFound` for a missing or deleted node or parent.
    /// - `TypeViolation` for an illegal kind pairing or any epic move.
    /// - `CycleDetected` when the parent lies inside the moved subtree or the
    ///   parent's ancestor chain is corrupt.
    /// - `DepthExceeded` when the parent already sits at the depth limit.
    /// - Under `RecalculationPolicy::Strict`, the first recalculation error.
    ///   The structural change is already written; roll back the
    ///   surrounding transaction to undo it.
    pub fn move_task_to_parent(
        &self,
        task_id: NodeId,
        new_parent_id: Option<NodeId>,
    ) -> HierarchyResult<MoveOutcome> {
        info!(
            "event=node_move module=hierarchy status=start node_id={task_id} target_parent_id={}",
            display_parent(new_parent_id)
        );
        match self.try_move(task_id, new_parent_id) {
            Ok(outcome) => {
                info!(
                    "event=node_move module=hierarchy status=ok node_id={task_id} from_parent_id={} to_parent_id={} sort_order={} recalc_failures={}",
                    display_parent(outcome.previous_parent_id),
                    display_parent(new_parent_id),
                    outcome.node.sort_order.unwrap_or(-1),
                    outcome.recalculation_failures.len()
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    "event=node_move module=hierarchy status=error node_id={task_id} target_parent_id={} error={err}",
                    display_parent(new_parent_id)
                );
                Err(err)
            }
        }
    }

    /// Parent hops from `task_id` to its root, capped at
    /// `MAX_TRAVERSAL_HOPS`. A missing parent counts as root.
    pub fn get_hierarchy_depth(&self, task_id: NodeId) -> HierarchyResult<u32> {
        let node = self.load(task_id)?;
        let mut hops = 0;
        let mut cursor = node.parent_id;
        while let Some(parent_id) = cursor {
            if hops == MAX_TRAVERSAL_HOPS {
                warn!(
                    "event=depth_guard module=hierarchy status=stopped node_id={task_id} hops={hops}"
                );
                break;
            }
            let Some(parent) = self.repo.find_by_id(parent_id)? else {
                break;
            };
            hops += 1;
            cursor = parent.parent_id;
        }
        Ok(hops)
    }

    fn try_move(
        &self,
        task_id: NodeId,
        new_parent_id: Option<NodeId>,
    ) -> HierarchyResult<MoveOutcome> {
        let mut node = self.load(task_id)?;
        let parent = new_parent_id.map(|id| self.load(id)).transpose()?;

        check_move_types(&node, parent.as_ref())?;

        if let Some(parent) = &parent {
            if parent.id == node.id {
                return Err(HierarchyError::CycleDetected {
                    node_id: node.id,
                    parent_id: parent.id,
                });
            }
            self.ensure_not_descendant(node.id, parent.id)?;
            self.ensure_acyclic_ancestry(node.id, parent)?;

            let depth = self.get_hierarchy_depth(parent.id)? + 1;
            if depth > MAX_HIERARCHY_DEPTH {
                return Err(HierarchyError::DepthExceeded {
                    node_id: node.id,
                    parent_id: parent.id,
                    depth,
                    max_depth: MAX_HIERARCHY_DEPTH,
                });
            }
        }

        let allocator = SortOrderAllocator::new(&self.repo);
        let previous_parent_id = node.parent_id;
        node.parent_id = new_parent_id;
        node.sort_order = Some(allocator.next_sort_order(new_parent_id)?);
        self.repo.save(&mut node)?;
        allocator.compact(previous_parent_id)?;

        let mut recalculation_failures = Vec::new();
        let mut branches = vec![previous_parent_id, new_parent_id];
        branches.dedup();
        for branch in branches.into_iter().flatten() {
            if let Err(err) = self.recalculate_branch(branch) {
                match self.rules.recalculation {
                    RecalculationPolicy::Strict => return Err(err),
                    RecalculationPolicy::BestEffort => {
                        error!(
                            "event=progress_recalc module=hierarchy status=error trigger=node_move node_id={task_id} branch_id={branch} error={err}"
                        );
                        recalculation_failures.push(RecalculationFailure {
                            node_id: branch,
                            error: err,
                        });
                    }
                }
            }
        }

        Ok(MoveOutcome {
            node: self.load(task_id)?,
            previous_parent_id,
            recalculation_failures,
        })
    }

    fn load(&self, id: NodeId) -> HierarchyResult<Node> {
        self.repo
            .find_by_id(id)?
            .ok_or(HierarchyError::NotFound(id))
    }

    /// Breadth-first walk of the moved node's subtree looking for the target.
    fn ensure_not_descendant(&self, node_id: NodeId, target_id: NodeId) -> HierarchyResult<()> {
        let mut visited = HashSet::from([node_id]);
        let mut queue = VecDeque::from([node_id]);
        while let Some(current) = queue.pop_front() {
            for child in self.repo.find_children(Some(current), None)? {
                if child.id == target_id {
                    return Err(HierarchyError::CycleDetected {
                        node_id,
                        parent_id: target_id,
                    });
                }
                if visited.insert(child.id) {
                    queue.push_back(child.id);
                }
            }
        }
        Ok(())
    }

    /// Upward walk from the target, bounded at `MAX_TRAVERSAL_HOPS`.
    ///
    /// Rejects when the walk reaches the moved node, revisits a node or runs
    /// out of hops.
    fn ensure_acyclic_ancestry(&self, node_id: NodeId, target: &Node) -> HierarchyResult<()> {
        let cycle = || HierarchyError::CycleDetected {
            node_id,
            parent_id: target.id,
        };

        let mut visited = HashSet::from([target.id]);
        let mut cursor = target.parent_id;
        let mut hops = 0;
        while let Some(current) = cursor {
            if current == node_id || !visited.insert(current) {
                return Err(cycle());
            }
            hops += 1;
            if hops > MAX_TRAVERSAL_HOPS {
                warn!(
                    "event=depth_guard module=hierarchy status=rejected node_id={node_id} target_parent_id={} hops={hops}",
                    target.id
                );
                return Err(cycle());
            }
            let Some(ancestor) = self.repo.find_by_id(current)? else {
                break;
            };
            cursor = ancestor.parent_id;
        }
        Ok(())
    }

    fn recalculate_branch(&self, parent_id: NodeId) -> HierarchyResult<()> {
        let Some(parent) = self.repo.find_by_id(parent_id)? else {
            return Ok(());
        };
        let progress = ProgressPropagationService::new(&self.repo);
        match parent.kind {
            NodeKind::Story => progress.propagate_to_parent(parent.id).map(|_| ()),
            NodeKind::Epic => progress.update_hierarchy_progress(parent.id).map(|_| ()),
            NodeKind::Task => Ok(()),
        }
    }
}

/// Kind rules for a move: stricter than creation because epics never move
/// and tasks never go to root.
fn check_move_types(node: &Node, parent: Option<&Node>) -> HierarchyResult<()> {
    let parent_kind = parent.map(|parent| parent.kind);
    let expected = match (node.kind, parent_kind) {
        (NodeKind::Epic, _) => ExpectedParent::Immovable,
        (NodeKind::Story, None | Some(NodeKind::Epic)) => return Ok(()),
        (NodeKind::Story, Some(_)) => ExpectedParent::EpicOrNoParent,
        (NodeKind::Task, Some(NodeKind::Story)) => return Ok(()),
        (NodeKind::Task, _) => ExpectedParent::Story,
    };
    Err(HierarchyError::TypeViolation {
        node_id: node.id,
        kind: node.kind,
        parent_kind,
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::check_move_types;
    use crate::model::node::{Node, NodeKind};
    use crate::service::error::{ExpectedParent, HierarchyError};

    #[test]
    fn epics_never_move() {
        let epic = Node::new(NodeKind::Epic, None, "e");
        let other = Node::new(NodeKind::Epic, None, "f");
        for target in [None, Some(&other)] {
            let err = check_move_types(&epic, target).unwrap_err();
            assert!(matches!(
                err,
                HierarchyError::TypeViolation {
                    expected: ExpectedParent::Immovable,
                    ..
                }
            ));
        }
    }

    #[test]
    fn tasks_need_story_target() {
        let task = Node::new(NodeKind::Task, None, "t");
        let story = Node::new(NodeKind::Story, None, "s");
        let epic = Node::new(NodeKind::Epic, None, "e");
        assert!(check_move_types(&task, Some(&story)).is_ok());
        assert!(check_move_types(&task, None).is_err());
        assert!(check_move_types(&task, Some(&epic)).is_err());
    }

    #[test]
    fn stories_go_under_epic_or_root() {
        let story = Node::new(NodeKind::Story, None, "s");
        let epic = Node::new(NodeKind::Epic, None, "e");
        let task = Node::new(NodeKind::Task, None, "t");
        assert!(check_move_types(&story, None).is_ok());
        assert!(check_move_types(&story, Some(&epic)).is_ok());
        assert!(check_move_types(&story, Some(&task)).is_err());
    }
}
