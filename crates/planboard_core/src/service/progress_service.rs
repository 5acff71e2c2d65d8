//! Bottom-up progress computation and propagation.
//!
//! # Responsibility
//! - Derive a node's own progress from its direct subtasks.
//! - Blend own progress with child progress and cascade Task -> Story -> Epic.
//!
//! # Invariants
//! - Own progress is `completed * 100 / total` (truncating), 0 with no subtasks.
//! - Weighted progress is `floor(own * 0.5 + mean(children) * 0.5)`; with no
//!   children it equals own progress.
//! - Epics are terminal; cascades never climb past them.
//! - Cascades stop after `MAX_TRAVERSAL_HOPS` or on a revisited node.

use crate::config::{MAX_TRAVERSAL_HOPS, OWN_PROGRESS_WEIGHT_PERCENT};
use crate::model::node::{Node, NodeId, NodeKind, Subtask, MAX_PROGRESS};
use crate::repo::hierarchy_repo::HierarchyRepository;
use crate::service::error::{HierarchyError, HierarchyResult};
use log::{debug, error, info, warn};
use std::collections::HashSet;

/// Progress recalculation service.
pub struct ProgressPropagationService<R: HierarchyRepository> {
    repo: R,
}

impl<R: HierarchyRepository> ProgressPropagationService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Percentage of the node's direct subtasks marked complete.
    pub fn calculate_own_progress(&self, task_id: NodeId) -> HierarchyResult<u8> {
        let subtasks = self.repo.find_subtasks(task_id)?;
        Ok(own_progress(&subtasks))
    }

    /// Recomputes a node after one of its subtasks changed and cascades
    /// upward.
    ///
    /// Returns `None` without touching anything when the node has no
    /// subtasks; an empty set never resets progress. Stories and epics use
    /// their weighted formula so child progress is not dropped.
    pub fn update_progress_from_subtasks(&self, task_id: NodeId) -> HierarchyResult<Option<u8>> {
        let node = self.load(task_id)?;
        if self.repo.find_subtasks(task_id)?.is_empty() {
            debug!(
                "event=progress_recalc module=progress status=skipped node_id={task_id} reason=no_subtasks"
            );
            return Ok(None);
        }
        self.recalculate_chain(node).map(Some)
    }

    /// Recomputes one story from its own subtasks and its tasks, then
    /// cascades into the parent epic.
    ///
    /// # Errors
    /// - `KindMismatch` when `story_id` is not a story.
    pub fn propagate_to_parent(&self, story_id: NodeId) -> HierarchyResult<u8> {
        let story = self.load_kind(story_id, NodeKind::Story)?;
        self.recalculate_chain(story)
    }

    /// Recomputes one epic from its own subtasks and its stories. Terminal.
    ///
    /// # Errors
    /// - `KindMismatch` when `epic_id` is not an epic.
    pub fn update_hierarchy_progress(&self, epic_id: NodeId) -> HierarchyResult<u8> {
        let epic = self.load_kind(epic_id, NodeKind::Epic)?;
        self.recalculate_chain(epic)
    }

    fn load(&self, id: NodeId) -> HierarchyResult<Node> {
        self.repo
            .find_by_id(id)?
            .ok_or(HierarchyError::NotFound(id))
    }

    fn load_kind(&self, id: NodeId, expected: NodeKind) -> HierarchyResult<Node> {
        let node = self.load(id)?;
        if node.kind != expected {
            return Err(HierarchyError::KindMismatch {
                node_id: id,
                kind: node.kind,
                expected,
            });
        }
        Ok(node)
    }

    /// Recalculates `start`, then each aggregating ancestor. Returns the new
    /// progress of `start`.
    fn recalculate_chain(&self, start: Node) -> HierarchyResult<u8> {
        let start_id = start.id;
        let mut start_progress = None;
        let mut visited = HashSet::new();
        let mut current = Some(start);

        while let Some(mut node) = current.take() {
            if !visited.insert(node.id) || visited.len() as u32 > MAX_TRAVERSAL_HOPS + 1 {
                warn!(
                    "event=depth_guard module=progress status=stopped start_id={start_id} node_id={}",
                    node.id
                );
                break;
            }

            let progress = self.recalculate_node(&mut node).map_err(|err| {
                error!(
                    "event=progress_recalc module=progress status=error node_id={} kind={} error={err}",
                    node.id, node.kind
                );
                err
            })?;
            start_progress.get_or_insert(progress);

            current = self.next_aggregate(&node)?;
        }

        Ok(start_progress.unwrap_or_default())
    }

    fn recalculate_node(&self, node: &mut Node) -> HierarchyResult<u8> {
        let own = self.calculate_own_progress(node.id)?;
        let children = match node.kind.child_kind() {
            Some(kind) => self.repo.find_children(Some(node.id), Some(kind))?,
            None => Vec::new(),
        };
        let child_progress: Vec<u8> = children.iter().map(|child| child.progress).collect();
        let progress = weighted_progress(own, &child_progress);

        let changed = node.progress != progress;
        if changed {
            node.progress = progress;
            self.repo.save(node)?;
        }
        info!(
            "event=progress_recalc module=progress status=ok node_id={} kind={} own={own} children={} progress={progress} changed={changed}",
            node.id,
            node.kind,
            children.len()
        );
        Ok(progress)
    }

    /// Parent that must be recalculated after `node`: a story or epic above
    /// a non-epic node.
    fn next_aggregate(&self, node: &Node) -> HierarchyResult<Option<Node>> {
        if node.kind == NodeKind::Epic {
            return Ok(None);
        }
        let Some(parent_id) = node.parent_id else {
            return Ok(None);
        };
        Ok(self
            .repo
            .find_by_id(parent_id)?
            .filter(|parent| matches!(parent.kind, NodeKind::Story | NodeKind::Epic)))
    }
}

/// Truncating completion percentage of `subtasks`.
pub fn own_progress(subtasks: &[Subtask]) -> u8 {
    if subtasks.is_empty() {
        return 0;
    }
    let completed = subtasks.iter().filter(|subtask| subtask.is_completed).count();
    (completed * usize::from(MAX_PROGRESS) / subtasks.len()) as u8
}

/// Fixed-weight blend of own progress and the mean of child progress.
///
/// Computed in integers: `floor((own*n*w + sum*(100-w)) / (100*n))`, which
/// equals the floating-point floor for every input in range.
pub fn weighted_progress(own: u8, children: &[u8]) -> u8 {
    if children.is_empty() {
        return own;
    }
    let count = children.len() as u64;
    let sum: u64 = children.iter().map(|value| u64::from(*value)).sum();
    let own_weight = u64::from(OWN_PROGRESS_WEIGHT_PERCENT);
    let child_weight = 100 - own_weight;
    let blended = (u64::from(own) * count * own_weight + sum * child_weight) / (100 * count);
    blended.min(u64::from(MAX_PROGRESS)) as u8
}

#[cfg(test)]
mod tests {
    use super::{own_progress, weighted_progress};
    use crate::model::node::Subtask;
    use uuid::Uuid;

    fn subtasks(completed: usize, total: usize) -> Vec<Subtask> {
        let owner = Uuid::new_v4();
        (0..total)
            .map(|index| {
                let mut subtask = Subtask::new(owner, "s", index as i64);
                subtask.is_completed = index < completed;
                subtask
            })
            .collect()
    }

    #[test]
    fn own_progress_truncates() {
        assert_eq!(own_progress(&[]), 0);
        assert_eq!(own_progress(&subtasks(2, 4)), 50);
        assert_eq!(own_progress(&subtasks(1, 3)), 33);
        assert_eq!(own_progress(&subtasks(2, 3)), 66);
        assert_eq!(own_progress(&subtasks(3, 3)), 100);
    }

    #[test]
    fn weighted_without_children_is_own() {
        assert_eq!(weighted_progress(50, &[]), 50);
    }

    #[test]
    fn weighted_blends_half_and_half() {
        assert_eq!(weighted_progress(40, &[80, 60]), 55);
        assert_eq!(weighted_progress(0, &[100]), 50);
        assert_eq!(weighted_progress(100, &[100, 100, 100]), 100);
    }

    #[test]
    fn weighted_floors_fractional_means() {
        // mean = 33.33.., 0.5*33 + 0.5*33.33 = 33.16 -> 33
        assert_eq!(weighted_progress(33, &[0, 0, 100]), 33);
        // 0.5*1 + 0.5*0 = 0.5 -> 0
        assert_eq!(weighted_progress(1, &[0]), 0);
        // 0.5*0 + 0.5*(1/3) -> 0
        assert_eq!(weighted_progress(0, &[1, 0, 0]), 0);
    }
}
