//! Work-item use-case service.
//!
//! # Responsibility
//! - Create epics, stories and tasks at validated, gap-free positions.
//! - Apply subtask changes and refresh progress in the same call.
//! - Soft-delete nodes and repair the sibling group they leave behind.
//!
//! # Invariants
//! - Titles are trimmed and never blank.
//! - Progress is never stale after a subtask change returns.

use crate::config::HierarchyRules;
use crate::model::node::{Node, NodeId, NodeKind, Subtask, SubtaskId};
use crate::repo::hierarchy_repo::HierarchyRepository;
use crate::service::error::{HierarchyError, HierarchyResult};
use crate::service::progress_service::ProgressPropagationService;
use crate::service::sort_order::SortOrderAllocator;
use crate::service::validation_service::check_parentage;
use log::info;
use std::time::{SystemTime, UNIX_EPOCH};

/// Work-item facade over the hierarchy engine.
pub struct WorkItemService<R: HierarchyRepository> {
    repo: R,
    rules: HierarchyRules,
}

impl<R: HierarchyRepository> WorkItemService<R> {
    /// Creates service with default rules.
    pub fn new(repo: R) -> Self {
        Self::with_rules(repo, HierarchyRules::default())
    }

    pub fn with_rules(repo: R, rules: HierarchyRules) -> Self {
        Self { repo, rules }
    }

    pub fn create_epic(&self, title: impl Into<String>) -> HierarchyResult<Node> {
        self.create(NodeKind::Epic, None, title.into())
    }

    /// Creates a story under an epic, or standalone when `epic_id` is `None`.
    pub fn create_story(
        &self,
        epic_id: Option<NodeId>,
        title: impl Into<String>,
    ) -> HierarchyResult<Node> {
        self.create(NodeKind::Story, epic_id, title.into())
    }

    /// Creates a task. A `None` story passes only under
    /// `TaskParentPolicy::AllowStandalone`.
    pub fn create_task(
        &self,
        story_id: Option<NodeId>,
        title: impl Into<String>,
    ) -> HierarchyResult<Node> {
        self.create(NodeKind::Task, story_id, title.into())
    }

    pub fn get_item(&self, id: NodeId) -> HierarchyResult<Option<Node>> {
        self.repo.find_by_id(id).map_err(Into::into)
    }

    /// Active children in sibling order.
    pub fn list_children(&self, parent_id: Option<NodeId>) -> HierarchyResult<Vec<Node>> {
        self.repo.find_children(parent_id, None).map_err(Into::into)
    }

    pub fn list_subtasks(&self, owner_id: NodeId) -> HierarchyResult<Vec<Subtask>> {
        self.repo.find_subtasks(owner_id).map_err(Into::into)
    }

    /// Appends an open subtask to `owner_id` and refreshes progress.
    pub fn add_subtask(
        &self,
        owner_id: NodeId,
        title: impl Into<String>,
    ) -> HierarchyResult<Subtask> {
        let title = normalize_title(title.into())?;
        self.load(owner_id)?;

        let next = self
            .repo
            .find_subtasks(owner_id)?
            .iter()
            .map(|subtask| subtask.sort_order + 1)
            .max()
            .unwrap_or(0);
        let subtask = Subtask::new(owner_id, title, next);
        self.repo.insert_subtask(&subtask)?;

        self.progress().update_progress_from_subtasks(owner_id)?;
        Ok(subtask)
    }

    /// Sets completion of one subtask and refreshes progress up the chain.
    pub fn set_subtask_completed(
        &self,
        subtask_id: SubtaskId,
        completed: bool,
    ) -> HierarchyResult<Subtask> {
        let mut subtask = self
            .repo
            .find_subtask(subtask_id)?
            .ok_or(HierarchyError::SubtaskNotFound(subtask_id))?;
        if subtask.is_completed != completed {
            subtask.is_completed = completed;
            self.repo.update_subtask(&subtask)?;
        }
        self.progress()
            .update_progress_from_subtasks(subtask.task_id)?;
        Ok(subtask)
    }

    /// Deletes one subtask and re-sequences the rest.
    ///
    /// Removing the last subtask leaves the owner's progress as it was.
    pub fn remove_subtask(&self, subtask_id: SubtaskId) -> HierarchyResult<()> {
        let subtask = self
            .repo
            .find_subtask(subtask_id)?
            .ok_or(HierarchyError::SubtaskNotFound(subtask_id))?;
        self.repo.delete_subtask(subtask_id)?;

        for (index, mut remaining) in self
            .repo
            .find_subtasks(subtask.task_id)?
            .into_iter()
            .enumerate()
        {
            if remaining.sort_order != index as i64 {
                remaining.sort_order = index as i64;
                self.repo.update_subtask(&remaining)?;
            }
        }

        self.progress()
            .update_progress_from_subtasks(subtask.task_id)?;
        Ok(())
    }

    /// Soft-deletes one node. Its subtree becomes invisible as-is; the old
    /// sibling group is compacted and the old parent chain recalculated.
    pub fn delete_item(&self, id: NodeId) -> HierarchyResult<()> {
        let node = self.load(id)?;
        self.repo.soft_delete_node(id, now_epoch_ms())?;
        SortOrderAllocator::new(&self.repo).compact(node.parent_id)?;

        if let Some(parent) = node
            .parent_id
            .map(|parent_id| self.repo.find_by_id(parent_id))
            .transpose()?
            .flatten()
        {
            match parent.kind {
                NodeKind::Story => {
                    self.progress().propagate_to_parent(parent.id)?;
                }
                NodeKind::Epic => {
                    self.progress().update_hierarchy_progress(parent.id)?;
                }
                NodeKind::Task => {}
            }
        }

        info!(
            "event=node_delete module=hierarchy status=ok node_id={id} kind={}",
            node.kind
        );
        Ok(())
    }

    fn create(
        &self,
        kind: NodeKind,
        parent_id: Option<NodeId>,
        title: String,
    ) -> HierarchyResult<Node> {
        let title = normalize_title(title)?;
        let parent_kind = match parent_id {
            Some(id) => Some(self.load(id)?.kind),
            None => None,
        };

        let mut node = Node::new(kind, parent_id, title);
        check_parentage(node.id, kind, parent_kind, self.rules.task_parent)?;
        node.sort_order = Some(SortOrderAllocator::new(&self.repo).next_sort_order(parent_id)?);
        self.repo.insert_node(&node)?;

        info!(
            "event=node_create module=hierarchy status=ok node_id={} kind={kind} sort_order={}",
            node.id,
            node.sort_order.unwrap_or_default()
        );
        Ok(node)
    }

    fn load(&self, id: NodeId) -> HierarchyResult<Node> {
        self.repo
            .find_by_id(id)?
            .ok_or(HierarchyError::NotFound(id))
    }

    fn progress(&self) -> ProgressPropagationService<&R> {
        ProgressPropagationService::new(&self.repo)
    }
}

fn normalize_title(value: String) -> HierarchyResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HierarchyError::InvalidTitle);
    }
    Ok(trimmed.to_string())
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}
