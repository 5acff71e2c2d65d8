//! Hierarchy node and subtask records.
//!
//! # Invariants
//! - `id` is stable and never reused.
//! - `progress` stays within `0..=100`.
//! - A node with `deleted_at` set is invisible to every hierarchy computation.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of an Epic, Story or Task.
pub type NodeId = Uuid;

/// Stable identifier of a subtask.
pub type SubtaskId = Uuid;

/// Upper bound of node progress.
pub const MAX_PROGRESS: u8 = 100;

/// Node level discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Epic,
    Story,
    Task,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Epic => "epic",
            Self::Story => "story",
            Self::Task => "task",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "epic" => Some(Self::Epic),
            "story" => Some(Self::Story),
            "task" => Some(Self::Task),
            _ => None,
        }
    }

    /// Kind of the direct children whose progress feeds this node.
    ///
    /// `None` for tasks: they aggregate subtasks only.
    pub fn child_kind(self) -> Option<Self> {
        match self {
            Self::Epic => Some(Self::Story),
            Self::Story => Some(Self::Task),
            Self::Task => None,
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One Epic, Story or Task row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` means root level.
    pub parent_id: Option<NodeId>,
    pub title: String,
    /// Position among siblings. `None` only for legacy rows that predate
    /// ordering; validation reports it.
    pub sort_order: Option<i64>,
    pub progress: u8,
    /// Optimistic concurrency counter, bumped by every save.
    pub version: i64,
    /// Epoch ms tombstone.
    pub deleted_at: Option<i64>,
}

impl Node {
    /// Creates an unplaced node with a generated id.
    pub fn new(kind: NodeKind, parent_id: Option<NodeId>, title: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), kind, parent_id, title)
    }

    /// Creates an unplaced node with a caller-provided id.
    ///
    /// Used by import paths and tests that build corrupt fixtures.
    pub fn with_id(
        id: NodeId,
        kind: NodeKind,
        parent_id: Option<NodeId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind,
            parent_id,
            title: title.into(),
            sort_order: None,
            progress: 0,
            version: 0,
            deleted_at: None,
        }
    }

    /// Builder-style sort order assignment.
    pub fn at(mut self, sort_order: i64) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Boolean completion unit owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    /// Owning node. Normally a task; epics and stories may own subtasks too
    /// and blend them into their weighted progress.
    pub task_id: NodeId,
    pub title: String,
    pub is_completed: bool,
    pub sort_order: i64,
}

impl Subtask {
    pub fn new(task_id: NodeId, title: impl Into<String>, sort_order: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            title: title.into(),
            is_completed: false,
            sort_order,
        }
    }
}
