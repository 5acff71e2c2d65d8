//! Hierarchy rule configuration.
//!
//! # Responsibility
//! - Carry the product decisions the engine must not guess at.
//!
//! # Invariants
//! - Defaults match the stricter creation path: tasks need a story parent and
//!   move-triggered recalculation is best effort.
//! - Weighting, depth and traversal bounds are constants, not rules.

use serde::{Deserialize, Serialize};

/// Fixed share of a node's own subtask progress in its weighted progress.
pub const OWN_PROGRESS_WEIGHT_PERCENT: u32 = 50;
/// Deepest allowed level index plus one (EPIC=0, STORY=1, TASK=2).
pub const MAX_HIERARCHY_DEPTH: u32 = 3;
/// Parent-hop bound for every upward traversal; guards corrupt data.
pub const MAX_TRAVERSAL_HOPS: u32 = 10;

/// Whether a TASK may exist with no parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskParentPolicy {
    /// Every task must sit under a story.
    #[default]
    RequireStory,
    /// Root-level tasks pass type validation.
    AllowStandalone,
}

/// How a move treats failures of the progress recalculation it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationPolicy {
    /// Log and report failures in `MoveOutcome`; the move stands.
    #[default]
    BestEffort,
    /// Return the first failure as the move error. The caller must roll back
    /// its transaction to undo the structural change.
    Strict,
}

/// Rule set shared by the hierarchy services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyRules {
    pub task_parent: TaskParentPolicy,
    pub recalculation: RecalculationPolicy,
}

impl HierarchyRules {
    pub fn with_task_parent(mut self, policy: TaskParentPolicy) -> Self {
        self.task_parent = policy;
        self
    }

    pub fn with_recalculation(mut self, policy: RecalculationPolicy) -> Self {
        self.recalculation = policy;
        self
    }
}
