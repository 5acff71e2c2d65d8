//! Hierarchy engine error taxonomy.
//!
//! # Invariants
//! - Single-node operations return the first violation they find.
//! - Whole-subtree audits wrap every violation in one
//!   `AggregateValidationFailure`.

use crate::model::node::{NodeId, NodeKind, SubtaskId};
use crate::repo::hierarchy_repo::HierarchyRepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by hierarchy services.
pub type HierarchyResult<T> = Result<T, HierarchyError>;

/// Parent shape a node kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedParent {
    NoParent,
    EpicOrNoParent,
    Story,
    StoryOrNoParent,
    /// Epics never move, whatever the target.
    Immovable,
}

impl Display for ExpectedParent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoParent => "no parent",
            Self::EpicOrNoParent => "epic or no parent",
            Self::Story => "story",
            Self::StoryOrNoParent => "story or no parent",
            Self::Immovable => "no move at all",
        })
    }
}

/// What is wrong with one sibling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingIssue {
    /// Sort order is NULL.
    Missing,
    Negative(i64),
    Duplicate(i64),
    /// Consecutive sorted values differ by more than one.
    Gap { after: i64, next: i64 },
    /// The same id was listed twice in a reorder request.
    RepeatedId,
    /// No position is left after this one.
    Exhausted(i64),
}

impl Display for OrderingIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "missing sort order"),
            Self::Negative(value) => write!(f, "negative sort order {value}"),
            Self::Duplicate(value) => write!(f, "duplicate sort order {value}"),
            Self::Gap { after, next } => write!(f, "sort order gap between {after} and {next}"),
            Self::RepeatedId => write!(f, "id listed more than once"),
            Self::Exhausted(value) => write!(f, "no sort order left after {value}"),
        }
    }
}

/// One ordering problem in one sibling group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingViolation {
    /// Group key; `None` is the root group.
    pub parent_id: Option<NodeId>,
    pub issue: OrderingIssue,
    pub node_ids: Vec<NodeId>,
}

impl Display for OrderingViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let group = self
            .parent_id
            .map_or_else(|| "root".to_string(), |id| id.to_string());
        let ids = self
            .node_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{} under parent {group} (nodes: {ids})", self.issue)
    }
}

/// Every violation found by a collect-all audit.
#[derive(Debug)]
pub struct AggregateValidationFailure {
    pub violations: Vec<HierarchyError>,
}

impl AggregateValidationFailure {
    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Implicated node ids, first occurrence order, no repeats.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        for violation in &self.violations {
            for id in violation.node_ids() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub fn ordering_violations(&self) -> impl Iterator<Item = &OrderingViolation> {
        self.violations.iter().filter_map(|violation| match violation {
            HierarchyError::OrderingViolation(inner) => Some(inner),
            _ => None,
        })
    }
}

impl Display for AggregateValidationFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let messages = self
            .violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{} hierarchy violation(s): {messages}", self.violations.len())
    }
}

/// Errors from hierarchy engine operations.
#[derive(Debug)]
pub enum HierarchyError {
    /// Node does not exist or is soft-deleted.
    NotFound(NodeId),
    SubtaskNotFound(SubtaskId),
    /// Parent/child kind mismatch, or an epic move attempt.
    TypeViolation {
        node_id: NodeId,
        kind: NodeKind,
        /// `None` when the (prospective) parent is root.
        parent_kind: Option<NodeKind>,
        expected: ExpectedParent,
    },
    /// Operation only applies to another node kind.
    KindMismatch {
        node_id: NodeId,
        kind: NodeKind,
        expected: NodeKind,
    },
    /// Move would make a node its own ancestor, or the ancestor chain is
    /// already corrupt.
    CycleDetected { node_id: NodeId, parent_id: NodeId },
    DepthExceeded {
        node_id: NodeId,
        parent_id: NodeId,
        depth: u32,
        max_depth: u32,
    },
    OrderingViolation(OrderingViolation),
    /// Reorder named a node that is not a child of the given parent.
    OwnershipViolation {
        node_id: NodeId,
        parent_id: Option<NodeId>,
    },
    AggregateValidationFailure(AggregateValidationFailure),
    /// Title is blank after trim.
    InvalidTitle,
    /// Optimistic version check failed; retry the whole request.
    ConcurrentModification { node_id: NodeId },
    Repo(HierarchyRepoError),
}

impl HierarchyError {
    /// Node ids this error points at.
    pub fn node_ids(&self) -> Vec<NodeId> {
        match self {
            Self::NotFound(id) => vec![*id],
            Self::TypeViolation { node_id, .. }
            | Self::KindMismatch { node_id, .. }
            | Self::OwnershipViolation { node_id, .. }
            | Self::ConcurrentModification { node_id } => vec![*node_id],
            Self::CycleDetected { node_id, parent_id }
            | Self::DepthExceeded {
                node_id, parent_id, ..
            } => vec![*node_id, *parent_id],
            Self::OrderingViolation(violation) => violation.node_ids.clone(),
            Self::AggregateValidationFailure(aggregate) => aggregate.node_ids(),
            Self::SubtaskNotFound(_) | Self::InvalidTitle | Self::Repo(_) => Vec::new(),
        }
    }
}

impl Display for HierarchyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "work item not found: {id}"),
            Self::SubtaskNotFound(id) => write!(f, "subtask not found: {id}"),
            Self::TypeViolation {
                node_id,
                kind,
                parent_kind,
                expected,
            } => {
                let parent = parent_kind.map_or("none", NodeKind::as_str);
                write!(
                    f,
                    "type violation: {kind} {node_id} has parent kind {parent}; expected {expected}"
                )
            }
            Self::KindMismatch {
                node_id,
                kind,
                expected,
            } => write!(f, "{kind} {node_id} given where {expected} was expected"),
            Self::CycleDetected { node_id, parent_id } => write!(
                f,
                "move would create cycle: node {node_id} under parent {parent_id}"
            ),
            Self::DepthExceeded {
                node_id,
                parent_id,
                depth,
                max_depth,
            } => write!(
                f,
                "move of {node_id} under {parent_id} reaches depth {depth}; limit is {max_depth}"
            ),
            Self::OrderingViolation(violation) => write!(f, "ordering violation: {violation}"),
            Self::OwnershipViolation { node_id, parent_id } => {
                let parent = parent_id.map_or_else(|| "root".to_string(), |id| id.to_string());
                write!(f, "node {node_id} is not a child of {parent}")
            }
            Self::AggregateValidationFailure(aggregate) => write!(f, "{aggregate}"),
            Self::InvalidTitle => write!(f, "title must not be blank"),
            Self::ConcurrentModification { node_id } => {
                write!(f, "work item {node_id} was modified concurrently")
            }
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for HierarchyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HierarchyRepoError> for HierarchyError {
    fn from(value: HierarchyRepoError) -> Self {
        match value {
            HierarchyRepoError::NodeNotFound(id) => Self::NotFound(id),
            HierarchyRepoError::SubtaskNotFound(id) => Self::SubtaskNotFound(id),
            HierarchyRepoError::VersionConflict { node_id, .. } => {
                Self::ConcurrentModification { node_id }
            }
            other => Self::Repo(other),
        }
    }
}

impl From<AggregateValidationFailure> for HierarchyError {
    fn from(value: AggregateValidationFailure) -> Self {
        Self::AggregateValidationFailure(value)
    }
}
