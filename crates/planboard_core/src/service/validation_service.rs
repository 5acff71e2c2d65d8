//! Hierarchy integrity checks.
//!
//! # Responsibility
//! - Enforce which node kinds may parent which.
//! - Audit sibling ordering and whole epic subtrees.
//!
//! # Invariants
//! - `validate_task_type` fails on the first violation.
//! - `validate_sort_order` and `validate_hierarchy` never stop early; they
//!   report every violation in one `AggregateValidationFailure`.
//! - The root sibling group is exempt from ordering checks.

use crate::config::{HierarchyRules, TaskParentPolicy};
use crate::model::node::{Node, NodeId, NodeKind};
use crate::repo::hierarchy_repo::HierarchyRepository;
use crate::service::error::{
    AggregateValidationFailure, ExpectedParent, HierarchyError, HierarchyResult, OrderingIssue,
    OrderingViolation,
};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};

/// Type and ordering validation service.
pub struct HierarchyValidationService<R: HierarchyRepository> {
    repo: R,
    rules: HierarchyRules,
}

impl<R: HierarchyRepository> HierarchyValidationService<R> {
    /// Creates service with default rules.
    pub fn new(repo: R) -> Self {
        Self::with_rules(repo, HierarchyRules::default())
    }

    pub fn with_rules(repo: R, rules: HierarchyRules) -> Self {
        Self { repo, rules }
    }

    /// Checks `node` against the kind of its resolved parent.
    ///
    /// # Errors
    /// - `NotFound` when `parent_id` points at a missing or deleted node.
    /// - `TypeViolation` when the parent kind is not allowed.
    pub fn validate_task_type(&self, node: &Node) -> HierarchyResult<()> {
        let parent_kind = self.resolve_parent_kind(node.parent_id)?;
        check_parentage(node.id, node.kind, parent_kind, self.rules.task_parent)
    }

    /// Collect-all ordering audit over arbitrary nodes, grouped by parent.
    pub fn validate_sort_order(&self, nodes: &[Node]) -> HierarchyResult<()> {
        let violations = ordering_violations(nodes.iter());
        if violations.is_empty() {
            return Ok(());
        }
        Err(AggregateValidationFailure {
            violations: violations
                .into_iter()
                .map(HierarchyError::OrderingViolation)
                .collect(),
        }
        .into())
    }

    /// Full audit of one epic subtree.
    ///
    /// Checks that the root is a parentless epic, then every descendant's
    /// parentage and every sibling group inside the subtree, and reports all
    /// failures together.
    ///
    /// # Errors
    /// - `NotFound` when the epic does not exist (fail fast).
    /// - `AggregateValidationFailure` with every violation found.
    pub fn validate_hierarchy(&self, epic_id: NodeId) -> HierarchyResult<()> {
        let epic = self
            .repo
            .find_by_id(epic_id)?
            .ok_or(HierarchyError::NotFound(epic_id))?;
        let subtree = self.repo.find_all_descendants(epic_id)?;
        let kinds: HashMap<NodeId, NodeKind> =
            subtree.iter().map(|node| (node.id, node.kind)).collect();

        let mut violations = Vec::new();

        // The audited root must be an epic with no parent at all.
        if epic.kind != NodeKind::Epic || epic.parent_id.is_some() {
            let parent_kind = match epic.parent_id {
                Some(parent_id) => self.repo.find_by_id(parent_id)?.map(|parent| parent.kind),
                None => None,
            };
            violations.push(HierarchyError::TypeViolation {
                node_id: epic.id,
                kind: epic.kind,
                parent_kind,
                expected: ExpectedParent::NoParent,
            });
        }

        for node in subtree.iter().filter(|node| node.id != epic.id) {
            let parent_kind = node.parent_id.and_then(|id| kinds.get(&id).copied());
            if let Err(err) =
                check_parentage(node.id, node.kind, parent_kind, self.rules.task_parent)
            {
                violations.push(err);
            }
        }

        // The epic's own sibling group lies outside the loaded subtree.
        violations.extend(
            ordering_violations(subtree.iter().filter(|node| node.id != epic.id))
                .into_iter()
                .map(HierarchyError::OrderingViolation),
        );

        if violations.is_empty() {
            info!(
                "event=hierarchy_audit module=hierarchy status=ok epic_id={epic_id} nodes={}",
                subtree.len()
            );
            return Ok(());
        }

        warn!(
            "event=hierarchy_audit module=hierarchy status=error epic_id={epic_id} nodes={} violations={}",
            subtree.len(),
            violations.len()
        );
        Err(AggregateValidationFailure { violations }.into())
    }

    fn resolve_parent_kind(&self, parent_id: Option<NodeId>) -> HierarchyResult<Option<NodeKind>> {
        match parent_id {
            None => Ok(None),
            Some(id) => {
                let parent = self
                    .repo
                    .find_by_id(id)?
                    .ok_or(HierarchyError::NotFound(id))?;
                Ok(Some(parent.kind))
            }
        }
    }
}

/// Parentage rule for one node given its parent's kind (`None` = root).
pub fn check_parentage(
    node_id: NodeId,
    kind: NodeKind,
    parent_kind: Option<NodeKind>,
    task_parent: TaskParentPolicy,
) -> HierarchyResult<()> {
    let expected = match (kind, parent_kind) {
        (NodeKind::Epic, None) => return Ok(()),
        (NodeKind::Epic, Some(_)) => ExpectedParent::NoParent,
        (NodeKind::Story, None | Some(NodeKind::Epic)) => return Ok(()),
        (NodeKind::Story, Some(_)) => ExpectedParent::EpicOrNoParent,
        (NodeKind::Task, Some(NodeKind::Story)) => return Ok(()),
        (NodeKind::Task, _) => match task_parent {
            TaskParentPolicy::RequireStory => ExpectedParent::Story,
            TaskParentPolicy::AllowStandalone if parent_kind.is_none() => return Ok(()),
            TaskParentPolicy::AllowStandalone => ExpectedParent::StoryOrNoParent,
        },
    };
    Err(HierarchyError::TypeViolation {
        node_id,
        kind,
        parent_kind,
        expected,
    })
}

/// Every ordering problem in every non-root sibling group of `nodes`.
///
/// Deleted nodes are ignored. Groups are reported in parent id order.
pub(crate) fn ordering_violations<'a>(
    nodes: impl Iterator<Item = &'a Node>,
) -> Vec<OrderingViolation> {
    let mut groups: BTreeMap<NodeId, Vec<&Node>> = BTreeMap::new();
    for node in nodes.filter(|node| node.is_active()) {
        if let Some(parent_id) = node.parent_id {
            groups.entry(parent_id).or_default().push(node);
        }
    }

    let mut violations = Vec::new();
    for (parent_id, members) in groups {
        group_violations(parent_id, &members, &mut violations);
    }
    violations
}

fn group_violations(parent_id: NodeId, members: &[&Node], out: &mut Vec<OrderingViolation>) {
    let mut push = |issue: OrderingIssue, node_ids: Vec<NodeId>| {
        out.push(OrderingViolation {
            parent_id: Some(parent_id),
            issue,
            node_ids,
        });
    };

    let missing: Vec<NodeId> = members
        .iter()
        .filter(|node| node.sort_order.is_none())
        .map(|node| node.id)
        .collect();
    if !missing.is_empty() {
        push(OrderingIssue::Missing, missing);
    }

    let mut by_value: BTreeMap<i64, Vec<NodeId>> = BTreeMap::new();
    for node in members {
        if let Some(value) = node.sort_order {
            by_value.entry(value).or_default().push(node.id);
        }
    }

    for (value, ids) in &by_value {
        if *value < 0 {
            push(OrderingIssue::Negative(*value), ids.clone());
        }
        if ids.len() > 1 {
            push(OrderingIssue::Duplicate(*value), ids.clone());
        }
    }

    let values: Vec<(&i64, &Vec<NodeId>)> = by_value.iter().collect();
    for pair in values.windows(2) {
        let (after, after_ids) = pair[0];
        let (next, next_ids) = pair[1];
        // Corrupt extremes may not fit in one subtraction; that is a gap too.
        if next.checked_sub(*after).map_or(true, |step| step > 1) {
            let node_ids = after_ids.iter().chain(next_ids.iter()).copied().collect();
            push(
                OrderingIssue::Gap {
                    after: *after,
                    next: *next,
                },
                node_ids,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{check_parentage, ordering_violations};
    use crate::config::TaskParentPolicy;
    use crate::model::node::{Node, NodeKind};
    use crate::service::error::{ExpectedParent, HierarchyError, OrderingIssue};
    use uuid::Uuid;

    fn child(parent: Uuid, sort_order: Option<i64>) -> Node {
        let mut node = Node::new(NodeKind::Task, Some(parent), "t");
        node.sort_order = sort_order;
        node
    }

    #[test]
    fn parentage_table() {
        let id = Uuid::new_v4();
        let strict = TaskParentPolicy::RequireStory;
        assert!(check_parentage(id, NodeKind::Epic, None, strict).is_ok());
        assert!(check_parentage(id, NodeKind::Story, None, strict).is_ok());
        assert!(check_parentage(id, NodeKind::Story, Some(NodeKind::Epic), strict).is_ok());
        assert!(check_parentage(id, NodeKind::Task, Some(NodeKind::Story), strict).is_ok());

        assert!(check_parentage(id, NodeKind::Epic, Some(NodeKind::Epic), strict).is_err());
        assert!(check_parentage(id, NodeKind::Story, Some(NodeKind::Story), strict).is_err());
        assert!(check_parentage(id, NodeKind::Task, Some(NodeKind::Epic), strict).is_err());
    }

    #[test]
    fn standalone_task_depends_on_policy() {
        let id = Uuid::new_v4();
        let err = check_parentage(id, NodeKind::Task, None, TaskParentPolicy::RequireStory)
            .unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::TypeViolation {
                expected: ExpectedParent::Story,
                parent_kind: None,
                ..
            }
        ));

        assert!(
            check_parentage(id, NodeKind::Task, None, TaskParentPolicy::AllowStandalone).is_ok()
        );
        let err = check_parentage(
            id,
            NodeKind::Task,
            Some(NodeKind::Task),
            TaskParentPolicy::AllowStandalone,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HierarchyError::TypeViolation {
                expected: ExpectedParent::StoryOrNoParent,
                ..
            }
        ));
    }

    #[test]
    fn ordering_collects_every_issue_in_a_group() {
        let parent = Uuid::new_v4();
        let nodes = vec![
            child(parent, Some(-1)),
            child(parent, Some(0)),
            child(parent, Some(0)),
            child(parent, Some(3)),
            child(parent, None),
        ];
        let issues: Vec<OrderingIssue> = ordering_violations(nodes.iter())
            .into_iter()
            .map(|violation| violation.issue)
            .collect();
        assert_eq!(
            issues,
            vec![
                OrderingIssue::Missing,
                OrderingIssue::Negative(-1),
                OrderingIssue::Duplicate(0),
                OrderingIssue::Gap { after: 0, next: 3 },
            ]
        );
    }

    #[test]
    fn extreme_sort_orders_report_gap_without_overflow() {
        let parent = Uuid::new_v4();
        let nodes = vec![
            child(parent, Some(i64::MIN)),
            child(parent, Some(1)),
            child(parent, Some(i64::MAX)),
        ];
        let issues: Vec<OrderingIssue> = ordering_violations(nodes.iter())
            .into_iter()
            .map(|violation| violation.issue)
            .collect();
        assert_eq!(
            issues,
            vec![
                OrderingIssue::Negative(i64::MIN),
                OrderingIssue::Gap {
                    after: i64::MIN,
                    next: 1
                },
                OrderingIssue::Gap {
                    after: 1,
                    next: i64::MAX
                },
            ]
        );
    }

    #[test]
    fn root_group_and_deleted_nodes_are_exempt() {
        let mut deleted = child(Uuid::new_v4(), Some(7));
        deleted.deleted_at = Some(1);
        let nodes = vec![
            Node::new(NodeKind::Epic, None, "a").at(0),
            Node::new(NodeKind::Epic, None, "b").at(0),
            deleted,
        ];
        assert!(ordering_violations(nodes.iter()).is_empty());
    }
}
