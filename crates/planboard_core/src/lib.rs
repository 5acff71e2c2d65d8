//! Hierarchy integrity and progress engine for Epic -> Story -> Task work
//! items.
//! This crate is the single source of truth for hierarchy invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{
    HierarchyRules, RecalculationPolicy, TaskParentPolicy, MAX_HIERARCHY_DEPTH,
    MAX_TRAVERSAL_HOPS, OWN_PROGRESS_WEIGHT_PERCENT,
};
pub use logging::{default_log_level, init_logging, init_logging_from_env, logging_status};
pub use model::node::{Node, NodeId, NodeKind, Subtask, SubtaskId};
pub use repo::hierarchy_repo::{
    HierarchyRepoError, HierarchyRepoResult, HierarchyRepository, SqliteHierarchyRepository,
};
pub use service::error::{
    AggregateValidationFailure, ExpectedParent, HierarchyError, HierarchyResult, OrderingIssue,
    OrderingViolation,
};
pub use service::mutation_service::{HierarchyMutationService, MoveOutcome, RecalculationFailure};
pub use service::progress_service::{own_progress, weighted_progress, ProgressPropagationService};
pub use service::sort_order::SortOrderAllocator;
pub use service::validation_service::{check_parentage, HierarchyValidationService};
pub use service::work_item_service::WorkItemService;

/// Minimal health-check API for host integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
