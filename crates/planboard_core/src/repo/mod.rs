//! Persistence contracts for the work-item hierarchy.
//!
//! # Responsibility
//! - Define the narrow data-access contract the hierarchy engine consumes.
//! - Keep SQLite query details out of the services.
//!
//! # Invariants
//! - Read paths never return soft-deleted nodes.
//! - Writes here perform no hierarchy validation; services own the rules.

pub mod hierarchy_repo;
