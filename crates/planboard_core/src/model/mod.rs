//! Work-item hierarchy domain model.
//!
//! # Responsibility
//! - Define the Epic/Story/Task node shape and subtasks owned by nodes.
//!
//! # Invariants
//! - Nodes reference parents by id only; resolution goes through the
//!   repository.
//! - Deletion is a `deleted_at` tombstone, never a hard delete.

pub mod node;
