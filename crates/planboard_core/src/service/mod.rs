//! Hierarchy engine services.
//!
//! # Responsibility
//! - Enforce hierarchy rules above the repository layer.
//! - Keep callers decoupled from storage details.
//!
//! Dependency direction is one-way: services read subtasks through
//! `HierarchyRepository`; nothing here is called back by subtask storage.

pub mod error;
pub mod mutation_service;
pub mod progress_service;
pub mod sort_order;
pub mod validation_service;
pub mod work_item_service;
