//! `SQLite` storage for the governance core.
//!
//! Persists budgets, approval policies and the approval queue. Agents,
//! project state and cross-project records are in-memory only.

mod db;
mod models;
mod queries_approvals;
mod queries_budgets;
mod queries_policies;

pub use db::{Database, DatabaseError};
pub use models::*;
pub use queries_budgets::NewBudget;
pub use queries_policies::NewPolicy;
