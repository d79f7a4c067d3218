//! `Steward` Daemon Library
//!
//! Governance services for fleets of coding agents:
//! - Budget ledger with scoped spend limits and alerts
//! - Approval policy engine with a durable pending queue
//! - Agent registry tree with delegated budgets
//! - Cross-project coordinator with event fan-out
//! - `SQLite` storage and a hook-event governor facade

pub mod agents;
pub mod approval;
pub mod budget;
pub mod error;
pub mod events;
pub mod governor;
pub mod hooks;
pub mod maintenance;
pub mod projects;
pub mod storage;

pub use error::{GovernanceError, Result};
pub use governor::Governor;
