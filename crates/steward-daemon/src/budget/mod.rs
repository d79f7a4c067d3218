//! Budget ledger.
//!
//! Owns per-scope spend limits and running totals, gates work against them,
//! and notifies subscribers when warning thresholds or limits are crossed.
//! Cost estimation itself is pure and lives in [`steward_core::cost`].

mod ledger;
mod types;

pub use ledger::BudgetLedger;
pub use types::{Budget, BudgetCheck, BudgetEvent, BudgetScope, BudgetSpec, ScopeLevel};
