//! Agent registry.
//!
//! A forest of agents keyed by session ID. Sub-agents hang under the agent
//! that spawned them; budgets delegated down the tree are session-scoped
//! ledger budgets bounded by the parent's remaining pool.

mod registry;
mod tree;
mod types;

pub use registry::AgentRegistry;
pub use types::{Agent, AgentEvent, AgentMetrics, AgentStatus, AgentTreeNode, FlatTreeEntry};
