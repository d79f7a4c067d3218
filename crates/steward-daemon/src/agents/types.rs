//! Agent registry types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Active,
    Transitioning,
    Terminated,
}

impl AgentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Transitioning => "transitioning",
            Self::Terminated => "terminated",
        }
    }

    pub const fn is_running(&self) -> bool {
        !matches!(self, Self::Terminated)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered agent process, identified by its session ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub session_id: String,
    pub name: String,
    /// `None` for root agents.
    pub parent_session_id: Option<String>,
    pub project_path: Option<String>,
    pub status: AgentStatus,
    /// Unix seconds.
    pub started_at: i64,
    pub last_activity: i64,
    pub ended_at: Option<i64>,
    /// Session-scoped budget delegated to this agent.
    pub budget_id: Option<String>,
    pub tool_calls: u64,
    pub cost_usd: f64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Agent {
    /// Wall-clock lifetime so far, or until termination.
    pub fn duration_secs(&self, now: i64) -> i64 {
        (self.ended_at.unwrap_or(now) - self.started_at).max(0)
    }
}

/// Nested view of an agent subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTreeNode {
    pub agent: Agent,
    pub children: Vec<AgentTreeNode>,
}

/// One row of a depth-first, depth-annotated tree listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatTreeEntry {
    pub agent: Agent,
    /// Zero for the listing's root.
    pub depth: usize,
}

/// Aggregate metrics across every session that shares an agent name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub agent_name: String,
    pub sessions: usize,
    pub active_sessions: usize,
    pub total_duration_secs: i64,
    pub total_cost_usd: f64,
    pub tool_calls: u64,
}

/// Registry notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Registered {
        session_id: String,
        parent_session_id: Option<String>,
    },
    StatusChanged {
        session_id: String,
        status: AgentStatus,
    },
    /// An agent and its descendants were terminated, deepest first.
    Terminated { session_ids: Vec<String> },
    Unregistered {
        session_id: String,
    },
    BudgetAllocated {
        session_id: String,
        budget_id: String,
        amount_usd: f64,
    },
}
