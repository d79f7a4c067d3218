//! Cross-project coordinator types.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type broadcast when a project is removed.
pub const EVENT_PROJECT_REMOVED: &str = "project_removed";
/// Event type broadcast when the active project changes.
pub const EVENT_PROJECT_SWITCHED: &str = "project_switched";

/// A known project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub project_id: String,
    pub project_path: String,
    pub name: String,
    /// Unix milliseconds.
    pub registered_at: i64,
}

/// Shared per-project state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectState {
    pub project_id: String,
    pub project_path: String,
    pub active_agents: BTreeSet<String>,
    pub pending_skills: BTreeSet<String>,
    pub session_id: Option<String>,
    /// Bumped on every update; pollers compare it to detect changes.
    pub version: u64,
    /// Unix milliseconds.
    pub last_sync: i64,
}

impl ProjectState {
    pub(crate) fn new(record: &ProjectRecord, now: i64) -> Self {
        Self {
            project_id: record.project_id.clone(),
            project_path: record.project_path.clone(),
            active_agents: BTreeSet::new(),
            pending_skills: BTreeSet::new(),
            session_id: None,
            version: 0,
            last_sync: now,
        }
    }

    pub(crate) fn bump(&mut self, now: i64) {
        self.version += 1;
        self.last_sync = now;
    }
}

/// Partial state update; only provided fields are replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatePatch {
    pub active_agents: Option<BTreeSet<String>>,
    pub pending_skills: Option<BTreeSet<String>>,
    /// `Some(None)` clears the session.
    pub session_id: Option<Option<String>>,
}

/// An event addressed to one or more projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source_project_id: Option<String>,
    pub target_project_ids: Vec<String>,
    pub data: Value,
    /// Set once the event has been fanned out.
    pub handled: bool,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// One fan-out delivery of a [`ProjectEvent`].
#[derive(Debug, Clone)]
pub struct ProjectNotification {
    pub target_project_id: String,
    pub event: Arc<ProjectEvent>,
}

/// Status and activity an agent had in a project when it left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub status: crate::agents::AgentStatus,
    pub last_activity: i64,
}

/// An agent that works across several projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossProjectAgent {
    pub agent_id: String,
    pub name: String,
    pub project_ids: BTreeSet<String>,
    pub current_project_id: Option<String>,
    pub status: crate::agents::AgentStatus,
    /// Unix milliseconds.
    pub last_activity: i64,
    /// Resumable state per project the agent has left.
    pub snapshots: HashMap<String, AgentSnapshot>,
}

/// A skill configuration shared by several projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSkillConfig {
    pub skill_id: String,
    pub name: String,
    pub project_ids: BTreeSet<String>,
    pub settings: Map<String, Value>,
    /// Unix milliseconds.
    pub updated_at: i64,
}

/// Result of moving an agent between projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Transitioned { agent: CrossProjectAgent },
    /// The target is not in the agent's project set; nothing changed.
    NotTracked,
    UnknownAgent,
}

/// Result of switching the active project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSwitch {
    pub previous_project_id: Option<String>,
    pub current_project_id: String,
    /// Cross-project agents moved into the new project.
    pub transitioned_agents: Vec<String>,
}
