//! Inbound hook events and outbound decisions.
//!
//! Hook scripts forward agent lifecycle events as JSON objects. Field names
//! arrive in either camelCase or snake_case and event names in either
//! `PreToolUse` or `pre_tool_use` form; both normalise to the same
//! [`HookEvent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use steward_core::policy::ActionDescriptor;

use crate::error::GovernanceError;

/// Lifecycle event kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HookEventType {
    SessionStart,
    SessionEnd,
    PreToolUse,
    PostToolUse,
    SubagentStart,
    SubagentStop,
    Stop,
    ProjectRegistered,
    ProjectRemoved,
    ProjectSwitched,
    /// Anything else; always allowed.
    Unknown(String),
}

impl HookEventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionStart => "SessionStart",
            Self::SessionEnd => "SessionEnd",
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::SubagentStart => "SubagentStart",
            Self::SubagentStop => "SubagentStop",
            Self::Stop => "Stop",
            Self::ProjectRegistered => "ProjectRegistered",
            Self::ProjectRemoved => "ProjectRemoved",
            Self::ProjectSwitched => "ProjectSwitched",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for HookEventType {
    fn from(raw: String) -> Self {
        // `PreToolUse`, `preToolUse`, `pre_tool_use` and `pre-tool-use` are
        // all the same event.
        let key: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "sessionstart" => Self::SessionStart,
            "sessionend" => Self::SessionEnd,
            "pretooluse" => Self::PreToolUse,
            "posttooluse" => Self::PostToolUse,
            "subagentstart" => Self::SubagentStart,
            "subagentstop" => Self::SubagentStop,
            "stop" => Self::Stop,
            "projectregistered" => Self::ProjectRegistered,
            "projectremoved" => Self::ProjectRemoved,
            "projectswitched" => Self::ProjectSwitched,
            _ => Self::Unknown(raw),
        }
    }
}

impl From<HookEventType> for String {
    fn from(kind: HookEventType) -> Self {
        match kind {
            HookEventType::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalised lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEvent {
    #[serde(alias = "event_type", alias = "hook_event_name", alias = "hookEventName")]
    pub event_type: HookEventType,
    #[serde(default, alias = "session_id")]
    pub session_id: Option<String>,
    #[serde(default, alias = "project_path", alias = "cwd")]
    pub project_path: Option<String>,
    #[serde(default, alias = "tool_name")]
    pub tool_name: Option<String>,
    #[serde(default, alias = "tool_input")]
    pub tool_input: Option<Value>,
    #[serde(default, alias = "tool_response")]
    pub tool_response: Option<Value>,
    #[serde(default, alias = "parent_session_id")]
    pub parent_session_id: Option<String>,
    #[serde(default, alias = "agent_name")]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "project_id")]
    pub project_id: Option<String>,
    #[serde(default, alias = "project_name")]
    pub project_name: Option<String>,
}

impl HookEvent {
    /// Parse one JSON-encoded event.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// An event of the given type with every other field empty.
    pub const fn new(event_type: HookEventType) -> Self {
        Self {
            event_type,
            session_id: None,
            project_path: None,
            tool_name: None,
            tool_input: None,
            tool_response: None,
            parent_session_id: None,
            agent_name: None,
            timestamp: None,
            model: None,
            project_id: None,
            project_name: None,
        }
    }

    /// The action a tool event asks to perform. `None` without a tool name.
    pub fn action_descriptor(&self, estimated_cost_usd: Option<f64>) -> Option<ActionDescriptor> {
        let tool_name = self.tool_name.as_deref()?;
        Some(ActionDescriptor {
            session_id: self.session_id.clone().unwrap_or_default(),
            request_type: "tool_use".to_string(),
            tool_name: tool_name.to_string(),
            tool_input: self.tool_input.clone().unwrap_or(Value::Null),
            project_path: self.project_path.clone(),
            estimated_cost_usd,
        })
    }
}

/// Decision kinds returned to the hook caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    /// Halt the action (budget exhausted or awaiting approval).
    Block,
    /// Proceed with `modified_input` in place of the original input.
    Modify,
}

/// Outbound decision. `Deny` and `Block` always carry a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecision {
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval_id: Option<String>,
}

impl HookDecision {
    pub const fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            message: None,
            modified_input: None,
            pending_approval_id: None,
        }
    }

    /// Allow with an informational message (e.g. a budget warning).
    pub fn allow_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::allow()
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            message: Some(message.into()),
            ..Self::allow()
        }
    }

    pub fn block(message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Block,
            message: Some(message.into()),
            ..Self::allow()
        }
    }

    /// Block while a queued approval item awaits a decision.
    pub fn pending(item_id: impl Into<String>) -> Self {
        let item_id = item_id.into();
        Self {
            decision: Decision::Block,
            message: Some(format!("Action queued for approval (item {item_id})")),
            modified_input: None,
            pending_approval_id: Some(item_id),
        }
    }

    pub fn modify(input: Value) -> Self {
        Self {
            decision: Decision::Modify,
            modified_input: Some(input),
            ..Self::allow()
        }
    }

    /// Decision for a failed event. Storage failures block; anything else is
    /// allowed with the error as its message.
    pub fn from_error(error: &GovernanceError) -> Self {
        if error.is_fatal() {
            Self::block(format!("Governance unavailable: {error}"))
        } else {
            Self::allow_with(error.to_string())
        }
    }

    pub const fn is_allowed(&self) -> bool {
        matches!(self.decision, Decision::Allow | Decision::Modify)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn both_case_conventions_normalise_equally() {
        let camel = HookEvent::parse(
            r#"{"eventType":"PreToolUse","sessionId":"s1","projectPath":"/p",
                "toolName":"Bash","toolInput":{"command":"ls"},"parentSessionId":"root"}"#,
        )
        .unwrap();
        let snake = HookEvent::parse(
            r#"{"hook_event_name":"pre_tool_use","session_id":"s1","project_path":"/p",
                "tool_name":"Bash","tool_input":{"command":"ls"},"parent_session_id":"root"}"#,
        )
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.event_type, HookEventType::PreToolUse);
    }

    #[test]
    fn unknown_event_types_are_kept() {
        let event = HookEvent::parse(r#"{"eventType":"Notification"}"#).unwrap();
        assert_eq!(
            event.event_type,
            HookEventType::Unknown("Notification".to_string())
        );
        let out = serde_json::to_value(&event).unwrap();
        assert_eq!(out["eventType"], "Notification");
    }

    #[test]
    fn descriptor_requires_tool_name() {
        let mut event = HookEvent::new(HookEventType::PreToolUse);
        assert!(event.action_descriptor(None).is_none());

        event.tool_name = Some("Read".to_string());
        event.session_id = Some("s1".to_string());
        let descriptor = event.action_descriptor(Some(0.01)).unwrap();
        assert_eq!(descriptor.tool_name, "Read");
        assert_eq!(descriptor.request_type, "tool_use");
        assert_eq!(descriptor.estimated_cost_usd, Some(0.01));
    }

    #[test]
    fn decision_shape() {
        let allow = serde_json::to_value(HookDecision::allow()).unwrap();
        assert_eq!(allow, json!({ "decision": "allow" }));

        let pending = serde_json::to_value(HookDecision::pending("q1")).unwrap();
        assert_eq!(pending["decision"], "block");
        assert_eq!(pending["pendingApprovalId"], "q1");
        assert!(pending["message"].as_str().unwrap().contains("q1"));

        let modify = serde_json::to_value(HookDecision::modify(json!({ "x": 1 }))).unwrap();
        assert_eq!(modify["modifiedInput"], json!({ "x": 1 }));
    }

    #[test]
    fn errors_map_to_decisions() {
        let validation = GovernanceError::validation("bad input");
        assert!(HookDecision::from_error(&validation).is_allowed());

        let storage = GovernanceError::Storage(crate::storage::DatabaseError::Corrupt(
            "x".to_string(),
        ));
        let decision = HookDecision::from_error(&storage);
        assert_eq!(decision.decision, Decision::Block);
        assert!(decision.message.is_some());
    }
}
