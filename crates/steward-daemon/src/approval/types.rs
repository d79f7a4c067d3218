//! Approval engine types.

use serde::{Deserialize, Serialize};

use steward_core::policy::{PolicyAction, PolicyConditions, PolicyMatcher};

use crate::storage::{ApprovalItemRow, ApprovalStatus, DatabaseError, DecidedBy, PolicyRow};

/// A persisted approval policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPolicy {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub matcher: String,
    pub action: PolicyAction,
    /// Higher values are evaluated first.
    pub priority: i64,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "PolicyConditions::is_empty")]
    pub conditions: PolicyConditions,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<PolicyRow> for ApprovalPolicy {
    type Error = DatabaseError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        let action = row
            .action
            .parse()
            .map_err(|e: steward_core::Error| DatabaseError::Corrupt(e.to_string()))?;
        let conditions = match row.conditions.as_deref() {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| DatabaseError::Corrupt(format!("policy conditions: {e}")))?,
            None => PolicyConditions::default(),
        };
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            matcher: row.matcher,
            action,
            priority: row.priority,
            enabled: row.enabled != 0,
            conditions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A policy paired with its parsed matcher, as held in the evaluation cache.
#[derive(Debug, Clone)]
pub(crate) struct CompiledPolicy {
    pub policy: ApprovalPolicy,
    pub matcher: PolicyMatcher,
}

/// Input for creating a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub matcher: String,
    pub action: PolicyAction,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: PolicyConditions,
}

const fn default_enabled() -> bool {
    true
}

impl PolicyInput {
    /// An enabled policy with no description or conditions.
    pub fn new(
        name: impl Into<String>,
        matcher: impl Into<String>,
        action: PolicyAction,
        priority: i64,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            matcher: matcher.into(),
            action,
            priority,
            enabled: true,
            conditions: PolicyConditions::default(),
        }
    }
}

/// Partial policy update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPatch {
    pub name: Option<String>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub matcher: Option<String>,
    pub action: Option<PolicyAction>,
    pub priority: Option<i64>,
    pub enabled: Option<bool>,
    pub conditions: Option<PolicyConditions>,
}

/// A queued action awaiting (or having received) a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalQueueItem {
    pub id: String,
    pub session_id: String,
    pub request_type: String,
    /// Serialized action descriptor.
    pub request_details: String,
    pub status: ApprovalStatus,
    pub decided_by: Option<DecidedBy>,
    pub policy_id: Option<String>,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}

impl TryFrom<ApprovalItemRow> for ApprovalQueueItem {
    type Error = DatabaseError;

    fn try_from(row: ApprovalItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            request_type: row.request_type,
            request_details: row.request_details,
            status: row.status.parse()?,
            decided_by: row
                .decided_by
                .as_deref()
                .map(str::parse::<DecidedBy>)
                .transpose()?,
            policy_id: row.policy_id,
            created_at: row.created_at,
            decided_at: row.decided_at,
        })
    }
}

/// Outcome of evaluating an action against the policy set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// A policy auto-approved the action.
    Approved { policy_id: String },
    /// A policy auto-denied the action.
    Denied { policy_id: String, reason: String },
    /// A policy queued the action for a human decision.
    Queued {
        policy_id: String,
        item: ApprovalQueueItem,
    },
    /// No enabled policy matched. `item` is set when the configured default
    /// is to queue.
    Unmatched {
        default: steward_core::config::DefaultDecision,
        item: Option<ApprovalQueueItem>,
    },
}

impl PolicyDecision {
    /// Short label used for logging and metrics.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Approved { .. } => "approved",
            Self::Denied { .. } => "denied",
            Self::Queued { .. } => "queued",
            Self::Unmatched { .. } => "unmatched",
        }
    }
}

/// Outcome of an approve/deny call on a queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// The item moved out of `pending`.
    Decided(ApprovalQueueItem),
    /// The item was already terminal; it is returned unchanged.
    AlreadyDecided(ApprovalQueueItem),
}

impl DecisionOutcome {
    pub const fn item(&self) -> &ApprovalQueueItem {
        match self {
            Self::Decided(item) | Self::AlreadyDecided(item) => item,
        }
    }
}

/// Approval engine notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalEvent {
    Queued {
        item_id: String,
        session_id: String,
        policy_id: Option<String>,
    },
    Decided {
        item_id: String,
        status: ApprovalStatus,
        decided_by: DecidedBy,
    },
    Expired {
        item_id: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn row(action: &str, conditions: Option<&str>) -> PolicyRow {
        PolicyRow {
            id: "p1".to_string(),
            name: "p".to_string(),
            description: None,
            matcher: "*".to_string(),
            action: action.to_string(),
            priority: 1,
            enabled: 1,
            conditions: conditions.map(str::to_string),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn policy_from_row() {
        let policy =
            ApprovalPolicy::try_from(row("auto-deny", Some(r#"{"inputContains":"rm"}"#))).unwrap();
        assert_eq!(policy.action, PolicyAction::AutoDeny);
        assert!(policy.enabled);
        assert_eq!(policy.conditions.input_contains.as_deref(), Some("rm"));
    }

    #[test]
    fn corrupt_policy_row_is_rejected() {
        assert!(ApprovalPolicy::try_from(row("sometimes", None)).is_err());
        assert!(ApprovalPolicy::try_from(row("queue", Some("{not json"))).is_err());
    }

    #[test]
    fn policy_input_defaults_when_deserialized() {
        let input: PolicyInput =
            serde_json::from_str(r#"{"name":"n","matcher":"Bash","action":"queue"}"#).unwrap();
        assert!(input.enabled);
        assert_eq!(input.priority, 0);
        assert!(input.conditions.is_empty());
    }
}
