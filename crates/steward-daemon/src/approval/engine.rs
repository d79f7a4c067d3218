//! Approval policy engine and pending queue.

use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use steward_core::config::{ApprovalConfig, DefaultDecision};
use steward_core::db::unix_timestamp;
use steward_core::policy::{ActionDescriptor, PolicyAction, validate_policy_fields};

use crate::error::{GovernanceError, Result};
use crate::events::EventBus;
use crate::storage::{ApprovalStatus, Database, DatabaseError, DecidedBy, NewPolicy};

use super::types::{
    ApprovalEvent, ApprovalPolicy, ApprovalQueueItem, CompiledPolicy, DecisionOutcome,
    PolicyDecision, PolicyInput, PolicyPatch,
};

/// Evaluates actions against prioritized policies and owns the queue of
/// actions awaiting a human decision.
pub struct ApprovalEngine {
    db: Database,
    events: EventBus<ApprovalEvent>,
    config: ApprovalConfig,
    /// Sorted by priority descending, then creation order.
    policies: RwLock<Vec<CompiledPolicy>>,
}

impl ApprovalEngine {
    /// Create an engine and load the policy set from the store.
    pub async fn open(
        db: Database,
        events: EventBus<ApprovalEvent>,
        config: ApprovalConfig,
    ) -> Result<Self> {
        let mut policies = Vec::new();
        for row in db.list_policies().await? {
            let policy = ApprovalPolicy::try_from(row)?;
            match steward_core::PolicyMatcher::parse(&policy.matcher) {
                Ok(matcher) => policies.push(CompiledPolicy { policy, matcher }),
                Err(e) => {
                    return Err(DatabaseError::Corrupt(format!(
                        "policy {} has an invalid matcher: {e}",
                        policy.id
                    ))
                    .into());
                }
            }
        }
        info!(policies = policies.len(), "Approval policies loaded");

        Ok(Self {
            db,
            events,
            config,
            policies: RwLock::new(policies),
        })
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate an action. The first enabled policy whose matcher and
    /// conditions both match decides; a queue decision creates a pending item.
    pub async fn evaluate(&self, action: &ActionDescriptor) -> Result<PolicyDecision> {
        let matched = {
            let policies = self.policies.read().await;
            policies
                .iter()
                .filter(|p| p.policy.enabled)
                .find(|p| p.matcher.matches(action) && p.policy.conditions.matches(action))
                .map(|p| (p.policy.id.clone(), p.policy.name.clone(), p.policy.action))
        };

        let Some((policy_id, policy_name, policy_action)) = matched else {
            return self.unmatched(action).await;
        };

        debug!(
            session_id = %action.session_id,
            tool_name = %action.tool_name,
            policy_id = %policy_id,
            action = %policy_action,
            "Policy matched"
        );

        match policy_action {
            PolicyAction::AutoApprove => Ok(PolicyDecision::Approved { policy_id }),
            PolicyAction::AutoDeny => Ok(PolicyDecision::Denied {
                reason: format!("Denied by policy '{policy_name}'"),
                policy_id,
            }),
            PolicyAction::Queue => {
                let item = self.enqueue(action, Some(&policy_id)).await?;
                Ok(PolicyDecision::Queued { policy_id, item })
            }
        }
    }

    async fn unmatched(&self, action: &ActionDescriptor) -> Result<PolicyDecision> {
        let default = self.config.default_decision;
        debug!(
            session_id = %action.session_id,
            tool_name = %action.tool_name,
            ?default,
            "No policy matched; applying default decision"
        );
        let item = match default {
            DefaultDecision::Queue => Some(self.enqueue(action, None).await?),
            DefaultDecision::Allow | DefaultDecision::Deny => None,
        };
        Ok(PolicyDecision::Unmatched { default, item })
    }

    async fn enqueue(
        &self,
        action: &ActionDescriptor,
        policy_id: Option<&str>,
    ) -> Result<ApprovalQueueItem> {
        let details = serde_json::to_string(action)
            .map_err(|e| GovernanceError::validation(format!("unserializable action: {e}")))?;
        let id = uuid::Uuid::new_v4().to_string();

        let row = self
            .db
            .insert_approval_item(
                &id,
                &action.session_id,
                &action.request_type,
                &details,
                policy_id,
            )
            .await?;
        let item = ApprovalQueueItem::try_from(row)?;

        info!(
            item_id = %item.id,
            session_id = %item.session_id,
            tool_name = %action.tool_name,
            "Action queued for approval"
        );
        self.events.publish(ApprovalEvent::Queued {
            item_id: item.id.clone(),
            session_id: item.session_id.clone(),
            policy_id: item.policy_id.clone(),
        });
        Ok(item)
    }

    // =========================================================================
    // Queue decisions
    // =========================================================================

    /// Approve a pending item.
    pub async fn approve_item(&self, id: &str, by: DecidedBy) -> Result<DecisionOutcome> {
        self.decide(id, ApprovalStatus::Approved, by).await
    }

    /// Deny a pending item.
    pub async fn deny_item(&self, id: &str, by: DecidedBy) -> Result<DecisionOutcome> {
        self.decide(id, ApprovalStatus::Denied, by).await
    }

    /// Approve several items. Each ID is decided independently.
    pub async fn batch_approve(
        &self,
        ids: &[String],
        by: DecidedBy,
    ) -> Vec<(String, Result<DecisionOutcome>)> {
        self.batch(ids, ApprovalStatus::Approved, by).await
    }

    /// Deny several items. Each ID is decided independently.
    pub async fn batch_deny(
        &self,
        ids: &[String],
        by: DecidedBy,
    ) -> Vec<(String, Result<DecisionOutcome>)> {
        self.batch(ids, ApprovalStatus::Denied, by).await
    }

    async fn batch(
        &self,
        ids: &[String],
        status: ApprovalStatus,
        by: DecidedBy,
    ) -> Vec<(String, Result<DecisionOutcome>)> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.decide(id, status, by).await;
            if let Err(ref e) = result {
                warn!(item_id = %id, error = %e, "Batch decision failed");
            }
            results.push((id.clone(), result));
        }
        results
    }

    async fn decide(
        &self,
        id: &str,
        status: ApprovalStatus,
        by: DecidedBy,
    ) -> Result<DecisionOutcome> {
        let current = self.get_item(id).await?;
        if current.status.is_terminal() {
            warn!(
                item_id = id,
                status = %current.status,
                "Approval item already decided; ignoring"
            );
            return Ok(DecisionOutcome::AlreadyDecided(current));
        }

        // The update only applies while the row is still pending, so a
        // concurrent decision or expiry wins cleanly.
        let changed = self.db.decide_approval_item(id, status, by).await?;
        let item = self.get_item(id).await?;
        if !changed {
            warn!(item_id = id, status = %item.status, "Approval item decided concurrently");
            return Ok(DecisionOutcome::AlreadyDecided(item));
        }

        info!(item_id = id, status = %status, decided_by = by.as_str(), "Approval item decided");
        self.events.publish(ApprovalEvent::Decided {
            item_id: id.to_string(),
            status,
            decided_by: by,
        });
        Ok(DecisionOutcome::Decided(item))
    }

    /// Expire pending items older than `max_age`. Returns the expired IDs.
    pub async fn expire_pending(&self, max_age: Duration) -> Result<Vec<String>> {
        let age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = unix_timestamp().saturating_sub(age);
        let expired = self.db.expire_pending_before(cutoff).await?;

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale approval items");
        }
        for id in &expired {
            self.events.publish(ApprovalEvent::Expired {
                item_id: id.clone(),
            });
        }
        Ok(expired)
    }

    /// Expire pending items older than the configured TTL.
    pub async fn expire_stale(&self) -> Result<Vec<String>> {
        self.expire_pending(Duration::from_secs(self.config.pending_ttl_secs))
            .await
    }

    /// Get a queue item by ID.
    pub async fn get_item(&self, id: &str) -> Result<ApprovalQueueItem> {
        match self.db.get_approval_item(id).await {
            Ok(row) => Ok(ApprovalQueueItem::try_from(row)?),
            Err(DatabaseError::NotFound(_)) => Err(GovernanceError::not_found("Approval item", id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Pending items, oldest first, optionally for one session.
    pub async fn list_pending(&self, session_id: Option<&str>) -> Result<Vec<ApprovalQueueItem>> {
        self.list(Some(ApprovalStatus::Pending), session_id).await
    }

    /// All queue items, optionally filtered by status.
    pub async fn list_items(
        &self,
        status: Option<ApprovalStatus>,
    ) -> Result<Vec<ApprovalQueueItem>> {
        self.list(status, None).await
    }

    async fn list(
        &self,
        status: Option<ApprovalStatus>,
        session_id: Option<&str>,
    ) -> Result<Vec<ApprovalQueueItem>> {
        self.db
            .list_approval_items(status, session_id)
            .await?
            .into_iter()
            .map(|row| ApprovalQueueItem::try_from(row).map_err(Into::into))
            .collect()
    }

    /// Subscribe to queue notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ApprovalEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Policy administration
    // =========================================================================

    /// Create a policy.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn create_policy(&self, input: PolicyInput) -> Result<ApprovalPolicy> {
        let matcher = validate_policy_fields(
            &input.name,
            &input.matcher,
            input.description.as_deref(),
            input.priority,
            &input.conditions,
        )?;
        let conditions = encode_conditions(&input.conditions)?;
        let id = uuid::Uuid::new_v4().to_string();

        let mut policies = self.policies.write().await;
        let row = self
            .db
            .insert_policy(&NewPolicy {
                id: &id,
                name: input.name.trim(),
                description: input.description.as_deref(),
                matcher: input.matcher.trim(),
                action: input.action.as_str(),
                priority: input.priority,
                enabled: input.enabled,
                conditions: conditions.as_deref(),
            })
            .await?;
        let policy = ApprovalPolicy::try_from(row)?;
        policies.push(CompiledPolicy {
            policy: policy.clone(),
            matcher,
        });
        sort_policies(&mut policies);

        info!(
            policy_id = %policy.id,
            name = %policy.name,
            action = %policy.action,
            priority = policy.priority,
            "Policy created"
        );
        Ok(policy)
    }

    /// Apply a partial update to a policy.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn update_policy(&self, id: &str, patch: PolicyPatch) -> Result<ApprovalPolicy> {
        let mut policies = self.policies.write().await;
        let Some(index) = policies.iter().position(|p| p.policy.id == id) else {
            return Err(GovernanceError::not_found("Policy", id));
        };

        let current = &policies[index].policy;
        let name = patch.name.unwrap_or_else(|| current.name.clone());
        let description = patch
            .description
            .unwrap_or_else(|| current.description.clone());
        let matcher_src = patch.matcher.unwrap_or_else(|| current.matcher.clone());
        let action = patch.action.unwrap_or(current.action);
        let priority = patch.priority.unwrap_or(current.priority);
        let enabled = patch.enabled.unwrap_or(current.enabled);
        let conditions = patch
            .conditions
            .unwrap_or_else(|| current.conditions.clone());

        let matcher = validate_policy_fields(
            &name,
            &matcher_src,
            description.as_deref(),
            priority,
            &conditions,
        )?;
        let encoded = encode_conditions(&conditions)?;

        let row = self
            .db
            .update_policy(&NewPolicy {
                id,
                name: name.trim(),
                description: description.as_deref(),
                matcher: matcher_src.trim(),
                action: action.as_str(),
                priority,
                enabled,
                conditions: encoded.as_deref(),
            })
            .await?;
        let policy = ApprovalPolicy::try_from(row)?;
        policies[index] = CompiledPolicy {
            policy: policy.clone(),
            matcher,
        };
        sort_policies(&mut policies);

        info!(policy_id = id, "Policy updated");
        Ok(policy)
    }

    /// Enable or disable a policy. Disabled policies stay listed.
    pub async fn set_policy_enabled(&self, id: &str, enabled: bool) -> Result<ApprovalPolicy> {
        self.update_policy(
            id,
            PolicyPatch {
                enabled: Some(enabled),
                ..PolicyPatch::default()
            },
        )
        .await
    }

    /// Delete a policy.
    pub async fn delete_policy(&self, id: &str) -> Result<()> {
        let mut policies = self.policies.write().await;
        if !self.db.delete_policy(id).await? {
            return Err(GovernanceError::not_found("Policy", id));
        }
        policies.retain(|p| p.policy.id != id);
        drop(policies);

        info!(policy_id = id, "Policy deleted");
        Ok(())
    }

    /// Get a policy by ID.
    pub async fn get_policy(&self, id: &str) -> Option<ApprovalPolicy> {
        self.policies
            .read()
            .await
            .iter()
            .find(|p| p.policy.id == id)
            .map(|p| p.policy.clone())
    }

    /// All policies in evaluation order, including disabled ones.
    pub async fn get_all_policies(&self) -> Vec<ApprovalPolicy> {
        self.policies
            .read()
            .await
            .iter()
            .map(|p| p.policy.clone())
            .collect()
    }
}

fn sort_policies(policies: &mut [CompiledPolicy]) {
    // Stable sort keeps creation order among equal priorities.
    policies.sort_by(|a, b| {
        b.policy
            .priority
            .cmp(&a.policy.priority)
            .then_with(|| a.policy.created_at.cmp(&b.policy.created_at))
    });
}

fn encode_conditions(conditions: &steward_core::PolicyConditions) -> Result<Option<String>> {
    if conditions.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(conditions)
        .map(Some)
        .map_err(|e| GovernanceError::validation(format!("unserializable conditions: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn engine_with(default_decision: DefaultDecision) -> ApprovalEngine {
        let db = Database::open_in_memory().await.unwrap();
        let config = ApprovalConfig {
            default_decision,
            ..ApprovalConfig::default()
        };
        ApprovalEngine::open(db, EventBus::default(), config)
            .await
            .unwrap()
    }

    async fn engine() -> ApprovalEngine {
        engine_with(DefaultDecision::Allow).await
    }

    fn tool(name: &str) -> ActionDescriptor {
        ActionDescriptor::tool_use("s1", name, json!({}))
    }

    #[tokio::test]
    async fn higher_priority_wins() {
        let engine = engine().await;
        engine
            .create_policy(PolicyInput::new("deny bash", "Bash", PolicyAction::AutoDeny, 5))
            .await
            .unwrap();
        engine
            .create_policy(PolicyInput::new("allow all", "*", PolicyAction::AutoApprove, 1))
            .await
            .unwrap();

        assert!(matches!(
            engine.evaluate(&tool("Bash")).await.unwrap(),
            PolicyDecision::Denied { .. }
        ));
        assert!(matches!(
            engine.evaluate(&tool("Read")).await.unwrap(),
            PolicyDecision::Approved { .. }
        ));
    }

    #[tokio::test]
    async fn priority_order_is_independent_of_creation_order() {
        let engine = engine().await;
        engine
            .create_policy(PolicyInput::new("low", "*", PolicyAction::AutoApprove, 10))
            .await
            .unwrap();
        let high = engine
            .create_policy(PolicyInput::new("high", "*", PolicyAction::AutoDeny, 20))
            .await
            .unwrap();

        match engine.evaluate(&tool("Read")).await.unwrap() {
            PolicyDecision::Denied { policy_id, .. } => assert_eq!(policy_id, high.id),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_policies_are_skipped_but_listed() {
        let engine = engine().await;
        let policy = engine
            .create_policy(PolicyInput::new("deny", "*", PolicyAction::AutoDeny, 5))
            .await
            .unwrap();
        engine.set_policy_enabled(&policy.id, false).await.unwrap();

        assert!(matches!(
            engine.evaluate(&tool("Read")).await.unwrap(),
            PolicyDecision::Unmatched { .. }
        ));
        let all = engine.get_all_policies().await;
        assert_eq!(all.len(), 1);
        assert!(!all[0].enabled);
    }

    #[tokio::test]
    async fn conditions_narrow_matches() {
        let engine = engine().await;
        let mut input = PolicyInput::new("no rm", "Bash", PolicyAction::AutoDeny, 5);
        input.conditions.input_contains = Some("rm -rf".to_string());
        engine.create_policy(input).await.unwrap();

        let safe = ActionDescriptor::tool_use("s1", "Bash", json!({ "command": "ls" }));
        let risky = ActionDescriptor::tool_use("s1", "Bash", json!({ "command": "rm -rf /" }));
        assert!(matches!(
            engine.evaluate(&safe).await.unwrap(),
            PolicyDecision::Unmatched { .. }
        ));
        assert!(matches!(
            engine.evaluate(&risky).await.unwrap(),
            PolicyDecision::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn queue_policy_creates_pending_item() {
        let engine = engine().await;
        let mut rx = engine.subscribe();
        engine
            .create_policy(PolicyInput::new("review", "Write", PolicyAction::Queue, 5))
            .await
            .unwrap();

        let PolicyDecision::Queued { item, .. } = engine.evaluate(&tool("Write")).await.unwrap()
        else {
            panic!("expected queued decision");
        };
        assert_eq!(item.status, ApprovalStatus::Pending);
        assert!(item.request_details.contains("\"toolName\":\"Write\""));
        assert!(matches!(rx.try_recv().unwrap(), ApprovalEvent::Queued { .. }));
        assert_eq!(engine.list_pending(Some("s1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn default_queue_enqueues_unmatched_actions() {
        let engine = engine_with(DefaultDecision::Queue).await;
        match engine.evaluate(&tool("Read")).await.unwrap() {
            PolicyDecision::Unmatched {
                default: DefaultDecision::Queue,
                item: Some(item),
            } => assert!(item.policy_id.is_none()),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_decision_is_a_no_op() {
        let engine = engine_with(DefaultDecision::Queue).await;
        let PolicyDecision::Unmatched { item: Some(item), .. } =
            engine.evaluate(&tool("Read")).await.unwrap()
        else {
            panic!("expected queued item");
        };

        let first = engine.approve_item(&item.id, DecidedBy::User).await.unwrap();
        let DecisionOutcome::Decided(decided) = first else {
            panic!("expected a fresh decision");
        };
        assert_eq!(decided.status, ApprovalStatus::Approved);

        let second = engine.deny_item(&item.id, DecidedBy::Policy).await.unwrap();
        let DecisionOutcome::AlreadyDecided(unchanged) = second else {
            panic!("expected already decided");
        };
        assert_eq!(unchanged.status, ApprovalStatus::Approved);
        assert_eq!(unchanged.decided_by, Some(DecidedBy::User));
        assert_eq!(unchanged.decided_at, decided.decided_at);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let engine = engine().await;
        assert!(matches!(
            engine.approve_item("ghost", DecidedBy::User).await,
            Err(GovernanceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let engine = engine_with(DefaultDecision::Queue).await;
        let mut ids = Vec::new();
        for name in ["Read", "Write"] {
            if let PolicyDecision::Unmatched { item: Some(item), .. } =
                engine.evaluate(&tool(name)).await.unwrap()
            {
                ids.push(item.id);
            }
        }
        ids.insert(1, "ghost".to_string());

        let results = engine.batch_deny(&ids, DecidedBy::User).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
        assert!(engine.list_pending(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiry_marks_items_as_system_expired() {
        let engine = engine_with(DefaultDecision::Queue).await;
        engine.evaluate(&tool("Read")).await.unwrap();

        let expired = engine.expire_pending(Duration::ZERO).await.unwrap();
        assert_eq!(expired.len(), 1);
        let item = engine.get_item(&expired[0]).await.unwrap();
        assert_eq!(item.status, ApprovalStatus::Expired);
        assert_eq!(item.decided_by, Some(DecidedBy::System));

        assert!(engine.expire_stale().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_policies_are_rejected() {
        let engine = engine().await;
        for input in [
            PolicyInput::new("", "*", PolicyAction::Queue, 1),
            PolicyInput::new("n", "Bash(", PolicyAction::Queue, 1),
            PolicyInput::new("n", "re:[", PolicyAction::Queue, 1),
            PolicyInput::new("n", "*", PolicyAction::Queue, 1001),
            PolicyInput::new("x".repeat(101), "*", PolicyAction::Queue, 1),
        ] {
            assert!(matches!(
                engine.create_policy(input).await,
                Err(GovernanceError::Validation(_))
            ));
        }
        assert!(engine.get_all_policies().await.is_empty());
    }

    #[tokio::test]
    async fn update_reorders_and_persists() {
        let db = Database::open_in_memory().await.unwrap();
        let engine = ApprovalEngine::open(db.clone(), EventBus::default(), ApprovalConfig::default())
            .await
            .unwrap();
        let a = engine
            .create_policy(PolicyInput::new("a", "*", PolicyAction::AutoApprove, 1))
            .await
            .unwrap();
        engine
            .create_policy(PolicyInput::new("b", "*", PolicyAction::AutoDeny, 5))
            .await
            .unwrap();

        engine
            .update_policy(
                &a.id,
                PolicyPatch {
                    priority: Some(10),
                    description: Some(Some("allow everything".to_string())),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap();

        let reopened = ApprovalEngine::open(db, EventBus::default(), ApprovalConfig::default())
            .await
            .unwrap();
        let all = reopened.get_all_policies().await;
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[0].description.as_deref(), Some("allow everything"));

        reopened.delete_policy(&a.id).await.unwrap();
        assert!(reopened.get_policy(&a.id).await.is_none());
        assert!(reopened.delete_policy(&a.id).await.is_err());
    }
}
