//! Agent registry service.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use steward_core::db::unix_timestamp;

use crate::budget::{BudgetLedger, BudgetScope, BudgetSpec};
use crate::error::{GovernanceError, Result};
use crate::events::EventBus;

use super::tree::AgentTree;
use super::types::{
    Agent, AgentEvent, AgentMetrics, AgentStatus, AgentTreeNode, FlatTreeEntry,
};

/// Budget comparisons tolerate this much floating-point noise.
const BUDGET_EPSILON: f64 = 1e-9;

/// Tracks parent/child agent relationships, per-agent activity and
/// delegated budgets.
pub struct AgentRegistry {
    ledger: Arc<BudgetLedger>,
    events: EventBus<AgentEvent>,
    tree: RwLock<AgentTree>,
}

impl AgentRegistry {
    pub fn new(ledger: Arc<BudgetLedger>, events: EventBus<AgentEvent>) -> Self {
        Self {
            ledger,
            events,
            tree: RwLock::new(AgentTree::default()),
        }
    }

    /// Register an agent as active.
    ///
    /// Registering a known session again under the same parent refreshes its
    /// name, project and activity; a different parent is rejected.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn register_agent(
        &self,
        session_id: &str,
        name: &str,
        parent_session_id: Option<&str>,
        project_path: Option<&str>,
    ) -> Result<Agent> {
        if session_id.trim().is_empty() {
            return Err(GovernanceError::validation("session ID must not be empty"));
        }
        if parent_session_id == Some(session_id) {
            return Err(GovernanceError::validation(
                "an agent cannot be its own parent",
            ));
        }

        let now = unix_timestamp();
        let mut tree = self.tree.write().await;

        if let Some(existing) = tree.get_mut(session_id) {
            if existing.parent_session_id.as_deref() != parent_session_id {
                return Err(GovernanceError::validation(format!(
                    "agent {session_id} is already registered under a different parent"
                )));
            }
            if existing.status == AgentStatus::Terminated {
                return Err(GovernanceError::validation(format!(
                    "agent {session_id} has been terminated"
                )));
            }
            if !name.is_empty() {
                existing.name = name.to_string();
            }
            if let Some(path) = project_path {
                existing.project_path = Some(path.to_string());
            }
            existing.last_activity = now;
            debug!(session_id, "Agent re-registered");
            return Ok(existing.clone());
        }

        if let Some(parent_id) = parent_session_id {
            match tree.get(parent_id) {
                None => {
                    return Err(GovernanceError::validation(format!(
                        "parent agent {parent_id} is not registered"
                    )));
                }
                Some(parent) if parent.status == AgentStatus::Terminated => {
                    return Err(GovernanceError::validation(format!(
                        "parent agent {parent_id} has been terminated"
                    )));
                }
                Some(_) => {}
            }
        }

        let display_name = if name.is_empty() { session_id } else { name };
        let agent = Agent {
            session_id: session_id.to_string(),
            name: display_name.to_string(),
            parent_session_id: parent_session_id.map(str::to_string),
            project_path: project_path.map(str::to_string),
            status: AgentStatus::Active,
            started_at: now,
            last_activity: now,
            ended_at: None,
            budget_id: None,
            tool_calls: 0,
            cost_usd: 0.0,
            metadata: HashMap::new(),
        };
        tree.insert(agent.clone());

        info!(
            session_id,
            name = %agent.name,
            parent = ?parent_session_id,
            "Agent registered"
        );
        self.events.publish(AgentEvent::Registered {
            session_id: session_id.to_string(),
            parent_session_id: agent.parent_session_id.clone(),
        });
        Ok(agent)
    }

    /// Remove an agent outright. Its children move up to its parent and its
    /// unspent budget is released.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn unregister_agent(&self, session_id: &str) -> Result<Agent> {
        let mut tree = self.tree.write().await;
        let agent = tree
            .get(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        if agent.status != AgentStatus::Terminated {
            let budget_id = agent.budget_id.clone();
            self.release_budget(session_id, budget_id.as_deref()).await?;
        }
        let removed = tree
            .remove(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        drop(tree);

        info!(session_id, "Agent unregistered");
        self.events.publish(AgentEvent::Unregistered {
            session_id: session_id.to_string(),
        });
        Ok(removed)
    }

    pub async fn get_agent(&self, session_id: &str) -> Option<Agent> {
        self.tree.read().await.get(session_id).cloned()
    }

    /// The root and all of its descendants, depth-first.
    pub async fn get_tree(&self, root: &str) -> Result<Vec<Agent>> {
        let tree = self.tree.read().await;
        if !tree.contains(root) {
            return Err(GovernanceError::not_found("Agent", root));
        }
        Ok(tree
            .preorder(root)
            .into_iter()
            .map(|(agent, _)| agent.clone())
            .collect())
    }

    /// Direct children in registration order.
    pub async fn get_children(&self, session_id: &str) -> Result<Vec<Agent>> {
        let tree = self.tree.read().await;
        if !tree.contains(session_id) {
            return Err(GovernanceError::not_found("Agent", session_id));
        }
        Ok(tree
            .children_of(session_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Active agents, either within one subtree or overall. Idle and
    /// transitioning agents are not running.
    pub async fn get_running_agents(&self, root: Option<&str>) -> Vec<Agent> {
        let tree = self.tree.read().await;
        if let Some(root) = root {
            return tree
                .preorder(root)
                .into_iter()
                .map(|(agent, _)| agent)
                .filter(|a| a.status == AgentStatus::Active)
                .cloned()
                .collect();
        }
        let mut running: Vec<Agent> = tree
            .agents()
            .filter(|a| a.status == AgentStatus::Active)
            .cloned()
            .collect();
        running.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        running
    }

    /// Nested view of a subtree.
    pub async fn get_visualization_tree(&self, root: &str) -> Result<AgentTreeNode> {
        self.tree
            .read()
            .await
            .nested(root)
            .ok_or_else(|| GovernanceError::not_found("Agent", root))
    }

    /// Depth-annotated, depth-first listing of a subtree.
    pub async fn get_flat_tree_list(&self, root: &str) -> Result<Vec<FlatTreeEntry>> {
        let tree = self.tree.read().await;
        if !tree.contains(root) {
            return Err(GovernanceError::not_found("Agent", root));
        }
        Ok(tree.flat_list(root))
    }

    /// Stamp activity without other changes.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        let mut tree = self.tree.write().await;
        let agent = tree
            .get_mut(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        agent.last_activity = unix_timestamp();
        Ok(())
    }

    /// Change a running agent's status. Use [`Self::terminate_agent`] to
    /// terminate.
    pub async fn set_status(&self, session_id: &str, status: AgentStatus) -> Result<Agent> {
        if status == AgentStatus::Terminated {
            return Err(GovernanceError::validation(
                "use terminate_agent to terminate an agent",
            ));
        }

        let mut tree = self.tree.write().await;
        let agent = tree
            .get_mut(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        if agent.status == AgentStatus::Terminated {
            return Err(GovernanceError::validation(format!(
                "agent {session_id} has been terminated"
            )));
        }
        let changed = agent.status != status;
        agent.status = status;
        agent.last_activity = unix_timestamp();
        let agent = agent.clone();
        drop(tree);

        if changed {
            debug!(session_id, %status, "Agent status changed");
            self.events.publish(AgentEvent::StatusChanged {
                session_id: session_id.to_string(),
                status,
            });
        }
        Ok(agent)
    }

    /// Count a tool call and its cost against the agent's metrics.
    pub async fn record_tool_call(&self, session_id: &str, cost_usd: f64) -> Result<()> {
        if !(cost_usd.is_finite() && cost_usd >= 0.0) {
            return Err(GovernanceError::validation(
                "tool call cost must be a non-negative amount",
            ));
        }
        let mut tree = self.tree.write().await;
        let agent = tree
            .get_mut(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        agent.tool_calls += 1;
        agent.cost_usd += cost_usd;
        agent.last_activity = unix_timestamp();
        Ok(())
    }

    /// Attach a metadata value to an agent.
    pub async fn set_metadata(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        let mut tree = self.tree.write().await;
        let agent = tree
            .get_mut(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        agent.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Create or update the agent's session budget.
    ///
    /// When the parent holds a delegated budget, `amount_usd` may not exceed
    /// the parent's available pool: its limit, minus its own spend, minus the
    /// limits of its other children. With `propagate_to_children`, the new
    /// pool is split evenly among the agent's running children, recursively.
    /// Without it, `amount_usd` must still cover the agent's own spend plus
    /// what its children already hold.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn allocate_budget(
        &self,
        session_id: &str,
        amount_usd: f64,
        propagate_to_children: bool,
    ) -> Result<Agent> {
        if !(amount_usd.is_finite() && amount_usd >= 0.0) {
            return Err(GovernanceError::validation(
                "allocation must be a non-negative amount",
            ));
        }

        let mut tree = self.tree.write().await;
        let agent = tree
            .get(session_id)
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))?;
        if agent.status == AgentStatus::Terminated {
            return Err(GovernanceError::validation(format!(
                "agent {session_id} has been terminated"
            )));
        }
        let parent_id = agent.parent_session_id.clone();
        let budget_id = agent.budget_id.clone();

        if !propagate_to_children {
            let spent = match &budget_id {
                Some(id) => self.ledger.get_budget(id).await.map_or(0.0, |b| b.spent_usd),
                None => 0.0,
            };
            let required = spent + self.delegated_to_children(&tree, session_id, None).await;
            if amount_usd + BUDGET_EPSILON < required {
                warn!(
                    session_id,
                    amount_usd,
                    required_usd = required,
                    "Allocation below spend and children's budgets"
                );
                return Err(GovernanceError::validation(format!(
                    "allocation of ${amount_usd:.2} is below the ${required:.2} already spent or delegated to children"
                )));
            }
        }

        if let Some(parent_id) = parent_id
            && let Some(available) = self.available_pool(&tree, &parent_id, Some(session_id)).await
            && amount_usd > available + BUDGET_EPSILON
        {
            warn!(
                session_id,
                parent = %parent_id,
                amount_usd,
                available_usd = available,
                "Allocation exceeds parent's available budget"
            );
            return Err(GovernanceError::validation(format!(
                "allocation of ${amount_usd:.2} exceeds parent's available budget of ${available:.2}"
            )));
        }

        let mut pending = vec![(session_id.to_string(), amount_usd)];
        while let Some((id, amount)) = pending.pop() {
            let budget_id = self.assign_budget(&mut tree, &id, amount).await?;

            if propagate_to_children {
                let children: Vec<String> = tree
                    .children_of(&id)
                    .into_iter()
                    .filter(|c| c.status.is_running())
                    .map(|c| c.session_id.clone())
                    .collect();
                if !children.is_empty() {
                    let spent = self
                        .ledger
                        .get_budget(&budget_id)
                        .await
                        .map_or(0.0, |b| b.spent_usd);
                    let share = ((amount - spent).max(0.0)) / children.len() as f64;
                    pending.extend(children.into_iter().map(|child| (child, share)));
                }
            }
        }

        tree.get(session_id)
            .cloned()
            .ok_or_else(|| GovernanceError::not_found("Agent", session_id))
    }

    /// Available pool of `parent_id`'s delegated budget, ignoring
    /// `exclude_child`. `None` when the parent holds no budget.
    async fn available_pool(
        &self,
        tree: &AgentTree,
        parent_id: &str,
        exclude_child: Option<&str>,
    ) -> Option<f64> {
        let parent_budget_id = tree.get(parent_id)?.budget_id.clone()?;
        let parent_budget = self.ledger.get_budget(&parent_budget_id).await?;
        let committed = self.delegated_to_children(tree, parent_id, exclude_child).await;
        Some(parent_budget.limit_usd - parent_budget.spent_usd - committed)
    }

    /// Sum of the budget limits held by `parent_id`'s children, ignoring
    /// `exclude_child`. Terminated children were frozen at their spend, so
    /// only what they actually used stays committed.
    async fn delegated_to_children(
        &self,
        tree: &AgentTree,
        parent_id: &str,
        exclude_child: Option<&str>,
    ) -> f64 {
        let mut committed = 0.0;
        for child in tree.children_of(parent_id) {
            if Some(child.session_id.as_str()) == exclude_child {
                continue;
            }
            if let Some(id) = &child.budget_id
                && let Some(budget) = self.ledger.get_budget(id).await
            {
                committed += budget.limit_usd;
            }
        }
        committed
    }

    async fn assign_budget(&self, tree: &mut AgentTree, session_id: &str, amount: f64) -> Result<String> {
        let budget = self
            .ledger
            .set_budget(BudgetSpec::new(BudgetScope::session(session_id), amount))
            .await?;
        if let Some(agent) = tree.get_mut(session_id) {
            agent.budget_id = Some(budget.id.clone());
        }

        info!(session_id, budget_id = %budget.id, amount_usd = amount, "Budget allocated to agent");
        self.events.publish(AgentEvent::BudgetAllocated {
            session_id: session_id.to_string(),
            budget_id: budget.id.clone(),
            amount_usd: amount,
        });
        Ok(budget.id)
    }

    /// Terminate an agent and every running descendant, deepest first.
    /// Each terminated agent's unspent budget is released back to its
    /// parent's pool. Returns the terminated session IDs in order.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn terminate_agent(&self, session_id: &str) -> Result<Vec<String>> {
        let mut tree = self.tree.write().await;
        if !tree.contains(session_id) {
            return Err(GovernanceError::not_found("Agent", session_id));
        }

        let now = unix_timestamp();
        let mut terminated = Vec::new();
        for id in tree.deepest_first(session_id) {
            let Some(agent) = tree.get_mut(&id) else {
                continue;
            };
            if agent.status == AgentStatus::Terminated {
                continue;
            }
            agent.status = AgentStatus::Terminated;
            agent.ended_at = Some(now);
            agent.last_activity = now;
            let budget_id = agent.budget_id.clone();

            self.release_budget(&id, budget_id.as_deref()).await?;
            terminated.push(id);
        }

        if terminated.is_empty() {
            debug!(session_id, "Agent subtree already terminated");
        } else {
            info!(session_id, count = terminated.len(), "Agent subtree terminated");
            self.events.publish(AgentEvent::Terminated {
                session_ids: terminated.clone(),
            });
        }
        Ok(terminated)
    }

    /// Freeze an agent's budget at its spend and drop its cost history.
    async fn release_budget(&self, session_id: &str, budget_id: Option<&str>) -> Result<()> {
        if let Some(budget_id) = budget_id {
            match self.ledger.release_unspent(budget_id).await {
                Ok(_) => {}
                Err(GovernanceError::NotFound { .. }) => {
                    warn!(session_id, budget_id, "Agent budget no longer exists");
                }
                Err(e) => return Err(e),
            }
        }
        self.ledger.clear_history(session_id).await;
        Ok(())
    }

    /// Metrics across every session registered under `agent_name`.
    pub async fn get_agent_metrics(&self, agent_name: &str) -> AgentMetrics {
        let now = unix_timestamp();
        let tree = self.tree.read().await;
        let mut metrics = AgentMetrics {
            agent_name: agent_name.to_string(),
            ..AgentMetrics::default()
        };
        for agent in tree.agents().filter(|a| a.name == agent_name) {
            accumulate(&mut metrics, agent, now);
        }
        metrics
    }

    /// Metrics for every agent name, sorted by name.
    pub async fn get_all_metrics(&self) -> Vec<AgentMetrics> {
        let now = unix_timestamp();
        let tree = self.tree.read().await;
        let mut by_name: BTreeMap<&str, AgentMetrics> = BTreeMap::new();
        for agent in tree.agents() {
            let metrics = by_name
                .entry(agent.name.as_str())
                .or_insert_with(|| AgentMetrics {
                    agent_name: agent.name.clone(),
                    ..AgentMetrics::default()
                });
            accumulate(metrics, agent, now);
        }
        by_name.into_values().collect()
    }

    /// Subscribe to registry notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }
}

fn accumulate(metrics: &mut AgentMetrics, agent: &Agent, now: i64) {
    metrics.sessions += 1;
    if agent.status.is_running() {
        metrics.active_sessions += 1;
    }
    metrics.total_duration_secs += agent.duration_secs(now);
    metrics.total_cost_usd += agent.cost_usd;
    metrics.tool_calls += agent.tool_calls;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use steward_core::config::BudgetConfig;

    use super::*;
    use crate::storage::Database;

    async fn registry() -> AgentRegistry {
        let db = Database::open_in_memory().await.unwrap();
        let ledger = BudgetLedger::open(db, EventBus::default(), BudgetConfig::default())
            .await
            .unwrap();
        AgentRegistry::new(Arc::new(ledger), EventBus::default())
    }

    async fn limit_of(registry: &AgentRegistry, session_id: &str) -> f64 {
        let agent = registry.get_agent(session_id).await.unwrap();
        registry
            .ledger
            .get_budget(agent.budget_id.as_deref().unwrap())
            .await
            .unwrap()
            .limit_usd
    }

    async fn family(registry: &AgentRegistry) {
        registry.register_agent("root", "lead", None, Some("/p")).await.unwrap();
        registry.register_agent("a", "worker", Some("root"), None).await.unwrap();
        registry.register_agent("b", "worker", Some("root"), None).await.unwrap();
        registry.register_agent("a1", "helper", Some("a"), None).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_parent_is_rejected() {
        let registry = registry().await;
        assert!(matches!(
            registry.register_agent("c", "c", Some("ghost"), None).await,
            Err(GovernanceError::Validation(_))
        ));
        assert!(registry.get_agent("c").await.is_none());
    }

    #[tokio::test]
    async fn re_registration_is_idempotent() {
        let registry = registry().await;
        registry.register_agent("root", "lead", None, None).await.unwrap();
        registry.register_agent("a", "worker", Some("root"), None).await.unwrap();
        let again = registry
            .register_agent("a", "renamed", Some("root"), None)
            .await
            .unwrap();
        assert_eq!(again.name, "renamed");
        assert_eq!(registry.get_children("root").await.unwrap().len(), 1);

        registry.register_agent("other", "x", None, None).await.unwrap();
        assert!(
            registry
                .register_agent("a", "worker", Some("other"), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn tree_views() {
        let registry = registry().await;
        family(&registry).await;

        let ids: Vec<String> = registry
            .get_tree("root")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.session_id)
            .collect();
        assert_eq!(ids, ["root", "a", "a1", "b"]);

        let flat = registry.get_flat_tree_list("a").await.unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[1].depth, 1);

        let nested = registry.get_visualization_tree("root").await.unwrap();
        assert_eq!(nested.children.len(), 2);
        assert!(registry.get_tree("ghost").await.is_err());
    }

    #[tokio::test]
    async fn termination_cascades() {
        let registry = registry().await;
        family(&registry).await;

        let terminated = registry.terminate_agent("a").await.unwrap();
        assert_eq!(terminated, ["a1", "a"]);
        assert_eq!(
            registry.get_agent("a1").await.unwrap().status,
            AgentStatus::Terminated
        );

        assert!(registry.terminate_agent("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn running_agents_are_only_active_ones() {
        let registry = registry().await;
        family(&registry).await;
        registry.terminate_agent("a").await.unwrap();
        registry.register_agent("c", "worker", Some("root"), None).await.unwrap();
        registry.set_status("c", AgentStatus::Idle).await.unwrap();
        registry
            .set_status("b", AgentStatus::Transitioning)
            .await
            .unwrap();
        registry.register_agent("solo", "solo", None, None).await.unwrap();

        let in_tree: Vec<String> = registry
            .get_running_agents(Some("root"))
            .await
            .into_iter()
            .map(|a| a.session_id)
            .collect();
        assert_eq!(in_tree, ["root"]);

        let overall = registry.get_running_agents(None).await;
        assert!(overall.iter().all(|a| a.status == AgentStatus::Active));
        let mut ids: Vec<&str> = overall.iter().map(|a| a.session_id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["root", "solo"]);
    }

    #[tokio::test]
    async fn child_allocation_limited_by_parent_pool() {
        let registry = registry().await;
        family(&registry).await;

        registry.allocate_budget("root", 10.0, false).await.unwrap();
        registry.allocate_budget("a", 6.0, false).await.unwrap();
        assert!(matches!(
            registry.allocate_budget("b", 4.5, false).await,
            Err(GovernanceError::Validation(_))
        ));
        registry.allocate_budget("b", 4.0, false).await.unwrap();
        // Re-allocating a child ignores its own current limit.
        registry.allocate_budget("a", 5.0, false).await.unwrap();
    }

    #[tokio::test]
    async fn allocation_cannot_drop_below_children_holdings() {
        let registry = registry().await;
        family(&registry).await;

        registry.allocate_budget("root", 10.0, false).await.unwrap();
        registry.allocate_budget("a", 6.0, false).await.unwrap();
        registry.allocate_budget("b", 4.0, false).await.unwrap();
        assert!(matches!(
            registry.allocate_budget("root", 2.0, false).await,
            Err(GovernanceError::Validation(_))
        ));
        assert!((limit_of(&registry, "root").await - 10.0).abs() < 1e-9);

        registry
            .ledger
            .record_cost(1.0, None, Some("a"))
            .await
            .unwrap();
        registry.allocate_budget("a1", 3.0, false).await.unwrap();
        // 1 spent by a plus 3 held by a1.
        assert!(registry.allocate_budget("a", 3.5, false).await.is_err());
        registry.allocate_budget("a", 4.0, false).await.unwrap();

        // Propagation re-splits the children instead.
        registry.allocate_budget("root", 2.0, true).await.unwrap();
        assert!((limit_of(&registry, "b").await - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn propagation_splits_evenly() {
        let registry = registry().await;
        family(&registry).await;

        registry.allocate_budget("root", 8.0, true).await.unwrap();

        for id in ["a", "b", "a1"] {
            assert!((limit_of(&registry, id).await - 4.0).abs() < 1e-9, "{id}");
        }
    }

    #[tokio::test]
    async fn termination_returns_unspent_budget_to_parent() {
        let registry = registry().await;
        family(&registry).await;

        registry.allocate_budget("root", 10.0, false).await.unwrap();
        registry.allocate_budget("a", 6.0, false).await.unwrap();
        registry
            .ledger
            .record_cost(1.0, None, Some("a"))
            .await
            .unwrap();

        assert!(registry.allocate_budget("b", 8.0, false).await.is_err());
        registry.terminate_agent("a").await.unwrap();
        // 10 - 1 spent by the terminated child.
        registry.allocate_budget("b", 9.0, false).await.unwrap();
    }

    #[tokio::test]
    async fn unregister_reparents() {
        let registry = registry().await;
        family(&registry).await;

        registry.unregister_agent("a").await.unwrap();
        let a1 = registry.get_agent("a1").await.unwrap();
        assert_eq!(a1.parent_session_id.as_deref(), Some("root"));
        assert!(registry.unregister_agent("a").await.is_err());
    }

    #[tokio::test]
    async fn unregister_releases_budget_and_history() {
        let registry = registry().await;
        family(&registry).await;
        registry.allocate_budget("root", 10.0, false).await.unwrap();
        registry.allocate_budget("b", 4.0, false).await.unwrap();
        let budget_id = registry.get_agent("b").await.unwrap().budget_id.unwrap();
        registry
            .ledger
            .record_cost(1.5, None, Some("b"))
            .await
            .unwrap();
        assert!(registry.ledger.project_session_cost("b", 10.0).await > 0.0);

        registry.unregister_agent("b").await.unwrap();

        let budget = registry.ledger.get_budget(&budget_id).await.unwrap();
        assert!((budget.limit_usd - 1.5).abs() < 1e-9);
        assert!(registry.ledger.project_session_cost("b", 10.0).await.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn termination_clears_cost_history() {
        let registry = registry().await;
        family(&registry).await;
        registry
            .ledger
            .record_cost(0.5, None, Some("a1"))
            .await
            .unwrap();
        assert!(registry.ledger.project_session_cost("a1", 1.0).await > 0.0);

        registry.terminate_agent("a").await.unwrap();
        assert!(registry.ledger.project_session_cost("a1", 1.0).await.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn metrics_aggregate_by_name() {
        let registry = registry().await;
        family(&registry).await;

        registry.record_tool_call("a", 0.25).await.unwrap();
        registry.record_tool_call("b", 0.5).await.unwrap();
        registry.record_tool_call("b", 0.25).await.unwrap();
        registry.terminate_agent("b").await.unwrap();

        let worker = registry.get_agent_metrics("worker").await;
        assert_eq!(worker.sessions, 2);
        assert_eq!(worker.active_sessions, 1);
        assert_eq!(worker.tool_calls, 3);
        assert!((worker.total_cost_usd - 1.0).abs() < 1e-9);

        let names: Vec<String> = registry
            .get_all_metrics()
            .await
            .into_iter()
            .map(|m| m.agent_name)
            .collect();
        assert_eq!(names, ["helper", "lead", "worker"]);
    }

    #[tokio::test]
    async fn status_changes() {
        let registry = registry().await;
        registry.register_agent("s", "solo", None, None).await.unwrap();
        let agent = registry.set_status("s", AgentStatus::Idle).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(registry.set_status("s", AgentStatus::Terminated).await.is_err());
        registry.touch("s").await.unwrap();
        assert!(registry.touch("ghost").await.is_err());
    }
}
