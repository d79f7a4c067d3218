//! Admission control and lifecycle dispatch.
//!
//! The [`Governor`] wires the ledger, approval engine, agent registry and
//! project coordinator together. Tool calls go through [`Governor::admit`]:
//! estimate, budget check, then policy. Everything else is bookkeeping in
//! [`Governor::handle`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use steward_core::Config;
use steward_core::config::DefaultDecision;
use steward_core::cost::{calculate_actual_cost, estimate_cost};

use crate::agents::{AgentRegistry, AgentStatus};
use crate::approval::{ApprovalEngine, PolicyDecision};
use crate::budget::BudgetLedger;
use crate::error::{GovernanceError, Result};
use crate::events::EventBus;
use crate::hooks::{HookDecision, HookEvent, HookEventType};
use crate::projects::ProjectCoordinator;
use crate::storage::Database;

/// Facade over the four governance services.
pub struct Governor {
    config: Config,
    ledger: Arc<BudgetLedger>,
    approvals: Arc<ApprovalEngine>,
    agents: Arc<AgentRegistry>,
    projects: Arc<ProjectCoordinator>,
}

impl Governor {
    /// Build every service on top of one database.
    pub async fn open(db: Database, config: Config) -> Result<Self> {
        let capacity = config.coordinator.notification_capacity;

        let ledger = Arc::new(
            BudgetLedger::open(db.clone(), EventBus::new(capacity), config.budget.clone()).await?,
        );
        let approvals = Arc::new(
            ApprovalEngine::open(db, EventBus::new(capacity), config.approvals.clone()).await?,
        );
        let agents = Arc::new(AgentRegistry::new(
            Arc::clone(&ledger),
            EventBus::new(capacity),
        ));
        let projects = Arc::new(ProjectCoordinator::new(
            EventBus::new(capacity),
            config.coordinator.clone(),
        ));

        Ok(Self {
            config,
            ledger,
            approvals,
            agents,
            projects,
        })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub const fn approvals(&self) -> &Arc<ApprovalEngine> {
        &self.approvals
    }

    pub const fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub const fn projects(&self) -> &Arc<ProjectCoordinator> {
        &self.projects
    }

    /// Decide whether a tool call may proceed.
    pub async fn admit(&self, event: &HookEvent) -> Result<HookDecision> {
        let Some(tool_name) = event.tool_name.as_deref() else {
            debug!(event_type = %event.event_type, "No tool name; nothing to admit");
            return Ok(HookDecision::allow());
        };
        let session_id = non_empty(event.session_id.as_deref());
        let project_path = non_empty(event.project_path.as_deref());
        let input = event.tool_input.clone().unwrap_or(Value::Null);
        let model = event
            .model
            .as_deref()
            .unwrap_or(&self.config.budget.default_model);

        let estimate = estimate_cost(tool_name, &input, model);
        debug!(
            tool_name,
            category = estimate.tool_category.as_str(),
            estimated_cost_usd = estimate.estimated_cost_usd,
            confidence = ?estimate.confidence,
            "Estimated tool cost"
        );

        if let Some(session) = session_id {
            ignore_missing(self.agents.touch(session).await)?;
        }

        let check = self
            .ledger
            .check_budget(project_path, session_id, Some(estimate.estimated_cost_usd))
            .await?;
        if !check.allowed {
            record("budget_blocked");
            let message = check
                .message
                .unwrap_or_else(|| "Budget limit reached".to_string());
            return Ok(HookDecision::block(message));
        }

        let Some(descriptor) = event.action_descriptor(Some(estimate.estimated_cost_usd)) else {
            return Ok(HookDecision::allow());
        };
        let decision = self.approvals.evaluate(&descriptor).await?;
        record(decision.label());

        let outcome = match decision {
            PolicyDecision::Approved { .. } => check
                .message
                .filter(|_| check.warning)
                .map_or_else(HookDecision::allow, HookDecision::allow_with),
            PolicyDecision::Denied { reason, .. } => HookDecision::deny(reason),
            PolicyDecision::Queued { item, .. } => HookDecision::pending(item.id),
            PolicyDecision::Unmatched { default, item } => match (default, item) {
                (_, Some(item)) => HookDecision::pending(item.id),
                (DefaultDecision::Deny, None) => {
                    HookDecision::deny(format!("No approval policy allows {tool_name}"))
                }
                (DefaultDecision::Allow | DefaultDecision::Queue, None) => {
                    if check.unrestricted {
                        debug!(tool_name, "Unrestricted: no budget or policy applies");
                    }
                    check
                        .message
                        .filter(|_| check.warning)
                        .map_or_else(HookDecision::allow, HookDecision::allow_with)
                }
            },
        };

        info!(
            tool_name,
            session_id = session_id.unwrap_or_default(),
            decision = ?outcome.decision,
            "Tool call admission decided"
        );
        Ok(outcome)
    }

    /// Dispatch any lifecycle event. Tool calls are admitted; other events
    /// update bookkeeping and are always allowed.
    pub async fn handle(&self, event: &HookEvent) -> Result<HookDecision> {
        let session_id = non_empty(event.session_id.as_deref());

        match &event.event_type {
            HookEventType::PreToolUse => return self.admit(event).await,
            HookEventType::PostToolUse => self.record_tool_result(event).await?,
            HookEventType::SessionStart => {
                let session = require(session_id, "sessionId")?;
                let name = event.agent_name.as_deref().unwrap_or(session);
                let parent = non_empty(event.parent_session_id.as_deref());
                self.agents
                    .register_agent(session, name, parent, event.project_path.as_deref())
                    .await?;
            }
            HookEventType::SubagentStart => self.start_subagent(event).await?,
            HookEventType::Stop => {
                let session = require(session_id, "sessionId")?;
                ignore_missing(self.agents.set_status(session, AgentStatus::Idle).await)?;
            }
            HookEventType::SubagentStop | HookEventType::SessionEnd => {
                let session = require(session_id, "sessionId")?;
                ignore_missing(self.agents.terminate_agent(session).await)?;
            }
            HookEventType::ProjectRegistered => {
                let project_id = require(event.project_id.as_deref(), "projectId")?;
                let path = require(event.project_path.as_deref(), "projectPath")?;
                let name = event.project_name.as_deref().unwrap_or(project_id);
                self.projects.register_project(project_id, path, name).await?;
            }
            HookEventType::ProjectRemoved => {
                let project_id = require(event.project_id.as_deref(), "projectId")?;
                self.projects.remove_project(project_id).await?;
            }
            HookEventType::ProjectSwitched => {
                let project_id = require(event.project_id.as_deref(), "projectId")?;
                self.projects.switch_project(project_id).await?;
            }
            HookEventType::Unknown(kind) => {
                debug!(event_type = %kind, "Ignoring unknown hook event");
            }
        }
        Ok(HookDecision::allow())
    }

    async fn start_subagent(&self, event: &HookEvent) -> Result<()> {
        let session = require(non_empty(event.session_id.as_deref()), "sessionId")?;
        let parent = non_empty(event.parent_session_id.as_deref());
        let name = event.agent_name.as_deref().unwrap_or(session);
        self.agents
            .register_agent(session, name, parent, event.project_path.as_deref())
            .await?;

        let budget = &self.config.budget;
        if budget.auto_allocate_subagents && parent.is_some() {
            match self
                .agents
                .allocate_budget(session, budget.subagent_allocation_usd, false)
                .await
            {
                Ok(_) => {}
                Err(GovernanceError::Validation(reason)) => {
                    warn!(session_id = session, %reason, "Sub-agent budget not allocated");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn record_tool_result(&self, event: &HookEvent) -> Result<()> {
        let Some(tool_name) = event.tool_name.as_deref() else {
            return Ok(());
        };
        let session_id = non_empty(event.session_id.as_deref());
        let project_path = non_empty(event.project_path.as_deref());
        let model = event
            .model
            .as_deref()
            .unwrap_or(&self.config.budget.default_model);
        let input = event.tool_input.clone().unwrap_or(Value::Null);
        let response = event.tool_response.clone().unwrap_or(Value::Null);

        let actual = calculate_actual_cost(tool_name, &input, &response, model);
        self.ledger
            .record_cost(actual.cost_usd, project_path, session_id)
            .await?;
        if let Some(session) = session_id {
            ignore_missing(self.agents.record_tool_call(session, actual.cost_usd).await)?;
        }

        debug!(
            tool_name,
            cost_usd = actual.cost_usd,
            input_tokens = actual.input_tokens,
            output_tokens = actual.output_tokens,
            "Tool cost recorded"
        );
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn require<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    non_empty(value).ok_or_else(|| GovernanceError::validation(format!("{field} is required")))
}

/// Events for agents this process never saw are not errors.
fn ignore_missing<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(GovernanceError::NotFound { kind, id }) => {
            debug!(kind, id = %id, "Event refers to an untracked entity");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(feature = "metrics")]
fn record(outcome: &'static str) {
    steward_core::metrics::record_admission(outcome);
}

#[cfg(not(feature = "metrics"))]
const fn record(_outcome: &'static str) {}
