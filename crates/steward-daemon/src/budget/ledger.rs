//! Budget ledger service.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use steward_core::config::BudgetConfig;
use steward_core::db::unix_timestamp;

use crate::error::{GovernanceError, Result};
use crate::events::EventBus;
use crate::storage::{Database, NewBudget};

use super::types::{Budget, BudgetCheck, BudgetEvent, BudgetScope, BudgetSpec};

#[derive(Default)]
struct LedgerState {
    /// Budgets keyed by ID.
    budgets: HashMap<String, Budget>,
    /// Scope -> budget ID.
    by_scope: HashMap<BudgetScope, String>,
    /// Rolling per-session cost samples used for projection.
    history: HashMap<String, VecDeque<f64>>,
}

impl LedgerState {
    fn insert(&mut self, budget: Budget) {
        self.by_scope.insert(budget.scope.clone(), budget.id.clone());
        self.budgets.insert(budget.id.clone(), budget);
    }

    /// Resolve by specificity: session > project > global.
    fn resolve(&self, project_path: Option<&str>, session_id: Option<&str>) -> Option<&Budget> {
        let mut candidates = Vec::with_capacity(4);
        if let Some(session) = session_id {
            if let Some(project) = project_path {
                candidates.push(BudgetScope {
                    project_path: Some(project.to_string()),
                    session_id: Some(session.to_string()),
                });
            }
            candidates.push(BudgetScope::session(session));
        }
        if let Some(project) = project_path {
            candidates.push(BudgetScope::project(project));
        }
        candidates.push(BudgetScope::global());

        candidates
            .iter()
            .find_map(|scope| self.by_scope.get(scope))
            .and_then(|id| self.budgets.get(id))
    }
}

/// Per-scope spend limits with write-through persistence.
///
/// Reads (`check_budget`) are served from memory; every mutation is written
/// to the store while the state lock is held.
pub struct BudgetLedger {
    db: Database,
    events: EventBus<BudgetEvent>,
    config: BudgetConfig,
    state: RwLock<LedgerState>,
}

impl BudgetLedger {
    /// Create a ledger and load existing budgets from the store.
    pub async fn open(
        db: Database,
        events: EventBus<BudgetEvent>,
        config: BudgetConfig,
    ) -> Result<Self> {
        let mut state = LedgerState::default();
        for row in db.list_budgets().await? {
            state.insert(Budget::try_from(row)?);
        }
        info!(budgets = state.budgets.len(), "Budget ledger loaded");

        Ok(Self {
            db,
            events,
            config,
            state: RwLock::new(state),
        })
    }

    /// Create the budget for a scope, or update the existing one in place.
    /// Spend is preserved on update.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn set_budget(&self, spec: BudgetSpec) -> Result<Budget> {
        validate_spec(&spec)?;

        let mut state = self.state.write().await;
        let existing = state.by_scope.get(&spec.scope).cloned();

        let row = if let Some(id) = existing {
            self.db
                .update_budget_settings(
                    &id,
                    spec.limit_usd,
                    spec.warning_threshold,
                    spec.hard_stop_enabled,
                    spec.reset_period,
                )
                .await?
        } else {
            let id = uuid::Uuid::new_v4().to_string();
            self.db
                .insert_budget(&NewBudget {
                    id: &id,
                    project_path: spec.scope.project_path.as_deref(),
                    session_id: spec.scope.session_id.as_deref(),
                    limit_usd: spec.limit_usd,
                    warning_threshold: spec.warning_threshold,
                    hard_stop_enabled: spec.hard_stop_enabled,
                    reset_period: spec.reset_period,
                })
                .await?
        };

        let budget = Budget::try_from(row)?;
        state.insert(budget.clone());

        info!(
            budget_id = %budget.id,
            level = ?budget.scope.level(),
            limit_usd = budget.limit_usd,
            "Budget set"
        );
        Ok(budget)
    }

    /// Get a budget by ID.
    pub async fn get_budget(&self, id: &str) -> Option<Budget> {
        self.state.read().await.budgets.get(id).cloned()
    }

    /// Get the budget for an exact scope.
    pub async fn budget_for_scope(&self, scope: &BudgetScope) -> Option<Budget> {
        let state = self.state.read().await;
        state
            .by_scope
            .get(scope)
            .and_then(|id| state.budgets.get(id))
            .cloned()
    }

    /// List all budgets, oldest first.
    pub async fn list_budgets(&self) -> Vec<Budget> {
        let mut budgets: Vec<Budget> = self.state.read().await.budgets.values().cloned().collect();
        budgets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        budgets
    }

    /// Delete a budget.
    pub async fn delete_budget(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.budgets.contains_key(id) {
            return Err(GovernanceError::not_found("Budget", id));
        }
        self.db.delete_budget(id).await?;
        if let Some(budget) = state.budgets.remove(id) {
            state.by_scope.remove(&budget.scope);
        }
        drop(state);

        info!(budget_id = id, "Budget deleted");
        Ok(())
    }

    /// Check whether an action costing `estimated_cost_usd` may proceed.
    ///
    /// With a hard stop, the check blocks when `spent + estimate > limit`;
    /// reaching the limit exactly is allowed. Without an estimate it blocks
    /// once spend has reached the limit.
    pub async fn check_budget(
        &self,
        project_path: Option<&str>,
        session_id: Option<&str>,
        estimated_cost_usd: Option<f64>,
    ) -> Result<BudgetCheck> {
        if let Some(cost) = estimated_cost_usd {
            validate_amount("estimated cost", cost)?;
        }

        let state = self.state.read().await;
        let Some(budget) = state.resolve(project_path, session_id) else {
            debug!(?project_path, ?session_id, "No budget applies; unrestricted");
            return Ok(BudgetCheck::unrestricted());
        };

        let check = evaluate(budget, estimated_cost_usd);
        drop(state);

        if !check.allowed {
            warn!(
                budget_id = ?check.budget_id,
                ?session_id,
                message = check.message.as_deref().unwrap_or_default(),
                "Budget check blocked action"
            );
        }
        Ok(check)
    }

    /// Record spend against the resolved budget and the session's cost
    /// history. Returns the updated budget, if one applies.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn record_cost(
        &self,
        cost_usd: f64,
        project_path: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<Option<Budget>> {
        validate_amount("cost", cost_usd)?;

        let mut state = self.state.write().await;

        if let Some(session) = session_id {
            let history = state.history.entry(session.to_string()).or_default();
            history.push_back(cost_usd);
            while history.len() > self.config.history_limit.max(1) {
                history.pop_front();
            }
        }

        let Some(budget_id) = state.resolve(project_path, session_id).map(|b| b.id.clone()) else {
            return Ok(None);
        };
        let spent_before = state.budgets.get(&budget_id).map_or(0.0, |b| b.spent_usd);

        let row = self.db.add_budget_spend(&budget_id, cost_usd).await?;
        let budget = Budget::try_from(row)?;
        state.insert(budget.clone());
        drop(state);

        debug!(budget_id = %budget.id, cost_usd, spent_usd = budget.spent_usd, "Cost recorded");
        self.publish_alerts(&budget, spent_before);
        Ok(Some(budget))
    }

    /// Publish an alert when this record crossed the warning threshold or
    /// the limit. Each crossing is reported once.
    fn publish_alerts(&self, budget: &Budget, spent_before: f64) {
        let before = budget.usage_ratio(spent_before);
        let after = budget.usage_ratio(budget.spent_usd);

        if before < 1.0 && after >= 1.0 {
            warn!(budget_id = %budget.id, spent_usd = budget.spent_usd, "Budget limit reached");
            self.events.publish(BudgetEvent::LimitReached {
                budget_id: budget.id.clone(),
                spent_usd: budget.spent_usd,
                limit_usd: budget.limit_usd,
            });
        } else if before < budget.warning_threshold && after >= budget.warning_threshold {
            info!(budget_id = %budget.id, percent = after * 100.0, "Budget warning threshold crossed");
            self.events.publish(BudgetEvent::Warning {
                budget_id: budget.id.clone(),
                spent_usd: budget.spent_usd,
                limit_usd: budget.limit_usd,
                percent: after * 100.0,
            });
        }
    }

    /// Linear projection of a session's remaining cost: average recorded
    /// cost per operation x assumed operations per minute x minutes left.
    pub async fn project_session_cost(&self, session_id: &str, remaining_minutes: f64) -> f64 {
        let state = self.state.read().await;
        let Some(history) = state.history.get(session_id).filter(|h| !h.is_empty()) else {
            return 0.0;
        };
        let average = history.iter().sum::<f64>() / history.len() as f64;
        average * self.config.ops_per_minute * remaining_minutes.max(0.0)
    }

    /// Forget a session's cost samples once it can no longer spend.
    pub async fn clear_history(&self, session_id: &str) {
        if self.state.write().await.history.remove(session_id).is_some() {
            debug!(session_id, "Session cost history cleared");
        }
    }

    /// Zero a budget's spend.
    pub async fn reset_budget(&self, id: &str) -> Result<Budget> {
        self.reset_at(id, unix_timestamp()).await
    }

    #[allow(clippy::significant_drop_tightening)]
    async fn reset_at(&self, id: &str, at: i64) -> Result<Budget> {
        let mut state = self.state.write().await;
        if !state.budgets.contains_key(id) {
            return Err(GovernanceError::not_found("Budget", id));
        }
        let budget = Budget::try_from(self.db.reset_budget_spend(id, at).await?)?;
        state.insert(budget.clone());
        drop(state);

        info!(budget_id = id, "Budget reset");
        self.events.publish(BudgetEvent::Reset {
            budget_id: id.to_string(),
        });
        Ok(budget)
    }

    /// Reset every budget whose period has elapsed at `now` (unix seconds).
    /// Returns the IDs that were reset.
    pub async fn reset_due_budgets(&self, now: i64) -> Result<Vec<String>> {
        let due: Vec<String> = self
            .state
            .read()
            .await
            .budgets
            .values()
            .filter(|b| b.reset_due(now))
            .map(|b| b.id.clone())
            .collect();

        for id in &due {
            self.reset_at(id, now).await?;
        }
        Ok(due)
    }

    /// Freeze a budget at its current spend, releasing whatever was unspent.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn release_unspent(&self, id: &str) -> Result<Budget> {
        let mut state = self.state.write().await;
        let Some(current) = state.budgets.get(id) else {
            return Err(GovernanceError::not_found("Budget", id));
        };
        let released = current.remaining_usd();
        let spent = current.spent_usd;
        if released <= 0.0 {
            return Ok(current.clone());
        }

        let budget = Budget::try_from(self.db.set_budget_limit(id, spent).await?)?;
        state.insert(budget.clone());
        drop(state);

        info!(budget_id = id, released_usd = released, "Unspent budget released");
        self.events.publish(BudgetEvent::Released {
            budget_id: id.to_string(),
            released_usd: released,
        });
        Ok(budget)
    }

    /// Subscribe to ledger notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BudgetEvent> {
        self.events.subscribe()
    }
}

fn evaluate(budget: &Budget, estimated_cost_usd: Option<f64>) -> BudgetCheck {
    let cost = estimated_cost_usd.unwrap_or(0.0);
    let projected = budget.spent_usd + cost;

    let block_reason = if !budget.hard_stop_enabled {
        None
    } else if estimated_cost_usd.is_none() && budget.spent_usd >= budget.limit_usd {
        Some(format!(
            "Budget limit of ${:.2} reached (spent ${:.2})",
            budget.limit_usd, budget.spent_usd
        ))
    } else if projected > budget.limit_usd {
        Some(format!(
            "Operation would exceed budget limit of ${:.2} (spent ${:.2}, estimated ${:.2})",
            budget.limit_usd, budget.spent_usd, cost
        ))
    } else {
        None
    };

    let base = BudgetCheck {
        allowed: true,
        unrestricted: false,
        budget_id: Some(budget.id.clone()),
        scope_level: Some(budget.scope.level()),
        remaining_usd: Some(budget.remaining_usd()),
        message: None,
        warning: false,
    };

    if let Some(reason) = block_reason {
        return BudgetCheck {
            allowed: false,
            message: Some(reason),
            ..base
        };
    }

    let ratio = budget.usage_ratio(projected);
    if ratio > 1.0 {
        return BudgetCheck {
            message: Some(format!(
                "Budget limit of ${:.2} exceeded (soft limit, spent ${:.2})",
                budget.limit_usd, budget.spent_usd
            )),
            warning: true,
            ..base
        };
    }
    if ratio >= budget.warning_threshold {
        return BudgetCheck {
            message: Some(format!(
                "Budget usage at {:.0}% of ${:.2} limit (warning threshold {:.0}%)",
                ratio * 100.0,
                budget.limit_usd,
                budget.warning_threshold * 100.0
            )),
            warning: true,
            ..base
        };
    }
    base
}

fn validate_amount(what: &str, amount: f64) -> Result<()> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(())
    } else {
        Err(GovernanceError::validation(format!(
            "{what} must be a non-negative amount, got {amount}"
        )))
    }
}

fn validate_spec(spec: &BudgetSpec) -> Result<()> {
    validate_amount("limit", spec.limit_usd)?;
    if !(0.0..=1.0).contains(&spec.warning_threshold) {
        return Err(GovernanceError::validation(
            "warning threshold must be between 0 and 1",
        ));
    }
    let blank = |v: &Option<String>| v.as_ref().is_some_and(|s| s.trim().is_empty());
    if blank(&spec.scope.project_path) || blank(&spec.scope.session_id) {
        return Err(GovernanceError::validation(
            "budget scope fields must not be empty strings",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn ledger() -> BudgetLedger {
        let db = Database::open_in_memory().await.unwrap();
        BudgetLedger::open(db, EventBus::default(), BudgetConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_budget_is_unrestricted() {
        let ledger = ledger().await;
        let check = ledger
            .check_budget(Some("/p"), Some("s1"), Some(1_000.0))
            .await
            .unwrap();
        assert!(check.allowed);
        assert!(check.unrestricted);
        assert!(check.remaining_usd.is_none());
    }

    #[tokio::test]
    async fn exceeding_limit_blocks_with_message() {
        let ledger = ledger().await;
        let budget = ledger
            .set_budget(BudgetSpec::new(BudgetScope::global(), 10.0))
            .await
            .unwrap();
        ledger.record_cost(9.5, None, None).await.unwrap();

        let check = ledger.check_budget(None, None, Some(0.6)).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.budget_id.as_deref(), Some(budget.id.as_str()));
        assert!(
            check
                .message
                .unwrap()
                .contains("exceed budget limit of $10.00")
        );

        let check = ledger.check_budget(None, None, Some(0.4)).await.unwrap();
        assert!(check.allowed);
        assert!(check.warning);
        assert!(check.message.unwrap().contains("99%"));
    }

    #[tokio::test]
    async fn reaching_limit_exactly_is_allowed() {
        let ledger = ledger().await;
        ledger
            .set_budget(BudgetSpec::new(BudgetScope::global(), 10.0))
            .await
            .unwrap();
        ledger.record_cost(9.5, None, None).await.unwrap();

        let check = ledger.check_budget(None, None, Some(0.5)).await.unwrap();
        assert!(check.allowed);
    }

    #[tokio::test]
    async fn spent_limit_blocks_without_estimate() {
        let ledger = ledger().await;
        ledger
            .set_budget(BudgetSpec::new(BudgetScope::global(), 1.0))
            .await
            .unwrap();
        ledger.record_cost(1.0, None, None).await.unwrap();

        let check = ledger.check_budget(None, None, None).await.unwrap();
        assert!(!check.allowed);
        assert!(check.message.unwrap().contains("reached"));
    }

    #[tokio::test]
    async fn soft_limit_warns_instead_of_blocking() {
        let ledger = ledger().await;
        let mut spec = BudgetSpec::new(BudgetScope::global(), 1.0);
        spec.hard_stop_enabled = false;
        ledger.set_budget(spec).await.unwrap();
        ledger.record_cost(2.0, None, None).await.unwrap();

        let check = ledger.check_budget(None, None, Some(1.0)).await.unwrap();
        assert!(check.allowed);
        assert!(check.warning);
    }

    #[tokio::test]
    async fn session_scope_wins() {
        let ledger = ledger().await;
        ledger
            .set_budget(BudgetSpec::new(BudgetScope::global(), 100.0))
            .await
            .unwrap();
        ledger
            .set_budget(BudgetSpec::new(BudgetScope::project("/p"), 50.0))
            .await
            .unwrap();
        let session = ledger
            .set_budget(BudgetSpec::new(BudgetScope::session("s1"), 5.0))
            .await
            .unwrap();

        let check = ledger
            .check_budget(Some("/p"), Some("s1"), None)
            .await
            .unwrap();
        assert_eq!(check.budget_id, Some(session.id));
        assert_eq!(check.scope_level, Some(super::super::ScopeLevel::Session));

        let check = ledger
            .check_budget(Some("/p"), Some("other"), None)
            .await
            .unwrap();
        assert_eq!(check.scope_level, Some(super::super::ScopeLevel::Project));
    }

    #[tokio::test]
    async fn set_budget_updates_same_scope() {
        let ledger = ledger().await;
        let first = ledger
            .set_budget(BudgetSpec::new(BudgetScope::project("/p"), 5.0))
            .await
            .unwrap();
        ledger.record_cost(1.0, Some("/p"), None).await.unwrap();
        let second = ledger
            .set_budget(BudgetSpec::new(BudgetScope::project("/p"), 8.0))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!((second.spent_usd - 1.0).abs() < f64::EPSILON);
        assert_eq!(ledger.list_budgets().await.len(), 1);
    }

    #[tokio::test]
    async fn spend_is_monotonic_until_reset() {
        let ledger = ledger().await;
        let budget = ledger
            .set_budget(BudgetSpec::new(BudgetScope::global(), 10.0))
            .await
            .unwrap();

        let mut last = 0.0;
        for cost in [0.5, 0.0, 1.25, 0.25] {
            let updated = ledger.record_cost(cost, None, None).await.unwrap().unwrap();
            assert!(updated.spent_usd >= last);
            last = updated.spent_usd;
        }
        assert!(ledger.record_cost(-1.0, None, None).await.is_err());

        let reset = ledger.reset_budget(&budget.id).await.unwrap();
        assert!(reset.spent_usd.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn alerts_fire_once_per_crossing() {
        let ledger = ledger().await;
        let mut rx = ledger.subscribe();
        ledger
            .set_budget(BudgetSpec::new(BudgetScope::session("s1"), 10.0))
            .await
            .unwrap();

        ledger.record_cost(8.5, None, Some("s1")).await.unwrap();
        ledger.record_cost(0.5, None, Some("s1")).await.unwrap();
        ledger.record_cost(1.0, None, Some("s1")).await.unwrap();

        assert!(matches!(rx.try_recv().unwrap(), BudgetEvent::Warning { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            BudgetEvent::LimitReached { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn projection_is_linear() {
        let ledger = ledger().await;
        ledger.record_cost(0.1, None, Some("s1")).await.unwrap();
        ledger.record_cost(0.3, None, Some("s1")).await.unwrap();

        // average 0.2 x 2 ops/min x 10 min
        let projected = ledger.project_session_cost("s1", 10.0).await;
        assert!((projected - 4.0).abs() < 1e-9);
        assert!(ledger.project_session_cost("unknown", 10.0).await.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn release_freezes_limit_at_spend() {
        let ledger = ledger().await;
        let budget = ledger
            .set_budget(BudgetSpec::new(BudgetScope::session("s1"), 4.0))
            .await
            .unwrap();
        ledger.record_cost(1.5, None, Some("s1")).await.unwrap();

        let released = ledger.release_unspent(&budget.id).await.unwrap();
        assert!((released.limit_usd - 1.5).abs() < f64::EPSILON);
        assert!(released.remaining_usd().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn periodic_reset_only_when_due() {
        let ledger = ledger().await;
        let mut spec = BudgetSpec::new(BudgetScope::global(), 10.0);
        spec.reset_period = crate::storage::ResetPeriod::Daily;
        let budget = ledger.set_budget(spec).await.unwrap();
        ledger.record_cost(3.0, None, None).await.unwrap();

        assert!(ledger.reset_due_budgets(budget.last_reset + 60).await.unwrap().is_empty());
        let reset = ledger
            .reset_due_budgets(budget.last_reset + 24 * 60 * 60)
            .await
            .unwrap();
        assert_eq!(reset, vec![budget.id.clone()]);
        let after = ledger.get_budget(&budget.id).await.unwrap();
        assert!(after.spent_usd.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn budgets_survive_reopen() {
        let db = Database::open_in_memory().await.unwrap();
        let ledger = BudgetLedger::open(db.clone(), EventBus::default(), BudgetConfig::default())
            .await
            .unwrap();
        ledger
            .set_budget(BudgetSpec::new(BudgetScope::project("/p"), 3.0))
            .await
            .unwrap();

        let reopened = BudgetLedger::open(db, EventBus::default(), BudgetConfig::default())
            .await
            .unwrap();
        assert!(
            reopened
                .budget_for_scope(&BudgetScope::project("/p"))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn rejects_invalid_specs() {
        let ledger = ledger().await;
        assert!(
            ledger
                .set_budget(BudgetSpec::new(BudgetScope::global(), -1.0))
                .await
                .is_err()
        );
        let mut spec = BudgetSpec::new(BudgetScope::global(), 1.0);
        spec.warning_threshold = 1.5;
        assert!(ledger.set_budget(spec).await.is_err());
        assert!(
            ledger
                .set_budget(BudgetSpec::new(BudgetScope::session(" "), 1.0))
                .await
                .is_err()
        );
    }
}
