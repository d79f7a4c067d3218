//! Budget ledger types.

use serde::{Deserialize, Serialize};

use crate::storage::{BudgetRow, DatabaseError, ResetPeriod};

/// Specificity of a budget scope. Higher wins during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Global,
    Project,
    Session,
}

/// The (project, session) a budget applies to; both absent means global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetScope {
    pub project_path: Option<String>,
    pub session_id: Option<String>,
}

impl BudgetScope {
    pub const fn global() -> Self {
        Self {
            project_path: None,
            session_id: None,
        }
    }

    pub fn project(path: impl Into<String>) -> Self {
        Self {
            project_path: Some(path.into()),
            session_id: None,
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            project_path: None,
            session_id: Some(session_id.into()),
        }
    }

    pub const fn level(&self) -> ScopeLevel {
        if self.session_id.is_some() {
            ScopeLevel::Session
        } else if self.project_path.is_some() {
            ScopeLevel::Project
        } else {
            ScopeLevel::Global
        }
    }
}

/// A spend limit for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    pub scope: BudgetScope,
    pub limit_usd: f64,
    pub spent_usd: f64,
    /// Fraction of the limit (0-1) at which warnings start.
    pub warning_threshold: f64,
    pub hard_stop_enabled: bool,
    pub reset_period: ResetPeriod,
    /// Unix seconds.
    pub last_reset: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Budget {
    /// Unspent amount, never negative.
    pub fn remaining_usd(&self) -> f64 {
        (self.limit_usd - self.spent_usd).max(0.0)
    }

    /// `amount / limit`; a zero limit counts as fully used once anything is
    /// spent.
    pub fn usage_ratio(&self, amount: f64) -> f64 {
        if self.limit_usd > 0.0 {
            amount / self.limit_usd
        } else if amount > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    /// Whether a periodic reset is due at `now` (unix seconds).
    pub fn reset_due(&self, now: i64) -> bool {
        self.reset_period
            .as_secs()
            .is_some_and(|period| now - self.last_reset >= period)
    }
}

impl TryFrom<BudgetRow> for Budget {
    type Error = DatabaseError;

    fn try_from(row: BudgetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            scope: BudgetScope {
                project_path: row.project_path,
                session_id: row.session_id,
            },
            limit_usd: row.limit_usd,
            spent_usd: row.spent_usd,
            warning_threshold: row.warning_threshold,
            hard_stop_enabled: row.hard_stop_enabled != 0,
            reset_period: row.reset_period.parse()?,
            last_reset: row.last_reset,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Administrative input for creating or updating the budget of a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSpec {
    pub scope: BudgetScope,
    pub limit_usd: f64,
    pub warning_threshold: f64,
    pub hard_stop_enabled: bool,
    #[serde(default)]
    pub reset_period: ResetPeriod,
}

impl BudgetSpec {
    /// A hard-stop budget with the default 80% warning threshold.
    pub const fn new(scope: BudgetScope, limit_usd: f64) -> Self {
        Self {
            scope,
            limit_usd,
            warning_threshold: 0.8,
            hard_stop_enabled: true,
            reset_period: ResetPeriod::None,
        }
    }
}

/// Result of a budget check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCheck {
    pub allowed: bool,
    /// No budget applies; the action is unrestricted by spend.
    pub unrestricted: bool,
    pub budget_id: Option<String>,
    pub scope_level: Option<ScopeLevel>,
    /// `None` means unlimited.
    pub remaining_usd: Option<f64>,
    /// Block reason when not allowed, warning text when allowed near the limit.
    pub message: Option<String>,
    pub warning: bool,
}

impl BudgetCheck {
    pub(crate) const fn unrestricted() -> Self {
        Self {
            allowed: true,
            unrestricted: true,
            budget_id: None,
            scope_level: None,
            remaining_usd: None,
            message: None,
            warning: false,
        }
    }
}

/// Ledger notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BudgetEvent {
    /// Spend crossed the warning threshold.
    Warning {
        budget_id: String,
        spent_usd: f64,
        limit_usd: f64,
        percent: f64,
    },
    /// Spend reached or passed the limit.
    LimitReached {
        budget_id: String,
        spent_usd: f64,
        limit_usd: f64,
    },
    /// Spend was zeroed (manually or by the periodic reset).
    Reset { budget_id: String },
    /// The unspent part of a budget was released (limit frozen at spend).
    Released {
        budget_id: String,
        released_usd: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(limit: f64, spent: f64) -> Budget {
        Budget {
            id: "b".to_string(),
            scope: BudgetScope::global(),
            limit_usd: limit,
            spent_usd: spent,
            warning_threshold: 0.8,
            hard_stop_enabled: true,
            reset_period: ResetPeriod::Daily,
            last_reset: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn scope_levels_order() {
        assert!(BudgetScope::session("s").level() > BudgetScope::project("/p").level());
        assert!(BudgetScope::project("/p").level() > BudgetScope::global().level());
    }

    #[test]
    fn remaining_never_negative() {
        assert!(budget(10.0, 12.0).remaining_usd().abs() < f64::EPSILON);
        assert!((budget(10.0, 4.0).remaining_usd() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_limit_ratio() {
        let b = budget(0.0, 0.0);
        assert!(b.usage_ratio(0.0).abs() < f64::EPSILON);
        assert!(b.usage_ratio(0.01).is_infinite());
    }

    #[test]
    fn daily_reset_due_after_a_day() {
        let b = budget(1.0, 0.5);
        assert!(!b.reset_due(60));
        assert!(b.reset_due(24 * 60 * 60));
    }
}
