//! Database models for the governance store.

use serde::{Deserialize, Serialize};

use super::db::DatabaseError;

/// Budget record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BudgetRow {
    pub id: String,
    pub project_path: Option<String>,
    pub session_id: Option<String>,
    pub limit_usd: f64,
    pub spent_usd: f64,
    pub warning_threshold: f64,
    pub hard_stop_enabled: i64,
    pub reset_period: String,
    pub last_reset: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Approval policy record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PolicyRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub matcher: String,
    pub action: String,
    pub priority: i64,
    pub enabled: i64,
    /// JSON-encoded `PolicyConditions`.
    pub conditions: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Approval queue record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalItemRow {
    pub id: String,
    pub session_id: String,
    pub request_type: String,
    pub request_details: String,
    pub status: String,
    pub decided_by: Option<String>,
    pub policy_id: Option<String>,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}

/// How often a budget's spend resets automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResetPeriod {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl ResetPeriod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Period length in seconds; months count as 30 days.
    pub const fn as_secs(&self) -> Option<i64> {
        match self {
            Self::None => None,
            Self::Daily => Some(24 * 60 * 60),
            Self::Weekly => Some(7 * 24 * 60 * 60),
            Self::Monthly => Some(30 * 24 * 60 * 60),
        }
    }
}

impl std::str::FromStr for ResetPeriod {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(DatabaseError::Corrupt(format!("reset period {other:?}"))),
        }
    }
}

/// Approval queue item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "expired" => Ok(Self::Expired),
            other => Err(DatabaseError::Corrupt(format!("approval status {other:?}"))),
        }
    }
}

/// Who moved an approval item out of `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecidedBy {
    User,
    Policy,
    /// The expiry sweep.
    System,
}

impl DecidedBy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Policy => "policy",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for DecidedBy {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "policy" => Ok(Self::Policy),
            "system" => Ok(Self::System),
            other => Err(DatabaseError::Corrupt(format!("decided_by {other:?}"))),
        }
    }
}
