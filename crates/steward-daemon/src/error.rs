//! Governance error types.
//!
//! Business outcomes (a denied action, a re-decided item, a transition to an
//! untracked project) are not errors; they are returned as outcome values.
//! Only caller mistakes that must be rejected before any mutation and
//! storage failures end up here.

use crate::storage::DatabaseError;

/// Errors from the governance services.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// A referenced budget, policy, queue item, agent or project is absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Malformed input, rejected before any state mutation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The store is unavailable or returned inconsistent data. Fatal to the
    /// operation that hit it.
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl GovernanceError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this error reflects a storage outage rather than caller misuse.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<steward_core::Error> for GovernanceError {
    fn from(e: steward_core::Error) -> Self {
        match e {
            steward_core::Error::Policy(message) | steward_core::Error::Config(message) => {
                Self::Validation(message)
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Result alias for governance operations.
pub type Result<T> = std::result::Result<T, GovernanceError>;
