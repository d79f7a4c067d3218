//! `Steward` Core Library
//!
//! Shared functionality for `Steward` components:
//! - Configuration resolution and hierarchy
//! - Cost estimation and model pricing
//! - Approval policy matching and validation
//! - `SQLite` pool helpers and common error types

pub mod config;
pub mod cost;
pub mod db;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod policy;
pub mod tracing_init;

pub use config::Config;
pub use cost::{Confidence, CostEstimate, ToolCategory};
pub use error::{Error, Result};
pub use policy::{PolicyAction, PolicyConditions, PolicyMatcher};
