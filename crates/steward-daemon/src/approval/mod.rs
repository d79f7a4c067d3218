//! Approval policy engine.
//!
//! Policies are prioritized matchers that auto-approve, auto-deny or queue
//! an action. Queued actions wait in a durable queue until a human decides
//! or the expiry sweep retires them.

mod engine;
mod types;

pub use engine::ApprovalEngine;
pub use types::{
    ApprovalEvent, ApprovalPolicy, ApprovalQueueItem, DecisionOutcome, PolicyDecision,
    PolicyInput, PolicyPatch,
};
