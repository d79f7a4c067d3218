//! Cross-project coordinator.
//!
//! In-memory state shared between independently tracked projects: agents
//! that move between projects, skills shared by several of them, and an
//! event queue fanned out as per-project notifications.

mod coordinator;
mod types;

pub use coordinator::ProjectCoordinator;
pub use types::{
    AgentSnapshot, CrossProjectAgent, EVENT_PROJECT_REMOVED, EVENT_PROJECT_SWITCHED,
    ProjectEvent, ProjectNotification, ProjectRecord, ProjectState, ProjectStatePatch,
    ProjectSwitch, SharedSkillConfig, TransitionOutcome,
};
