//! Cross-project coordinator service.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use steward_core::config::CoordinatorConfig;
use steward_core::db::unix_timestamp_millis;

use crate::agents::AgentStatus;
use crate::error::{GovernanceError, Result};
use crate::events::EventBus;

use super::types::{
    AgentSnapshot, CrossProjectAgent, EVENT_PROJECT_REMOVED, EVENT_PROJECT_SWITCHED, ProjectEvent,
    ProjectNotification, ProjectRecord, ProjectState, ProjectStatePatch, ProjectSwitch,
    SharedSkillConfig, TransitionOutcome,
};

#[derive(Default)]
struct CoordinatorState {
    projects: BTreeMap<String, ProjectRecord>,
    active_project: Option<String>,
    states: HashMap<String, ProjectState>,
    agents: HashMap<String, CrossProjectAgent>,
    skills: HashMap<String, SharedSkillConfig>,
    events: Vec<ProjectEvent>,
}

impl CoordinatorState {
    /// Lazily create the state of a known project.
    fn state_mut(&mut self, project_id: &str, now: i64) -> Option<&mut ProjectState> {
        let record = self.projects.get(project_id)?;
        Some(
            self.states
                .entry(project_id.to_string())
                .or_insert_with(|| ProjectState::new(record, now)),
        )
    }

    fn transition(&mut self, agent_id: &str, target: &str, now: i64) -> TransitionOutcome {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return TransitionOutcome::UnknownAgent;
        };
        if !agent.project_ids.contains(target) {
            return TransitionOutcome::NotTracked;
        }

        let previous = agent.current_project_id.clone();
        if let Some(prev) = previous.as_deref()
            && prev != target
        {
            agent.snapshots.insert(
                prev.to_string(),
                AgentSnapshot {
                    status: agent.status,
                    last_activity: agent.last_activity,
                },
            );
        }
        agent.current_project_id = Some(target.to_string());
        agent.snapshots.remove(target);
        agent.status = AgentStatus::Active;
        agent.last_activity = now;
        let agent = agent.clone();

        if let Some(prev) = previous.as_deref()
            && prev != target
            && let Some(state) = self.states.get_mut(prev)
            && state.active_agents.remove(agent_id)
        {
            state.bump(now);
        }
        if let Some(state) = self.state_mut(target, now)
            && state.active_agents.insert(agent_id.to_string())
        {
            state.bump(now);
        }

        TransitionOutcome::Transitioned { agent }
    }
}

/// Keeps per-project state, agents and skills that span projects, and fans
/// events out between projects.
///
/// All state sits behind one lock, so each operation is atomic with respect
/// to the others.
pub struct ProjectCoordinator {
    notifications: EventBus<ProjectNotification>,
    config: CoordinatorConfig,
    state: RwLock<CoordinatorState>,
}

impl ProjectCoordinator {
    pub fn new(notifications: EventBus<ProjectNotification>, config: CoordinatorConfig) -> Self {
        Self {
            notifications,
            config,
            state: RwLock::new(CoordinatorState::default()),
        }
    }

    // =========================================================================
    // Project lifecycle
    // =========================================================================

    /// Register a project, or update the path and name of a known one.
    pub async fn register_project(
        &self,
        project_id: &str,
        project_path: &str,
        name: &str,
    ) -> Result<ProjectRecord> {
        if project_id.trim().is_empty() || project_path.trim().is_empty() {
            return Err(GovernanceError::validation(
                "project ID and path must not be empty",
            ));
        }

        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let record = state
            .projects
            .entry(project_id.to_string())
            .and_modify(|r| {
                r.project_path = project_path.to_string();
                r.name = name.to_string();
            })
            .or_insert_with(|| ProjectRecord {
                project_id: project_id.to_string(),
                project_path: project_path.to_string(),
                name: name.to_string(),
                registered_at: now,
            })
            .clone();
        if let Some(project_state) = state.states.get_mut(project_id) {
            project_state.project_path = project_path.to_string();
        }
        drop(state);

        info!(project_id, project_path, "Project registered");
        Ok(record)
    }

    /// Remove a project and every reference to it.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn remove_project(&self, project_id: &str) -> Result<ProjectRecord> {
        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let record = state
            .projects
            .remove(project_id)
            .ok_or_else(|| GovernanceError::not_found("Project", project_id))?;

        state.states.remove(project_id);
        if state.active_project.as_deref() == Some(project_id) {
            state.active_project = None;
        }
        for agent in state.agents.values_mut() {
            agent.project_ids.remove(project_id);
            agent.snapshots.remove(project_id);
            if agent.current_project_id.as_deref() == Some(project_id) {
                agent.current_project_id = None;
                agent.status = AgentStatus::Idle;
            }
        }
        state.skills.retain(|_, skill| {
            skill.project_ids.remove(project_id);
            !skill.project_ids.is_empty()
        });

        let targets: Vec<String> = state.projects.keys().cloned().collect();
        if !targets.is_empty() {
            self.fan_out(
                &mut state,
                EVENT_PROJECT_REMOVED,
                serde_json::json!({ "projectId": project_id }),
                targets,
                None,
                now,
            );
        }

        info!(project_id, "Project removed");
        Ok(record)
    }

    /// Make a project the active one, moving every cross-project agent that
    /// tracks it into it.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn switch_project(&self, project_id: &str) -> Result<ProjectSwitch> {
        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        if !state.projects.contains_key(project_id) {
            return Err(GovernanceError::not_found("Project", project_id));
        }

        let previous = state.active_project.replace(project_id.to_string());
        let mut tracking: Vec<String> = state
            .agents
            .values()
            .filter(|a| a.project_ids.contains(project_id))
            .map(|a| a.agent_id.clone())
            .collect();
        tracking.sort();

        let mut transitioned = Vec::new();
        for agent_id in tracking {
            if let TransitionOutcome::Transitioned { .. } =
                state.transition(&agent_id, project_id, now)
            {
                transitioned.push(agent_id);
            }
        }

        let targets: Vec<String> = state
            .projects
            .keys()
            .filter(|id| id.as_str() != project_id)
            .cloned()
            .collect();
        if !targets.is_empty() {
            self.fan_out(
                &mut state,
                EVENT_PROJECT_SWITCHED,
                serde_json::json!({ "from": previous, "to": project_id }),
                targets,
                Some(project_id.to_string()),
                now,
            );
        }

        info!(
            project_id,
            previous = ?previous,
            agents = transitioned.len(),
            "Active project switched"
        );
        Ok(ProjectSwitch {
            previous_project_id: previous,
            current_project_id: project_id.to_string(),
            transitioned_agents: transitioned,
        })
    }

    /// Known projects, ordered by ID.
    pub async fn list_projects(&self) -> Vec<ProjectRecord> {
        self.state.read().await.projects.values().cloned().collect()
    }

    pub async fn active_project(&self) -> Option<String> {
        self.state.read().await.active_project.clone()
    }

    // =========================================================================
    // Cross-project agents
    // =========================================================================

    /// Register an agent across projects. The tracked set is unioned with
    /// `project_ids`; focus project and status survive re-registration.
    pub async fn register_cross_project_agent(
        &self,
        agent_id: &str,
        name: &str,
        project_ids: &[String],
    ) -> Result<CrossProjectAgent> {
        if agent_id.trim().is_empty() {
            return Err(GovernanceError::validation("agent ID must not be empty"));
        }
        if project_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(GovernanceError::validation("project IDs must not be empty"));
        }

        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| CrossProjectAgent {
                agent_id: agent_id.to_string(),
                name: name.to_string(),
                project_ids: BTreeSet::new(),
                current_project_id: None,
                status: AgentStatus::Idle,
                last_activity: now,
                snapshots: HashMap::new(),
            });
        if !name.is_empty() {
            agent.name = name.to_string();
        }
        agent.project_ids.extend(project_ids.iter().cloned());
        let agent = agent.clone();
        drop(state);

        debug!(agent_id, projects = agent.project_ids.len(), "Cross-project agent registered");
        Ok(agent)
    }

    /// Move an agent into one of its tracked projects.
    pub async fn transition_agent_to_project(
        &self,
        agent_id: &str,
        target_project_id: &str,
    ) -> TransitionOutcome {
        let now = unix_timestamp_millis();
        let outcome = self
            .state
            .write()
            .await
            .transition(agent_id, target_project_id, now);

        match &outcome {
            TransitionOutcome::Transitioned { .. } => {
                info!(agent_id, target_project_id, "Agent transitioned to project");
            }
            TransitionOutcome::NotTracked => {
                warn!(
                    agent_id,
                    target_project_id, "Agent does not track target project; transition skipped"
                );
            }
            TransitionOutcome::UnknownAgent => {
                warn!(agent_id, "Unknown cross-project agent; transition skipped");
            }
        }
        outcome
    }

    pub async fn get_cross_project_agent(&self, agent_id: &str) -> Option<CrossProjectAgent> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    /// Drop non-active cross-project agents idle for at least `max_idle`.
    /// Returns the dropped agent IDs.
    pub async fn cleanup_stale_agents(&self, max_idle: Duration) -> Vec<String> {
        let cutoff = unix_timestamp_millis().saturating_sub(duration_millis(max_idle));
        let mut state = self.state.write().await;

        let stale: Vec<String> = state
            .agents
            .values()
            .filter(|a| a.status != AgentStatus::Active && a.last_activity <= cutoff)
            .map(|a| a.agent_id.clone())
            .collect();
        for id in &stale {
            state.agents.remove(id);
            for project_state in state.states.values_mut() {
                project_state.active_agents.remove(id);
            }
        }
        drop(state);

        if !stale.is_empty() {
            info!(count = stale.len(), "Stale cross-project agents removed");
        }
        stale
    }

    /// Drop stale agents using the configured idle threshold.
    pub async fn cleanup_stale_agents_default(&self) -> Vec<String> {
        self.cleanup_stale_agents(Duration::from_secs(self.config.stale_agent_idle_secs))
            .await
    }

    // =========================================================================
    // Shared skills
    // =========================================================================

    /// Share a skill with more projects. Settings merge shallowly, last
    /// write wins per key.
    pub async fn share_skill_across_projects(
        &self,
        skill_id: &str,
        name: &str,
        project_ids: &[String],
        settings: Map<String, Value>,
    ) -> Result<SharedSkillConfig> {
        if skill_id.trim().is_empty() {
            return Err(GovernanceError::validation("skill ID must not be empty"));
        }
        if project_ids.is_empty() {
            return Err(GovernanceError::validation(
                "a skill must be shared with at least one project",
            ));
        }

        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let skill = state
            .skills
            .entry(skill_id.to_string())
            .or_insert_with(|| SharedSkillConfig {
                skill_id: skill_id.to_string(),
                name: name.to_string(),
                project_ids: BTreeSet::new(),
                settings: Map::new(),
                updated_at: now,
            });
        if !name.is_empty() {
            skill.name = name.to_string();
        }
        skill.project_ids.extend(project_ids.iter().cloned());
        skill.settings.extend(settings);
        skill.updated_at = now;
        let skill = skill.clone();
        drop(state);

        info!(skill_id, projects = skill.project_ids.len(), "Skill shared");
        Ok(skill)
    }

    /// Stop sharing a skill with some projects. Returns `None` when the
    /// skill is no longer shared with any project and was removed.
    pub async fn unshare_skill_from_projects(
        &self,
        skill_id: &str,
        project_ids: &[String],
    ) -> Result<Option<SharedSkillConfig>> {
        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let skill = state
            .skills
            .get_mut(skill_id)
            .ok_or_else(|| GovernanceError::not_found("Skill", skill_id))?;

        for id in project_ids {
            skill.project_ids.remove(id);
        }
        skill.updated_at = now;

        if skill.project_ids.is_empty() {
            state.skills.remove(skill_id);
            drop(state);
            info!(skill_id, "Skill no longer shared; removed");
            return Ok(None);
        }
        let skill = skill.clone();
        drop(state);

        debug!(skill_id, projects = skill.project_ids.len(), "Skill unshared");
        Ok(Some(skill))
    }

    pub async fn get_shared_skill(&self, skill_id: &str) -> Option<SharedSkillConfig> {
        self.state.read().await.skills.get(skill_id).cloned()
    }

    // =========================================================================
    // Project state
    // =========================================================================

    /// State of a known project, created on first access. `None` for
    /// unknown projects.
    pub async fn get_project_state(&self, project_id: &str) -> Option<ProjectState> {
        let now = unix_timestamp_millis();
        self.state
            .write()
            .await
            .state_mut(project_id, now)
            .cloned()
    }

    /// Replace the provided fields. Always bumps `version` and `last_sync`.
    pub async fn update_project_state(
        &self,
        project_id: &str,
        patch: ProjectStatePatch,
    ) -> Result<ProjectState> {
        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let project_state = state
            .state_mut(project_id, now)
            .ok_or_else(|| GovernanceError::not_found("Project", project_id))?;

        if let Some(agents) = patch.active_agents {
            project_state.active_agents = agents;
        }
        if let Some(skills) = patch.pending_skills {
            project_state.pending_skills = skills;
        }
        if let Some(session_id) = patch.session_id {
            project_state.session_id = session_id;
        }
        project_state.bump(now);
        Ok(project_state.clone())
    }

    /// For each target, add the skills it shares with `source_id` to its
    /// pending skills. Never removes entries. Unknown targets are skipped.
    pub async fn sync_project_states(
        &self,
        source_id: &str,
        target_ids: &[String],
    ) -> Result<Vec<ProjectState>> {
        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        if !state.projects.contains_key(source_id) {
            return Err(GovernanceError::not_found("Project", source_id));
        }

        let mut synced = Vec::with_capacity(target_ids.len());
        for target in target_ids.iter().filter(|t| t.as_str() != source_id) {
            let shared: Vec<String> = state
                .skills
                .values()
                .filter(|s| s.project_ids.contains(source_id) && s.project_ids.contains(target))
                .map(|s| s.skill_id.clone())
                .collect();
            let Some(target_state) = state.state_mut(target, now) else {
                warn!(source_id, target_id = %target, "Sync target is not a known project");
                continue;
            };
            target_state.pending_skills.extend(shared);
            target_state.bump(now);
            synced.push(target_state.clone());
        }
        drop(state);

        debug!(source_id, targets = synced.len(), "Project states synced");
        Ok(synced)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Broadcast an event to specific projects: one stored event, one
    /// notification per target.
    pub async fn broadcast_to_projects(
        &self,
        event_type: &str,
        data: Value,
        target_ids: &[String],
        source_id: Option<&str>,
    ) -> Result<ProjectEvent> {
        if event_type.trim().is_empty() {
            return Err(GovernanceError::validation("event type must not be empty"));
        }
        let mut targets: Vec<String> = Vec::with_capacity(target_ids.len());
        for id in target_ids {
            if !targets.contains(id) {
                targets.push(id.clone());
            }
        }

        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        Ok(self.fan_out(
            &mut state,
            event_type,
            data,
            targets,
            source_id.map(str::to_string),
            now,
        ))
    }

    /// Broadcast an event to every project known when the event is created.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn broadcast_to_all_projects(
        &self,
        event_type: &str,
        data: Value,
        source_id: Option<&str>,
    ) -> Result<ProjectEvent> {
        if event_type.trim().is_empty() {
            return Err(GovernanceError::validation("event type must not be empty"));
        }

        let now = unix_timestamp_millis();
        let mut state = self.state.write().await;
        let targets: Vec<String> = state.projects.keys().cloned().collect();
        Ok(self.fan_out(
            &mut state,
            event_type,
            data,
            targets,
            source_id.map(str::to_string),
            now,
        ))
    }

    fn fan_out(
        &self,
        state: &mut CoordinatorState,
        event_type: &str,
        data: Value,
        targets: Vec<String>,
        source_id: Option<String>,
        now: i64,
    ) -> ProjectEvent {
        let event = Arc::new(ProjectEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            source_project_id: source_id,
            target_project_ids: targets,
            data,
            handled: false,
            timestamp: now,
        });

        for target in &event.target_project_ids {
            self.notifications.publish(ProjectNotification {
                target_project_id: target.clone(),
                event: Arc::clone(&event),
            });
        }
        debug!(
            event_id = %event.id,
            event_type,
            targets = event.target_project_ids.len(),
            "Project event fanned out"
        );

        let mut stored = (*event).clone();
        stored.handled = true;
        state.events.push(stored.clone());
        stored
    }

    /// Events still retained, oldest first.
    pub async fn list_events(&self) -> Vec<ProjectEvent> {
        self.state.read().await.events.clone()
    }

    /// Remove handled events at least `max_age` old. Returns how many were
    /// removed.
    pub async fn sweep_events(&self, max_age: Duration) -> usize {
        let cutoff = unix_timestamp_millis().saturating_sub(duration_millis(max_age));
        let mut state = self.state.write().await;
        let before = state.events.len();
        state
            .events
            .retain(|e| !(e.handled && e.timestamp <= cutoff));
        let removed = before - state.events.len();
        drop(state);

        if removed > 0 {
            debug!(removed, "Handled project events swept");
        }
        removed
    }

    /// Sweep events using the configured maximum age.
    pub async fn sweep_events_default(&self) -> usize {
        self.sweep_events(Duration::from_secs(self.config.event_max_age_secs))
            .await
    }

    /// Subscribe to per-project notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProjectNotification> {
        self.notifications.subscribe()
    }
}

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
