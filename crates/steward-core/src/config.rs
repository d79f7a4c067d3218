//! Configuration resolution for Steward.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/steward/settings.json)
//! 3. Project config (.steward/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Steward configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub approvals: ApprovalConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    /// Interval between maintenance sweeps (seconds).
    pub maintenance_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            log_level: "info".to_string(),
            maintenance_interval_secs: 60,
        }
    }
}

/// Budget ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Model assumed when a hook event does not name one.
    pub default_model: String,
    /// Assumed operation rate used by session cost projection.
    pub ops_per_minute: f64,
    /// Maximum number of cost samples kept per session.
    pub history_limit: usize,
    /// Allocate a session budget for every subagent spawned under a parent
    /// that has one.
    pub auto_allocate_subagents: bool,
    /// Amount given to auto-allocated subagents (USD).
    pub subagent_allocation_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-20250514".to_string(),
            ops_per_minute: 2.0,
            history_limit: 500,
            auto_allocate_subagents: false,
            subagent_allocation_usd: 1.0,
        }
    }
}

/// What to do with an action that no enabled policy matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultDecision {
    /// Allow the action (unrestricted mode).
    #[default]
    Allow,
    /// Queue the action for a human decision.
    Queue,
    /// Deny the action.
    Deny,
}

/// Approval system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Outcome for actions no policy matches.
    pub default_decision: DefaultDecision,
    /// Pending items older than this become expired (seconds).
    pub pending_ttl_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_decision: DefaultDecision::Allow,
            pending_ttl_secs: 24 * 60 * 60, // 24 hours
        }
    }
}

/// Cross-project coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Handled events older than this are swept (seconds).
    pub event_max_age_secs: u64,
    /// Idle cross-project agents older than this are dropped (seconds).
    pub stale_agent_idle_secs: u64,
    /// Broadcast channel buffer size for project notifications.
    pub notification_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            event_max_age_secs: 60 * 60,
            stale_agent_idle_secs: 30 * 60,
            notification_capacity: 256,
        }
    }
}

/// Configuration source priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigSource {
    Default = 0,
    Global = 1,
    Project = 2,
    Environment = 3,
    Cli = 4,
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".steward").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    steward_dir().map(|p| p.join("settings.json"))
}

/// Get the database path for the daemon.
pub fn database_path() -> Option<PathBuf> {
    steward_dir().map(|p| p.join("steward.db"))
}

fn steward_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("steward"))
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.daemon.database_path.is_some() {
        base.daemon.database_path = overlay.daemon.database_path;
    }
    base.daemon.log_level = overlay.daemon.log_level;
    base.daemon.maintenance_interval_secs = overlay.daemon.maintenance_interval_secs;

    base.budget = overlay.budget;
    base.approvals = overlay.approvals;
    base.coordinator = overlay.coordinator;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("STEWARD_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Ok(val) = std::env::var("STEWARD_DB_PATH") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("STEWARD_DEFAULT_MODEL") {
        config.budget.default_model = val;
    }
    if let Ok(val) = std::env::var("STEWARD_DEFAULT_DECISION") {
        match val.to_ascii_lowercase().as_str() {
            "allow" => config.approvals.default_decision = DefaultDecision::Allow,
            "queue" => config.approvals.default_decision = DefaultDecision::Queue,
            "deny" => config.approvals.default_decision = DefaultDecision::Deny,
            other => tracing::warn!(value = other, "Ignoring unknown STEWARD_DEFAULT_DECISION"),
        }
    }
    if let Ok(val) = std::env::var("STEWARD_PENDING_TTL_SECS")
        && let Ok(n) = val.parse()
    {
        config.approvals.pending_ttl_secs = n;
    }
}

fn validate(config: &Config) -> Result<()> {
    if !(config.budget.ops_per_minute.is_finite() && config.budget.ops_per_minute >= 0.0) {
        return Err(Error::Config(
            "budget.ops_per_minute must be a non-negative number".to_string(),
        ));
    }
    if config.budget.subagent_allocation_usd < 0.0 {
        return Err(Error::Config(
            "budget.subagent_allocation_usd must not be negative".to_string(),
        ));
    }
    if config.daemon.maintenance_interval_secs == 0 {
        return Err(Error::Config(
            "daemon.maintenance_interval_secs must be positive".to_string(),
        ));
    }
    if config.coordinator.notification_capacity == 0 {
        return Err(Error::Config(
            "coordinator.notification_capacity must be positive".to_string(),
        ));
    }
    Ok(())
}
