//! Periodic maintenance sweeps.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use steward_core::db::unix_timestamp;

use crate::error::Result;
use crate::governor::Governor;

/// What a single sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_items: Vec<String>,
    pub reset_budgets: Vec<String>,
    pub removed_agents: Vec<String>,
    pub swept_events: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.expired_items.is_empty()
            && self.reset_budgets.is_empty()
            && self.removed_agents.is_empty()
            && self.swept_events == 0
    }
}

/// Run every sweep once. Each sweep only retires entries that are already
/// expired or handled, so running this repeatedly is harmless.
pub async fn run_once(governor: &Governor) -> Result<MaintenanceReport> {
    let report = MaintenanceReport {
        expired_items: governor.approvals().expire_stale().await?,
        reset_budgets: governor.ledger().reset_due_budgets(unix_timestamp()).await?,
        removed_agents: governor.projects().cleanup_stale_agents_default().await,
        swept_events: governor.projects().sweep_events_default().await,
    };

    if report.is_empty() {
        debug!("Maintenance sweep: nothing to do");
    } else {
        info!(
            expired_items = report.expired_items.len(),
            reset_budgets = report.reset_budgets.len(),
            removed_agents = report.removed_agents.len(),
            swept_events = report.swept_events,
            "Maintenance sweep complete"
        );
    }
    Ok(report)
}

/// Spawn the maintenance loop. It stops when `shutdown` changes.
pub fn spawn_maintenance(
    governor: Arc<Governor>,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Maintenance task started");

        let mut timer = tokio::time::interval(interval.max(Duration::from_secs(1)));
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = run_once(&governor).await {
                        error!(error = %e, "Maintenance sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Maintenance task shutting down");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use steward_core::Config;

    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn sweep_on_fresh_state_is_empty() {
        let db = Database::open_in_memory().await.unwrap();
        let governor = Governor::open(db, Config::default()).await.unwrap();

        let report = run_once(&governor).await.unwrap();
        assert!(report.is_empty());
        assert!(run_once(&governor).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn loop_stops_on_shutdown() {
        let db = Database::open_in_memory().await.unwrap();
        let governor = Arc::new(Governor::open(db, Config::default()).await.unwrap());
        let (tx, rx) = tokio::sync::watch::channel(false);

        let handle = spawn_maintenance(governor, Duration::from_secs(60), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
