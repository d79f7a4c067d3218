//! `Steward` Daemon
//!
//! Reads newline-delimited JSON hook events on stdin and answers each with a
//! JSON decision line on stdout, while maintenance sweeps run in the
//! background.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use steward_daemon::Governor;
use steward_daemon::hooks::{HookDecision, HookEvent};
use steward_daemon::maintenance::spawn_maintenance;
use steward_daemon::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "steward-daemon")]
#[command(version, about = "Steward daemon - governance for coding agents")]
struct Args {
    /// Database file path
    #[arg(long, env = "STEWARD_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Project directory whose `.steward/settings.json` is layered over the
    /// global settings (defaults to the current directory)
    #[arg(long, env = "STEWARD_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "STEWARD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "STEWARD_LOG_JSON")]
    log_json: bool,

    /// Seconds between maintenance sweeps (overrides settings).
    #[arg(long, env = "STEWARD_MAINTENANCE_INTERVAL")]
    maintenance_interval: Option<u64>,

    /// OpenTelemetry OTLP endpoint for traces and metrics export
    /// (e.g. `http://localhost:4317`). Requires the `metrics` feature.
    #[cfg(feature = "metrics")]
    #[arg(long, env = "STEWARD_METRICS_ENDPOINT")]
    metrics_endpoint: Option<String>,
}

// jscpd:ignore-start -- binary bootstrap is inherently similar across daemons
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = args
        .project_dir
        .clone()
        .or_else(|| std::env::current_dir().ok());
    let mut config = steward_core::config::load_config(project_dir.as_deref())
        .context("Failed to load configuration")?;
    if let Some(level) = &args.log_level {
        config.daemon.log_level.clone_from(level);
    }
    if let Some(path) = &args.db_path {
        config.daemon.database_path = Some(path.clone());
    }
    if let Some(secs) = args.maintenance_interval {
        config.daemon.maintenance_interval_secs = secs;
    }

    #[cfg(feature = "metrics")]
    let metrics_endpoint = args.metrics_endpoint.as_deref();
    #[cfg(not(feature = "metrics"))]
    let metrics_endpoint: Option<&str> = None;

    // Hold the guard so the OTel pipeline stays alive for the process lifetime.
    let log_filter = format!(
        "steward_daemon={level},steward_core={level}",
        level = config.daemon.log_level
    );
    let _metrics_guard = steward_core::tracing_init::init_tracing_with_metrics(
        &log_filter,
        args.log_json,
        metrics_endpoint,
    );
    // jscpd:ignore-end

    info!(
        version = env!("CARGO_PKG_VERSION"),
        default_decision = ?config.approvals.default_decision,
        "Starting steward-daemon"
    );

    let db_path = match &config.daemon.database_path {
        Some(path) => path.clone(),
        None => steward_core::config::database_path()
            .context("Cannot determine a default database location")?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let interval = Duration::from_secs(config.daemon.maintenance_interval_secs);
    let governor = Arc::new(Governor::open(db, config).await?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let maintenance_handle = spawn_maintenance(Arc::clone(&governor), interval, shutdown_rx);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Notify systemd that the daemon is ready to serve (unix only).
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    info!("Reading hook events from stdin");

    tokio::select! {
        result = serve_stdio(&governor) => {
            result?;
            info!("Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = maintenance_handle.await;

    info!("Daemon stopped");
    Ok(())
}

/// Answer every NDJSON event on stdin with one decision line on stdout.
async fn serve_stdio(governor: &Governor) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let decision = match HookEvent::parse(line) {
            Ok(event) => match governor.handle(&event).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(event_type = %event.event_type, error = %e, "Hook event failed");
                    HookDecision::from_error(&e)
                }
            },
            Err(e) => {
                warn!(error = %e, "Malformed hook event");
                HookDecision::allow_with(format!("Malformed hook event: {e}"))
            }
        };

        let mut out = serde_json::to_vec(&decision)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}
