//! Tracing/logging initialization.
//!
//! Sets up `tracing_subscriber` with an env-filter and optional JSON output.
//! With the `metrics` feature an OTLP layer can be attached as well.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"steward_daemon=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = env_filter(default_filter);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(feature = "metrics")]
pub type MetricsGuard = crate::metrics::MetricsGuard;

/// Placeholder guard when the `metrics` feature is disabled.
#[cfg(not(feature = "metrics"))]
pub struct MetricsGuard;

/// Initialise tracing and, when an endpoint is given and the `metrics`
/// feature is compiled in, the `OpenTelemetry` pipeline.
///
/// The returned guard must be held for the lifetime of the process.
pub fn init_tracing_with_metrics(
    default_filter: &str,
    log_json: bool,
    metrics_endpoint: Option<&str>,
) -> Option<MetricsGuard> {
    #[cfg(feature = "metrics")]
    if let Some(endpoint) = metrics_endpoint {
        match crate::metrics::init_metrics(endpoint) {
            Ok(guard) => {
                use opentelemetry::trace::TracerProvider as _;
                let tracer = guard.tracer_provider().tracer("steward");
                let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
                let env_filter = env_filter(default_filter);
                if log_json {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(otel_layer)
                        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                        .init();
                } else {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(otel_layer)
                        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                        .init();
                }
                tracing::info!(endpoint, "OpenTelemetry export enabled");
                return Some(guard);
            }
            Err(e) => {
                init_tracing(default_filter, log_json);
                tracing::warn!(error = %e, "Failed to initialise OpenTelemetry; continuing without");
                return None;
            }
        }
    }

    #[cfg(not(feature = "metrics"))]
    let _ = metrics_endpoint;

    init_tracing(default_filter, log_json);
    None
}

fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}
