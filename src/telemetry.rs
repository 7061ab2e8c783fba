// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rewind=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Initialize Metrics (Prometheus)
    let builder = PrometheusBuilder::new();
    match builder.install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            return;
        }
    }

    metrics::describe_counter!(
        "rewind_events_appended_total",
        "Total number of replay events appended to capture logs"
    );
    metrics::describe_counter!(
        "rewind_elements_captured_total",
        "Total number of stream elements captured"
    );
    metrics::describe_counter!(
        "rewind_records_skipped_total",
        "Total number of undecodable log records skipped during replay"
    );
    metrics::describe_counter!(
        "rewind_replay_events_emitted_total",
        "Total number of events emitted by replay readers"
    );
    metrics::describe_counter!(
        "rewind_cache_invalidations_total",
        "Total number of times a pipeline's captured data was discarded"
    );

    // Ensure at least one metric exists on startup
    metrics::gauge!("rewind_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
