use anyhow::{Context, Result};
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

use crate::jobs::{AGGREGATE, CLEAN, POLL_METADATA, POLL_STATES};
use crate::state_vectors::RejectReason;

/// Install the Prometheus recorder and return a handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    // Buckets: 10ms .. 5min, job and reconciliation durations are in ms
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_ms".to_string()),
            &[
                10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10_000.0, 30_000.0,
                60_000.0, 300_000.0,
            ],
        )
        .context("Failed to set duration buckets")?;
    builder
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Background task to update process metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status")
                && let Some(line) = status.lines().find(|l| l.starts_with("VmRSS:"))
                && let Some(kb_str) = line.split_whitespace().nth(1)
                && let Ok(kb) = kb_str.parse::<f64>()
            {
                metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Register pipeline metrics at zero so they appear before the first event
pub fn initialize_pipeline_metrics() {
    for reason in [
        RejectReason::MissingIcao24,
        RejectReason::MissingCallsign,
        RejectReason::MissingLongitude,
        RejectReason::MissingLatitude,
    ] {
        metrics::counter!("state_vectors.rejected_total", "reason" => reason.as_str()).absolute(0);
    }
    metrics::counter!("state_vectors.stored_total").absolute(0);
    metrics::gauge!("state_vectors.last_batch_size").set(0.0);
    metrics::counter!("flight_metadata.unmatchable_total").absolute(0);

    metrics::counter!("reconciliation.metadata_inserted_total").absolute(0);
    metrics::counter!("reconciliation.state_vectors_linked_total").absolute(0);
    metrics::counter!("reconciliation.unmatched_deleted_total").absolute(0);

    metrics::counter!("aggregation.sessions_written_total").absolute(0);

    for store in ["flight_sessions", "state_vectors", "flight_metadata"] {
        metrics::counter!("retention.deleted_total", "store" => store).absolute(0);
    }

    for source in ["opensky", "airlabs"] {
        metrics::counter!("feed.request.retry_total", "source" => source).absolute(0);
    }

    for job in [POLL_STATES, POLL_METADATA, AGGREGATE, CLEAN] {
        metrics::counter!("scheduler.job_succeeded", "job" => job).absolute(0);
        metrics::counter!("scheduler.job_failed", "job" => job).absolute(0);
        metrics::counter!("scheduler.job_skipped", "job" => job).absolute(0);
    }
}

/// Serve `/metrics` on its own port until the process exits
pub async fn start_metrics_server(port: u16) -> Result<()> {
    let handle = init_metrics()?;
    initialize_pipeline_metrics();
    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server")?;
    axum::serve(listener, app)
        .await
        .context("Metrics server failed")
}
