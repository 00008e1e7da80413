use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info};

use flightlink::config::PipelineConfig;
use flightlink::db::PgPool;
use flightlink::job_lock::JobLock;
use flightlink::jobs::{
    AGGREGATE, AggregationJob, CLEAN, MetadataPollJob, POLL_METADATA, POLL_STATES, RetentionJob,
    StateVectorPollJob,
};
use flightlink::live_flights::LiveFlightStore;
use flightlink::reference_data::StaticCatalog;
use flightlink::scheduler::JobScheduler;

use super::{airlabs_source, opensky_source};

/// Run every periodic job plus the read API until Ctrl+C
pub async fn handle_run(
    config: &PipelineConfig,
    pool: PgPool,
    interface: String,
    port: u16,
    metrics_port: Option<u16>,
) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "run");
    });

    // Held for the process lifetime so one-shot invocations cannot overlap
    let mut locks = Vec::new();
    for name in [POLL_STATES, POLL_METADATA, AGGREGATE, CLEAN] {
        let lock = JobLock::acquire(name)
            .with_context(|| format!("Failed to acquire job lock for {name}"))?;
        info!("Acquired job lock: {}", lock.path().display());
        locks.push(lock);
    }

    if let Some(metrics_port) = metrics_port {
        tokio::spawn(
            async move {
                if let Err(e) = flightlink::metrics::start_metrics_server(metrics_port).await {
                    error!("Metrics server stopped: {:#}", e);
                }
            }
            .instrument(tracing::info_span!("metrics_server")),
        );
    }

    let mut store = LiveFlightStore::new(pool.clone());
    if let Some(path) = &config.reference_data_path {
        let catalog = StaticCatalog::load(path)
            .with_context(|| format!("Failed to load reference data from {}", path.display()))?;
        info!("Loaded {} reference records from {}", catalog.len(), path.display());
        store = store.with_catalog(Arc::new(catalog));
    }

    tokio::spawn(
        async move {
            if let Err(e) = flightlink::web::start_web_server(interface, port, store).await {
                error!("Web server stopped: {:#}", e);
            }
        }
        .instrument(tracing::info_span!("web_server")),
    );

    let cancel = CancellationToken::new();
    let schedule = &config.schedule;
    let mut scheduler = JobScheduler::new(cancel.clone());
    scheduler
        .add(
            Arc::new(StateVectorPollJob::new(
                opensky_source(config)?,
                pool.clone(),
                config.bounding_box,
                config.link_carry_forward_secs,
            )),
            Duration::from_secs(schedule.state_vector_secs),
        )
        .add(
            Arc::new(MetadataPollJob::new(
                airlabs_source(config)?,
                pool.clone(),
                config.bounding_box,
            )),
            Duration::from_secs(schedule.metadata_secs),
        )
        .add(
            Arc::new(AggregationJob::new(pool.clone(), config.aggregate_airborne_only)),
            Duration::from_secs(schedule.aggregate_secs),
        )
        .add_with_offset(
            Arc::new(RetentionJob::new(pool, config.retention_days)),
            Duration::from_secs(schedule.retention_secs),
            Duration::from_secs(schedule.retention_offset_secs),
        );

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal (Ctrl+C), waiting for running jobs to finish...");
                cancel.cancel();
            }
            Err(err) => {
                error!("Unable to listen for shutdown signal: {}", err);
            }
        }
    });

    info!("Scheduler started with {} jobs", scheduler.len());
    scheduler.run().await;
    info!("All jobs stopped, shutting down");

    drop(locks);
    Ok(())
}
