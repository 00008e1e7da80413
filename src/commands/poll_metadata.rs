use anyhow::{Context, Result};
use tracing::info;

use flightlink::config::PipelineConfig;
use flightlink::db::PgPool;
use flightlink::job_lock::JobLock;
use flightlink::jobs::{MetadataPollJob, POLL_METADATA};

use super::airlabs_source;

pub async fn handle_poll_metadata(config: &PipelineConfig, pool: PgPool) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", POLL_METADATA);
    });

    let _lock = JobLock::acquire(POLL_METADATA)
        .context("Failed to acquire job lock - is another metadata poll running?")?;

    let job = MetadataPollJob::new(airlabs_source(config)?, pool, config.bounding_box);
    let report = job.poll_once().await?;

    info!(
        "Reconciliation finished: {} metadata records stored, {} state vectors linked, {} unmatched removed",
        report.metadata_inserted, report.state_vectors_linked, report.unmatched_deleted
    );
    Ok(())
}
