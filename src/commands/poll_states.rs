use anyhow::{Context, Result};
use tracing::info;

use flightlink::config::PipelineConfig;
use flightlink::db::PgPool;
use flightlink::job_lock::JobLock;
use flightlink::jobs::{POLL_STATES, StateVectorPollJob};

use super::opensky_source;

pub async fn handle_poll_states(config: &PipelineConfig, pool: PgPool) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", POLL_STATES);
    });

    let _lock = JobLock::acquire(POLL_STATES)
        .context("Failed to acquire job lock - is another state-vector poll running?")?;

    let job = StateVectorPollJob::new(
        opensky_source(config)?,
        pool,
        config.bounding_box,
        config.link_carry_forward_secs,
    );
    let report = job.poll_once().await?;

    info!(
        "Stored {} of {} state vectors at poll time {} ({} rejected)",
        report.stored, report.received, report.poll_time, report.rejected
    );
    Ok(())
}
