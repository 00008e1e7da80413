use anyhow::{Context, Result};
use tracing::info;

use flightlink::config::PipelineConfig;
use flightlink::db::PgPool;
use flightlink::job_lock::JobLock;
use flightlink::jobs::{AGGREGATE, AggregationJob};

pub async fn handle_aggregate(config: &PipelineConfig, pool: PgPool) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", AGGREGATE);
    });

    let _lock = JobLock::acquire(AGGREGATE)
        .context("Failed to acquire job lock - is another aggregation running?")?;

    let report = AggregationJob::new(pool, config.aggregate_airborne_only)
        .aggregate()
        .await?;

    info!(
        "Aggregation wrote {} sessions ({} complete)",
        report.sessions_written, report.complete
    );
    Ok(())
}
