use anyhow::{Context, Result};
use tracing::info;

use flightlink::config::PipelineConfig;
use flightlink::db::PgPool;
use flightlink::job_lock::JobLock;
use flightlink::jobs::{CLEAN, RetentionJob};

pub async fn handle_clean(config: &PipelineConfig, pool: PgPool, days: Option<u32>) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", CLEAN);
    });

    let _lock = JobLock::acquire(CLEAN)
        .context("Failed to acquire job lock - is another retention sweep running?")?;

    let horizon_days = days.unwrap_or(config.retention_days);
    let report = RetentionJob::new(pool, horizon_days).clean().await?;

    info!(
        "Retention sweep with a {}-day horizon removed {} records",
        horizon_days,
        report.total()
    );
    Ok(())
}
