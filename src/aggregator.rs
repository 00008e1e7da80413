use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

use crate::db::PgPool;
use crate::flight_sessions::{NewFlightSession, SourceWindow};
use crate::flight_sessions_repo::FlightSessionsRepository;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationReport {
    pub window: Option<SourceWindow>,
    pub sessions_written: usize,
    pub complete: usize,
    pub single_observation: usize,
}

/// Collapses linked observations into one session per metadata reference
pub struct DailyAggregator {
    sessions: FlightSessionsRepository,
    airborne_only: bool,
}

impl DailyAggregator {
    pub fn new(pool: PgPool, airborne_only: bool) -> Self {
        Self {
            sessions: FlightSessionsRepository::new(pool),
            airborne_only,
        }
    }

    /// Recompute and upsert every session. Safe to re-run.
    pub async fn aggregate(&self) -> Result<AggregationReport> {
        let start = Instant::now();

        let Some((window, aggregates)) = self
            .sessions
            .collect_aggregates(self.airborne_only)
            .await
            .context("Failed to aggregate observations")?
        else {
            info!("No linked observations to aggregate");
            return Ok(AggregationReport::default());
        };

        let sessions: Vec<NewFlightSession> = aggregates
            .into_iter()
            .map(|aggregate| NewFlightSession::from_aggregate(aggregate, &window))
            .collect();

        let report = AggregationReport {
            window: Some(window),
            sessions_written: sessions.len(),
            complete: sessions.iter().filter(|s| s.complete).count(),
            single_observation: sessions
                .iter()
                .filter(|s| s.observation_count <= 1)
                .count(),
        };

        self.sessions
            .upsert_sessions(sessions)
            .await
            .context("Failed to upsert flight sessions")?;

        metrics::counter!("aggregation.sessions_written_total")
            .increment(report.sessions_written as u64);
        metrics::histogram!("aggregation.duration_ms").record(start.elapsed().as_millis() as f64);

        info!(
            "Aggregated {} sessions over [{}, {}] ({} complete, {} single-observation)",
            report.sessions_written,
            window.min_poll_time,
            window.max_poll_time,
            report.complete,
            report.single_observation
        );

        Ok(report)
    }
}
