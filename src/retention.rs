use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::PgPool;
use crate::flight_metadata_repo::FlightMetadataRepository;
use crate::flight_sessions_repo::FlightSessionsRepository;
use crate::state_vectors_repo::StateVectorsRepository;

/// Unix-second cutoff: anything strictly older is expired
pub fn retention_cutoff(now: DateTime<Utc>, horizon_days: u32) -> i64 {
    (now - Duration::days(i64::from(horizon_days))).timestamp()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub cutoff: i64,
    pub flight_sessions: usize,
    pub state_vectors: usize,
    pub flight_metadata: usize,
}

impl RetentionReport {
    pub fn total(&self) -> usize {
        self.flight_sessions + self.state_vectors + self.flight_metadata
    }
}

/// Deletes expired rows from all three stores. Each delete is a single
/// statement, so ingestion is never blocked for longer than one of them.
pub struct RetentionSweeper {
    state_vectors: StateVectorsRepository,
    metadata: FlightMetadataRepository,
    sessions: FlightSessionsRepository,
}

impl RetentionSweeper {
    pub fn new(pool: PgPool) -> Self {
        Self {
            state_vectors: StateVectorsRepository::new(pool.clone()),
            metadata: FlightMetadataRepository::new(pool.clone()),
            sessions: FlightSessionsRepository::new(pool),
        }
    }

    pub async fn clean(&self, horizon_days: u32) -> Result<RetentionReport> {
        self.clean_at(Utc::now(), horizon_days).await
    }

    pub async fn clean_at(&self, now: DateTime<Utc>, horizon_days: u32) -> Result<RetentionReport> {
        let cutoff = retention_cutoff(now, horizon_days);

        let flight_sessions = self
            .sessions
            .delete_older_than(cutoff)
            .await
            .context("Failed to expire flight sessions")?;
        let state_vectors = self
            .state_vectors
            .delete_expired(cutoff)
            .await
            .context("Failed to expire state vectors")?;
        // After state vectors, so fewer rows need their reference nulled
        let flight_metadata = self
            .metadata
            .delete_older_than(cutoff)
            .await
            .context("Failed to expire flight metadata")?;

        let report = RetentionReport {
            cutoff,
            flight_sessions,
            state_vectors,
            flight_metadata,
        };

        metrics::counter!("retention.deleted_total", "store" => "flight_sessions")
            .increment(flight_sessions as u64);
        metrics::counter!("retention.deleted_total", "store" => "state_vectors")
            .increment(state_vectors as u64);
        metrics::counter!("retention.deleted_total", "store" => "flight_metadata")
            .increment(flight_metadata as u64);

        info!(
            "Retention ({} days, cutoff {}): removed {} sessions, {} state vectors, {} metadata rows",
            horizon_days, cutoff, flight_sessions, state_vectors, flight_metadata
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cutoff_is_horizon_days_before_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap().timestamp();
        assert_eq!(retention_cutoff(now, 7), expected);
        assert_eq!(retention_cutoff(now, 10), expected - 3 * 86_400);
    }

    #[test]
    fn test_report_total() {
        let report = RetentionReport {
            cutoff: 0,
            flight_sessions: 1,
            state_vectors: 20,
            flight_metadata: 3,
        };
        assert_eq!(report.total(), 24);
    }
}
