use anyhow::Result;
use diesel::dsl::max;
use diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::db::PgPool;
use crate::flight_metadata::FlightMetadata;
use crate::schema::flight_metadata;

#[derive(Clone)]
pub struct FlightMetadataRepository {
    pool: PgPool,
}

impl FlightMetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Poll time of the newest stored metadata batch
    pub async fn latest_poll_time(&self) -> Result<Option<i64>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let latest: Option<i64> = flight_metadata::table
                .select(max(flight_metadata::poll_time))
                .first(&mut conn)?;
            Ok::<Option<i64>, anyhow::Error>(latest)
        })
        .await?
    }

    pub async fn get(&self, metadata_id: Uuid) -> Result<Option<FlightMetadata>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let row = flight_metadata::table
                .find(metadata_id)
                .select(FlightMetadata::as_select())
                .first(&mut conn)
                .optional()?;
            Ok::<Option<FlightMetadata>, anyhow::Error>(row)
        })
        .await?
    }

    /// Every row stored for `flight_icao`, newest first
    pub async fn find_by_flight_icao(&self, flight_icao: String) -> Result<Vec<FlightMetadata>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = flight_metadata::table
                .filter(flight_metadata::flight_icao.eq(&flight_icao))
                .order(flight_metadata::poll_time.desc())
                .select(FlightMetadata::as_select())
                .load(&mut conn)?;
            Ok::<Vec<FlightMetadata>, anyhow::Error>(rows)
        })
        .await?
    }

    /// Retention: drop batches strictly older than `cutoff`.
    /// Rows still pointing at them fall back to unmatched.
    pub async fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let deleted = diesel::delete(
                flight_metadata::table.filter(flight_metadata::poll_time.lt(cutoff)),
            )
            .execute(&mut conn)?;
            if deleted > 0 {
                info!("Deleted {} metadata rows older than {}", deleted, cutoff);
            }
            Ok::<usize, anyhow::Error>(deleted)
        })
        .await?
    }

    pub async fn count(&self) -> Result<i64> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let total: i64 = flight_metadata::table.count().get_result(&mut conn)?;
            Ok::<i64, anyhow::Error>(total)
        })
        .await?
    }
}
