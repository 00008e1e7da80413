use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use diesel::upsert::excluded;

use crate::db::PgPool;
use crate::schema::reconciliation_watermarks;

#[derive(Insertable)]
#[diesel(table_name = reconciliation_watermarks)]
struct NewWatermark {
    job_name: String,
    last_poll_time: i64,
    updated_at: chrono::DateTime<Utc>,
}

/// Persisted "last successfully processed poll time" per job
#[derive(Clone)]
pub struct WatermarkRepository {
    pool: PgPool,
}

impl WatermarkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, job: &str) -> Result<Option<i64>> {
        let pool = self.pool.clone();
        let job = job.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let value = reconciliation_watermarks::table
                .find(&job)
                .select(reconciliation_watermarks::last_poll_time)
                .first::<i64>(&mut conn)
                .optional()?;
            Ok::<Option<i64>, anyhow::Error>(value)
        })
        .await?
    }

    /// Move the watermark forward; never moves it backwards
    pub async fn advance(&self, job: &str, poll_time: i64) -> Result<()> {
        let pool = self.pool.clone();
        let row = NewWatermark {
            job_name: job.to_string(),
            last_poll_time: poll_time,
            updated_at: Utc::now(),
        };

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            diesel::insert_into(reconciliation_watermarks::table)
                .values(&row)
                .on_conflict(reconciliation_watermarks::job_name)
                .do_update()
                .set((
                    reconciliation_watermarks::last_poll_time.eq(diesel::dsl::sql::<
                        diesel::sql_types::BigInt,
                    >(
                        "GREATEST(reconciliation_watermarks.last_poll_time, excluded.last_poll_time)",
                    )),
                    reconciliation_watermarks::updated_at
                        .eq(excluded(reconciliation_watermarks::updated_at)),
                ))
                .execute(&mut conn)?;
            Ok::<(), anyhow::Error>(())
        })
        .await?
    }
}
