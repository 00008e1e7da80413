use anyhow::Result;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::PgPool;
use crate::flight_metadata::{FlightMetadata, NewFlightMetadata};
use crate::reconciliation::MatchWindow;
use crate::schema::{flight_metadata, state_vectors};
use crate::state_vectors::{NewStateVector, StateVectorBatch, StateVectorRecord};

/// Rows per INSERT statement, well under the Postgres bind parameter limit
const INSERT_CHUNK_SIZE: usize = 1000;

const DELETE_EXPIRED_SQL: &str = r#"
    DELETE FROM state_vectors
    WHERE poll_time < $1
       OR metadata_ref IN (
           SELECT DISTINCT metadata_ref
           FROM state_vectors
           WHERE poll_time < $1 AND metadata_ref IS NOT NULL
       )
"#;

/// Result of storing one state-vector batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub carried_forward: usize,
}

#[derive(Clone)]
pub struct StateVectorsRepository {
    pool: PgPool,
}

impl StateVectorsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a whole batch in one transaction. A callsign inherits the link
    /// of its newest linked row from the last `carry_forward_secs`.
    pub async fn insert_batch(
        &self,
        batch: StateVectorBatch,
        carry_forward_secs: i64,
    ) -> Result<InsertOutcome> {
        if batch.records.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let StateVectorBatch {
                poll_time, records, ..
            } = batch;

            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let mut records = records;
                let mut carried_forward = 0;

                if carry_forward_secs > 0 {
                    let callsigns: Vec<String> =
                        records.iter().map(|r| r.callsign.clone()).collect();
                    // Newest linked row per callsign inside the carry-forward span
                    let links: HashMap<String, Uuid> = state_vectors::table
                        .filter(state_vectors::poll_time.lt(poll_time))
                        .filter(state_vectors::poll_time.ge(poll_time - carry_forward_secs))
                        .filter(state_vectors::callsign.eq_any(callsigns))
                        .filter(state_vectors::metadata_ref.is_not_null())
                        .distinct_on(state_vectors::callsign)
                        .order((state_vectors::callsign.asc(), state_vectors::poll_time.desc()))
                        .select((state_vectors::callsign, state_vectors::metadata_ref))
                        .load::<(String, Option<Uuid>)>(conn)?
                        .into_iter()
                        .filter_map(|(callsign, link)| link.map(|link| (callsign, link)))
                        .collect();

                    for record in records.iter_mut() {
                        if let Some(link) = links.get(&record.callsign) {
                            record.metadata_ref = Some(*link);
                            carried_forward += 1;
                        }
                    }
                }

                let mut inserted = 0;
                for chunk in records.chunks(INSERT_CHUNK_SIZE) {
                    inserted += diesel::insert_into(state_vectors::table)
                        .values(chunk)
                        .execute(conn)?;
                }

                Ok(InsertOutcome {
                    inserted,
                    carried_forward,
                })
            })
        })
        .await?
    }

    /// Unmatched rows inside `window` whose callsign is one of `callsigns`
    pub async fn find_unmatched(
        &self,
        window: MatchWindow,
        callsigns: Vec<String>,
    ) -> Result<Vec<StateVectorRecord>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = state_vectors::table
                .filter(state_vectors::metadata_ref.is_null())
                .filter(state_vectors::poll_time.gt(window.lower_bound()))
                .filter(state_vectors::poll_time.le(window.until))
                .filter(state_vectors::callsign.eq_any(callsigns))
                .order((state_vectors::callsign.asc(), state_vectors::poll_time.asc()))
                .select(StateVectorRecord::as_select())
                .load(&mut conn)?;
            Ok::<Vec<StateVectorRecord>, anyhow::Error>(rows)
        })
        .await?
    }

    /// Insert one metadata row and point every unmatched row of `callsign`
    /// inside `window` at it, atomically. Returns the number of rows linked.
    pub async fn link_callsign(
        &self,
        window: MatchWindow,
        callsign: String,
        metadata: NewFlightMetadata,
    ) -> Result<usize> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let metadata_id: Uuid = diesel::insert_into(flight_metadata::table)
                    .values(&metadata)
                    .returning(flight_metadata::id)
                    .get_result(conn)?;

                let linked = diesel::update(
                    state_vectors::table
                        .filter(state_vectors::metadata_ref.is_null())
                        .filter(state_vectors::callsign.eq(&callsign))
                        .filter(state_vectors::poll_time.gt(window.lower_bound()))
                        .filter(state_vectors::poll_time.le(window.until)),
                )
                .set(state_vectors::metadata_ref.eq(metadata_id))
                .execute(conn)?;

                debug!(
                    "Linked {} state vectors of {} to metadata {}",
                    linked, callsign, metadata_id
                );
                Ok(linked)
            })
        })
        .await?
    }

    /// Delete every still-unmatched row at or before `until`
    pub async fn delete_unmatched(&self, until: i64) -> Result<usize> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let deleted = diesel::delete(
                state_vectors::table
                    .filter(state_vectors::metadata_ref.is_null())
                    .filter(state_vectors::poll_time.le(until)),
            )
            .execute(&mut conn)?;
            Ok::<usize, anyhow::Error>(deleted)
        })
        .await?
    }

    /// Most recent partition key, if any rows exist
    pub async fn latest_poll_time(&self) -> Result<Option<i64>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let latest: Option<i64> = state_vectors::table
                .select(max(state_vectors::poll_time))
                .first(&mut conn)?;
            Ok::<Option<i64>, anyhow::Error>(latest)
        })
        .await?
    }

    /// Rows of one partition left-joined to their metadata, by callsign.
    /// `callsigns` narrows the result when given.
    pub async fn partition_with_metadata(
        &self,
        poll_time: i64,
        callsigns: Option<Vec<String>>,
    ) -> Result<Vec<(StateVectorRecord, Option<FlightMetadata>)>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = state_vectors::table
                .left_join(flight_metadata::table)
                .filter(state_vectors::poll_time.eq(poll_time))
                .select((
                    StateVectorRecord::as_select(),
                    Option::<FlightMetadata>::as_select(),
                ))
                .order((state_vectors::callsign.asc(), state_vectors::icao24.asc()))
                .into_boxed();

            if let Some(callsigns) = callsigns {
                query = query.filter(state_vectors::callsign.eq_any(callsigns));
            }

            let rows = query.load::<(StateVectorRecord, Option<FlightMetadata>)>(&mut conn)?;
            Ok::<_, anyhow::Error>(rows)
        })
        .await?
    }

    /// Observations of `callsign` since `since`, oldest first
    pub async fn positions_for_callsign(
        &self,
        callsign: String,
        since: i64,
    ) -> Result<Vec<StateVectorRecord>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = state_vectors::table
                .filter(state_vectors::callsign.eq(&callsign))
                .filter(state_vectors::poll_time.ge(since))
                .order(state_vectors::poll_time.asc())
                .select(StateVectorRecord::as_select())
                .load(&mut conn)?;
            Ok::<Vec<StateVectorRecord>, anyhow::Error>(rows)
        })
        .await?
    }

    /// Every row linked to `metadata_id`, oldest first
    pub async fn find_by_metadata_ref(&self, metadata_id: Uuid) -> Result<Vec<StateVectorRecord>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let rows = state_vectors::table
                .filter(state_vectors::metadata_ref.eq(metadata_id))
                .order(state_vectors::poll_time.asc())
                .select(StateVectorRecord::as_select())
                .load(&mut conn)?;
            Ok::<Vec<StateVectorRecord>, anyhow::Error>(rows)
        })
        .await?
    }

    /// Retention: drop rows strictly older than `cutoff`, and every later
    /// row of a flight that was already observed before it. A flight is
    /// either kept whole or removed whole.
    pub async fn delete_expired(&self, cutoff: i64) -> Result<usize> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let deleted = diesel::sql_query(DELETE_EXPIRED_SQL)
                .bind::<BigInt, _>(cutoff)
                .execute(&mut conn)?;
            if deleted > 0 {
                info!("Deleted {} state vectors of flights older than {}", deleted, cutoff);
            }
            Ok::<usize, anyhow::Error>(deleted)
        })
        .await?
    }

    pub async fn count(&self) -> Result<i64> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let total: i64 = state_vectors::table.count().get_result(&mut conn)?;
            Ok::<i64, anyhow::Error>(total)
        })
        .await?
    }

    /// Insert pre-built rows directly, bypassing carry-forward
    pub async fn insert_records(&self, records: Vec<NewStateVector>) -> Result<usize> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let mut inserted = 0;
            for chunk in records.chunks(INSERT_CHUNK_SIZE) {
                inserted += diesel::insert_into(state_vectors::table)
                    .values(chunk)
                    .execute(&mut conn)?;
            }
            Ok::<usize, anyhow::Error>(inserted)
        })
        .await?
    }
}
