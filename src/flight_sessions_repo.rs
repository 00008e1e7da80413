use anyhow::Result;
use diesel::dsl::{max, min};
use diesel::prelude::*;
use diesel::sql_types::Bool;
use diesel::upsert::excluded;
use tracing::info;
use uuid::Uuid;

use crate::db::PgPool;
use crate::flight_sessions::{
    FlightSession, MIN_REPORTABLE_OBSERVATIONS, NewFlightSession, SessionAggregate,
    SessionFilter, SourceWindow,
};
use crate::schema::{flight_sessions, state_vectors};

/// Rows per upsert statement
const UPSERT_CHUNK_SIZE: usize = 1000;

/// Groups linked observations by metadata reference. First/last poll time
/// follow callsign-then-time ordering; metadata fields come from the joined row.
const AGGREGATE_SQL: &str = r#"
    SELECT sv.metadata_ref AS session_id,
           (array_agg(sv.callsign ORDER BY sv.callsign, sv.poll_time))[1] AS callsign,
           (array_agg(sv.poll_time ORDER BY sv.callsign, sv.poll_time))[1] AS time_start,
           (array_agg(sv.poll_time ORDER BY sv.callsign DESC, sv.poll_time DESC))[1] AS time_end,
           COUNT(*) AS observation_count,
           fm.flight_iata,
           fm.flight_number,
           fm.airline_iata,
           fm.airline_icao,
           fm.dep_iata,
           fm.dep_icao,
           fm.arr_iata,
           fm.arr_icao,
           fm.aircraft_icao,
           fm.aircraft_registration,
           fm.aircraft_flag
    FROM state_vectors sv
    JOIN flight_metadata fm ON fm.id = sv.metadata_ref
    WHERE ($1 = FALSE OR sv.on_ground = FALSE)
    GROUP BY sv.metadata_ref, fm.id
    ORDER BY time_start
"#;

#[derive(Clone)]
pub struct FlightSessionsRepository {
    pool: PgPool,
}

impl FlightSessionsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Source window and one aggregate per metadata reference, read from a
    /// single snapshot so completeness is judged against the rows aggregated.
    /// `None` when nothing is linked yet.
    pub async fn collect_aggregates(
        &self,
        airborne_only: bool,
    ) -> Result<Option<(SourceWindow, Vec<SessionAggregate>)>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.build_transaction()
                .repeatable_read()
                .read_only()
                .run::<_, anyhow::Error, _>(|conn| {
                    let mut query = state_vectors::table
                        .filter(state_vectors::metadata_ref.is_not_null())
                        .select((min(state_vectors::poll_time), max(state_vectors::poll_time)))
                        .into_boxed();
                    if airborne_only {
                        query = query.filter(state_vectors::on_ground.eq(false));
                    }

                    let (lo, hi): (Option<i64>, Option<i64>) = query.first(conn)?;
                    let Some((min_poll_time, max_poll_time)) = lo.zip(hi) else {
                        return Ok(None);
                    };

                    let aggregates: Vec<SessionAggregate> = diesel::sql_query(AGGREGATE_SQL)
                        .bind::<Bool, _>(airborne_only)
                        .load(conn)?;

                    Ok(Some((
                        SourceWindow {
                            min_poll_time,
                            max_poll_time,
                        },
                        aggregates,
                    )))
                })
        })
        .await?
    }

    /// Insert or refresh sessions by `session_id`. Every field, `complete`
    /// included, is recomputed on each run.
    pub async fn upsert_sessions(&self, sessions: Vec<NewFlightSession>) -> Result<usize> {
        if sessions.is_empty() {
            return Ok(0);
        }

        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let mut written = 0;
                for chunk in sessions.chunks(UPSERT_CHUNK_SIZE) {
                    written += diesel::insert_into(flight_sessions::table)
                        .values(chunk)
                        .on_conflict(flight_sessions::session_id)
                        .do_update()
                        .set((
                            flight_sessions::callsign.eq(excluded(flight_sessions::callsign)),
                            flight_sessions::time_start.eq(excluded(flight_sessions::time_start)),
                            flight_sessions::time_end.eq(excluded(flight_sessions::time_end)),
                            flight_sessions::observation_count
                                .eq(excluded(flight_sessions::observation_count)),
                            flight_sessions::complete.eq(excluded(flight_sessions::complete)),
                            flight_sessions::flight_iata.eq(excluded(flight_sessions::flight_iata)),
                            flight_sessions::flight_number
                                .eq(excluded(flight_sessions::flight_number)),
                            flight_sessions::airline_iata
                                .eq(excluded(flight_sessions::airline_iata)),
                            flight_sessions::airline_icao
                                .eq(excluded(flight_sessions::airline_icao)),
                            flight_sessions::dep_iata.eq(excluded(flight_sessions::dep_iata)),
                            flight_sessions::dep_icao.eq(excluded(flight_sessions::dep_icao)),
                            flight_sessions::arr_iata.eq(excluded(flight_sessions::arr_iata)),
                            flight_sessions::arr_icao.eq(excluded(flight_sessions::arr_icao)),
                            flight_sessions::aircraft_icao
                                .eq(excluded(flight_sessions::aircraft_icao)),
                            flight_sessions::aircraft_registration
                                .eq(excluded(flight_sessions::aircraft_registration)),
                            flight_sessions::aircraft_flag
                                .eq(excluded(flight_sessions::aircraft_flag)),
                            flight_sessions::updated_at.eq(excluded(flight_sessions::updated_at)),
                        ))
                        .execute(conn)?;
                }
                Ok(written)
            })
        })
        .await?
    }

    /// Reporting query: only sessions with more than one observation that
    /// were not cut off by an aggregation window.
    pub async fn query(&self, filter: SessionFilter) -> Result<Vec<FlightSession>> {
        let pool = self.pool.clone();
        let filter = filter.normalized();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = flight_sessions::table
                .filter(flight_sessions::observation_count.gt(MIN_REPORTABLE_OBSERVATIONS))
                .filter(flight_sessions::complete.eq(true))
                .select(FlightSession::as_select())
                .order(flight_sessions::time_start.desc())
                .into_boxed();

            if let Some((start, end)) = filter.day_bounds() {
                query = query
                    .filter(flight_sessions::time_start.ge(start))
                    .filter(flight_sessions::time_start.lt(end));
            }
            if let Some(callsign) = filter.callsign {
                query = query.filter(flight_sessions::callsign.eq(callsign));
            }
            if let Some(dep_iata) = filter.dep_iata {
                query = query.filter(flight_sessions::dep_iata.eq(dep_iata));
            }
            if let Some(arr_iata) = filter.arr_iata {
                query = query.filter(flight_sessions::arr_iata.eq(arr_iata));
            }
            if let Some(airline_iata) = filter.airline_iata {
                query = query.filter(flight_sessions::airline_iata.eq(airline_iata));
            }
            if let Some(aircraft_icao) = filter.aircraft_icao {
                query = query.filter(flight_sessions::aircraft_icao.eq(aircraft_icao));
            }

            let rows = query.load(&mut conn)?;
            Ok::<Vec<FlightSession>, anyhow::Error>(rows)
        })
        .await?
    }

    /// Raw lookup, no reporting filter applied
    pub async fn get(&self, session_id: Uuid) -> Result<Option<FlightSession>> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let row = flight_sessions::table
                .find(session_id)
                .select(FlightSession::as_select())
                .first(&mut conn)
                .optional()?;
            Ok::<Option<FlightSession>, anyhow::Error>(row)
        })
        .await?
    }

    /// Retention: drop sessions that started strictly before `cutoff`
    pub async fn delete_older_than(&self, cutoff: i64) -> Result<usize> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let deleted = diesel::delete(
                flight_sessions::table.filter(flight_sessions::time_start.lt(cutoff)),
            )
            .execute(&mut conn)?;
            if deleted > 0 {
                info!("Deleted {} flight sessions older than {}", deleted, cutoff);
            }
            Ok::<usize, anyhow::Error>(deleted)
        })
        .await?
    }

    pub async fn count(&self) -> Result<i64> {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            let total: i64 = flight_sessions::table.count().get_result(&mut conn)?;
            Ok::<i64, anyhow::Error>(total)
        })
        .await?
    }
}
