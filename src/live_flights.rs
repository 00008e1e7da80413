//! Read side of the pipeline: what the dashboard and reporting API query.
//!
//! Nothing is cached in process; every call reads the newest committed
//! partition, so any number of readers can run alongside ingestion.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::db::PgPool;
use crate::flight_metadata::FlightMetadata;
use crate::flight_sessions::{FlightSession, SessionFilter};
use crate::flight_sessions_repo::FlightSessionsRepository;
use crate::reference_data::{ReferenceCatalog, RouteDetails};
use crate::state_vectors::StateVectorRecord;
use crate::state_vectors_repo::StateVectorsRepository;

/// How far back a track reaches
pub const POSITION_HISTORY_SECS: i64 = 24 * 3600;

/// One aircraft at the latest poll; metadata is absent until matched
#[derive(Debug, Clone, Serialize)]
pub struct LiveFlight {
    #[serde(flatten)]
    pub state: StateVectorRecord,
    pub metadata: Option<FlightMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteDetails>,
}

/// All aircraft of one partition
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// `None` when nothing has been stored yet
    pub poll_time: Option<i64>,
    pub flights: Vec<LiveFlight>,
}

impl Snapshot {
    pub fn callsigns(&self) -> BTreeSet<String> {
        self.flights.iter().map(|f| f.state.callsign.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

#[derive(Clone)]
pub struct LiveFlightStore {
    state_vectors: StateVectorsRepository,
    sessions: FlightSessionsRepository,
    catalog: Option<Arc<dyn ReferenceCatalog>>,
}

impl LiveFlightStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            state_vectors: StateVectorsRepository::new(pool.clone()),
            sessions: FlightSessionsRepository::new(pool),
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ReferenceCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    fn to_live(&self, rows: Vec<(StateVectorRecord, Option<FlightMetadata>)>) -> Vec<LiveFlight> {
        rows.into_iter()
            .map(|(state, metadata)| {
                let route = match (&self.catalog, &metadata) {
                    (Some(catalog), Some(metadata)) => {
                        Some(RouteDetails::resolve(catalog.as_ref(), metadata))
                    }
                    _ => None,
                };
                LiveFlight {
                    state,
                    metadata,
                    route,
                }
            })
            .collect()
    }

    /// Every aircraft at the newest poll, matched or not
    pub async fn get_current_snapshot(&self) -> Result<Snapshot> {
        let Some(poll_time) = self.state_vectors.latest_poll_time().await? else {
            return Ok(Snapshot::default());
        };

        let rows = self
            .state_vectors
            .partition_with_metadata(poll_time, None)
            .await?;
        debug!("Snapshot at {}: {} aircraft", poll_time, rows.len());

        Ok(Snapshot {
            poll_time: Some(poll_time),
            flights: self.to_live(rows),
        })
    }

    /// The newest poll narrowed to callsigns the client already shows.
    /// Aircraft that disappeared are simply absent.
    pub async fn get_incremental_update(&self, previous_callsigns: &[String]) -> Result<Snapshot> {
        let Some(poll_time) = self.state_vectors.latest_poll_time().await? else {
            return Ok(Snapshot::default());
        };

        let callsigns: Vec<String> = previous_callsigns
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if callsigns.is_empty() {
            return Ok(Snapshot {
                poll_time: Some(poll_time),
                flights: Vec::new(),
            });
        }

        let rows = self
            .state_vectors
            .partition_with_metadata(poll_time, Some(callsigns))
            .await?;

        Ok(Snapshot {
            poll_time: Some(poll_time),
            flights: self.to_live(rows),
        })
    }

    /// Track of one callsign over the last day, oldest first
    pub async fn get_flight_positions(&self, callsign: &str) -> Result<Vec<StateVectorRecord>> {
        let since = Utc::now().timestamp() - POSITION_HISTORY_SECS;
        self.state_vectors
            .positions_for_callsign(callsign.trim().to_uppercase(), since)
            .await
    }

    /// Reportable sessions matching `filter`
    pub async fn get_flight_sessions(&self, filter: SessionFilter) -> Result<Vec<FlightSession>> {
        self.sessions.query(filter).await
    }
}
