//! Joins metadata batches onto stored state vectors by callsign.
//!
//! A cycle reads the watermark left by the previous successful cycle and
//! caps the window at `batch.poll_time` or the newest partition already
//! committed when the cycle began, whichever is older. It links every
//! unmatched state vector in `(watermark, until]` whose callsign appears in
//! the batch, deletes every state vector up to `until` that is still
//! unmatched, then advances the watermark to `until`. A state poll that
//! commits mid-cycle is left for the next one.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::db::PgPool;
use crate::flight_metadata::{MetadataBatch, RawFlightMetadata};
use crate::flight_metadata_repo::FlightMetadataRepository;
use crate::state_vectors::StateVectorRecord;
use crate::state_vectors_repo::StateVectorsRepository;
use crate::watermark_repo::WatermarkRepository;

/// Watermark row owned by the metadata reconciliation job
pub const WATERMARK_KEY: &str = "metadata_poll";

/// Join key to metadata, last write wins
#[derive(Debug, Default)]
pub struct MetadataLookup<'a> {
    by_key: HashMap<String, &'a RawFlightMetadata>,
}

impl<'a> MetadataLookup<'a> {
    pub fn build(records: impl IntoIterator<Item = &'a RawFlightMetadata>) -> Self {
        let mut by_key = HashMap::new();
        for record in records {
            if let Some(key) = record.join_key() {
                by_key.insert(key, record);
            }
        }
        Self { by_key }
    }

    pub fn get(&self, key: &str) -> Option<&'a RawFlightMetadata> {
        self.by_key.get(key).copied()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Poll-time range of unmatched state vectors eligible for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchWindow {
    /// Exclusive lower edge; `None` in initialization mode
    pub after: Option<i64>,
    /// Inclusive upper edge
    pub until: i64,
}

impl MatchWindow {
    pub fn new(after: Option<i64>, until: i64) -> Self {
        Self { after, until }
    }

    /// Window for a batch polled at `batch_poll_time`, given the newest
    /// partition committed before the cycle started
    pub fn for_batch(after: Option<i64>, batch_poll_time: i64, stored_until: Option<i64>) -> Self {
        let until = stored_until.map_or(batch_poll_time, |stored| stored.min(batch_poll_time));
        Self::new(after, until)
    }

    pub fn is_initialization(&self) -> bool {
        self.after.is_none()
    }

    /// Exclusive lower bound usable directly in a query
    pub fn lower_bound(&self) -> i64 {
        self.after.unwrap_or(i64::MIN)
    }

    pub fn contains(&self, poll_time: i64) -> bool {
        poll_time > self.lower_bound() && poll_time <= self.until
    }
}

/// One callsign to link, with the state vectors it will cover
#[derive(Debug, Clone)]
pub struct PlannedMatch<'a> {
    pub callsign: String,
    pub metadata: &'a RawFlightMetadata,
    pub state_vector_count: usize,
}

/// Group unmatched rows by callsign and pair each group with its metadata.
/// Sorted by callsign.
pub fn plan_matches<'a>(
    lookup: &MetadataLookup<'a>,
    window: &MatchWindow,
    unmatched: &[StateVectorRecord],
) -> Vec<PlannedMatch<'a>> {
    let mut groups: BTreeMap<&str, usize> = BTreeMap::new();
    for record in unmatched {
        if record.metadata_ref.is_none() && window.contains(record.poll_time) {
            *groups.entry(record.callsign.as_str()).or_insert(0) += 1;
        }
    }

    groups
        .into_iter()
        .filter_map(|(callsign, count)| {
            lookup.get(callsign).map(|metadata| PlannedMatch {
                callsign: callsign.to_string(),
                metadata,
                state_vector_count: count,
            })
        })
        .collect()
}

/// Outcome of one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub poll_time: i64,
    pub window_until: i64,
    pub initialization: bool,
    pub metadata_received: usize,
    pub metadata_matchable: usize,
    pub candidates: usize,
    pub callsigns_linked: usize,
    pub metadata_inserted: usize,
    pub state_vectors_linked: usize,
    pub unmatched_deleted: usize,
}

pub struct ReconciliationEngine {
    state_vectors: StateVectorsRepository,
    metadata: FlightMetadataRepository,
    watermarks: WatermarkRepository,
}

impl ReconciliationEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            state_vectors: StateVectorsRepository::new(pool.clone()),
            metadata: FlightMetadataRepository::new(pool.clone()),
            watermarks: WatermarkRepository::new(pool),
        }
    }

    /// Lower edge of the next window: the watermark, else the newest stored
    /// metadata poll, else initialization mode.
    pub async fn previous_poll_time(&self) -> Result<Option<i64>> {
        if let Some(watermark) = self.watermarks.get(WATERMARK_KEY).await? {
            return Ok(Some(watermark));
        }
        self.metadata.latest_poll_time().await
    }

    pub async fn reconcile(&self, batch: &MetadataBatch) -> Result<ReconciliationReport> {
        let stored_until = self
            .state_vectors
            .latest_poll_time()
            .await
            .context("Failed to read newest state-vector partition")?;
        self.reconcile_within(batch, stored_until).await
    }

    /// One cycle against the partitions up to `stored_until`
    pub async fn reconcile_within(
        &self,
        batch: &MetadataBatch,
        stored_until: Option<i64>,
    ) -> Result<ReconciliationReport> {
        let start = Instant::now();
        let lookup = MetadataLookup::build(batch.matchable());

        let previous = self
            .previous_poll_time()
            .await
            .context("Failed to read reconciliation watermark")?;

        if let Some(previous) = previous
            && previous >= batch.poll_time
        {
            warn!(
                "Metadata batch at {} is not newer than watermark {}, skipping",
                batch.poll_time, previous
            );
            return Ok(ReconciliationReport {
                poll_time: batch.poll_time,
                metadata_received: batch.records.len(),
                metadata_matchable: lookup.len(),
                ..Default::default()
            });
        }

        let window = MatchWindow::for_batch(previous, batch.poll_time, stored_until);
        if window.is_initialization() {
            info!("No previous metadata batch, reconciling in initialization mode");
        }

        let candidates = if lookup.is_empty() {
            Vec::new()
        } else {
            self.state_vectors
                .find_unmatched(window, lookup.keys())
                .await?
        };
        let plan = plan_matches(&lookup, &window, &candidates);

        debug!(
            "Window {:?}: {} candidate state vectors across {} callsigns",
            window,
            candidates.len(),
            plan.len()
        );

        let mut report = ReconciliationReport {
            poll_time: batch.poll_time,
            window_until: window.until,
            initialization: window.is_initialization(),
            metadata_received: batch.records.len(),
            metadata_matchable: lookup.len(),
            candidates: candidates.len(),
            ..Default::default()
        };

        for planned in &plan {
            let Some(row) = planned
                .metadata
                .to_new_record(batch.poll_time, &batch.observed_at)
            else {
                continue;
            };
            let linked = self
                .state_vectors
                .link_callsign(window, planned.callsign.clone(), row)
                .await
                .with_context(|| format!("Failed to link callsign {}", planned.callsign))?;

            report.metadata_inserted += 1;
            report.callsigns_linked += 1;
            report.state_vectors_linked += linked;
        }

        report.unmatched_deleted = self.state_vectors.delete_unmatched(window.until).await?;

        self.watermarks
            .advance(WATERMARK_KEY, window.until)
            .await
            .context("Failed to advance reconciliation watermark")?;

        metrics::counter!("reconciliation.metadata_inserted_total")
            .increment(report.metadata_inserted as u64);
        metrics::counter!("reconciliation.state_vectors_linked_total")
            .increment(report.state_vectors_linked as u64);
        metrics::counter!("reconciliation.unmatched_deleted_total")
            .increment(report.unmatched_deleted as u64);
        metrics::histogram!("reconciliation.duration_ms").record(start.elapsed().as_millis() as f64);

        info!(
            "Reconciled metadata poll {}: {} callsigns linked, {} state vectors linked, {} unmatched deleted",
            batch.poll_time,
            report.callsigns_linked,
            report.state_vectors_linked,
            report.unmatched_deleted
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn metadata(flight_icao: Option<&str>, dep: &str) -> RawFlightMetadata {
        RawFlightMetadata {
            flight_icao: flight_icao.map(str::to_string),
            dep_iata: Some(dep.to_string()),
            ..Default::default()
        }
    }

    fn record(callsign: &str, poll_time: i64, linked: bool) -> StateVectorRecord {
        StateVectorRecord {
            id: Uuid::now_v7(),
            poll_time,
            observed_at: String::new(),
            icao24: "ABC123".to_string(),
            callsign: callsign.to_string(),
            origin_country: None,
            longitude: 2.0,
            latitude: 48.0,
            baro_altitude: None,
            geo_altitude: None,
            velocity: None,
            heading: 0.0,
            vertical_rate: None,
            on_ground: false,
            time_position: None,
            last_contact: None,
            metadata_ref: linked.then(Uuid::now_v7),
        }
    }

    #[test]
    fn test_lookup_skips_empty_keys_and_last_write_wins() {
        let records = vec![
            metadata(Some("AFR123"), "CDG"),
            metadata(None, "ORY"),
            metadata(Some(""), "LYS"),
            metadata(Some("afr123"), "NCE"),
        ];

        let lookup = MetadataLookup::build(&records);

        assert_eq!(lookup.len(), 1);
        assert_eq!(lookup.keys(), vec!["AFR123".to_string()]);
        assert_eq!(
            lookup.get("AFR123").and_then(|m| m.dep_iata.as_deref()),
            Some("NCE")
        );
    }

    #[test]
    fn test_window_bounds() {
        let window = MatchWindow::new(Some(100), 200);
        assert!(!window.contains(100));
        assert!(window.contains(101));
        assert!(window.contains(200));
        assert!(!window.contains(201));
        assert!(!window.is_initialization());

        let init = MatchWindow::new(None, 200);
        assert!(init.is_initialization());
        assert!(init.contains(i64::MIN + 1));
        assert!(init.contains(0));
        assert!(!init.contains(201));
    }

    #[test]
    fn test_window_capped_at_newest_stored_partition() {
        assert_eq!(MatchWindow::for_batch(Some(100), 500, Some(470)).until, 470);
        assert_eq!(MatchWindow::for_batch(Some(100), 500, Some(530)).until, 500);
        assert_eq!(MatchWindow::for_batch(None, 500, None), MatchWindow::new(None, 500));
    }

    #[test]
    fn test_plan_groups_by_callsign() {
        let records = vec![metadata(Some("AFR123"), "CDG"), metadata(Some("BAW9"), "LHR")];
        let lookup = MetadataLookup::build(&records);
        let window = MatchWindow::new(Some(0), 1000);
        let unmatched = vec![
            record("AFR123", 100, false),
            record("AFR123", 130, false),
            record("XYZ999", 130, false),
            record("BAW9", 160, false),
        ];

        let plan = plan_matches(&lookup, &window, &unmatched);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].callsign, "AFR123");
        assert_eq!(plan[0].state_vector_count, 2);
        assert_eq!(plan[0].metadata.dep_iata.as_deref(), Some("CDG"));
        assert_eq!(plan[1].callsign, "BAW9");
        assert_eq!(plan[1].state_vector_count, 1);
    }

    #[test]
    fn test_plan_ignores_linked_and_out_of_window_rows() {
        let records = vec![metadata(Some("AFR123"), "CDG")];
        let lookup = MetadataLookup::build(&records);
        let window = MatchWindow::new(Some(100), 200);
        let unmatched = vec![
            record("AFR123", 100, false),
            record("AFR123", 150, true),
            record("AFR123", 250, false),
        ];

        assert!(plan_matches(&lookup, &window, &unmatched).is_empty());
    }
}
