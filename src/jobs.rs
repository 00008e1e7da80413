use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::{AggregationReport, DailyAggregator};
use crate::config::BoundingBox;
use crate::db::PgPool;
use crate::feed::{FeedError, MetadataSource, StateVectorSource};
use crate::flight_metadata::MetadataBatch;
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport};
use crate::retention::{RetentionReport, RetentionSweeper};
use crate::scheduler::Job;
use crate::state_vectors::StateVectorBatch;
use crate::state_vectors_repo::StateVectorsRepository;

pub const POLL_STATES: &str = "poll-states";
pub const POLL_METADATA: &str = "poll-metadata";
pub const AGGREGATE: &str = "aggregate";
pub const CLEAN: &str = "clean";

fn record_feed_failure(error: &FeedError, source: &'static str) {
    metrics::counter!("feed.request.failed", "source" => source, "kind" => error.kind())
        .increment(1);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatePollReport {
    pub poll_time: i64,
    pub received: usize,
    pub stored: usize,
    pub rejected: usize,
    pub carried_forward: usize,
}

/// Fetches one state-vector poll and stores it as a new partition
pub struct StateVectorPollJob {
    source: Arc<dyn StateVectorSource>,
    repo: StateVectorsRepository,
    bbox: BoundingBox,
    carry_forward_secs: i64,
}

impl StateVectorPollJob {
    pub fn new(
        source: Arc<dyn StateVectorSource>,
        pool: PgPool,
        bbox: BoundingBox,
        carry_forward_secs: i64,
    ) -> Self {
        Self {
            source,
            repo: StateVectorsRepository::new(pool),
            bbox,
            carry_forward_secs,
        }
    }

    pub async fn poll_once(&self) -> Result<StatePollReport> {
        self.poll_at(Utc::now().timestamp()).await
    }

    pub async fn poll_at(&self, poll_time: i64) -> Result<StatePollReport> {
        let raw = self.source.poll(&self.bbox).await.inspect_err(|e| {
            record_feed_failure(e, "opensky");
        })?;

        let batch = StateVectorBatch::from_raw(poll_time, &raw);
        for (reason, count) in &batch.rejected {
            metrics::counter!("state_vectors.rejected_total", "reason" => reason.as_str())
                .increment(*count as u64);
        }
        if batch.rejected_total() > 0 {
            info!(
                "Rejected {} of {} state vectors: {:?}",
                batch.rejected_total(),
                raw.len(),
                batch.rejected
            );
        }

        let rejected = batch.rejected_total();
        let outcome = self
            .repo
            .insert_batch(batch, self.carry_forward_secs)
            .await
            .context("Failed to store state-vector batch")?;

        metrics::counter!("state_vectors.stored_total").increment(outcome.inserted as u64);
        metrics::gauge!("state_vectors.last_batch_size").set(outcome.inserted as f64);

        let report = StatePollReport {
            poll_time,
            received: raw.len(),
            stored: outcome.inserted,
            rejected,
            carried_forward: outcome.carried_forward,
        };
        info!(
            "State-vector poll {}: stored {} ({} carried forward), rejected {}",
            poll_time, report.stored, report.carried_forward, report.rejected
        );
        Ok(report)
    }
}

#[async_trait]
impl Job for StateVectorPollJob {
    fn name(&self) -> &'static str {
        POLL_STATES
    }

    async fn run(&self) -> Result<()> {
        self.poll_once().await.map(|_| ())
    }
}

/// Fetches one metadata poll and reconciles it against stored state vectors
pub struct MetadataPollJob {
    source: Arc<dyn MetadataSource>,
    engine: ReconciliationEngine,
    bbox: BoundingBox,
}

impl MetadataPollJob {
    pub fn new(source: Arc<dyn MetadataSource>, pool: PgPool, bbox: BoundingBox) -> Self {
        Self {
            source,
            engine: ReconciliationEngine::new(pool),
            bbox,
        }
    }

    pub async fn poll_once(&self) -> Result<ReconciliationReport> {
        self.poll_at(Utc::now().timestamp()).await
    }

    /// A failed fetch aborts before anything is written
    pub async fn poll_at(&self, poll_time: i64) -> Result<ReconciliationReport> {
        let raw = self.source.poll(&self.bbox).await.inspect_err(|e| {
            record_feed_failure(e, "airlabs");
        })?;

        let batch = MetadataBatch::new(poll_time, raw);
        let unmatchable = batch.records.len() - batch.matchable().count();
        if unmatchable > 0 {
            warn!("{} metadata records have no flight_icao", unmatchable);
            metrics::counter!("flight_metadata.unmatchable_total").increment(unmatchable as u64);
        }

        self.engine.reconcile(&batch).await
    }
}

#[async_trait]
impl Job for MetadataPollJob {
    fn name(&self) -> &'static str {
        POLL_METADATA
    }

    async fn run(&self) -> Result<()> {
        self.poll_once().await.map(|_| ())
    }
}

pub struct AggregationJob {
    aggregator: DailyAggregator,
}

impl AggregationJob {
    pub fn new(pool: PgPool, airborne_only: bool) -> Self {
        Self {
            aggregator: DailyAggregator::new(pool, airborne_only),
        }
    }

    pub async fn aggregate(&self) -> Result<AggregationReport> {
        self.aggregator.aggregate().await
    }
}

#[async_trait]
impl Job for AggregationJob {
    fn name(&self) -> &'static str {
        AGGREGATE
    }

    async fn run(&self) -> Result<()> {
        self.aggregate().await.map(|_| ())
    }
}

pub struct RetentionJob {
    sweeper: RetentionSweeper,
    horizon_days: u32,
}

impl RetentionJob {
    pub fn new(pool: PgPool, horizon_days: u32) -> Self {
        Self {
            sweeper: RetentionSweeper::new(pool),
            horizon_days,
        }
    }

    pub async fn clean(&self) -> Result<RetentionReport> {
        self.sweeper.clean(self.horizon_days).await
    }
}

#[async_trait]
impl Job for RetentionJob {
    fn name(&self) -> &'static str {
        CLEAN
    }

    async fn run(&self) -> Result<()> {
        self.clean().await.map(|_| ())
    }
}
