//! flightlink - live flight data pipeline
//!
//! Polls aircraft state vectors and flight schedule metadata from two
//! upstream feeds, links them by callsign, serves the live picture to a
//! dashboard and folds the linked history into daily flight sessions.

pub mod aggregator;
pub mod airlabs_client;
pub mod config;
pub mod db;
pub mod feed;
pub mod flight_metadata;
pub mod flight_metadata_repo;
pub mod flight_sessions;
pub mod flight_sessions_repo;
pub mod job_lock;
pub mod jobs;
pub mod live_flights;
pub mod metrics;
pub mod opensky_client;
pub mod reconciliation;
pub mod reference_data;
pub mod retention;
pub mod scheduler;
pub mod schema;
pub mod state_vectors;
pub mod state_vectors_repo;
pub mod watermark_repo;
pub mod web;

pub use live_flights::{LiveFlight, LiveFlightStore, Snapshot};
pub use reconciliation::{ReconciliationEngine, ReconciliationReport};
