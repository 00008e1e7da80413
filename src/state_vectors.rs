use chrono::{DateTime, Local, TimeZone, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Display format for `observed_at`
pub const OBSERVED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One aircraft observation as the state-vector feed reports it, before validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStateVector {
    pub icao24: Option<String>,
    pub callsign: Option<String>,
    pub origin_country: Option<String>,
    pub time_position: Option<i64>,
    pub last_contact: Option<i64>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub baro_altitude: Option<f64>,
    pub on_ground: Option<bool>,
    pub velocity: Option<f64>,
    pub true_track: Option<f64>,
    pub vertical_rate: Option<f64>,
    pub geo_altitude: Option<f64>,
}

/// Why an observation was not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Error)]
pub enum RejectReason {
    #[error("missing icao24")]
    MissingIcao24,
    #[error("missing callsign")]
    MissingCallsign,
    #[error("missing longitude")]
    MissingLongitude,
    #[error("missing latitude")]
    MissingLatitude,
}

impl RejectReason {
    /// Metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingIcao24 => "icao24",
            Self::MissingCallsign => "callsign",
            Self::MissingLongitude => "longitude",
            Self::MissingLatitude => "latitude",
        }
    }
}

/// Insertable row for the `state_vectors` table
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::state_vectors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewStateVector {
    pub id: Uuid,
    pub poll_time: i64,
    pub observed_at: String,
    pub icao24: String,
    pub callsign: String,
    pub origin_country: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub baro_altitude: Option<f64>,
    pub geo_altitude: Option<f64>,
    pub velocity: Option<f64>,
    pub heading: f64,
    pub vertical_rate: Option<f64>,
    pub on_ground: bool,
    pub time_position: Option<i64>,
    pub last_contact: Option<i64>,
    pub metadata_ref: Option<Uuid>,
}

/// A stored state-vector row
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::state_vectors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StateVectorRecord {
    pub id: Uuid,
    pub poll_time: i64,
    pub observed_at: String,
    pub icao24: String,
    pub callsign: String,
    pub origin_country: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub baro_altitude: Option<f64>,
    pub geo_altitude: Option<f64>,
    pub velocity: Option<f64>,
    pub heading: f64,
    pub vertical_rate: Option<f64>,
    pub on_ground: bool,
    pub time_position: Option<i64>,
    pub last_contact: Option<i64>,
    pub metadata_ref: Option<Uuid>,
}

/// Render a poll time the way `observed_at` is stored, in the given zone
pub fn format_observed_at_in<Tz>(poll_time: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    DateTime::<Utc>::from_timestamp(poll_time, 0)
        .unwrap_or_default()
        .with_timezone(tz)
        .format(OBSERVED_AT_FORMAT)
        .to_string()
}

/// Render a poll time in the host's local zone
pub fn format_observed_at(poll_time: i64) -> String {
    format_observed_at_in(poll_time, &Local)
}

/// Trim and uppercase an identifier, treating blank as absent
pub fn normalize_identifier(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

impl RawStateVector {
    /// Validate and normalise into a storable row
    pub fn normalize(
        &self,
        poll_time: i64,
        observed_at: &str,
    ) -> Result<NewStateVector, RejectReason> {
        let icao24 =
            normalize_identifier(self.icao24.as_deref()).ok_or(RejectReason::MissingIcao24)?;
        let callsign =
            normalize_identifier(self.callsign.as_deref()).ok_or(RejectReason::MissingCallsign)?;
        let longitude = self
            .longitude
            .filter(|v| v.is_finite())
            .ok_or(RejectReason::MissingLongitude)?;
        let latitude = self
            .latitude
            .filter(|v| v.is_finite())
            .ok_or(RejectReason::MissingLatitude)?;

        Ok(NewStateVector {
            id: Uuid::now_v7(),
            poll_time,
            observed_at: observed_at.to_string(),
            icao24,
            callsign,
            origin_country: self
                .origin_country
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            longitude,
            latitude,
            baro_altitude: self.baro_altitude,
            geo_altitude: self.geo_altitude,
            velocity: self.velocity,
            heading: self.true_track.unwrap_or(0.0),
            vertical_rate: self.vertical_rate,
            on_ground: self.on_ground.unwrap_or(false),
            time_position: self.time_position,
            last_contact: self.last_contact,
            metadata_ref: None,
        })
    }
}

/// One state-vector poll, validated and tagged with its poll time
#[derive(Debug, Clone, Default)]
pub struct StateVectorBatch {
    pub poll_time: i64,
    pub records: Vec<NewStateVector>,
    pub rejected: BTreeMap<RejectReason, usize>,
}

impl StateVectorBatch {
    pub fn from_raw(poll_time: i64, raw: &[RawStateVector]) -> Self {
        Self::from_raw_with_observed_at(poll_time, &format_observed_at(poll_time), raw)
    }

    pub fn from_raw_with_observed_at(
        poll_time: i64,
        observed_at: &str,
        raw: &[RawStateVector],
    ) -> Self {
        let mut batch = Self {
            poll_time,
            ..Default::default()
        };

        for observation in raw {
            match observation.normalize(poll_time, observed_at) {
                Ok(record) => batch.records.push(record),
                Err(reason) => *batch.rejected.entry(reason).or_insert(0) += 1,
            }
        }

        batch
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
