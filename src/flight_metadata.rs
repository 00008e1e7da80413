use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::state_vectors::{format_observed_at, normalize_identifier};

/// One scheduled-flight descriptor as the metadata feed reports it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFlightMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub hex: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reg_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub flag: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub flight_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub flight_icao: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub flight_iata: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dep_icao: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub dep_iata: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub arr_icao: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub arr_iata: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub airline_icao: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub airline_iata: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub aircraft_icao: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
}

/// Accept strings or numbers, map blanks and null to `None`
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl RawFlightMetadata {
    /// Join key, or `None` when the record can never be matched
    pub fn join_key(&self) -> Option<String> {
        normalize_identifier(self.flight_icao.as_deref())
    }

    /// Build a fresh row for storage; `None` for records without a join key
    pub fn to_new_record(&self, poll_time: i64, observed_at: &str) -> Option<NewFlightMetadata> {
        let flight_icao = self.join_key()?;
        Some(NewFlightMetadata {
            id: Uuid::now_v7(),
            poll_time,
            observed_at: observed_at.to_string(),
            hex: normalize_identifier(self.hex.as_deref()),
            flight_icao,
            flight_iata: normalize_identifier(self.flight_iata.as_deref()),
            flight_number: self.flight_number.clone(),
            airline_iata: normalize_identifier(self.airline_iata.as_deref()),
            airline_icao: normalize_identifier(self.airline_icao.as_deref()),
            dep_iata: normalize_identifier(self.dep_iata.as_deref()),
            dep_icao: normalize_identifier(self.dep_icao.as_deref()),
            arr_iata: normalize_identifier(self.arr_iata.as_deref()),
            arr_icao: normalize_identifier(self.arr_icao.as_deref()),
            aircraft_icao: normalize_identifier(self.aircraft_icao.as_deref()),
            aircraft_registration: self.reg_number.clone(),
            aircraft_flag: normalize_identifier(self.flag.as_deref()),
            status: self.status.clone(),
        })
    }
}

/// Insertable row for the `flight_metadata` table
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::flight_metadata)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewFlightMetadata {
    pub id: Uuid,
    pub poll_time: i64,
    pub observed_at: String,
    pub hex: Option<String>,
    pub flight_icao: String,
    pub flight_iata: Option<String>,
    pub flight_number: Option<String>,
    pub airline_iata: Option<String>,
    pub airline_icao: Option<String>,
    pub dep_iata: Option<String>,
    pub dep_icao: Option<String>,
    pub arr_iata: Option<String>,
    pub arr_icao: Option<String>,
    pub aircraft_icao: Option<String>,
    pub aircraft_registration: Option<String>,
    pub aircraft_flag: Option<String>,
    pub status: Option<String>,
}

/// A stored metadata row
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::flight_metadata)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightMetadata {
    pub id: Uuid,
    pub poll_time: i64,
    pub observed_at: String,
    pub hex: Option<String>,
    pub flight_icao: String,
    pub flight_iata: Option<String>,
    pub flight_number: Option<String>,
    pub airline_iata: Option<String>,
    pub airline_icao: Option<String>,
    pub dep_iata: Option<String>,
    pub dep_icao: Option<String>,
    pub arr_iata: Option<String>,
    pub arr_icao: Option<String>,
    pub aircraft_icao: Option<String>,
    pub aircraft_registration: Option<String>,
    pub aircraft_flag: Option<String>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One metadata poll tagged with its poll time
#[derive(Debug, Clone, Default)]
pub struct MetadataBatch {
    pub poll_time: i64,
    pub observed_at: String,
    pub records: Vec<RawFlightMetadata>,
}

impl MetadataBatch {
    pub fn new(poll_time: i64, records: Vec<RawFlightMetadata>) -> Self {
        Self {
            poll_time,
            observed_at: format_observed_at(poll_time),
            records,
        }
    }

    /// Records that can take part in matching
    pub fn matchable(&self) -> impl Iterator<Item = &RawFlightMetadata> {
        self.records.iter().filter(|r| r.join_key().is_some())
    }
}
