use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text, Uuid as SqlUuid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sessions with this many observations or fewer are noise
pub const MIN_REPORTABLE_OBSERVATIONS: i64 = 1;

/// One summarised flight, keyed by the metadata reference it was built from
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::flight_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FlightSession {
    pub session_id: Uuid,
    pub callsign: String,
    pub time_start: i64,
    pub time_end: i64,
    pub observation_count: i64,
    pub complete: bool,
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
    pub updated_at: DateTime<Utc>,
}

impl FlightSession {
    /// Whether this session may appear in any reporting query
    pub fn is_reportable(&self) -> bool {
        self.observation_count > MIN_REPORTABLE_OBSERVATIONS && self.complete
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::flight_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewFlightSession {
    pub session_id: Uuid,
    pub callsign: String,
    pub time_start: i64,
    pub time_end: i64,
    pub observation_count: i64,
    pub complete: bool,
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
    pub updated_at: DateTime<Utc>,
}

/// Per-metadata-reference rollup of the state-vector table
#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct SessionAggregate {
    #[diesel(sql_type = SqlUuid)]
    pub session_id: Uuid,
    #[diesel(sql_type = Text)]
    pub callsign: String,
    #[diesel(sql_type = BigInt)]
    pub time_start: i64,
    #[diesel(sql_type = BigInt)]
    pub time_end: i64,
    #[diesel(sql_type = BigInt)]
    pub observation_count: i64,
    #[diesel(sql_type = Nullable<Text>)]
    pub flight_iata: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub flight_number: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub airline_iata: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub airline_icao: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub dep_iata: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub dep_icao: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub arr_iata: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub arr_icao: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub aircraft_icao: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub aircraft_registration: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub aircraft_flag: Option<String>,
}

/// Poll-time extent of the rows an aggregation run reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceWindow {
    pub min_poll_time: i64,
    pub max_poll_time: i64,
}

impl SourceWindow {
    /// Sessions touching either edge may have been cut off by the window
    pub fn is_complete(&self, time_start: i64, time_end: i64) -> bool {
        time_start > self.min_poll_time && time_end < self.max_poll_time
    }
}

impl NewFlightSession {
    pub fn from_aggregate(aggregate: SessionAggregate, window: &SourceWindow) -> Self {
        Self {
            complete: window.is_complete(aggregate.time_start, aggregate.time_end),
            session_id: aggregate.session_id,
            callsign: aggregate.callsign,
            time_start: aggregate.time_start,
            time_end: aggregate.time_end,
            observation_count: aggregate.observation_count,
            flight_iata: aggregate.flight_iata,
            flight_number: aggregate.flight_number,
            airline_iata: aggregate.airline_iata,
            airline_icao: aggregate.airline_icao,
            dep_iata: aggregate.dep_iata,
            dep_icao: aggregate.dep_icao,
            arr_iata: aggregate.arr_iata,
            arr_icao: aggregate.arr_icao,
            aircraft_icao: aggregate.aircraft_icao,
            aircraft_registration: aggregate.aircraft_registration,
            aircraft_flag: aggregate.aircraft_flag,
            updated_at: Utc::now(),
        }
    }
}

/// Reporting filters; every field is optional and they combine with AND
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionFilter {
    pub callsign: Option<String>,
    pub dep_iata: Option<String>,
    pub arr_iata: Option<String>,
    pub airline_iata: Option<String>,
    pub aircraft_icao: Option<String>,
    /// Calendar day (UTC) of `time_start`
    pub date: Option<NaiveDate>,
}

impl SessionFilter {
    /// Normalise identifiers the same way they are stored
    pub fn normalized(self) -> Self {
        let upper = |v: Option<String>| {
            v.map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
        };
        Self {
            callsign: upper(self.callsign),
            dep_iata: upper(self.dep_iata),
            arr_iata: upper(self.arr_iata),
            airline_iata: upper(self.airline_iata),
            aircraft_icao: upper(self.aircraft_icao),
            date: self.date,
        }
    }

    /// Half-open `[start, end)` unix-second bounds of `date`
    pub fn day_bounds(&self) -> Option<(i64, i64)> {
        let start = self.date?.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
        Some((start, start + 86_400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate(time_start: i64, time_end: i64, count: i64) -> SessionAggregate {
        SessionAggregate {
            session_id: Uuid::now_v7(),
            callsign: "AFR123".to_string(),
            time_start,
            time_end,
            observation_count: count,
            flight_iata: Some("AF123".to_string()),
            flight_number: Some("123".to_string()),
            airline_iata: Some("AF".to_string()),
            airline_icao: Some("AFR".to_string()),
            dep_iata: Some("CDG".to_string()),
            dep_icao: Some("LFPG".to_string()),
            arr_iata: Some("JFK".to_string()),
            arr_icao: Some("KJFK".to_string()),
            aircraft_icao: Some("A359".to_string()),
            aircraft_registration: Some("F-HTYA".to_string()),
            aircraft_flag: Some("FR".to_string()),
        }
    }

    #[test]
    fn test_interior_session_is_complete() {
        let window = SourceWindow {
            min_poll_time: 0,
            max_poll_time: 1000,
        };
        let session = NewFlightSession::from_aggregate(aggregate(100, 220, 5), &window);

        assert!(session.complete);
        assert_eq!(session.time_start, 100);
        assert_eq!(session.time_end, 220);
        assert_eq!(session.observation_count, 5);
        assert_eq!(session.dep_iata.as_deref(), Some("CDG"));
    }

    #[test]
    fn test_sessions_on_window_edges_are_incomplete() {
        let window = SourceWindow {
            min_poll_time: 100,
            max_poll_time: 220,
        };
        assert!(!window.is_complete(100, 200));
        assert!(!window.is_complete(130, 220));
        assert!(window.is_complete(130, 190));
    }

    #[test]
    fn test_single_observation_never_reportable() {
        let window = SourceWindow {
            min_poll_time: 0,
            max_poll_time: 1000,
        };
        let new_session = NewFlightSession::from_aggregate(aggregate(500, 500, 1), &window);
        let stored = FlightSession {
            session_id: new_session.session_id,
            callsign: new_session.callsign,
            time_start: 500,
            time_end: 500,
            observation_count: 1,
            complete: true,
            flight_iata: None,
            flight_number: None,
            airline_iata: None,
            airline_icao: None,
            dep_iata: None,
            dep_icao: None,
            arr_iata: None,
            arr_icao: None,
            aircraft_icao: None,
            aircraft_registration: None,
            aircraft_flag: None,
            updated_at: Utc::now(),
        };

        assert!(!stored.is_reportable());
        assert!(
            FlightSession {
                observation_count: 2,
                ..stored.clone()
            }
            .is_reportable()
        );
        assert!(
            !FlightSession {
                observation_count: 2,
                complete: false,
                ..stored
            }
            .is_reportable()
        );
    }

    #[test]
    fn test_filter_normalisation_and_day_bounds() {
        let filter = SessionFilter {
            callsign: Some(" afr123 ".to_string()),
            dep_iata: Some("".to_string()),
            date: NaiveDate::from_ymd_opt(2024, 3, 1),
            ..Default::default()
        }
        .normalized();

        assert_eq!(filter.callsign.as_deref(), Some("AFR123"));
        assert_eq!(filter.dep_iata, None);
        assert_eq!(filter.day_bounds(), Some((1_709_251_200, 1_709_337_600)));
        assert_eq!(SessionFilter::default().day_bounds(), None);
    }
}
