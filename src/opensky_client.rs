use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::{BoundingBox, OpenSkyConfig};
use crate::feed::{FeedError, RetryPolicy, StateVectorSource, send_with_retry};
use crate::state_vectors::RawStateVector;

const SOURCE: &str = "opensky";

/// Positional layout of one entry of the `states` array
mod index {
    pub const ICAO24: usize = 0;
    pub const CALLSIGN: usize = 1;
    pub const ORIGIN_COUNTRY: usize = 2;
    pub const TIME_POSITION: usize = 3;
    pub const LAST_CONTACT: usize = 4;
    pub const LONGITUDE: usize = 5;
    pub const LATITUDE: usize = 6;
    pub const BARO_ALTITUDE: usize = 7;
    pub const ON_GROUND: usize = 8;
    pub const VELOCITY: usize = 9;
    pub const TRUE_TRACK: usize = 10;
    pub const VERTICAL_RATE: usize = 11;
    pub const GEO_ALTITUDE: usize = 13;
}

/// Client for the OpenSky `states/all` endpoint
pub struct OpenSkyClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    retry: RetryPolicy,
}

impl OpenSkyClient {
    pub fn new(config: &OpenSkyConfig, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let credentials = config.username.clone().zip(config.password.clone());
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            retry,
        })
    }

    /// Fetch every state vector inside `bbox`
    pub async fn fetch_states(&self, bbox: &BoundingBox) -> Result<Vec<RawStateVector>, FeedError> {
        let url = format!("{}/states/all", self.base_url);
        let params = [
            ("lamin", bbox.lat_min.to_string()),
            ("lomin", bbox.lon_min.to_string()),
            ("lamax", bbox.lat_max.to_string()),
            ("lomax", bbox.lon_max.to_string()),
        ];

        let response = send_with_retry(SOURCE, &self.retry, || {
            let request = self.client.get(&url).query(&params);
            match &self.credentials {
                Some((username, password)) => request.basic_auth(username, Some(password)),
                None => request,
            }
        })
        .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::data_shape(SOURCE, format!("invalid JSON body: {e}")))?;

        let states = parse_states(&body)?;
        debug!("OpenSky returned {} state vectors", states.len());
        Ok(states)
    }
}

#[async_trait]
impl StateVectorSource for OpenSkyClient {
    async fn poll(&self, bbox: &BoundingBox) -> Result<Vec<RawStateVector>, FeedError> {
        self.fetch_states(bbox).await
    }
}

/// Decode a `states/all` body. A missing `states` key is malformed; `null`
/// means nothing is flying in the box.
pub fn parse_states(body: &Value) -> Result<Vec<RawStateVector>, FeedError> {
    let Some(object) = body.as_object() else {
        return Err(FeedError::data_shape(SOURCE, "body is not an object"));
    };
    let Some(states) = object.get("states") else {
        return Err(FeedError::data_shape(SOURCE, "no 'states' key"));
    };

    match states {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => rows
            .iter()
            .enumerate()
            .map(|(i, row)| match row.as_array() {
                Some(fields) => Ok(parse_state(fields)),
                None => Err(FeedError::data_shape(
                    SOURCE,
                    format!("state {i} is not an array"),
                )),
            })
            .collect(),
        _ => Err(FeedError::data_shape(SOURCE, "'states' is not an array")),
    }
}

fn string_at(fields: &[Value], i: usize) -> Option<String> {
    fields.get(i).and_then(Value::as_str).map(str::to_string)
}

fn float_at(fields: &[Value], i: usize) -> Option<f64> {
    fields.get(i).and_then(Value::as_f64)
}

fn int_at(fields: &[Value], i: usize) -> Option<i64> {
    fields.get(i).and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

fn parse_state(fields: &[Value]) -> RawStateVector {
    RawStateVector {
        icao24: string_at(fields, index::ICAO24),
        callsign: string_at(fields, index::CALLSIGN),
        origin_country: string_at(fields, index::ORIGIN_COUNTRY),
        time_position: int_at(fields, index::TIME_POSITION),
        last_contact: int_at(fields, index::LAST_CONTACT),
        longitude: float_at(fields, index::LONGITUDE),
        latitude: float_at(fields, index::LATITUDE),
        baro_altitude: float_at(fields, index::BARO_ALTITUDE),
        on_ground: fields.get(index::ON_GROUND).and_then(Value::as_bool),
        velocity: float_at(fields, index::VELOCITY),
        true_track: float_at(fields, index::TRUE_TRACK),
        vertical_rate: float_at(fields, index::VERTICAL_RATE),
        geo_altitude: float_at(fields, index::GEO_ALTITUDE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::test_support::serve;
    use axum::extract::Query;
    use axum::{Json, Router, routing::get};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full_row() {
        let body = json!({
            "time": 1700000000,
            "states": [[
                "3c6444", "DLH4AB  ", "Germany", 1699999990, 1699999999,
                8.5622, 50.0379, 10668.0, false, 231.4, 87.2, -0.3, null, 10900.5, "1000", false, 0
            ]]
        });

        let states = parse_states(&body).unwrap();

        assert_eq!(states.len(), 1);
        let state = &states[0];
        assert_eq!(state.icao24.as_deref(), Some("3c6444"));
        assert_eq!(state.callsign.as_deref(), Some("DLH4AB  "));
        assert_eq!(state.origin_country.as_deref(), Some("Germany"));
        assert_eq!(state.time_position, Some(1_699_999_990));
        assert_eq!(state.longitude, Some(8.5622));
        assert_eq!(state.latitude, Some(50.0379));
        assert_eq!(state.on_ground, Some(false));
        assert_eq!(state.true_track, Some(87.2));
        assert_eq!(state.geo_altitude, Some(10900.5));
    }

    #[test]
    fn test_short_row_leaves_fields_empty() {
        let body = json!({"states": [["abc123", null, "France", null, 1, null, 48.0]]});
        let states = parse_states(&body).unwrap();
        assert_eq!(states[0].callsign, None);
        assert_eq!(states[0].longitude, None);
        assert_eq!(states[0].geo_altitude, None);
    }

    #[test]
    fn test_null_states_is_empty_batch() {
        let states = parse_states(&json!({"time": 1, "states": null})).unwrap();
        assert!(states.is_empty());
    }

    #[test]
    fn test_missing_states_is_data_shape_error() {
        let err = parse_states(&json!({"time": 1})).unwrap_err();
        assert!(matches!(err, FeedError::DataShape { .. }));
    }

    #[test]
    fn test_non_array_row_is_data_shape_error() {
        let err = parse_states(&json!({"states": [{"icao24": "x"}]})).unwrap_err();
        assert_eq!(err.kind(), "data_shape");
    }

    #[tokio::test]
    async fn test_fetch_sends_bounding_box() {
        let app = Router::new().route(
            "/api/states/all",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let lamin: f64 = params["lamin"].parse().unwrap();
                Json(json!({
                    "time": 1,
                    "states": [["abc123", "AFR123", "France", 1, 1, 2.5, lamin, null, false]]
                }))
            }),
        );
        let addr = serve(app).await;
        let config = OpenSkyConfig {
            base_url: format!("http://{addr}/api/"),
            ..Default::default()
        };
        let client = OpenSkyClient::new(&config, RetryPolicy::default()).unwrap();
        let bbox = BoundingBox {
            lat_min: 40.0,
            lat_max: 50.0,
            lon_min: 0.0,
            lon_max: 10.0,
        };

        let states = client.poll(&bbox).await.unwrap();

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].latitude, Some(40.0));
    }
}
