use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AirLabsConfig, BoundingBox};
use crate::feed::{FeedError, MetadataSource, RetryPolicy, send_with_retry};
use crate::flight_metadata::RawFlightMetadata;

const SOURCE: &str = "airlabs";

/// Client for the AirLabs `flights` endpoint
pub struct AirLabsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl AirLabsClient {
    pub fn new(config: &AirLabsConfig, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        if config.api_key.is_none() {
            warn!("AIRLABS_API_KEY is not set, metadata requests will likely be rejected");
        }
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry,
        })
    }

    /// Fetch every scheduled flight currently inside `bbox`
    pub async fn fetch_flights(
        &self,
        bbox: &BoundingBox,
    ) -> Result<Vec<RawFlightMetadata>, FeedError> {
        let url = format!("{}/flights", self.base_url);
        let bbox_param = format!(
            "{},{},{},{}",
            bbox.lat_min, bbox.lon_min, bbox.lat_max, bbox.lon_max
        );

        let response = send_with_retry(SOURCE, &self.retry, || {
            let request = self.client.get(&url).query(&[("bbox", bbox_param.as_str())]);
            match &self.api_key {
                Some(key) => request.query(&[("api_key", key.as_str())]),
                None => request,
            }
        })
        .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| FeedError::data_shape(SOURCE, format!("invalid JSON body: {e}")))?;

        let flights = parse_flights(body)?;
        debug!("AirLabs returned {} flights", flights.len());
        Ok(flights)
    }
}

#[async_trait]
impl MetadataSource for AirLabsClient {
    async fn poll(&self, bbox: &BoundingBox) -> Result<Vec<RawFlightMetadata>, FeedError> {
        self.fetch_flights(bbox).await
    }
}

/// Decode a `flights` body: `{"response": [...]}`. AirLabs reports some
/// failures as `{"error": {...}}` with a success status.
pub fn parse_flights(mut body: Value) -> Result<Vec<RawFlightMetadata>, FeedError> {
    if let Some(error) = body.get("error") {
        return Err(FeedError::data_shape(SOURCE, format!("error payload: {error}")));
    }
    let Some(response) = body.get_mut("response").map(Value::take) else {
        return Err(FeedError::data_shape(SOURCE, "no 'response' key"));
    };

    match response {
        Value::Null => Ok(Vec::new()),
        Value::Array(_) => serde_json::from_value(response)
            .map_err(|e| FeedError::data_shape(SOURCE, format!("bad flight record: {e}"))),
        _ => Err(FeedError::data_shape(SOURCE, "'response' is not an array")),
    }
}
