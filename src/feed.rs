use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::config::BoundingBox;
use crate::flight_metadata::RawFlightMetadata;
use crate::state_vectors::RawStateVector;

/// Failures surfaced by the upstream feed clients
#[derive(Debug, Error)]
pub enum FeedError {
    /// The request never produced a response after all attempts
    #[error("{source_name} unreachable after {attempts} attempts: {last_error}")]
    TransientNetwork {
        source_name: &'static str,
        attempts: u32,
        last_error: String,
    },

    /// The upstream answered with a non-success status
    #[error("{source_name} returned HTTP {status}: {body}")]
    UpstreamStatus {
        source_name: &'static str,
        status: u16,
        body: String,
    },

    /// The body was not the shape we expect
    #[error("{source_name} response malformed: {reason}")]
    DataShape {
        source_name: &'static str,
        reason: String,
    },
}

impl FeedError {
    pub fn data_shape(source_name: &'static str, reason: impl Into<String>) -> Self {
        Self::DataShape {
            source_name,
            reason: reason.into(),
        }
    }

    /// Label used for the `feed.request.failed` metric
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork { .. } => "transient_network",
            Self::UpstreamStatus { .. } => "upstream_status",
            Self::DataShape { .. } => "data_shape",
        }
    }
}

/// Live aircraft positions within a bounding box
#[async_trait]
pub trait StateVectorSource: Send + Sync {
    async fn poll(&self, bbox: &BoundingBox) -> Result<Vec<RawStateVector>, FeedError>;
}

/// Scheduled-flight descriptors within a bounding box
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn poll(&self, bbox: &BoundingBox) -> Result<Vec<RawFlightMetadata>, FeedError>;
}

/// Bounded retry for connection-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Send a request, retrying only when no response came back at all.
///
/// A response with a non-success status is returned as `UpstreamStatus`
/// immediately; the retry budget is for transport failures.
pub async fn send_with_retry<F>(
    source_name: &'static str,
    policy: &RetryPolicy,
    build_request: F,
) -> Result<Response, FeedError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match build_request().send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(FeedError::UpstreamStatus {
                        source_name,
                        status: status.as_u16(),
                        body,
                    });
                }
                return Ok(response);
            }
            Err(e) => {
                warn!(
                    "{} request failed (attempt {}/{}): {}",
                    source_name, attempt, attempts, e
                );
                metrics::counter!("feed.request.retry_total", "source" => source_name).increment(1);
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    Err(FeedError::TransientNetwork {
        source_name,
        attempts,
        last_error,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use std::net::SocketAddr;

    /// Serve `app` on an ephemeral local port for the lifetime of the test
    pub async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// An address nothing is listening on
    pub async fn closed_port() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{closed_port, serve};
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_success_returns_response() {
        let app = Router::new().route("/ok", get(|| async { "fine" }));
        let addr = serve(app).await;
        let client = reqwest::Client::new();

        let response = send_with_retry("test", &quick_policy(3), || {
            client.get(format!("http://{addr}/ok"))
        })
        .await
        .unwrap();

        assert_eq!(response.text().await.unwrap(), "fine");
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/fail",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
                }
            }),
        );
        let addr = serve(app).await;
        let client = reqwest::Client::new();

        let err = send_with_retry("test", &quick_policy(5), || {
            client.get(format!("http://{addr}/fail"))
        })
        .await
        .unwrap_err();

        match err {
            FeedError::UpstreamStatus { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_attempts() {
        let addr = closed_port().await;
        let client = reqwest::Client::new();
        let built = AtomicUsize::new(0);

        let err = send_with_retry("test", &quick_policy(3), || {
            built.fetch_add(1, Ordering::SeqCst);
            client.get(format!("http://{addr}/"))
        })
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            FeedError::TransientNetwork { attempts: 3, .. }
        ));
        assert_eq!(err.kind(), "transient_network");
        assert_eq!(built.load(Ordering::SeqCst), 3);
    }
}
