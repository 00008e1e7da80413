use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::flight_sessions::SessionFilter;
use crate::live_flights::LiveFlightStore;

#[derive(Clone)]
pub struct AppState {
    pub store: LiveFlightStore,
}

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    errors: String,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            errors: message.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub callsigns: Vec<String>,
}

async fn get_live(State(state): State<AppState>) -> Response {
    match state.store.get_current_snapshot().await {
        Ok(snapshot) => Json(DataResponse { data: snapshot }).into_response(),
        Err(e) => {
            error!("Failed to load live snapshot: {:#}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load live flights")
        }
    }
}

async fn post_live_update(
    State(state): State<AppState>,
    Json(request): Json<UpdateRequest>,
) -> Response {
    match state.store.get_incremental_update(&request.callsigns).await {
        Ok(snapshot) => Json(DataResponse { data: snapshot }).into_response(),
        Err(e) => {
            error!("Failed to load live update: {:#}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load live update")
        }
    }
}

async fn get_positions(State(state): State<AppState>, Path(callsign): Path<String>) -> Response {
    match state.store.get_flight_positions(&callsign).await {
        Ok(positions) => Json(DataResponse { data: positions }).into_response(),
        Err(e) => {
            error!("Failed to load positions for {}: {:#}", callsign, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load positions")
        }
    }
}

async fn get_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Response {
    match state.store.get_flight_sessions(filter).await {
        Ok(sessions) => Json(DataResponse { data: sessions }).into_response(),
        Err(e) => {
            error!("Failed to query flight sessions: {:#}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to query sessions")
        }
    }
}

async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    info!(
        "{} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );
    metrics::histogram!("http_request_duration_seconds").record(start_time.elapsed().as_secs_f64());

    response
}

async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    if response.status().is_server_error() {
        let status = response.status();
        sentry::configure_scope(|scope| {
            scope.set_tag("http.method", method.as_str());
            scope.set_tag("http.url", uri.to_string());
            scope.set_tag("http.status_code", status.as_u16().to_string());
        });
        sentry::capture_message(
            &format!("HTTP {} error on {} {}", status.as_u16(), method, uri),
            sentry::Level::Error,
        );
    }

    response
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/live", get(get_live))
        .route("/live/update", post(post_live_update))
        .route("/flights/{callsign}/positions", get(get_positions))
        .route("/sessions", get(get_sessions))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(interface: String, port: u16, store: LiveFlightStore) -> Result<()> {
    let app = router(AppState { store });

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Read API listening on http://{}:{}/api", interface, port);

    axum::serve(listener, app).await?;

    Ok(())
}
