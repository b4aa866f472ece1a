//! HTTP adapter for the windowed counter.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/requestcount` | Count this request, return `{"count": n}` |
//! | `HEAD` | `/requestcount` | Same processing, no body |
//!
//! Failures are answered with their status code and a
//! `{"code": <status>, "message": <text>}` body.

pub mod handlers;
pub mod trace;

pub use handlers::REQUEST_COUNT_ROUTE;
pub use trace::TraceData;

use crate::counter::WindowedCounter;
use crate::error::RequestCounterError;
use crate::metrics::HttpMetrics;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub counter: Arc<WindowedCounter>,
    pub http: Arc<HttpMetrics>,
}

impl AppState {
    pub fn new(counter: Arc<WindowedCounter>, http: Arc<HttpMetrics>) -> Self {
        Self { counter, http }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for RequestCounterError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &self {
            RequestCounterError::Closed => warn!(status = status.as_u16(), "rejecting request during shutdown"),
            RequestCounterError::NotFound => {}
            err if status.is_server_error() => error!(status = status.as_u16(), error = %err),
            err => warn!(status = status.as_u16(), error = %err),
        }

        let body = ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(REQUEST_COUNT_ROUTE, get(handlers::request_count))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(trace::trace_requests))
        .with_state(state)
}
