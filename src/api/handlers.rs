use super::AppState;
use crate::counter::RequestCount;
use crate::error::RequestCounterError;
use axum::extract::State;
use axum::Json;

pub const REQUEST_COUNT_ROUTE: &str = "/requestcount";

/// GET/HEAD /requestcount: count this request and report the windowed total.
pub async fn request_count(
    State(state): State<AppState>,
) -> Result<Json<RequestCount>, RequestCounterError> {
    state.http.record_request(REQUEST_COUNT_ROUTE);
    match state.counter.get() {
        Ok(count) => Ok(Json(count)),
        Err(err) => {
            state
                .http
                .record_error(REQUEST_COUNT_ROUTE, err.status_code());
            Err(err)
        }
    }
}

pub async fn not_found() -> RequestCounterError {
    RequestCounterError::NotFound
}
