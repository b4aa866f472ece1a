//! Request tracing headers.
//!
//! Every request runs inside a span carrying the caller's trace identifiers.
//! A request without `X-Trace-ID` starts a new trace whose span id equals the
//! trace id; a request with a trace id but no span id gets a fresh span id.

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, Instrument};
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";
pub const SPAN_ID_HEADER: &str = "x-span-id";
pub const PARENT_SPAN_ID_HEADER: &str = "x-parent-span-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceData {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn generate_id() -> String {
    format!("{:X}", Uuid::new_v4().as_u64_pair().0 >> 1)
}

impl TraceData {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let parent_span_id = header(headers, PARENT_SPAN_ID_HEADER).unwrap_or_default();
        let (trace_id, span_id) = match header(headers, TRACE_ID_HEADER) {
            None => {
                let id = generate_id();
                (id.clone(), id)
            }
            Some(trace_id) => {
                let span_id = header(headers, SPAN_ID_HEADER).unwrap_or_else(generate_id);
                (trace_id, span_id)
            }
        };

        Self {
            trace_id,
            span_id,
            parent_span_id,
        }
    }

    fn write_to(&self, headers: &mut HeaderMap) {
        for (name, value) in [(TRACE_ID_HEADER, &self.trace_id), (SPAN_ID_HEADER, &self.span_id)] {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
    }
}

pub async fn trace_requests(req: Request, next: Next) -> Response {
    let trace = TraceData::from_headers(req.headers());
    let span = tracing::info_span!(
        "request",
        trace_id = %trace.trace_id,
        span_id = %trace.span_id,
        parent_span_id = %trace.parent_span_id,
    );

    let method = req.method().clone();
    let uri = req.uri().clone();
    let mut response = async move {
        debug!("{} {}", method, uri);
        let response = next.run(req).await;
        debug!(status = response.status().as_u16(), "responded");
        response
    }
    .instrument(span)
    .await;

    trace.write_to(response.headers_mut());
    response
}
