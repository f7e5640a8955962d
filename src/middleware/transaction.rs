use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::meter::Meter;

pub const STATUS_TAG: &str = "status";
pub const REQUEST_QUEUE_DURATION: &str = "request_queue_duration";
pub const REQUEST_START_HEADER: &str = "x-request-start";

/// Route used in the action when no route matched, keeping the tag bounded.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Runs every request inside its own transaction.
///
/// The handler receives the request's context as an
/// `Extension<Arc<ExecutionContext>>`. The action is `"<METHOD> <route>"`,
/// using the matched route pattern so ids do not explode tag cardinality.
/// When the front proxy stamps `X-Request-Start`, the time the request
/// spent queued before reaching the service is recorded as
/// `request_queue_duration`.
///
/// Response headers:
///
///   X-Response-Time-Us  handler wall time in microseconds
///   Server-Timing       same value in the Server-Timing format
///   X-Transaction-Id    id the request's measurements are tagged with
pub async fn transaction_middleware(
    State(meter): State<Arc<Meter>>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let ctx = Arc::new(meter.context());
    if let Err(e) = ctx.begin_with_action(format!("{method} {path}")) {
        tracing::warn!(error = %e, "request transaction not started");
    }
    if let Some(waited) = req
        .headers()
        .get(REQUEST_START_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| queue_duration(v, Utc::now()))
    {
        ctx.set(REQUEST_QUEUE_DURATION, waited);
    }
    req.extensions_mut().insert(ctx.clone());

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    let status = response.status().as_u16();
    ctx.add_tag(STATUS_TAG, status.to_string());
    let summary = ctx.finish();

    // ── Inject response headers ─────────────────────────────────
    let headers = response.headers_mut();
    if let Ok(val) = HeaderValue::from_str(&elapsed.as_micros().to_string()) {
        headers.insert("X-Response-Time-Us", val);
    }
    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = HeaderValue::from_str(&server_timing) {
        headers.insert("Server-Timing", val);
    }
    if let Some(summary) = &summary {
        if let Ok(val) = HeaderValue::from_str(&summary.id.to_string()) {
            headers.insert("X-Transaction-Id", val);
        }
    }

    // Skip the metrics endpoints themselves
    if path.starts_with("/api/") && !path.starts_with("/api/metrics") {
        tracing::info!(
            %method,
            path,
            status,
            us = elapsed.as_micros() as u64,
            measurements = summary.as_ref().map(|s| s.measurements).unwrap_or(0),
            "request"
        );
    }

    response
}

/// Seconds between the proxy start stamp and `now`.
///
/// Accepts `t=<epoch>` or a bare epoch in seconds (fractional allowed),
/// milliseconds, microseconds or nanoseconds. Malformed or future stamps
/// yield `None`.
fn queue_duration(header: &str, now: DateTime<Utc>) -> Option<f64> {
    let raw = header.trim();
    let raw = raw.strip_prefix("t=").unwrap_or(raw);
    let stamp: f64 = raw.parse().ok().filter(|v: &f64| v.is_finite() && *v > 0.0)?;

    let started_secs = if stamp < 1e11 {
        stamp
    } else if stamp < 1e14 {
        stamp / 1e3
    } else if stamp < 1e17 {
        stamp / 1e6
    } else {
        stamp / 1e9
    };
    let now_secs = now.timestamp_micros() as f64 / 1e6;
    let waited = now_secs - started_secs;
    (waited >= 0.0).then_some(waited)
}
