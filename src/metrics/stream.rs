use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::MetricsReport;
use crate::meter::Meter;

/// `/api/metrics` and `/api/metrics/stream`, with the meter as state.
pub fn routes(meter: Arc<Meter>) -> Router {
    Router::new()
        .route("/api/metrics", get(get_metrics))
        .route("/api/metrics/stream", get(metrics_stream))
        .with_state(meter)
}

// ─── GET /api/metrics ────────────────────────────────────────────
/// Single JSON report.

pub async fn get_metrics(State(meter): State<Arc<Meter>>) -> Json<MetricsReport> {
    Json(meter.report())
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
/// Server-Sent Events: the same report every 500 ms.

pub async fn metrics_stream(
    State(meter): State<Arc<Meter>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let json = serde_json::to_string(&meter.report()).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_metrics_reports_calls() {
        let meter = Arc::new(Meter::with_sink(
            Arc::new(MemorySink::new()),
            Default::default(),
            Duration::ZERO,
        ));
        meter
            .instrumentation()
            .stats()
            .record("db.fetch", Duration::from_millis(3), true);

        let response = routes(meter.clone())
            .oneshot(Request::get("/api/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let report: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["enabled"], true);
        assert_eq!(report["calls"]["total_calls"], 1);
        assert_eq!(report["calls"]["methods"][0]["method"], "db.fetch");

        meter.shutdown().await;
    }
}
