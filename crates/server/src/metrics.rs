//! Prometheus exporter

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::state::AppState;
use crate::ServerError;

/// Install the global recorder and describe the pipeline metrics
pub fn init_metrics() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Internal(format!("metrics recorder: {e}")))?;

    metrics::describe_counter!(
        "parley_frames_dropped_total",
        "Frames discarded as stale after an interrupt"
    );
    metrics::describe_counter!("parley_interrupts_total", "Interrupts raised, by reason");
    metrics::describe_counter!(
        "parley_stage_failures_total",
        "Recoverable stage failures, by stage"
    );
    metrics::describe_histogram!(
        "parley_capability_latency_seconds",
        metrics::Unit::Seconds,
        "Latency of external capability calls"
    );
    metrics::describe_histogram!(
        "parley_llm_first_token_seconds",
        metrics::Unit::Seconds,
        "Time from completion request to first token"
    );
    metrics::describe_gauge!("parley_sessions_active", "Sessions currently running");

    Ok(handle)
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(ref handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
