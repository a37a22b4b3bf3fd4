//! HTTP endpoints
//!
//! TwiML for inbound calls, outbound call placement, health and metrics.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use parley_config::constants::server::MEDIA_STREAM_PATH;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::media_stream::media_stream_handler;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/twiml", post(twiml).get(twiml))
        .route("/calls", post(place_call))
        .route(MEDIA_STREAM_PATH, get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Host Twilio should dial back to for the media stream
///
/// Uses `server.public_url` when set, else the request's `Host` header.
fn stream_host(state: &AppState, headers: &HeaderMap) -> Result<String, ServerError> {
    let configured = state.config.server.public_url.as_deref().filter(|u| !u.is_empty());
    let host = match configured {
        Some(url) => url,
        None => headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ServerError::NotConfigured("server.public_url".to_string()))?,
    };

    let host = ["https://", "http://", "wss://", "ws://"]
        .iter()
        .find_map(|scheme| host.strip_prefix(scheme))
        .unwrap_or(host);
    Ok(host.trim_end_matches('/').to_string())
}

/// TwiML that connects the call to our media stream
pub fn twiml_document(host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"wss://{}{}\" /></Connect></Response>",
        host, MEDIA_STREAM_PATH
    )
}

async fn twiml(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    let host = stream_host(&state, &headers)?;
    Ok(([(header::CONTENT_TYPE, "text/xml")], twiml_document(&host)))
}

#[derive(Debug, Default, Deserialize)]
struct CallRequest {
    #[serde(default)]
    to: Option<String>,
}

async fn place_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServerError> {
    let twilio = state
        .twilio
        .clone()
        .ok_or_else(|| ServerError::NotConfigured("twilio credentials".to_string()))?;

    let request: CallRequest = if body.is_empty() {
        CallRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ServerError::InvalidRequest(e.to_string()))?
    };

    let host = stream_host(&state, &headers)?;
    let call = twilio
        .place_call(request.to.as_deref(), &twiml_document(&host))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "call_sid": call.sid,
            "status": call.status,
            "to": call.to,
        })),
    ))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.sessions.count(),
        "max_sessions": state.sessions.max_sessions(),
        "twilio_configured": state.twilio.is_some(),
    }))
}
