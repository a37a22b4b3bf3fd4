//! Parley server
//!
//! Serves TwiML, places outbound calls and accepts Twilio media streams,
//! running one pipeline session per call.

pub mod http;
pub mod media_stream;
pub mod metrics;
pub mod origination;
pub mod registry;
pub mod state;
#[cfg(test)]
mod testing;

pub use http::create_router;
pub use metrics::init_metrics;
pub use origination::{PlacedCall, TwilioClient};
pub use registry::SessionRegistry;
pub use state::{build_services, AppState};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session limit of {0} reached")]
    CapacityReached(usize),

    #[error("Stream {0} already has a session")]
    DuplicateStream(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<&ServerError> for StatusCode {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::CapacityReached(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::DuplicateStream(_) => StatusCode::CONFLICT,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        StatusCode::from(&err)
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::Upstream(err.to_string())
    }
}

impl From<parley_core::Error> for ServerError {
    fn from(err: parley_core::Error) -> Self {
        match err {
            parley_core::Error::Configuration(msg) => ServerError::NotConfigured(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
