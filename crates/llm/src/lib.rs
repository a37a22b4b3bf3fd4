//! Response generation over streaming chat completions
//!
//! Features:
//! - OpenAI-compatible `/chat/completions` with server-sent events
//! - Azure OpenAI deployments (`api-key` header, versioned URL)
//! - Incremental SSE parsing that tolerates frames split across body chunks

pub mod backend;

pub use backend::{ChatCompletionConfig, ChatCompletionGenerator, SseEvent, SseParser};

use std::time::Duration;

use parley_core::Capability;
use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Classify a transport failure, keeping how long the request ran
    pub fn request(err: reqwest::Error, elapsed: Duration) -> Self {
        if err.is_timeout() {
            LlmError::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
            }
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::request(err, Duration::ZERO)
    }
}

impl From<LlmError> for parley_core::Error {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout { elapsed_ms } => parley_core::Error::CapabilityTimeout {
                capability: Capability::ResponseGenerator,
                elapsed_ms,
            },
            LlmError::Configuration(msg) => parley_core::Error::Configuration(msg),
            other => parley_core::Error::fault(Capability::ResponseGenerator, other.to_string()),
        }
    }
}
