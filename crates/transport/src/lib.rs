//! Twilio media-stream transport
//!
//! Features:
//! - Media-stream JSON event model (`connected`, `start`, `media`, `mark`, `stop`)
//! - G.711 μ-law codec at the fixed 8 kHz telephony rate
//! - Accept handshake that waits for `start` and its stream identifier
//! - Outbound writer implementing [`parley_core::OutboundTransport`]
//! - Inbound read loop feeding a [`parley_pipeline::SessionController`]
//!
//! The adapter is generic over a stream of text messages and a sink of
//! text messages, so any WebSocket implementation can drive it.

pub mod adapter;
pub mod chunker;
pub mod mulaw;
pub mod twilio;

pub use adapter::{accept, spawn_writer, TwilioAdapter, TwilioOutbound, MAX_PRE_START_MESSAGES};
pub use chunker::Rechunker;
pub use twilio::{InboundEvent, MediaFormat, OutboundEvent, StreamStart};

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid media payload: {0}")]
    Decode(String),

    #[error("Connection closed")]
    Closed,

    #[error("Socket error: {0}")]
    Socket(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

impl From<base64::DecodeError> for TransportError {
    fn from(err: base64::DecodeError) -> Self {
        TransportError::Decode(err.to_string())
    }
}

impl From<TransportError> for parley_core::Error {
    fn from(err: TransportError) -> Self {
        parley_core::Error::Transport(err.to_string())
    }
}
