//! Voice conversation pipeline
//!
//! Features:
//! - Pipeline engine with bounded per-stage queues and out-of-band interrupts
//! - Energy-based voice activity segmentation with barge-in detection
//! - Speech-to-text, response generation and text-to-speech stages
//! - Context aggregators that keep the conversation append-only
//! - Real-time paced output towards the telephony transport
//! - Session controller owning one pipeline per call

pub mod aggregator;
pub mod cancel;
pub mod engine;
pub mod generator;
pub mod output;
pub mod session;
pub mod stage;
pub mod stt;
pub mod tts;
pub mod vad;

pub use aggregator::{AssistantAggregator, UserAggregator};
pub use cancel::CancelToken;
pub use engine::{AssistantActivity, EngineConfig, EngineEvent, PipelineEngine, StageContext};
pub use generator::GeneratorStage;
pub use output::OutputStage;
pub use session::{SessionController, SessionServices};
pub use stage::{FrameProcessor, Stage};
pub use stt::{AzureSpeechToText, AzureSttConfig, SttStage};
pub use tts::{AzureTextToSpeech, AzureTtsConfig, SentenceSplitter, TtsStage};
pub use vad::{Segmenter, SegmenterConfig, SegmenterState, SpeechDetector, VadResult};

use parley_core::Capability;
use thiserror::Error;

/// Errors raised by the live capability clients
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Audio encoding error: {0}")]
    Audio(String),
}

impl PipelineError {
    /// Attribute this error to the capability that raised it
    pub fn for_capability(self, capability: Capability) -> parley_core::Error {
        parley_core::Error::fault(capability, self.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Network(err.to_string())
    }
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        PipelineError::Audio(err.to_string())
    }
}
