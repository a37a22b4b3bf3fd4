//! Core types for the parley voice pipeline
//!
//! This crate provides the types every other crate speaks:
//! - Frame model (audio, transcript and control frames with per-direction sequence numbers)
//! - Audio chunk type
//! - Append-only conversation context
//! - Capability traits (STT, response generation, TTS, outbound transport)
//! - Error taxonomy

pub mod audio;
pub mod conversation;
pub mod error;
pub mod frame;
pub mod traits;

pub use audio::{AudioChunk, SampleRate};
pub use conversation::{ContextWriter, ConversationContext, Message, Role};
pub use error::{Capability, Error, Result};
pub use frame::{
    ControlSignal, Direction, Frame, FramePayload, InterruptMark, InterruptReason, TranscriptText,
};

pub use traits::{
    AudioStream, OutboundTransport, ResponseGenerator, ResponseToken, SpeechToText, TextToSpeech,
    TokenStream, TranscriptStream,
};
