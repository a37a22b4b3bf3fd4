//! Speech processing traits

use futures::Stream;
use std::pin::Pin;

use crate::{AudioChunk, Result, TranscriptText};

/// Transcript results for one utterance: partials, then at most one final
pub type TranscriptStream<'a> = Pin<Box<dyn Stream<Item = Result<TranscriptText>> + Send + 'a>>;

/// Synthesized audio for one piece of text
pub type AudioStream<'a> = Pin<Box<dyn Stream<Item = Result<AudioChunk>> + Send + 'a>>;

/// Speech-to-Text interface
///
/// Implementations:
/// - `AzureSpeechToText` - Azure Speech short-audio recognition
///
/// # Example
///
/// ```ignore
/// let mut results = stt.transcribe(utterance);
/// while let Some(result) = results.next().await {
///     let transcript = result?;
///     if transcript.is_final {
///         println!("Heard: {}", transcript.text);
///     }
/// }
/// ```
pub trait SpeechToText: Send + Sync + 'static {
    /// Transcribe one utterance
    ///
    /// Partial transcripts have `is_final = false`. An utterance with no
    /// recognizable speech may yield nothing or an empty final.
    fn transcribe(&self, audio: AudioChunk) -> TranscriptStream<'_>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}

/// Text-to-Speech interface
///
/// Implementations:
/// - `AzureTextToSpeech` - Azure neural voices over REST
pub trait TextToSpeech: Send + Sync + 'static {
    /// Synthesize one sentence
    ///
    /// Audio is produced at the configured output rate and may arrive in
    /// arbitrarily sized chunks.
    fn synthesize(&self, text: String) -> AudioStream<'_>;

    /// Get voice name for logging
    fn voice_name(&self) -> &str;
}
