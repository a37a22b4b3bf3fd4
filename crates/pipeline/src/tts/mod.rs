//! Text-to-Speech stage
//!
//! Groups streamed assistant tokens into sentences and synthesizes each
//! sentence as soon as it is complete.

mod azure;

pub use azure::{AzureTextToSpeech, AzureTtsConfig};

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    Capability, ControlSignal, Direction, Frame, FramePayload, InterruptMark, Result, Role,
    SampleRate, TextToSpeech,
};

use crate::engine::StageContext;
use crate::stage::FrameProcessor;

/// Sentence boundary detection over streamed text
///
/// A sentence ends at `.`, `!`, `?`, `;` or `:` followed by whitespace, or
/// at a newline. A terminator at the very end of the buffer waits for the
/// next token, so "3.5" split across tokens stays whole.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add text, returning every sentence it completes
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut sentences = Vec::new();
        while let Some(end) = self.boundary() {
            let sentence: String = self.buffer.drain(..end).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Take whatever is left
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    fn boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((index, c)) = chars.next() {
            if c == '\n' {
                return Some(index + 1);
            }
            if matches!(c, '.' | '!' | '?' | ';' | ':') {
                if let Some(&(next_index, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(next_index);
                    }
                }
            }
        }
        None
    }
}

pub struct TtsStage {
    tts: Arc<dyn TextToSpeech>,
    splitter: SentenceSplitter,
    samples_per_chunk: usize,
}

impl TtsStage {
    pub fn new(tts: Arc<dyn TextToSpeech>, output_rate: SampleRate, chunk_ms: u64) -> Self {
        Self {
            tts,
            splitter: SentenceSplitter::new(),
            samples_per_chunk: output_rate.samples_for_ms(chunk_ms).max(1),
        }
    }

    async fn speak(&self, origin: &Frame, sentence: String, ctx: &StageContext) -> Result<()> {
        tracing::debug!(
            sequence = origin.sequence(),
            chars = sentence.len(),
            voice = self.tts.voice_name(),
            "Synthesizing sentence"
        );

        let tts = self.tts.clone();
        let mut audio = tts.synthesize(sentence);
        while let Some(chunk) = ctx
            .next_within(Capability::TextToSpeech, &mut audio)
            .await?
        {
            for piece in chunk.split(self.samples_per_chunk) {
                ctx.emit(origin.derive(piece)).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProcessor for TtsStage {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match (frame.direction(), frame.payload()) {
            (Direction::Outbound, FramePayload::Transcript(token)) if token.role == Role::Assistant => {
                for sentence in self.splitter.push(&token.text) {
                    self.speak(&frame, sentence, ctx).await?;
                }
                Ok(())
            }
            (_, FramePayload::Control(ControlSignal::ResponseStart)) => {
                self.splitter.clear();
                ctx.emit(frame).await
            }
            (_, FramePayload::Control(ControlSignal::ResponseEnd)) => {
                if let Some(rest) = self.splitter.flush() {
                    self.speak(&frame, rest, ctx).await?;
                }
                ctx.emit(frame).await
            }
            _ => ctx.emit(frame).await,
        }
    }

    async fn on_interrupt(&mut self, mark: &InterruptMark, _ctx: &StageContext) {
        if !self.splitter.is_empty() {
            tracing::debug!(epoch = mark.epoch, "Discarded pending sentence");
        }
        self.splitter.clear();
    }

    fn name(&self) -> &'static str {
        "text_to_speech"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_terminators() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Hello").is_empty());
        assert!(splitter.push(" there.").is_empty());
        assert_eq!(splitter.push(" How are"), vec!["Hello there."]);
        assert_eq!(splitter.push(" you? I'm"), vec!["How are you?"]);
        assert_eq!(splitter.flush().as_deref(), Some("I'm"));
        assert!(splitter.flush().is_none());
    }

    #[test]
    fn test_decimal_not_split() {
        let mut splitter = SentenceSplitter::new();
        assert!(splitter.push("Pi is 3.").is_empty());
        assert!(splitter.push("14 roughly").is_empty());
        assert_eq!(splitter.flush().as_deref(), Some("Pi is 3.14 roughly"));
    }

    #[test]
    fn test_newline_and_multiple_sentences() {
        let mut splitter = SentenceSplitter::new();
        let sentences = splitter.push("First line\nSecond! Third: fourth; ");
        assert_eq!(sentences, vec!["First line", "Second!", "Third:", "fourth;"]);
        assert!(splitter.is_empty());
    }

    #[test]
    fn test_clear_discards_partial() {
        let mut splitter = SentenceSplitter::new();
        splitter.push("half a sent");
        splitter.clear();
        assert!(splitter.flush().is_none());
    }
}
