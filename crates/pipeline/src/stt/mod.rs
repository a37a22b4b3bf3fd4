//! Speech-to-Text stage
//!
//! Buffers utterance audio between StartOfSpeech and EndOfSpeech and hands
//! the whole utterance to the [`SpeechToText`] capability on EndOfSpeech.
//! Audio outside an utterance ends its journey here.

mod azure;

pub use azure::{AzureSpeechToText, AzureSttConfig};

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    AudioChunk, Capability, ControlSignal, Direction, Frame, FramePayload, InterruptMark, Result,
    Role, SpeechToText, TranscriptText,
};

use crate::engine::StageContext;
use crate::stage::FrameProcessor;

pub struct SttStage {
    stt: Arc<dyn SpeechToText>,
    utterance: Vec<Frame>,
}

impl SttStage {
    pub fn new(stt: Arc<dyn SpeechToText>) -> Self {
        Self {
            stt,
            utterance: Vec::new(),
        }
    }

    async fn transcribe(&mut self, end: &Frame, ctx: &StageContext) -> Result<()> {
        let frames = std::mem::take(&mut self.utterance);
        let Some(audio) = AudioChunk::concat(frames.iter().filter_map(Frame::audio)) else {
            tracing::debug!(sequence = end.sequence(), "Utterance ended with no audio");
            return Ok(());
        };

        tracing::debug!(
            sequence = end.sequence(),
            duration_ms = audio.duration().as_millis() as u64,
            model = self.stt.model_name(),
            "Transcribing utterance"
        );

        let stt = self.stt.clone();
        let mut results = stt.transcribe(audio);
        while let Some(result) = ctx
            .next_within(Capability::SpeechToText, &mut results)
            .await?
        {
            let text = result.text.trim();
            if text.is_empty() {
                continue;
            }

            let transcript = if result.is_final {
                tracing::info!(text, "User said");
                TranscriptText::final_text(Role::User, text)
            } else {
                TranscriptText::partial(Role::User, text)
            };
            ctx.emit(end.derive(transcript)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProcessor for SttStage {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match (frame.direction(), frame.payload()) {
            (Direction::Inbound, FramePayload::Audio(chunk)) => {
                if chunk.is_utterance() {
                    self.utterance.push(frame);
                }
                Ok(())
            }
            (_, FramePayload::Control(ControlSignal::StartOfSpeech)) => {
                self.utterance.clear();
                ctx.emit(frame).await
            }
            (_, FramePayload::Control(ControlSignal::EndOfSpeech)) => {
                ctx.emit(frame.clone()).await?;
                self.transcribe(&frame, ctx).await
            }
            _ => ctx.emit(frame).await,
        }
    }

    async fn on_interrupt(&mut self, mark: &InterruptMark, _ctx: &StageContext) {
        self.utterance
            .retain(|frame| !mark.covers(frame.direction(), frame.sequence()));
    }

    fn name(&self) -> &'static str {
        "speech_to_text"
    }
}
