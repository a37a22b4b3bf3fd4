//! Context aggregators
//!
//! The only stages that hold a [`ContextWriter`]. Each commits finalized
//! turns for its role; partial text never reaches the context.

use async_trait::async_trait;
use parley_core::{
    ContextWriter, ControlSignal, Frame, FramePayload, InterruptMark, Message, Result, Role,
};

use crate::engine::StageContext;
use crate::stage::FrameProcessor;

/// Commits user turns and system instructions
pub struct UserAggregator {
    writer: ContextWriter,
}

impl UserAggregator {
    pub fn new(writer: ContextWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl FrameProcessor for UserAggregator {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match frame.payload() {
            FramePayload::Transcript(transcript) if transcript.role == Role::User => {
                if !transcript.is_final || transcript.text.trim().is_empty() {
                    return Ok(());
                }
                let index = self.writer.append(Message::user(transcript.text.clone()));
                tracing::debug!(index, sequence = frame.sequence(), "Committed user turn");
                ctx.emit(frame.derive(ControlSignal::ContextReady)).await
            }
            FramePayload::Control(ControlSignal::SystemPrompt(instruction)) => {
                let index = self.writer.append(Message::system(instruction.clone()));
                tracing::debug!(index, "Committed system instruction");
                Ok(())
            }
            _ => ctx.emit(frame).await,
        }
    }

    fn name(&self) -> &'static str {
        "user_aggregator"
    }
}

/// Commits one assistant message per completed response
pub struct AssistantAggregator {
    writer: ContextWriter,
    response: Option<PendingResponse>,
}

struct PendingResponse {
    sequence: u64,
    text: String,
}

impl AssistantAggregator {
    pub fn new(writer: ContextWriter) -> Self {
        Self {
            writer,
            response: None,
        }
    }

    fn commit(&mut self) {
        let Some(response) = self.response.take() else {
            return;
        };
        let text = response.text.trim();
        if text.is_empty() {
            return;
        }
        let index = self.writer.append(Message::assistant(text));
        tracing::debug!(index, sequence = response.sequence, "Committed assistant turn");
    }
}

#[async_trait]
impl FrameProcessor for AssistantAggregator {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match frame.payload() {
            FramePayload::Control(ControlSignal::ResponseStart) => {
                self.response = Some(PendingResponse {
                    sequence: frame.sequence(),
                    text: String::new(),
                });
            }
            FramePayload::Transcript(transcript) if transcript.role == Role::Assistant => {
                if let Some(response) = self.response.as_mut() {
                    response.text.push_str(&transcript.text);
                }
            }
            FramePayload::Control(ControlSignal::ResponseEnd) => self.commit(),
            _ => {}
        }
        ctx.emit(frame).await
    }

    async fn on_interrupt(&mut self, mark: &InterruptMark, _ctx: &StageContext) {
        let discard = self
            .response
            .as_ref()
            .map_or(false, |response| response.sequence < mark.outbound);
        if discard {
            tracing::debug!("Discarded interrupted assistant response");
            self.response = None;
        }
    }

    fn name(&self) -> &'static str {
        "assistant_aggregator"
    }
}
