//! Response generation stage

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    Capability, ControlSignal, ConversationContext, Error, Frame, FramePayload, ResponseGenerator,
    ResponseToken, Result, Role, TranscriptText,
};

use crate::engine::StageContext;
use crate::stage::FrameProcessor;

/// Streams an assistant response for every ContextReady
///
/// Output frames are outbound and numbered fresh: ResponseStart, one
/// partial assistant transcript per token, then ResponseEnd.
pub struct GeneratorStage {
    generator: Arc<dyn ResponseGenerator>,
    context: Arc<ConversationContext>,
}

impl GeneratorStage {
    pub fn new(generator: Arc<dyn ResponseGenerator>, context: Arc<ConversationContext>) -> Self {
        Self { generator, context }
    }

    async fn respond(&self, turn: &Frame, ctx: &StageContext) -> Result<()> {
        ctx.begin_turn(turn.sequence());
        let messages = self.context.snapshot();

        tracing::debug!(
            turn = turn.sequence(),
            messages = messages.len(),
            model = self.generator.model_name(),
            "Generating response"
        );

        ctx.assistant().begin();
        ctx.emit(Frame::outbound(
            ctx.next_outbound_sequence(),
            ControlSignal::ResponseStart,
        ))
        .await?;

        let generator = self.generator.clone();
        let mut tokens = generator.generate(messages);
        loop {
            match ctx
                .next_within(Capability::ResponseGenerator, &mut tokens)
                .await?
            {
                Some(ResponseToken::Text(text)) => {
                    if text.is_empty() {
                        continue;
                    }
                    ctx.emit(Frame::outbound(
                        ctx.next_outbound_sequence(),
                        TranscriptText::partial(Role::Assistant, text),
                    ))
                    .await?;
                }
                Some(ResponseToken::EndOfTurn) => {
                    return ctx
                        .emit(Frame::outbound(
                            ctx.next_outbound_sequence(),
                            ControlSignal::ResponseEnd,
                        ))
                        .await;
                }
                None => {
                    return Err(Error::fault(
                        Capability::ResponseGenerator,
                        "response stream ended without end-of-turn marker",
                    ));
                }
            }
        }
    }
}

#[async_trait]
impl FrameProcessor for GeneratorStage {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match frame.payload() {
            FramePayload::Control(ControlSignal::ContextReady) => self.respond(&frame, ctx).await,
            _ => ctx.emit(frame).await,
        }
    }

    fn name(&self) -> &'static str {
        "generator"
    }
}
