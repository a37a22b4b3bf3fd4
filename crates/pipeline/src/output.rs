//! Output stage
//!
//! Hands outbound audio to the transport at playout rate. Audio that has
//! not been played yet stays inside the pipeline, where an interrupt can
//! still discard it.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    ControlSignal, Direction, Error, Frame, FramePayload, InterruptMark, OutboundTransport, Result,
};
use tokio::time::Instant;

use crate::engine::StageContext;
use crate::stage::FrameProcessor;

pub struct OutputStage {
    transport: Arc<dyn OutboundTransport>,
    /// Playout instant of the next chunk; `None` when nothing is queued
    next_send_at: Option<Instant>,
}

impl OutputStage {
    pub fn new(transport: Arc<dyn OutboundTransport>) -> Self {
        Self {
            transport,
            next_send_at: None,
        }
    }

    async fn play(&mut self, frame: &Frame) -> Result<()> {
        let Some(chunk) = frame.audio() else {
            return Ok(());
        };

        let now = Instant::now();
        let at = self.next_send_at.filter(|at| *at > now).unwrap_or(now);
        tokio::time::sleep_until(at).await;

        self.transport
            .send_outbound_chunk(chunk)
            .await
            .map_err(|e| match e {
                Error::Transport(_) => e,
                other => Error::Transport(other.to_string()),
            })?;

        self.next_send_at = Some(at + chunk.duration());
        Ok(())
    }

    /// Wait for queued audio to finish playing
    async fn drain(&mut self) {
        if let Some(at) = self.next_send_at.take() {
            tokio::time::sleep_until(at).await;
        }
    }
}

#[async_trait]
impl FrameProcessor for OutputStage {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match (frame.direction(), frame.payload()) {
            (Direction::Outbound, FramePayload::Audio(_)) => self.play(&frame).await,
            (_, FramePayload::Control(ControlSignal::ResponseEnd)) => {
                self.drain().await;
                ctx.assistant().finish();
                tracing::debug!(sequence = frame.sequence(), "Response played out");
                Ok(())
            }
            // Inbound audio is not echoed back
            _ => Ok(()),
        }
    }

    async fn on_interrupt(&mut self, mark: &InterruptMark, _ctx: &StageContext) {
        self.next_send_at = None;
        if let Err(e) = self.transport.clear().await {
            tracing::warn!(error = %e, epoch = mark.epoch, "Failed to clear transport playback");
        }
    }

    fn name(&self) -> &'static str {
        "output"
    }
}
