//! Session controller
//!
//! One per accepted call. Owns the pipeline engine and the conversation
//! context, and translates transport lifecycle events into pipeline input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parley_config::Settings;
use parley_core::{
    AudioChunk, ControlSignal, ConversationContext, Error, Message, OutboundTransport,
    ResponseGenerator, Result, SampleRate, SpeechToText, TextToSpeech,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::aggregator::{AssistantAggregator, UserAggregator};
use crate::engine::{EngineConfig, EngineEvent, PipelineEngine};
use crate::generator::GeneratorStage;
use crate::output::OutputStage;
use crate::stage::Stage;
use crate::stt::SttStage;
use crate::tts::TtsStage;
use crate::vad::{Segmenter, SegmenterConfig};

/// Capabilities a session calls out to
#[derive(Clone)]
pub struct SessionServices {
    pub stt: Arc<dyn SpeechToText>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub tts: Arc<dyn TextToSpeech>,
}

pub struct SessionController {
    stream_id: String,
    engine: PipelineEngine,
    context: Arc<ConversationContext>,
    greeting: String,
    input_rate: SampleRate,
    disconnect_grace: Duration,
    connected: AtomicBool,
    disconnected: AtomicBool,
}

impl SessionController {
    /// Build the stage chain and start the pipeline
    ///
    /// Fails before any frame is accepted when `stream_id` is empty or the
    /// call path configuration is invalid.
    pub fn new(
        stream_id: impl Into<String>,
        settings: &Settings,
        services: SessionServices,
        transport: Arc<dyn OutboundTransport>,
    ) -> Result<Arc<Self>> {
        let stream_id = stream_id.into();
        if stream_id.trim().is_empty() {
            return Err(Error::Configuration("missing stream identifier".to_string()));
        }

        settings.validate_call_path()?;
        let input_rate = settings.audio.input_rate()?;
        let output_rate = settings.audio.output_rate()?;

        let context = ConversationContext::new([Message::system(
            settings.session.system_prompt.clone(),
        )]);

        let stages: Vec<Stage> = vec![
            Segmenter::new(SegmenterConfig::from(&settings.vad)).into(),
            SttStage::new(services.stt).into(),
            UserAggregator::new(context.writer()).into(),
            GeneratorStage::new(services.generator, context.clone()).into(),
            AssistantAggregator::new(context.writer()).into(),
            TtsStage::new(services.tts, output_rate, settings.audio.chunk_ms).into(),
            OutputStage::new(transport.clone()).into(),
        ];

        let engine = PipelineEngine::spawn(stages, EngineConfig::from(&settings.pipeline));
        tokio::spawn(watch_events(stream_id.clone(), engine.subscribe(), transport));

        metrics::gauge!("parley_sessions_active").increment(1.0);
        tracing::info!(stream_id = %stream_id, "Session created");

        Ok(Arc::new(Self {
            stream_id,
            engine,
            context,
            greeting: settings.session.greeting_instruction.clone(),
            input_rate,
            disconnect_grace: settings.pipeline.disconnect_grace(),
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }))
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn input_rate(&self) -> SampleRate {
        self.input_rate
    }

    pub fn context(&self) -> &Arc<ConversationContext> {
        &self.context
    }

    pub fn engine(&self) -> &PipelineEngine {
        &self.engine
    }

    /// Caller connected: have the agent speak first
    ///
    /// Commits the greeting instruction and requests a response without
    /// waiting for user input. Later calls do nothing.
    pub async fn on_connected(&self) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!(stream_id = %self.stream_id, "Caller connected");

        if !self.greeting.trim().is_empty() {
            self.engine
                .submit(ControlSignal::SystemPrompt(self.greeting.clone()))
                .await?;
        }
        self.engine.submit(ControlSignal::ContextReady).await
    }

    /// Feed one chunk of caller audio
    pub async fn on_inbound_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.engine.submit(chunk).await
    }

    /// Caller went away: stop the pipeline and wait for it to wind down
    pub async fn on_disconnected(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(stream_id = %self.stream_id, "Caller disconnected");

        self.engine.cancel();
        if tokio::time::timeout(self.disconnect_grace, self.engine.closed())
            .await
            .is_err()
        {
            tracing::warn!(
                stream_id = %self.stream_id,
                grace_ms = self.disconnect_grace.as_millis() as u64,
                "Pipeline did not stop within grace period"
            );
        }
    }

    /// Cancel the session; repeated calls have no further effect
    pub fn cancel(&self) -> bool {
        self.engine.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.engine.is_cancelled()
    }

    /// Resolves once every stage has stopped
    pub async fn closed(&self) {
        self.engine.closed().await
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        metrics::gauge!("parley_sessions_active").decrement(1.0);
        tracing::debug!(stream_id = %self.stream_id, "Session dropped");
    }
}

/// Close the transport once the pipeline is cancelled for any reason
async fn watch_events(
    stream_id: String,
    mut events: broadcast::Receiver<EngineEvent>,
    transport: Arc<dyn OutboundTransport>,
) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Escalated { failures }) => {
                tracing::warn!(stream_id = %stream_id, failures, "Ending call after repeated failures");
            }
            Ok(EngineEvent::TransportClosed(reason)) => {
                tracing::warn!(stream_id = %stream_id, reason = %reason, "Ending call after transport failure");
            }
            Ok(EngineEvent::Cancelled) | Err(RecvError::Closed) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(stream_id = %stream_id, skipped, "Session event watcher lagged");
            }
        }
    }

    if let Err(e) = transport.close().await {
        tracing::debug!(stream_id = %stream_id, error = %e, "Transport already closed");
    }
}
