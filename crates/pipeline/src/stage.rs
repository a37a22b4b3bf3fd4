//! Stage interface and the fixed set of stage kinds

use async_trait::async_trait;
use parley_core::{Frame, InterruptMark, Result};

use crate::aggregator::{AssistantAggregator, UserAggregator};
use crate::engine::StageContext;
use crate::generator::GeneratorStage;
use crate::output::OutputStage;
use crate::stt::SttStage;
use crate::tts::TtsStage;
use crate::vad::Segmenter;

/// Frame processor for pipeline stages
///
/// Each processor receives frames in order, and emits output frames
/// downstream through [`StageContext::emit`]. Processors run in separate
/// tokio tasks, connected by bounded channels.
///
/// # Example Implementation
///
/// ```ignore
/// struct Passthrough;
///
/// #[async_trait]
/// impl FrameProcessor for Passthrough {
///     async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
///         ctx.emit(frame).await
///     }
///
///     fn name(&self) -> &'static str {
///         "passthrough"
///     }
/// }
/// ```
#[async_trait]
pub trait FrameProcessor: Send + 'static {
    /// Process one frame
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()>;

    /// Drop in-progress state that predates `mark`
    ///
    /// Stages without buffered state keep the default.
    async fn on_interrupt(&mut self, _mark: &InterruptMark, _ctx: &StageContext) {}

    /// Get processor name for tracing
    fn name(&self) -> &'static str;
}

/// Every kind of stage the engine can run
pub enum Stage {
    Segmenter(Segmenter),
    SpeechToText(SttStage),
    UserAggregator(UserAggregator),
    Generator(GeneratorStage),
    AssistantAggregator(AssistantAggregator),
    TextToSpeech(TtsStage),
    Output(OutputStage),
    /// Processor supplied by the embedder
    Custom(Box<dyn FrameProcessor>),
}

impl Stage {
    pub fn custom(processor: impl FrameProcessor) -> Self {
        Stage::Custom(Box::new(processor))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Segmenter(s) => s.name(),
            Stage::SpeechToText(s) => s.name(),
            Stage::UserAggregator(s) => s.name(),
            Stage::Generator(s) => s.name(),
            Stage::AssistantAggregator(s) => s.name(),
            Stage::TextToSpeech(s) => s.name(),
            Stage::Output(s) => s.name(),
            Stage::Custom(s) => s.name(),
        }
    }

    pub async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        match self {
            Stage::Segmenter(s) => s.process(frame, ctx).await,
            Stage::SpeechToText(s) => s.process(frame, ctx).await,
            Stage::UserAggregator(s) => s.process(frame, ctx).await,
            Stage::Generator(s) => s.process(frame, ctx).await,
            Stage::AssistantAggregator(s) => s.process(frame, ctx).await,
            Stage::TextToSpeech(s) => s.process(frame, ctx).await,
            Stage::Output(s) => s.process(frame, ctx).await,
            Stage::Custom(s) => s.process(frame, ctx).await,
        }
    }

    pub async fn on_interrupt(&mut self, mark: &InterruptMark, ctx: &StageContext) {
        match self {
            Stage::Segmenter(s) => s.on_interrupt(mark, ctx).await,
            Stage::SpeechToText(s) => s.on_interrupt(mark, ctx).await,
            Stage::UserAggregator(s) => s.on_interrupt(mark, ctx).await,
            Stage::Generator(s) => s.on_interrupt(mark, ctx).await,
            Stage::AssistantAggregator(s) => s.on_interrupt(mark, ctx).await,
            Stage::TextToSpeech(s) => s.on_interrupt(mark, ctx).await,
            Stage::Output(s) => s.on_interrupt(mark, ctx).await,
            Stage::Custom(s) => s.on_interrupt(mark, ctx).await,
        }
    }
}

impl From<Segmenter> for Stage {
    fn from(stage: Segmenter) -> Self {
        Stage::Segmenter(stage)
    }
}

impl From<SttStage> for Stage {
    fn from(stage: SttStage) -> Self {
        Stage::SpeechToText(stage)
    }
}

impl From<UserAggregator> for Stage {
    fn from(stage: UserAggregator) -> Self {
        Stage::UserAggregator(stage)
    }
}

impl From<GeneratorStage> for Stage {
    fn from(stage: GeneratorStage) -> Self {
        Stage::Generator(stage)
    }
}

impl From<AssistantAggregator> for Stage {
    fn from(stage: AssistantAggregator) -> Self {
        Stage::AssistantAggregator(stage)
    }
}

impl From<TtsStage> for Stage {
    fn from(stage: TtsStage) -> Self {
        Stage::TextToSpeech(stage)
    }
}

impl From<OutputStage> for Stage {
    fn from(stage: OutputStage) -> Self {
        Stage::Output(stage)
    }
}
