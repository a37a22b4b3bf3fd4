//! Utterance segmentation
//!
//! A chunk counts as speech when its RMS energy reaches the configured
//! threshold. Speech must be sustained for the debounce window before an
//! utterance starts, and silence for the stop window before it ends.

use std::time::Duration;

use async_trait::async_trait;
use parley_config::VadConfig;
use parley_core::{ControlSignal, Direction, Frame, FramePayload, Result};

use crate::engine::StageContext;
use crate::stage::FrameProcessor;

/// Segmenter configuration
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Minimum RMS energy (dBFS) of a speech chunk
    pub energy_threshold_db: f32,
    /// Sustained speech needed to confirm an utterance
    pub start_debounce: Duration,
    /// Sustained silence needed to end an utterance
    pub stop_silence: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from(&VadConfig::default())
    }
}

impl From<&VadConfig> for SegmenterConfig {
    fn from(config: &VadConfig) -> Self {
        Self {
            energy_threshold_db: config.energy_threshold_db,
            start_debounce: config.start_debounce(),
            stop_silence: config.stop_silence(),
        }
    }
}

/// Detector states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmenterState {
    /// No speech detected
    #[default]
    Idle,
    /// Loud audio seen, debounce window not yet filled
    PendingSpeech,
    /// Utterance confirmed
    Speaking,
    /// Utterance in progress, accumulating silence
    PendingSilence,
}

/// Outcome of one detector step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadResult {
    /// Silence outside an utterance
    Silence,
    /// Loud audio, debounce window not yet filled
    PotentialSpeechStart,
    /// Loud audio stopped before the debounce window filled
    SpeechRejected,
    /// Utterance confirmed
    SpeechConfirmed,
    /// Utterance continuing
    SpeechContinue,
    /// Quiet audio inside an utterance
    PotentialSpeechEnd,
    /// Utterance ended
    SpeechEnd,
}

/// Pure speech/silence state machine
#[derive(Debug, Clone)]
pub struct SpeechDetector {
    config: SegmenterConfig,
    state: SegmenterState,
    speech: Duration,
    silence: Duration,
}

impl SpeechDetector {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Idle,
            speech: Duration::ZERO,
            silence: Duration::ZERO,
        }
    }

    pub fn is_speech(&self, energy_db: f32) -> bool {
        energy_db >= self.config.energy_threshold_db
    }

    /// Advance by one chunk of `duration`
    pub fn advance(&mut self, is_speech: bool, duration: Duration) -> VadResult {
        match (self.state, is_speech) {
            (SegmenterState::Idle, true) => {
                self.speech = Duration::ZERO;
                self.silence = Duration::ZERO;
                self.accumulate_speech(duration)
            }

            (SegmenterState::PendingSpeech, true) => self.accumulate_speech(duration),

            (SegmenterState::PendingSpeech, false) => {
                self.state = SegmenterState::Idle;
                self.speech = Duration::ZERO;
                VadResult::SpeechRejected
            }

            (SegmenterState::Speaking, true) => VadResult::SpeechContinue,

            (SegmenterState::Speaking, false) => {
                self.silence = Duration::ZERO;
                self.accumulate_silence(duration)
            }

            (SegmenterState::PendingSilence, true) => {
                self.state = SegmenterState::Speaking;
                self.silence = Duration::ZERO;
                VadResult::SpeechContinue
            }

            (SegmenterState::PendingSilence, false) => self.accumulate_silence(duration),

            (SegmenterState::Idle, false) => VadResult::Silence,
        }
    }

    fn accumulate_speech(&mut self, duration: Duration) -> VadResult {
        self.speech += duration;
        if self.speech >= self.config.start_debounce {
            self.state = SegmenterState::Speaking;
            VadResult::SpeechConfirmed
        } else {
            self.state = SegmenterState::PendingSpeech;
            VadResult::PotentialSpeechStart
        }
    }

    fn accumulate_silence(&mut self, duration: Duration) -> VadResult {
        self.silence += duration;
        if self.silence >= self.config.stop_silence {
            self.state = SegmenterState::Idle;
            self.speech = Duration::ZERO;
            self.silence = Duration::ZERO;
            VadResult::SpeechEnd
        } else {
            self.state = SegmenterState::PendingSilence;
            VadResult::PotentialSpeechEnd
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Whether an utterance is open
    pub fn in_utterance(&self) -> bool {
        matches!(
            self.state,
            SegmenterState::Speaking | SegmenterState::PendingSilence
        )
    }

    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech = Duration::ZERO;
        self.silence = Duration::ZERO;
    }
}

/// First stage: tags utterance audio and emits speech boundaries
///
/// Audio seen during the debounce window is held back, along with any
/// inbound frame that arrives behind it, and released in order once the
/// window resolves. A confirmed utterance that starts while the assistant
/// is speaking raises a barge-in interrupt.
pub struct Segmenter {
    detector: SpeechDetector,
    held: Vec<Frame>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            detector: SpeechDetector::new(config),
            held: Vec::new(),
        }
    }

    pub fn state(&self) -> SegmenterState {
        self.detector.state()
    }

    async fn release_held(&mut self, utterance: bool, ctx: &StageContext) -> Result<()> {
        for frame in std::mem::take(&mut self.held) {
            ctx.emit(tag_audio(frame, utterance)).await?;
        }
        Ok(())
    }

    async fn confirm(&mut self, ctx: &StageContext) -> Result<()> {
        let Some(onset) = self.held.first() else {
            return Ok(());
        };
        let onset_sequence = onset.sequence();
        let start = onset.derive(ControlSignal::StartOfSpeech);

        if ctx.assistant().is_active() {
            tracing::debug!(sequence = onset_sequence, "User barged in over assistant");
            ctx.raise_barge_in(onset_sequence);
        }

        tracing::debug!(sequence = onset_sequence, "Speech started");
        ctx.emit(start).await?;
        self.release_held(true, ctx).await
    }
}

fn tag_audio(frame: Frame, utterance: bool) -> Frame {
    match frame.audio() {
        Some(chunk) => frame.derive(chunk.tagged(utterance)),
        None => frame,
    }
}

#[async_trait]
impl FrameProcessor for Segmenter {
    async fn process(&mut self, frame: Frame, ctx: &StageContext) -> Result<()> {
        let chunk = match (frame.direction(), frame.payload()) {
            (Direction::Inbound, FramePayload::Audio(chunk)) => chunk.clone(),
            _ => {
                if self.held.is_empty() {
                    return ctx.emit(frame).await;
                }
                self.held.push(frame);
                return Ok(());
            }
        };

        let is_speech = self.detector.is_speech(chunk.energy_db());
        match self.detector.advance(is_speech, chunk.duration()) {
            VadResult::Silence => ctx.emit(tag_audio(frame, false)).await,
            VadResult::PotentialSpeechStart => {
                self.held.push(frame);
                Ok(())
            }
            VadResult::SpeechRejected => {
                self.held.push(frame);
                self.release_held(false, ctx).await
            }
            VadResult::SpeechConfirmed => {
                self.held.push(frame);
                self.confirm(ctx).await
            }
            VadResult::SpeechContinue | VadResult::PotentialSpeechEnd => {
                ctx.emit(tag_audio(frame, true)).await
            }
            VadResult::SpeechEnd => {
                let end = frame.derive(ControlSignal::EndOfSpeech);
                tracing::debug!(sequence = frame.sequence(), "Speech ended");
                ctx.emit(tag_audio(frame, true)).await?;
                ctx.emit(end).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "segmenter"
    }
}
