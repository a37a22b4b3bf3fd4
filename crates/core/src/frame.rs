//! Frame model
//!
//! Every unit of work moving through the pipeline is a [`Frame`]. Frames
//! carry a sequence number scoped to their direction of travel; derived
//! frames inherit the number of the frame they came from, so each stage
//! sees non-decreasing numbers per direction.

use std::time::Instant;

use crate::audio::AudioChunk;
use crate::conversation::Role;

/// Direction of travel relative to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Caller towards the agent
    Inbound,
    /// Agent towards the caller
    Outbound,
}

/// A piece of transcribed or generated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptText {
    pub role: Role,
    pub text: String,
    /// Partial results may still change; only finals are committed
    pub is_final: bool,
}

impl TranscriptText {
    pub fn partial(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            is_final: true,
        }
    }
}

/// Why an interrupt was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptReason {
    /// User started speaking over the assistant
    #[default]
    BargeIn,
    /// A stage failed and the current turn is unwound without a reply
    TurnAbandoned,
}

/// Issuance point of an interrupt
///
/// Holds one watermark per direction. A turn-scoped frame whose sequence
/// number is below the watermark for its direction is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptMark {
    pub inbound: u64,
    pub outbound: u64,
    pub reason: InterruptReason,
    /// Count of interrupts raised so far in this pipeline
    pub epoch: u64,
}

impl InterruptMark {
    pub fn watermark(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }

    /// Whether work at `sequence` in `direction` predates this mark
    pub fn covers(&self, direction: Direction, sequence: u64) -> bool {
        sequence < self.watermark(direction)
    }

    /// Whether `frame` must be discarded under this mark
    pub fn is_stale(&self, frame: &Frame) -> bool {
        frame.is_turn_scoped() && self.covers(frame.direction, frame.sequence)
    }

    /// Next mark, never moving a watermark backwards
    pub fn advance(&self, inbound: u64, outbound: u64, reason: InterruptReason) -> Self {
        Self {
            inbound: self.inbound.max(inbound),
            outbound: self.outbound.max(outbound),
            reason,
            epoch: self.epoch + 1,
        }
    }
}

/// Control signals
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    /// Segmenter confirmed the start of an utterance
    StartOfSpeech,
    /// Segmenter confirmed the end of an utterance
    EndOfSpeech,
    /// Discard work older than the mark (delivered out of band)
    Interrupt(InterruptMark),
    /// Stop the pipeline
    Cancel,
    /// System instruction to commit to the context
    SystemPrompt(String),
    /// Context holds a new turn; the generator should respond
    ContextReady,
    /// Generator began streaming a response
    ResponseStart,
    /// Generator finished a response (end-of-turn marker)
    ResponseEnd,
}

impl ControlSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ControlSignal::StartOfSpeech => "start_of_speech",
            ControlSignal::EndOfSpeech => "end_of_speech",
            ControlSignal::Interrupt(_) => "interrupt",
            ControlSignal::Cancel => "cancel",
            ControlSignal::SystemPrompt(_) => "system_prompt",
            ControlSignal::ContextReady => "context_ready",
            ControlSignal::ResponseStart => "response_start",
            ControlSignal::ResponseEnd => "response_end",
        }
    }
}

/// Frame contents
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Audio(AudioChunk),
    Transcript(TranscriptText),
    Control(ControlSignal),
}

impl From<AudioChunk> for FramePayload {
    fn from(chunk: AudioChunk) -> Self {
        FramePayload::Audio(chunk)
    }
}

impl From<TranscriptText> for FramePayload {
    fn from(text: TranscriptText) -> Self {
        FramePayload::Transcript(text)
    }
}

impl From<ControlSignal> for FramePayload {
    fn from(signal: ControlSignal) -> Self {
        FramePayload::Control(signal)
    }
}

/// Immutable unit of pipeline data
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    direction: Direction,
    payload: FramePayload,
    created_at: Instant,
}

impl Frame {
    pub fn new(direction: Direction, sequence: u64, payload: impl Into<FramePayload>) -> Self {
        Self {
            sequence,
            direction,
            payload: payload.into(),
            created_at: Instant::now(),
        }
    }

    pub fn inbound(sequence: u64, payload: impl Into<FramePayload>) -> Self {
        Self::new(Direction::Inbound, sequence, payload)
    }

    pub fn outbound(sequence: u64, payload: impl Into<FramePayload>) -> Self {
        Self::new(Direction::Outbound, sequence, payload)
    }

    /// New frame with the same direction and sequence number
    pub fn derive(&self, payload: impl Into<FramePayload>) -> Frame {
        Self::new(self.direction, self.sequence, payload)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn payload(&self) -> &FramePayload {
        &self.payload
    }

    pub fn into_payload(self) -> FramePayload {
        self.payload
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn audio(&self) -> Option<&AudioChunk> {
        match &self.payload {
            FramePayload::Audio(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn transcript(&self) -> Option<&TranscriptText> {
        match &self.payload {
            FramePayload::Transcript(text) => Some(text),
            _ => None,
        }
    }

    pub fn control(&self) -> Option<&ControlSignal> {
        match &self.payload {
            FramePayload::Control(signal) => Some(signal),
            _ => None,
        }
    }

    /// Audio or text
    pub fn is_data(&self) -> bool {
        matches!(
            self.payload,
            FramePayload::Audio(_) | FramePayload::Transcript(_)
        )
    }

    /// Frames that belong to a single turn and are dropped when stale
    ///
    /// Speech boundaries and system prompts survive interrupts.
    pub fn is_turn_scoped(&self) -> bool {
        match &self.payload {
            FramePayload::Audio(_) | FramePayload::Transcript(_) => true,
            FramePayload::Control(signal) => matches!(
                signal,
                ControlSignal::ContextReady
                    | ControlSignal::ResponseStart
                    | ControlSignal::ResponseEnd
            ),
        }
    }

    /// Short name for logs and metrics
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            FramePayload::Audio(_) => "audio",
            FramePayload::Transcript(_) => "transcript",
            FramePayload::Control(signal) => signal.name(),
        }
    }
}
