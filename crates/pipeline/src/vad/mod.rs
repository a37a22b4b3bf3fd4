//! Voice Activity Detection
//!
//! Energy-based speech detector plus the pipeline stage that turns its
//! transitions into StartOfSpeech / EndOfSpeech frames.

mod segmenter;

pub use segmenter::{Segmenter, SegmenterConfig, SegmenterState, SpeechDetector, VadResult};
