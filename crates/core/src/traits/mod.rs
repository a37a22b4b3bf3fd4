//! Capability traits
//!
//! The pipeline talks to the outside world only through these:
//!
//! ```text
//! Speech Processing:
//!   - SpeechToText: utterance audio → transcript partials and a final
//!   - TextToSpeech: sentence → stream of audio chunks
//!
//! Generation:
//!   - ResponseGenerator: conversation → stream of tokens, then end-of-turn
//!
//! Transport:
//!   - OutboundTransport: audio chunks and clear requests to the caller
//! ```
//!
//! Live clients and test doubles implement the same traits.

mod generator;
mod speech;
mod transport;

pub use generator::{ResponseGenerator, ResponseToken, TokenStream};
pub use speech::{AudioStream, SpeechToText, TextToSpeech, TranscriptStream};
pub use transport::OutboundTransport;
