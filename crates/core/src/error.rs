//! Error taxonomy shared by every pipeline crate

use thiserror::Error;

/// External capability a stage calls out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    SpeechToText,
    ResponseGenerator,
    TextToSpeech,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::SpeechToText => "speech_to_text",
            Capability::ResponseGenerator => "response_generator",
            Capability::TextToSpeech => "text_to_speech",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Connection to the caller dropped or a write failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// External call exceeded its deadline
    #[error("{capability} timed out after {elapsed_ms}ms")]
    CapabilityTimeout {
        capability: Capability,
        elapsed_ms: u64,
    },

    /// External service rejected the request or returned garbage
    #[error("{capability} fault: {message}")]
    CapabilityFault {
        capability: Capability,
        message: String,
    },

    /// Frame older than the last one a stage has seen
    #[error("Sequence violation in {stage}: frame {sequence} older than {last_seen}")]
    SequenceViolation {
        stage: &'static str,
        sequence: u64,
        last_seen: u64,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Pipeline cancelled")]
    Cancelled,
}

impl Error {
    pub fn fault(capability: Capability, message: impl Into<String>) -> Self {
        Error::CapabilityFault {
            capability,
            message: message.into(),
        }
    }

    /// Errors a stage recovers from by abandoning the current turn
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CapabilityTimeout { .. } | Error::CapabilityFault { .. }
        )
    }

    /// Errors that end the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Configuration(_) | Error::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = Error::CapabilityTimeout {
            capability: Capability::ResponseGenerator,
            elapsed_ms: 5000,
        };
        assert!(timeout.is_recoverable());
        assert!(!timeout.is_terminal());
        assert_eq!(
            timeout.to_string(),
            "response_generator timed out after 5000ms"
        );

        let fault = Error::fault(Capability::TextToSpeech, "401 Unauthorized");
        assert!(fault.is_recoverable());

        assert!(Error::Transport("closed".into()).is_terminal());
        assert!(Error::Cancelled.is_terminal());

        let stale = Error::SequenceViolation {
            stage: "tts",
            sequence: 3,
            last_seen: 9,
        };
        assert!(!stale.is_recoverable());
        assert!(!stale.is_terminal());
    }
}
