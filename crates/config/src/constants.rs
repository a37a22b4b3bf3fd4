//! Default values used across the codebase
//!
//! Keep defaults here rather than scattering literals through the crates.

/// Audio framing
pub mod audio {
    /// Telephony rate used end to end
    pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

    /// Size of a pipeline audio chunk
    pub const DEFAULT_CHUNK_MS: u64 = 20;

    pub const MIN_CHUNK_MS: u64 = 10;
    pub const MAX_CHUNK_MS: u64 = 100;
}

/// Voice activity segmentation
pub mod vad {
    /// Chunks at or above this RMS level count as voiced
    pub const DEFAULT_ENERGY_THRESHOLD_DB: f32 = -35.0;

    /// Sustained voice needed before StartOfSpeech
    pub const DEFAULT_START_DEBOUNCE_MS: u64 = 200;

    /// Sustained silence needed before EndOfSpeech
    pub const DEFAULT_STOP_SILENCE_MS: u64 = 640;
}

/// Pipeline engine
pub mod pipeline {
    /// Frames buffered between two stages
    pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

    /// Deadline for each external call
    pub const DEFAULT_CAPABILITY_DEADLINE_MS: u64 = 5000;
    pub const MIN_CAPABILITY_DEADLINE_MS: u64 = 100;

    /// Consecutive stage failures before the session is cancelled
    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

    /// Time allowed for stages to wind down after a disconnect
    pub const DEFAULT_DISCONNECT_GRACE_MS: u64 = 2000;
}

/// Conversation seeding
pub mod prompts {
    pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an elementary teacher in an audio call. \
        Your output will be converted to audio so don't include special characters in your answers. \
        Respond to what the student said in a short short sentence.";

    /// Appended when the caller connects so the agent speaks first
    pub const DEFAULT_GREETING_INSTRUCTION: &str = "Please introduce yourself to the user.";
}

/// External service defaults
pub mod services {
    pub const DEFAULT_SPEECH_REGION: &str = "eastus";
    pub const DEFAULT_SPEECH_LANGUAGE: &str = "en-US";
    pub const DEFAULT_TTS_VOICE: &str = "en-US-AriaNeural";
    pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1";
    pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
    pub const DEFAULT_AZURE_API_VERSION: &str = "2024-06-01";
}

/// HTTP server
pub mod server {
    pub const DEFAULT_HOST: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8765;
    pub const DEFAULT_MAX_SESSIONS: usize = 100;
    pub const MEDIA_STREAM_PATH: &str = "/media-stream";
}
