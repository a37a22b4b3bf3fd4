//! Pipeline, audio and session settings

use parley_core::SampleRate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{audio, pipeline, prompts, vad};
use crate::ConfigError;

/// Audio format used end to end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Inbound sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub input_sample_rate: u32,

    /// Outbound sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub output_sample_rate: u32,

    /// Chunk size in milliseconds
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u64,
}

fn default_sample_rate() -> u32 {
    audio::DEFAULT_SAMPLE_RATE
}

fn default_chunk_ms() -> u64 {
    audio::DEFAULT_CHUNK_MS
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: default_sample_rate(),
            output_sample_rate: default_sample_rate(),
            chunk_ms: default_chunk_ms(),
        }
    }
}

impl AudioConfig {
    pub fn input_rate(&self) -> Result<SampleRate, ConfigError> {
        parse_rate("audio.input_sample_rate", self.input_sample_rate)
    }

    pub fn output_rate(&self) -> Result<SampleRate, ConfigError> {
        parse_rate("audio.output_sample_rate", self.output_sample_rate)
    }

    /// Both directions must run at the telephony rate; there is no transcoding
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("audio.input_sample_rate", self.input_rate()?),
            ("audio.output_sample_rate", self.output_rate()?),
        ] {
            if rate.as_u32() != audio::DEFAULT_SAMPLE_RATE {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!(
                        "Media streams carry {} Hz audio, got {}",
                        audio::DEFAULT_SAMPLE_RATE,
                        rate.as_u32()
                    ),
                });
            }
        }

        if !(audio::MIN_CHUNK_MS..=audio::MAX_CHUNK_MS).contains(&self.chunk_ms) {
            return Err(ConfigError::InvalidValue {
                field: "audio.chunk_ms".to_string(),
                message: format!(
                    "Must be between {} and {}, got {}",
                    audio::MIN_CHUNK_MS,
                    audio::MAX_CHUNK_MS,
                    self.chunk_ms
                ),
            });
        }
        Ok(())
    }
}

fn parse_rate(field: &str, hz: u32) -> Result<SampleRate, ConfigError> {
    SampleRate::from_hz(hz).ok_or_else(|| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("Unsupported sample rate {hz} (expected 8000, 16000 or 24000)"),
    })
}

/// Voice activity segmentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// RMS level in dBFS at or above which a chunk is voiced
    #[serde(default = "default_energy_threshold_db")]
    pub energy_threshold_db: f32,

    /// Interruption debounce window
    #[serde(default = "default_start_debounce_ms")]
    pub start_debounce_ms: u64,

    /// Silence needed to close an utterance
    #[serde(default = "default_stop_silence_ms")]
    pub stop_silence_ms: u64,
}

fn default_energy_threshold_db() -> f32 {
    vad::DEFAULT_ENERGY_THRESHOLD_DB
}

fn default_start_debounce_ms() -> u64 {
    vad::DEFAULT_START_DEBOUNCE_MS
}

fn default_stop_silence_ms() -> u64 {
    vad::DEFAULT_STOP_SILENCE_MS
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold_db: default_energy_threshold_db(),
            start_debounce_ms: default_start_debounce_ms(),
            stop_silence_ms: default_stop_silence_ms(),
        }
    }
}

impl VadConfig {
    pub fn start_debounce(&self) -> Duration {
        Duration::from_millis(self.start_debounce_ms)
    }

    pub fn stop_silence(&self) -> Duration {
        Duration::from_millis(self.stop_silence_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-96.0..=0.0).contains(&self.energy_threshold_db) {
            return Err(ConfigError::InvalidValue {
                field: "vad.energy_threshold_db".to_string(),
                message: format!(
                    "Must be between -96 and 0 dBFS, got {}",
                    self.energy_threshold_db
                ),
            });
        }
        if self.start_debounce_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.start_debounce_ms".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }
        if self.stop_silence_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "vad.stop_silence_ms".to_string(),
                message: "Must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Pipeline engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bound of each stage's input queue
    #[serde(default = "default_queue_capacity")]
    pub stage_queue_capacity: usize,

    /// Deadline applied to every external call
    #[serde(default = "default_capability_deadline_ms")]
    pub capability_deadline_ms: u64,

    /// Consecutive stage failures before the session is cancelled
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// How long a disconnect waits for the stages to stop
    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,
}

fn default_queue_capacity() -> usize {
    pipeline::DEFAULT_QUEUE_CAPACITY
}

fn default_capability_deadline_ms() -> u64 {
    pipeline::DEFAULT_CAPABILITY_DEADLINE_MS
}

fn default_max_consecutive_failures() -> u32 {
    pipeline::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_disconnect_grace_ms() -> u64 {
    pipeline::DEFAULT_DISCONNECT_GRACE_MS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_queue_capacity: default_queue_capacity(),
            capability_deadline_ms: default_capability_deadline_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn capability_deadline(&self) -> Duration {
        Duration::from_millis(self.capability_deadline_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.stage_queue_capacity".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        if self.capability_deadline_ms < pipeline::MIN_CAPABILITY_DEADLINE_MS {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.capability_deadline_ms".to_string(),
                message: format!(
                    "Deadline too low (minimum {}ms)",
                    pipeline::MIN_CAPABILITY_DEADLINE_MS
                ),
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.max_consecutive_failures".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Conversation seeding for each call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// First message of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// One-shot instruction appended when the caller connects
    #[serde(default = "default_greeting_instruction")]
    pub greeting_instruction: String,
}

fn default_system_prompt() -> String {
    prompts::DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_greeting_instruction() -> String {
    prompts::DEFAULT_GREETING_INSTRUCTION.to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            greeting_instruction: default_greeting_instruction(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_prompt.trim().is_empty() {
            return Err(ConfigError::MissingField("session.system_prompt".to_string()));
        }
        Ok(())
    }
}
