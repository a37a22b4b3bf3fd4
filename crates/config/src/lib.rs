//! Configuration management for parley
//!
//! Supports loading configuration from:
//! - TOML/YAML files under `config/` (`default`, then `{PARLEY_ENV}`)
//! - Environment variables (`PARLEY__SECTION__KEY`)
//!
//! Every section validates itself; a session refuses to start on an
//! invalid call path before it accepts any audio.

pub mod constants;
pub mod pipeline;
pub mod services;
pub mod settings;

pub use pipeline::{AudioConfig, PipelineConfig, SessionConfig, VadConfig};
pub use services::{
    LlmProvider, LlmServiceConfig, ServicesConfig, SpeechServiceConfig, SynthesisServiceConfig,
};
pub use settings::{
    load_settings, load_settings_from, ObservabilityConfig, RuntimeEnvironment, ServerConfig,
    Settings, TwilioConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for parley_core::Error {
    fn from(err: ConfigError) -> Self {
        parley_core::Error::Configuration(err.to_string())
    }
}
