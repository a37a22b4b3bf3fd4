//! External service endpoints and credentials

use serde::{Deserialize, Serialize};

use crate::constants::services;
use crate::ConfigError;

/// All external capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub stt: SpeechServiceConfig,

    #[serde(default)]
    pub tts: SynthesisServiceConfig,

    #[serde(default)]
    pub llm: LlmServiceConfig,
}

impl ServicesConfig {
    /// Check credentials needed to serve live calls
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stt.validate()?;
        self.tts.validate()?;
        self.llm.validate()?;
        Ok(())
    }
}

/// Azure Speech recognition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechServiceConfig {
    /// Azure region, used to build the endpoint when none is given
    #[serde(default = "default_region")]
    pub region: String,

    /// Full endpoint override
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Subscription key
    #[serde(default)]
    pub api_key: String,

    /// Recognition language
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_region() -> String {
    services::DEFAULT_SPEECH_REGION.to_string()
}

fn default_language() -> String {
    services::DEFAULT_SPEECH_LANGUAGE.to_string()
}

impl Default for SpeechServiceConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            api_key: String::new(),
            language: default_language(),
        }
    }
}

impl SpeechServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField("services.stt.api_key".to_string()));
        }
        if self.endpoint.is_none() && self.region.is_empty() {
            return Err(ConfigError::MissingField("services.stt.region".to_string()));
        }
        Ok(())
    }
}

/// Azure Speech synthesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisServiceConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: String,

    /// Neural voice name
    #[serde(default = "default_voice")]
    pub voice: String,

    #[serde(default = "default_language")]
    pub language: String,
}

fn default_voice() -> String {
    services::DEFAULT_TTS_VOICE.to_string()
}

impl Default for SynthesisServiceConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            api_key: String::new(),
            voice: default_voice(),
            language: default_language(),
        }
    }
}

impl SynthesisServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField("services.tts.api_key".to_string()));
        }
        if self.voice.is_empty() {
            return Err(ConfigError::MissingField("services.tts.voice".to_string()));
        }
        if self.endpoint.is_none() && self.region.is_empty() {
            return Err(ConfigError::MissingField("services.tts.region".to_string()));
        }
        Ok(())
    }
}

/// Chat-completion provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    Azure,
}

/// Response generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmServiceConfig {
    #[serde(default)]
    pub provider: LlmProvider,

    /// Base URL (Azure resource endpoint for `azure`)
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    /// Model name, or deployment name for Azure
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Azure API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_endpoint() -> String {
    services::DEFAULT_LLM_ENDPOINT.to_string()
}

fn default_llm_model() -> String {
    services::DEFAULT_LLM_MODEL.to_string()
}

fn default_api_version() -> String {
    services::DEFAULT_AZURE_API_VERSION.to_string()
}

fn default_max_tokens() -> usize {
    150
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmServiceConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            api_version: default_api_version(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl LlmServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::MissingField("services.llm.endpoint".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingField("services.llm.api_key".to_string()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "services.llm.temperature".to_string(),
                message: format!("Must be between 0.0 and 2.0, got {}", self.temperature),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_reported() {
        let services = ServicesConfig::default();
        match services.validate() {
            Err(ConfigError::MissingField(field)) => assert_eq!(field, "services.stt.api_key"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_complete_services_validate() {
        let mut services = ServicesConfig::default();
        services.stt.api_key = "stt-key".into();
        services.tts.api_key = "tts-key".into();
        services.llm.api_key = "llm-key".into();
        assert!(services.validate().is_ok());

        services.llm.temperature = 3.0;
        assert!(services.validate().is_err());
    }

    #[test]
    fn test_provider_parsing() {
        let cfg: LlmServiceConfig = serde_json::from_str(r#"{"provider":"azure"}"#).unwrap();
        assert_eq!(cfg.provider, LlmProvider::Azure);
        assert_eq!(cfg.model, "gpt-4o-mini");
    }
}
