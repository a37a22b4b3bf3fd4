//! Application state
//!
//! Shared across all handlers.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use parley_config::Settings;
use parley_llm::{ChatCompletionConfig, ChatCompletionGenerator};
use parley_pipeline::{
    AzureSpeechToText, AzureSttConfig, AzureTextToSpeech, AzureTtsConfig, SessionServices,
};

use crate::origination::TwilioClient;
use crate::registry::SessionRegistry;
use crate::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub sessions: Arc<SessionRegistry>,
    /// Capability clients shared by every session
    pub services: SessionServices,
    /// Present when Twilio credentials are configured
    pub twilio: Option<Arc<TwilioClient>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Settings, services: SessionServices) -> Self {
        let sessions = Arc::new(SessionRegistry::new(config.server.max_sessions));
        let twilio = TwilioClient::from_config(&config.twilio).map(Arc::new);
        Self {
            config: Arc::new(config),
            sessions,
            services,
            twilio,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Build the live Azure speech and chat-completion clients
pub fn build_services(settings: &Settings) -> Result<SessionServices, ServerError> {
    let output_rate = settings.audio.output_rate().map_err(|e| ServerError::NotConfigured(e.to_string()))?;

    let stt = AzureSpeechToText::new(AzureSttConfig::from_service(&settings.services.stt))
        .map_err(|e| ServerError::Internal(format!("speech-to-text client: {e}")))?;
    let tts = AzureTextToSpeech::new(AzureTtsConfig::from_service(
        &settings.services.tts,
        output_rate,
    ))
    .map_err(|e| ServerError::Internal(format!("text-to-speech client: {e}")))?;
    let generator =
        ChatCompletionGenerator::new(ChatCompletionConfig::from_service(&settings.services.llm))
            .map_err(|e| ServerError::NotConfigured(format!("response generator: {e}")))?;

    tracing::info!(
        stt_language = %settings.services.stt.language,
        tts_voice = %settings.services.tts.voice,
        llm_model = %settings.services.llm.model,
        "Capability clients ready"
    );

    Ok(SessionServices {
        stt: Arc::new(stt),
        generator: Arc::new(generator),
        tts: Arc::new(tts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_services_need_llm_key() {
        let settings = Settings::default();
        assert!(matches!(
            build_services(&settings),
            Err(ServerError::NotConfigured(_))
        ));

        let mut settings = Settings::default();
        settings.services.llm.api_key = "sk-test".into();
        assert!(build_services(&settings).is_ok());
    }

    #[test]
    fn test_twilio_client_only_when_configured() {
        let state = AppState::new(Settings::default(), crate::testing::quiet_services());
        assert!(state.twilio.is_none());
        assert_eq!(state.sessions.max_sessions(), state.config.server.max_sessions);

        let mut settings = Settings::default();
        settings.twilio.account_sid = "AC123".into();
        settings.twilio.auth_token = "token".into();
        settings.twilio.from_number = "+15550001111".into();
        let state = AppState::new(settings, crate::testing::quiet_services());
        assert!(state.twilio.is_some());
    }
}
