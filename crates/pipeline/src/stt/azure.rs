//! Azure Speech short-audio recognition
//!
//! Posts one utterance as a 16-bit mono WAV to the Speech REST endpoint and
//! yields a single final transcript. Utterances shorter than the minimum
//! are not sent.

use std::io::Cursor;
use std::time::Duration;

use parley_config::SpeechServiceConfig;
use parley_core::{AudioChunk, Capability, Role, SpeechToText, TranscriptStream, TranscriptText};
use serde::Deserialize;

use crate::PipelineError;

/// Azure STT client configuration
#[derive(Debug, Clone)]
pub struct AzureSttConfig {
    /// Full recognition endpoint (query string excluded)
    pub endpoint: String,
    pub api_key: String,
    pub language: String,
    /// Shortest audio worth a request
    pub min_audio: Duration,
}

impl AzureSttConfig {
    pub fn from_service(config: &SpeechServiceConfig) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
                config.region
            )
        });
        Self {
            endpoint,
            api_key: config.api_key.clone(),
            language: config.language.clone(),
            min_audio: Duration::from_millis(100),
        }
    }
}

/// Response from the recognition endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecognitionResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
}

pub struct AzureSpeechToText {
    config: AzureSttConfig,
    client: reqwest::Client,
}

impl AzureSpeechToText {
    pub fn new(config: AzureSttConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            endpoint = %config.endpoint,
            language = %config.language,
            "Azure STT client ready"
        );

        Ok(Self { config, client })
    }

    fn request_url(&self) -> String {
        format!("{}?language={}&format=simple", self.config.endpoint, self.config.language)
    }

    async fn recognize(&self, audio: AudioChunk) -> Result<Option<String>, PipelineError> {
        if audio.duration() < self.config.min_audio {
            tracing::debug!(
                duration_ms = audio.duration().as_millis() as u64,
                "Utterance too short to transcribe"
            );
            return Ok(None);
        }

        let wav = encode_wav(&audio)?;
        let content_type = format!(
            "audio/wav; codecs=audio/pcm; samplerate={}",
            audio.sample_rate().as_u32()
        );

        let response = self
            .client
            .post(self.request_url())
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header("Content-Type", content_type)
            .header("Accept", "application/json")
            .body(wav)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let result: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::InvalidResponse(e.to_string()))?;

        interpret(result)
    }
}

fn interpret(result: RecognitionResponse) -> Result<Option<String>, PipelineError> {
    match result.recognition_status.as_str() {
        "Success" => Ok(result.display_text.filter(|text| !text.trim().is_empty())),
        // No speech recognised in otherwise valid audio
        "NoMatch" | "InitialSilenceTimeout" | "BabbleTimeout" => Ok(None),
        other => Err(PipelineError::InvalidResponse(format!(
            "Recognition failed: {}",
            other
        ))),
    }
}

/// 16-bit mono WAV at the chunk's sample rate
fn encode_wav(audio: &AudioChunk) -> Result<Vec<u8>, PipelineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate().as_u32(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + audio.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for sample in audio.to_i16() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

impl SpeechToText for AzureSpeechToText {
    fn transcribe(&self, audio: AudioChunk) -> TranscriptStream<'_> {
        Box::pin(async_stream::stream! {
            match self.recognize(audio).await {
                Ok(Some(text)) => yield Ok(TranscriptText::final_text(Role::User, text)),
                Ok(None) => {}
                Err(e) => yield Err(e.for_capability(Capability::SpeechToText)),
            }
        })
    }

    fn model_name(&self) -> &str {
        "azure-speech"
    }
}
