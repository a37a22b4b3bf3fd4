//! Azure Speech synthesis over REST
//!
//! Sends SSML and streams back raw little-endian PCM16 at the requested
//! output rate. The response body is decoded chunk by chunk as it arrives.

use futures::StreamExt;
use parley_config::SynthesisServiceConfig;
use parley_core::{AudioChunk, AudioStream, Capability, SampleRate, TextToSpeech};

use crate::PipelineError;

/// Azure TTS client configuration
#[derive(Debug, Clone)]
pub struct AzureTtsConfig {
    pub endpoint: String,
    pub api_key: String,
    pub voice: String,
    pub language: String,
    pub sample_rate: SampleRate,
}

impl AzureTtsConfig {
    pub fn from_service(config: &SynthesisServiceConfig, sample_rate: SampleRate) -> Self {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                config.region
            )
        });
        Self {
            endpoint,
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
            language: config.language.clone(),
            sample_rate,
        }
    }

    fn output_format(&self) -> &'static str {
        match self.sample_rate {
            SampleRate::Hz8000 => "raw-8khz-16bit-mono-pcm",
            SampleRate::Hz16000 => "raw-16khz-16bit-mono-pcm",
            SampleRate::Hz24000 => "raw-24khz-16bit-mono-pcm",
        }
    }
}

pub struct AzureTextToSpeech {
    config: AzureTtsConfig,
    client: reqwest::Client,
}

impl AzureTextToSpeech {
    pub fn new(config: AzureTtsConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| PipelineError::Network(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(
            endpoint = %config.endpoint,
            voice = %config.voice,
            format = config.output_format(),
            "Azure TTS client ready"
        );

        Ok(Self { config, client })
    }

    fn ssml(&self, text: &str) -> String {
        format!(
            "<speak version='1.0' xml:lang='{lang}'><voice xml:lang='{lang}' name='{voice}'>{text}</voice></speak>",
            lang = self.config.language,
            voice = self.config.voice,
            text = escape_xml(text),
        )
    }

    async fn request(&self, text: &str) -> Result<reqwest::Response, PipelineError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", self.config.output_format())
            .header("User-Agent", "parley")
            .body(self.ssml(text))
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
        Ok(response)
    }
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reassembles PCM16 samples split across body chunks
#[derive(Debug, Default)]
struct Pcm16Decoder {
    carry: Option<u8>,
}

impl Pcm16Decoder {
    fn decode(&mut self, bytes: &[u8], sample_rate: SampleRate) -> Option<AudioChunk> {
        let mut joined = Vec::with_capacity(bytes.len() + 1);
        joined.extend(self.carry.take());
        joined.extend_from_slice(bytes);

        if joined.len() % 2 == 1 {
            self.carry = joined.pop();
        }
        (!joined.is_empty()).then(|| AudioChunk::from_pcm16(&joined, sample_rate))
    }
}

impl TextToSpeech for AzureTextToSpeech {
    fn synthesize(&self, text: String) -> AudioStream<'_> {
        let sample_rate = self.config.sample_rate;

        Box::pin(async_stream::stream! {
            let response = match self.request(&text).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(e.for_capability(Capability::TextToSpeech));
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut decoder = Pcm16Decoder::default();
            while let Some(bytes) = body.next().await {
                match bytes {
                    Ok(bytes) => {
                        if let Some(chunk) = decoder.decode(&bytes, sample_rate) {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(PipelineError::from(e).for_capability(Capability::TextToSpeech));
                        return;
                    }
                }
            }
        })
    }

    fn voice_name(&self) -> &str {
        &self.config.voice
    }
}
