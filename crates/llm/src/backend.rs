//! OpenAI-compatible streaming chat completions
//!
//! Works with:
//! - OpenAI
//! - Azure OpenAI deployments
//! - Local servers exposing the OpenAI wire format

use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use parley_config::{LlmProvider, LlmServiceConfig};
use parley_core::{Message, ResponseGenerator, ResponseToken, TokenStream};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::LlmError;

/// Connection settings for a chat-completion endpoint
#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    /// Base URL (OpenAI: https://api.openai.com/v1, Azure: resource endpoint)
    pub endpoint: String,
    pub api_key: String,
    /// Model name, or deployment name for Azure
    pub model: String,
    /// Set for Azure; selects the deployment URL and `api-key` header
    pub api_version: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Whole-request ceiling; per-token deadlines are enforced by the pipeline
    pub timeout: Duration,
}

impl Default for ChatCompletionConfig {
    fn default() -> Self {
        Self::from_service(&LlmServiceConfig::default())
    }
}

impl ChatCompletionConfig {
    pub fn from_service(config: &LlmServiceConfig) -> Self {
        let api_version = match config.provider {
            LlmProvider::Azure => Some(config.api_version.clone()),
            LlmProvider::OpenAi => None,
        };
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_version,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Response generator backed by a streaming chat-completion API
pub struct ChatCompletionGenerator {
    config: ChatCompletionConfig,
    client: Client,
}

impl ChatCompletionGenerator {
    pub fn new(config: ChatCompletionConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && !config.endpoint.starts_with("http://localhost") {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Full URL for chat completions
    fn chat_url(&self) -> String {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        match self.config.api_version {
            Some(ref api_version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, self.config.model, api_version
            ),
            None => format!("{}/chat/completions", endpoint),
        }
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if self.config.api_version.is_some() {
            if let Ok(val) = HeaderValue::from_str(&self.config.api_key) {
                headers.insert("api-key", val);
            }
        } else if !self.config.api_key.is_empty() {
            let auth_value = format!("Bearer {}", self.config.api_key);
            if let Ok(val) = HeaderValue::from_str(&auth_value) {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
        }

        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn request_body<'a>(&'a self, messages: &'a [Message]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stream: true,
        }
    }

    async fn open(&self, messages: &[Message]) -> Result<reqwest::Response, LlmError> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| LlmError::request(e, started.elapsed()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

impl ResponseGenerator for ChatCompletionGenerator {
    fn generate(&self, messages: Vec<Message>) -> TokenStream<'_> {
        Box::pin(async_stream::stream! {
            let started = Instant::now();
            tracing::debug!(model = %self.config.model, messages = messages.len(), "Requesting completion");

            let response = match self.open(&messages).await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(parley_core::Error::from(e));
                    return;
                }
            };

            let mut tokens = Box::pin(sse_tokens(response.bytes_stream(), started));
            let mut first = true;
            while let Some(token) = tokens.next().await {
                if first {
                    metrics::histogram!("parley_llm_first_token_seconds")
                        .record(started.elapsed().as_secs_f64());
                    first = false;
                }
                let done = matches!(token, Ok(ResponseToken::EndOfTurn) | Err(_));
                yield token.map_err(parley_core::Error::from);
                if done {
                    return;
                }
            }
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Turn an SSE body into response tokens
///
/// Ends with `EndOfTurn` on `[DONE]` or a finish reason. A body that closes
/// before either yields no `EndOfTurn`.
pub fn sse_tokens<S, B, E>(
    body: S,
    started: Instant,
) -> impl Stream<Item = Result<ResponseToken, LlmError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<LlmError>,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut parser = SseParser::default();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let err: LlmError = e.into();
                    let err = match err {
                        LlmError::Timeout { .. } => LlmError::Timeout {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        },
                        other => other,
                    };
                    yield Err(err);
                    return;
                }
            };

            for event in parser.push(chunk.as_ref()) {
                match event {
                    SseEvent::Token(text) => yield Ok(ResponseToken::Text(text)),
                    SseEvent::Done => {
                        yield Ok(ResponseToken::EndOfTurn);
                        return;
                    }
                }
            }
        }

        tracing::debug!(pending = parser.pending(), "Completion stream closed before end of turn");
    }
}

/// One meaningful event from a completion stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Token(String),
    Done,
}

/// Incremental `data:` line parser
///
/// Bytes are buffered until a newline so multi-byte characters and JSON
/// payloads split across body chunks decode intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseParser {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let Ok(line) = std::str::from_utf8(&line) else {
                tracing::debug!("Skipping non-UTF-8 SSE line");
                continue;
            };

            parse_line(line.trim(), &mut events);
            if events.last() == Some(&SseEvent::Done) {
                self.finished = true;
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Bytes waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// A final chunk may carry both content and `finish_reason`: token first, then `Done`
fn parse_line(line: &str, events: &mut Vec<SseEvent>) {
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return;
    };
    if data == "[DONE]" {
        events.push(SseEvent::Done);
        return;
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed completion chunk");
            return;
        }
    };
    // Azure sends a leading chunk with no choices carrying filter results
    let Some(choice) = chunk.choices.into_iter().next() else {
        return;
    };

    if let Some(content) = choice.delta.and_then(|d| d.content).filter(|c| !c.is_empty()) {
        events.push(SseEvent::Token(content));
    }
    if choice.finish_reason.is_some() {
        events.push(SseEvent::Done);
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Role;

    fn openai() -> ChatCompletionGenerator {
        let mut service = LlmServiceConfig::default();
        service.api_key = "sk-test".into();
        ChatCompletionGenerator::new(ChatCompletionConfig::from_service(&service)).unwrap()
    }

    fn azure() -> ChatCompletionGenerator {
        let service = LlmServiceConfig {
            provider: LlmProvider::Azure,
            endpoint: "https://tutor.openai.azure.com/".into(),
            api_key: "azure-key".into(),
            model: "tutor-4o".into(),
            api_version: "2024-06-01".into(),
            ..Default::default()
        };
        ChatCompletionGenerator::new(ChatCompletionConfig::from_service(&service)).unwrap()
    }

    fn token(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}},\"finish_reason\":null}}]}}\n\n",
            text
        )
    }

    #[test]
    fn test_chat_urls() {
        assert_eq!(openai().chat_url(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            azure().chat_url(),
            "https://tutor.openai.azure.com/openai/deployments/tutor-4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_auth_headers() {
        let headers = openai().build_headers();
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-test");
        assert!(headers.get("api-key").is_none());

        let headers = azure().build_headers();
        assert_eq!(headers.get("api-key").unwrap(), "azure-key");
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn test_remote_endpoint_needs_key() {
        let config = ChatCompletionConfig::default();
        assert!(matches!(
            ChatCompletionGenerator::new(config),
            Err(LlmError::Configuration(_))
        ));

        let local = ChatCompletionConfig {
            endpoint: "http://localhost:8000/v1".into(),
            ..Default::default()
        };
        assert!(ChatCompletionGenerator::new(local).is_ok());
    }

    #[test]
    fn test_request_body() {
        let generator = openai();
        let messages = vec![
            Message::system("You are a tutor."),
            Message::new(Role::User, "Hi"),
        ];
        let body = serde_json::to_value(generator.request_body(&messages)).unwrap();

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
    }

    #[test]
    fn test_parser_handles_split_frames() {
        let mut parser = SseParser::default();
        let frame = token("Hello");
        let (head, tail) = frame.split_at(17);

        assert!(parser.push(head.as_bytes()).is_empty());
        assert_eq!(parser.push(tail.as_bytes()), vec![SseEvent::Token("Hello".into())]);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_parser_keeps_multibyte_characters() {
        let mut parser = SseParser::default();
        let frame = token("café");
        let bytes = frame.as_bytes();
        // Split inside the two-byte 'é'
        let cut = frame.find('é').unwrap() + 1;

        assert!(parser.push(&bytes[..cut]).is_empty());
        assert_eq!(parser.push(&bytes[cut..]), vec![SseEvent::Token("café".into())]);
    }

    #[test]
    fn test_parser_skips_noise_and_stops_at_done() {
        let mut parser = SseParser::default();
        let body = format!(
            ": keep-alive\n\ndata: {{\"choices\":[]}}\n\ndata: not json\n\n{}data: [DONE]\n\n{}",
            token("A noun."),
            token("ignored")
        );

        assert_eq!(
            parser.push(body.as_bytes()),
            vec![SseEvent::Token("A noun.".into()), SseEvent::Done]
        );
        assert!(parser.push(token("later").as_bytes()).is_empty());
    }

    #[test]
    fn test_finish_reason_ends_turn() {
        let mut parser = SseParser::default();
        let body = "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n";
        assert_eq!(parser.push(body.as_bytes()), vec![SseEvent::Done]);
    }

    #[test]
    fn test_final_chunk_keeps_its_content() {
        let mut parser = SseParser::default();
        let body = format!(
            "{}data: {{\"choices\":[{{\"delta\":{{\"content\":\" Bye.\"}},\"finish_reason\":\"stop\"}}]}}\n\n",
            token("Good")
        );
        assert_eq!(
            parser.push(body.as_bytes()),
            vec![
                SseEvent::Token("Good".into()),
                SseEvent::Token(" Bye.".into()),
                SseEvent::Done
            ]
        );
        assert!(parser.push(b"data: [DONE]\n").is_empty());
    }

    #[tokio::test]
    async fn test_token_stream_ends_with_end_of_turn() {
        let body = format!("{}{}data: [DONE]\n\n", token("Hi "), token("there."));
        let chunks: Vec<Result<Vec<u8>, LlmError>> = body
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();

        let tokens: Vec<_> = sse_tokens(futures::stream::iter(chunks), Instant::now())
            .collect()
            .await;
        let tokens: Vec<ResponseToken> = tokens.into_iter().map(Result::unwrap).collect();

        assert_eq!(
            tokens,
            vec![
                ResponseToken::Text("Hi ".into()),
                ResponseToken::Text("there.".into()),
                ResponseToken::EndOfTurn,
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_stream_has_no_end_of_turn() {
        let chunks: Vec<Result<Vec<u8>, LlmError>> = vec![
            Ok(token("Half").into_bytes()),
            Err(LlmError::Network("connection reset".into())),
        ];

        let tokens: Vec<_> = sse_tokens(futures::stream::iter(chunks), Instant::now())
            .collect()
            .await;

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].as_ref().unwrap(), &ResponseToken::Text("Half".into()));
        assert!(matches!(tokens[1], Err(LlmError::Network(_))));
    }
}
