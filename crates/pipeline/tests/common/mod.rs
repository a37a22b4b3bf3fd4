//! Scripted capabilities and a recording transport for pipeline tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use parley_config::Settings;
use parley_core::{
    AudioChunk, AudioStream, Message, OutboundTransport, ResponseGenerator, ResponseToken, Result,
    Role, SampleRate, SpeechToText, TextToSpeech, TokenStream, TranscriptStream, TranscriptText,
};
use parley_pipeline::SessionServices;

pub const RATE: SampleRate = SampleRate::Hz8000;
pub const CHUNK_MS: u64 = 20;

/// 440 Hz tone well above the speech threshold
pub fn tone(duration: Duration) -> AudioChunk {
    let len = RATE.samples_for_ms(duration.as_millis() as u64);
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / RATE.as_u32() as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    AudioChunk::new(samples, RATE)
}

pub fn silence(duration: Duration) -> AudioChunk {
    AudioChunk::silence(RATE, duration)
}

pub fn chunk_duration() -> Duration {
    Duration::from_millis(CHUNK_MS)
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.pipeline.capability_deadline_ms = 500;
    settings.pipeline.disconnect_grace_ms = 1_000;
    settings
}

/// Returns the queued transcripts in order, then a fallback
pub struct ScriptedStt {
    transcripts: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedStt {
    pub fn new(transcripts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            transcripts: Mutex::new(transcripts.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeechToText for ScriptedStt {
    fn transcribe(&self, _audio: AudioChunk) -> TranscriptStream<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .transcripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| "hello".to_string());

        Box::pin(async_stream::stream! {
            let first_word = text.split_whitespace().next().unwrap_or_default().to_string();
            yield Ok(TranscriptText::partial(Role::User, first_word));
            yield Ok(TranscriptText::final_text(Role::User, text));
        })
    }

    fn model_name(&self) -> &str {
        "scripted-stt"
    }
}

/// Behaviour of one generator call
#[derive(Clone)]
pub enum Reply {
    /// Stream these tokens, then end the turn
    Tokens(Vec<String>),
    /// Never produce anything; flips the flag when the stream is dropped
    Pending(Arc<AtomicBool>),
    /// Wait this long before the first token
    Slow(Duration),
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Reply::Tokens(
            text.split_inclusive(' ')
                .map(|token| token.to_string())
                .collect(),
        )
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }
}

impl ResponseGenerator for ScriptedGenerator {
    fn generate(&self, messages: Vec<Message>) -> TokenStream<'_> {
        self.requests.lock().push(messages);
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Reply::text("Okay."));

        Box::pin(async_stream::stream! {
            match reply {
                Reply::Tokens(tokens) => {
                    for token in tokens {
                        yield Ok(ResponseToken::Text(token));
                    }
                }
                Reply::Pending(flag) => {
                    let _guard = DropFlag(flag);
                    futures::future::pending::<()>().await;
                }
                Reply::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    yield Ok(ResponseToken::Text("Too late.".to_string()));
                }
            }
            yield Ok(ResponseToken::EndOfTurn);
        })
    }

    fn model_name(&self) -> &str {
        "scripted-generator"
    }
}

/// Synthesizes every sentence as a tone of fixed length
pub struct ToneTts {
    per_sentence: Duration,
    sentences: Mutex<Vec<String>>,
}

impl ToneTts {
    pub fn new(per_sentence: Duration) -> Arc<Self> {
        Arc::new(Self {
            per_sentence,
            sentences: Mutex::new(Vec::new()),
        })
    }

    pub fn sentences(&self) -> Vec<String> {
        self.sentences.lock().clone()
    }
}

impl TextToSpeech for ToneTts {
    fn synthesize(&self, text: String) -> AudioStream<'_> {
        self.sentences.lock().push(text);
        let audio = tone(self.per_sentence);
        Box::pin(futures::stream::iter([Ok(audio)]))
    }

    fn voice_name(&self) -> &str {
        "tone"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Chunk(Duration),
    Clear,
    Close,
}

/// Records everything the pipeline sends towards the caller
#[derive(Default)]
pub struct RecordingTransport {
    log: Mutex<Vec<Delivery>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<Delivery> {
        self.log.lock().clone()
    }

    pub fn chunks(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|d| matches!(d, Delivery::Chunk(_)))
            .count()
    }

    pub fn clears(&self) -> usize {
        self.log.lock().iter().filter(|d| **d == Delivery::Clear).count()
    }

    pub fn chunks_before_first_clear(&self) -> usize {
        self.log
            .lock()
            .iter()
            .take_while(|d| **d != Delivery::Clear)
            .filter(|d| matches!(d, Delivery::Chunk(_)))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().contains(&Delivery::Close)
    }
}

#[async_trait]
impl OutboundTransport for RecordingTransport {
    async fn send_outbound_chunk(&self, chunk: &AudioChunk) -> Result<()> {
        self.log.lock().push(Delivery::Chunk(chunk.duration()));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.log.lock().push(Delivery::Clear);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().push(Delivery::Close);
        Ok(())
    }
}

pub fn services(
    stt: Arc<ScriptedStt>,
    generator: Arc<ScriptedGenerator>,
    tts: Arc<ToneTts>,
) -> SessionServices {
    SessionServices { stt, generator, tts }
}

/// Poll `condition` on the (possibly paused) clock until it holds
pub async fn wait_for(mut condition: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
