//! Offline capabilities for server tests

use std::sync::Arc;

use parley_core::{
    AudioChunk, AudioStream, Message, OutboundTransport, ResponseGenerator, ResponseToken, Result,
    Role, SpeechToText, TextToSpeech, TokenStream, TranscriptStream, TranscriptText,
};
use parley_pipeline::SessionServices;

pub struct NullTransport;

#[async_trait::async_trait]
impl OutboundTransport for NullTransport {
    async fn send_outbound_chunk(&self, _chunk: &AudioChunk) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct Quiet;

impl SpeechToText for Quiet {
    fn transcribe(&self, _audio: AudioChunk) -> TranscriptStream<'_> {
        Box::pin(futures::stream::iter([Ok(TranscriptText::final_text(Role::User, ""))]))
    }

    fn model_name(&self) -> &str {
        "quiet"
    }
}

impl ResponseGenerator for Quiet {
    fn generate(&self, _messages: Vec<Message>) -> TokenStream<'_> {
        Box::pin(futures::stream::iter([Ok(ResponseToken::EndOfTurn)]))
    }

    fn model_name(&self) -> &str {
        "quiet"
    }
}

impl TextToSpeech for Quiet {
    fn synthesize(&self, _text: String) -> AudioStream<'_> {
        Box::pin(futures::stream::empty::<Result<AudioChunk>>())
    }

    fn voice_name(&self) -> &str {
        "quiet"
    }
}

pub fn quiet_services() -> SessionServices {
    let quiet = Arc::new(Quiet);
    SessionServices {
        stt: quiet.clone(),
        generator: quiet.clone(),
        tts: quiet,
    }
}
