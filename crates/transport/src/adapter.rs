//! Media-stream adapter
//!
//! Inbound: a read loop that decodes media events and submits audio to the
//! session. Outbound: [`TwilioOutbound`] encodes pipeline audio into media
//! events and hands them to a writer task that owns the socket sink.

use std::fmt::Display;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use parley_core::{AudioChunk, Error, OutboundTransport, Result, SampleRate};
use parley_pipeline::SessionController;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::chunker::Rechunker;
use crate::mulaw;
use crate::twilio::{InboundEvent, OutboundEvent, StreamStart};
use crate::TransportError;

/// Messages tolerated before `start` arrives
pub const MAX_PRE_START_MESSAGES: usize = 8;

/// Read until the `start` event and return the stream identifiers
///
/// Fails when the socket closes first, when `start` lacks a stream id, or
/// when more than [`MAX_PRE_START_MESSAGES`] other messages arrive first.
pub async fn accept<S>(inbound: &mut S) -> std::result::Result<StreamStart, TransportError>
where
    S: Stream<Item = std::result::Result<String, TransportError>> + Unpin,
{
    for _ in 0..=MAX_PRE_START_MESSAGES {
        let text = match inbound.next().await {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => return Err(TransportError::Closed),
        };

        match InboundEvent::parse(&text) {
            Ok(InboundEvent::Start { start }) => {
                let start = start.into_stream_start()?;
                tracing::info!(
                    stream_sid = %start.stream_sid,
                    call_sid = %start.call_sid,
                    "Media stream started"
                );
                return Ok(start);
            }
            Ok(event) => {
                tracing::debug!(event = event.name(), "Waiting for start event");
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable message before start");
            }
        }
    }

    Err(TransportError::Handshake(format!(
        "no start event within {} messages",
        MAX_PRE_START_MESSAGES
    )))
}

/// Forward outbound messages to the socket until the channel closes
pub fn spawn_writer<K>(mut sink: K, mut rx: mpsc::Receiver<String>) -> JoinHandle<()>
where
    K: Sink<String> + Unpin + Send + 'static,
    K::Error: Display,
{
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = sink.send(message).await {
                tracing::debug!(error = %e, "Socket write failed");
                return;
            }
        }
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "Socket close failed");
        }
    })
}

/// Outbound half of a media stream
pub struct TwilioOutbound {
    stream_sid: String,
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl TwilioOutbound {
    pub fn new(stream_sid: impl Into<String>, tx: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self {
            stream_sid: stream_sid.into(),
            tx: Mutex::new(Some(tx)),
        })
    }

    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    async fn send_event(&self, event: OutboundEvent) -> Result<()> {
        let sender = self.tx.lock().clone().ok_or(TransportError::Closed)?;
        let json = event.to_json()?;
        sender.send(json).await.map_err(|_| TransportError::Closed)?;
        Ok(())
    }
}

#[async_trait]
impl OutboundTransport for TwilioOutbound {
    async fn send_outbound_chunk(&self, chunk: &AudioChunk) -> Result<()> {
        if chunk.sample_rate() != SampleRate::Hz8000 {
            return Err(Error::Transport(format!(
                "media streams carry 8000 Hz audio, got {} Hz",
                chunk.sample_rate().as_u32()
            )));
        }
        let payload = mulaw::encode(&chunk.to_i16());
        self.send_event(OutboundEvent::media(&self.stream_sid, &payload))
            .await
    }

    async fn clear(&self) -> Result<()> {
        tracing::debug!(stream_sid = %self.stream_sid, "Clearing buffered playback");
        self.send_event(OutboundEvent::clear(&self.stream_sid)).await
    }

    async fn close(&self) -> Result<()> {
        // Dropping the sender lets the writer drain and close the socket
        if self.tx.lock().take().is_some() {
            tracing::debug!(stream_sid = %self.stream_sid, "Outbound closed");
        }
        Ok(())
    }
}

/// Inbound half of a media stream bound to one session
pub struct TwilioAdapter {
    session: Arc<SessionController>,
    rechunker: Rechunker,
    media_messages: u64,
}

impl TwilioAdapter {
    pub fn new(session: Arc<SessionController>, chunk_ms: u64) -> Self {
        let rechunker = Rechunker::new(session.input_rate(), chunk_ms);
        Self {
            session,
            rechunker,
            media_messages: 0,
        }
    }

    /// Decode μ-law bytes and submit them as pipeline-sized chunks
    pub async fn on_inbound_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        let samples = mulaw::decode(bytes);
        for chunk in self.rechunker.push(&samples) {
            self.session.on_inbound_audio(chunk).await?;
        }
        Ok(())
    }

    /// Drive the session until the caller hangs up or the session ends
    ///
    /// Calls `on_connected` first and always finishes with `on_disconnected`.
    pub async fn run<S>(mut self, mut inbound: S)
    where
        S: Stream<Item = std::result::Result<String, TransportError>> + Unpin,
    {
        let session = self.session.clone();
        let stream_sid = session.stream_id().to_string();

        if let Err(e) = session.on_connected().await {
            tracing::warn!(stream_sid = %stream_sid, error = %e, "Could not start greeting");
        }

        loop {
            let next = tokio::select! {
                _ = session.closed() => {
                    tracing::debug!(stream_sid = %stream_sid, "Session ended before caller hung up");
                    break;
                }
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(text)) => {
                    if self.handle_message(&text).await.is_break() {
                        break;
                    }
                }
                Some(Err(TransportError::Closed)) | None => {
                    tracing::info!(stream_sid = %stream_sid, "Socket closed");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(stream_sid = %stream_sid, error = %e, "Socket read failed");
                    break;
                }
            }
        }

        tracing::debug!(
            stream_sid = %stream_sid,
            media_messages = self.media_messages,
            "Media stream ended"
        );
        session.on_disconnected().await;
    }

    async fn handle_message(&mut self, text: &str) -> ControlFlow<()> {
        let event = match InboundEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable message");
                return ControlFlow::Continue(());
            }
        };

        match event {
            InboundEvent::Media { media } if media.is_inbound() => {
                self.media_messages += 1;
                let bytes = match media.decode() {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping undecodable media");
                        return ControlFlow::Continue(());
                    }
                };
                if let Err(e) = self.on_inbound_chunk(&bytes).await {
                    tracing::debug!(error = %e, "Session no longer accepts audio");
                    return ControlFlow::Break(());
                }
            }
            InboundEvent::Stop { .. } => {
                tracing::info!(stream_sid = %self.session.stream_id(), "Caller hung up");
                return ControlFlow::Break(());
            }
            InboundEvent::Mark { mark } => {
                tracing::trace!(name = %mark.name, "Playback mark");
            }
            other => {
                tracing::trace!(event = other.name(), "Ignoring event");
            }
        }
        ControlFlow::Continue(())
    }
}
