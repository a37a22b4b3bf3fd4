//! Twilio media-stream WebSocket endpoint
//!
//! One accepted socket becomes one session. The handshake must produce a
//! stream id before any pipeline is built.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, Stream, StreamExt};
use parley_core::OutboundTransport;
use parley_pipeline::SessionController;
use parley_transport::{accept, spawn_writer, TransportError, TwilioAdapter, TwilioOutbound};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::AppState;
use crate::ServerError;

/// Outbound messages queued ahead of the socket writer
const OUTBOUND_BUFFER: usize = 256;

pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    if !state.sessions.has_capacity() {
        return Err(ServerError::CapacityReached(state.sessions.max_sessions()));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

/// Text frames as transport messages; a close frame ends the stream
fn text_messages<S>(stream: S) -> impl Stream<Item = Result<String, TransportError>> + Unpin
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    stream.filter_map(|message| {
        futures::future::ready(match message {
            Ok(Message::Text(text)) => Some(Ok(text)),
            Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
        })
    })
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let mut inbound = text_messages(stream);

    let start = match accept(&mut inbound).await {
        Ok(start) => start,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected media stream");
            return;
        }
    };
    let stream_sid = start.stream_sid;

    if state.sessions.contains(&stream_sid) {
        tracing::warn!(stream_sid = %stream_sid, "Duplicate media stream rejected");
        return;
    }

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = spawn_writer(
        sink.with(|text: String| futures::future::ready(Ok::<_, axum::Error>(Message::Text(text)))),
        rx,
    );
    let outbound = TwilioOutbound::new(stream_sid.clone(), tx);

    let session = match SessionController::new(
        stream_sid.clone(),
        &state.config,
        state.services.clone(),
        outbound.clone(),
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(stream_sid = %stream_sid, error = %e, "Could not create session");
            finish(outbound, writer).await;
            return;
        }
    };

    if let Err(e) = state.sessions.register(session.clone()) {
        tracing::warn!(stream_sid = %stream_sid, error = %e, "Session not registered");
        session.cancel();
        finish(outbound, writer).await;
        return;
    }

    TwilioAdapter::new(session, state.config.audio.chunk_ms)
        .run(inbound)
        .await;

    state.sessions.remove(&stream_sid);
    finish(outbound, writer).await;
}

async fn finish(outbound: Arc<TwilioOutbound>, writer: JoinHandle<()>) {
    let _ = outbound.close().await;
    if let Err(e) = writer.await {
        tracing::debug!(error = %e, "Socket writer ended abnormally");
    }
}
