//! Outbound half of the transport boundary

use async_trait::async_trait;

use crate::{AudioChunk, Result};

/// Where the pipeline writes audio for the caller
///
/// The inbound half is a read loop owned by the transport that submits
/// chunks into the session.
#[async_trait]
pub trait OutboundTransport: Send + Sync + 'static {
    /// Deliver one chunk of audio to the caller
    async fn send_outbound_chunk(&self, chunk: &AudioChunk) -> Result<()>;

    /// Drop any audio the far end has buffered but not yet played
    async fn clear(&self) -> Result<()>;

    /// Close the outbound side; later sends fail with a transport error
    async fn close(&self) -> Result<()>;
}
