//! Twilio media-stream messages
//!
//! Every WebSocket text message is one JSON object tagged by `event`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Message received from Twilio
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Connected { .. } => "connected",
            InboundEvent::Start { .. } => "start",
            InboundEvent::Media { .. } => "media",
            InboundEvent::Mark { .. } => "mark",
            InboundEvent::Stop { .. } => "stop",
            InboundEvent::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    #[serde(default)]
    pub stream_sid: String,
    #[serde(default)]
    pub call_sid: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
}

impl StartPayload {
    /// Validate the start event into the identifiers a session needs
    pub fn into_stream_start(self) -> Result<StreamStart, TransportError> {
        let stream_sid = self.stream_sid.trim().to_string();
        if stream_sid.is_empty() {
            return Err(TransportError::Handshake("start event without streamSid".to_string()));
        }
        if let Some(ref format) = self.media_format {
            if !format.is_telephony() {
                return Err(TransportError::Handshake(format!(
                    "unsupported media format {} at {} Hz",
                    format.encoding, format.sample_rate
                )));
            }
        }
        Ok(StreamStart {
            stream_sid,
            call_sid: self.call_sid,
            media_format: self.media_format,
        })
    }
}

/// Audio encoding announced in the start event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_channels() -> u16 {
    1
}

impl MediaFormat {
    /// 8 kHz mono μ-law, the only format media streams carry
    pub fn is_telephony(&self) -> bool {
        self.encoding == "audio/x-mulaw" && self.sample_rate == 8000 && self.channels == 1
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    /// Caller audio; outbound echoes on other tracks are not
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref().map_or(true, |t| t == "inbound")
    }

    /// Raw μ-law bytes
    pub fn decode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(BASE64.decode(&self.payload)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Identifiers of an accepted media stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    pub media_format: Option<MediaFormat>,
}

/// Message sent to Twilio
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundEvent {
    pub fn media(stream_sid: impl Into<String>, mulaw: &[u8]) -> Self {
        OutboundEvent::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: BASE64.encode(mulaw),
            },
        }
    }

    pub fn clear(stream_sid: impl Into<String>) -> Self {
        OutboundEvent::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }
}
