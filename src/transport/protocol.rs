//! Wire protocol for the assistant backend
//!
//! One persistent WebSocket carries both kinds of traffic:
//! - outbound JSON control messages (`session_start`, `session_end`)
//! - outbound binary frames of raw PCM, one message per frame, no envelope
//! - inbound binary messages, each one complete playable payload
//! - inbound text messages, arbitrary JSON forwarded opaquely

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use crate::{Error, Result};

/// Reason sent when the user stops a session
pub const REASON_USER_ENDED: &str = "user_ended";

/// Reason sent when the transport failed underneath the session
pub const REASON_CONNECTION_ERROR: &str = "connection_error";

/// Reason sent when the client is shutting down
pub const REASON_SHUTDOWN: &str = "shutdown";

/// Control message sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundControlMessage {
    /// First message on every fresh connection
    SessionStart {
        /// Wall-clock milliseconds, as a string
        timestamp: String,
        /// Identifies this device to the backend
        device_id: String,
    },
    /// Last message before the client closes the connection
    SessionEnd {
        /// Why the session ended
        reason: String,
        /// Wall-clock milliseconds, as a string
        timestamp: String,
    },
}

impl OutboundControlMessage {
    /// Build a `session_start` stamped with the current time
    #[must_use]
    pub fn session_start(device_id: &str) -> Self {
        Self::SessionStart {
            timestamp: now_millis(),
            device_id: device_id.to_string(),
        }
    }

    /// Build a `session_end` stamped with the current time
    #[must_use]
    pub fn session_end(reason: &str) -> Self {
        Self::SessionEnd {
            reason: reason.to_string(),
            timestamp: now_millis(),
        }
    }

    /// Serialize into a text WebSocket message
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// Message received from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// JSON event for the UI boundary (transcript, status, ...)
    TextEvent(String),
    /// Complete audio payload for playback
    AudioChunk(Vec<u8>),
}

/// Classify an inbound WebSocket message
///
/// Returns `Ok(None)` for control frames (ping, pong, close) that carry no
/// application data.
///
/// # Errors
///
/// Returns [`Error::ProtocolDecode`] for text that is not JSON or an empty
/// binary payload. The caller drops the message and keeps the connection.
pub fn decode_inbound(message: Message) -> Result<Option<InboundMessage>> {
    match message {
        Message::Text(text) => {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&text) {
                return Err(Error::ProtocolDecode(format!("text event is not JSON: {e}")));
            }
            Ok(Some(InboundMessage::TextEvent(text)))
        }
        Message::Binary(bytes) => {
            if bytes.is_empty() {
                return Err(Error::ProtocolDecode("empty audio payload".to_string()));
            }
            Ok(Some(InboundMessage::AudioChunk(bytes)))
        }
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
        Message::Frame(_) => Err(Error::ProtocolDecode("unexpected raw frame".to_string())),
    }
}

/// Current wall-clock time in milliseconds, as a string
#[must_use]
pub fn now_millis() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
