//! Error types for the VCA client

use thiserror::Error;

/// Result type alias for VCA client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the VCA client
#[derive(Debug, Error)]
pub enum Error {
    /// Wake word recognizer could not be loaded
    #[error("recognizer init error at {path}: {message}")]
    RecognizerInit {
        /// Model path that was tried
        path: String,
        /// What went wrong
        message: String,
    },

    /// Transient microphone read failure
    #[error("capture read error: {0}")]
    CaptureRead(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Transport connection failure (handshake, send, receive, ping timeout)
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed inbound message
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Build the error reported when the recognizer model directory is missing
    #[must_use]
    pub fn model_missing(path: &std::path::Path) -> Self {
        Self::RecognizerInit {
            path: path.display().to_string(),
            message: format!(
                "model not found at {}. Download vosk-model-small-en-us-0.15.zip and extract it to this location",
                path.display()
            ),
        }
    }
}
