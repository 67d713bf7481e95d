//! VCA Client - voice session client for a remote assistant backend
//!
//! This library provides the pieces of an always-listening voice client:
//! - Microphone capture in fixed 30 ms PCM frames
//! - Local wake word gating
//! - A streaming WebSocket transport to the assistant backend
//! - Interrupting playback of response audio
//! - A session controller tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌─────────────────────┐  binary  ┌─────────────┐
//! │ CaptureSource├──────────►│  SessionController  ├─────────►│  Transport  │
//! └──────────────┘           │ Idle/Connecting/... │◄─────────┤ (WebSocket) │
//!                            └──┬───────────────┬──┘  events  └─────────────┘
//!                               │ idle only     │ audio
//!                        ┌──────▼──────┐  ┌─────▼────────┐
//!                        │WakeWordGate │  │ PlaybackSink │
//!                        └─────────────┘  └──────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use session::{
    ControlCommand, ControlHandle, SessionController, SessionEvent, SessionState, UiEvent,
};
pub use transport::{ConnectionState, InboundMessage, Transport, TransportClient};
