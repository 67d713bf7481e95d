//! Events feeding the session controller
//!
//! Frames, wake decisions, connection events, inbound messages, and control
//! commands all travel through one ordered channel so the controller applies
//! them strictly in arrival order.

use tokio::sync::mpsc;

use super::state::SessionState;
use crate::transport::{ConnectionEvent, InboundMessage, TransportEvent};
use crate::voice::{AudioFrame, WakeDecision};

/// Explicit command from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Start a session as if the wake word was heard
    StartSession,
    /// End the current session
    StopSession,
}

/// Tagged event for the controller's input channel
#[derive(Debug)]
pub enum SessionEvent {
    /// Captured audio, in capture order
    Frame(AudioFrame),
    /// Wake decision produced outside the controller
    Wake(WakeDecision),
    /// Transport connection change
    Connection(ConnectionEvent),
    /// Message from the backend
    Inbound {
        /// Connection generation that received it
        generation: u64,
        /// Decoded message
        message: InboundMessage,
    },
    /// Control surface command
    Command(ControlCommand),
    /// Tear everything down and stop the controller
    Shutdown,
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::Connection(event) => Self::Connection(event),
            TransportEvent::Inbound {
                generation,
                message,
            } => Self::Inbound {
                generation,
                message,
            },
        }
    }
}

impl From<ControlCommand> for SessionEvent {
    fn from(command: ControlCommand) -> Self {
        Self::Command(command)
    }
}

/// Notification for the external UI boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// Human-readable status line
    Status(String),
    /// Session state transition
    StateChanged(SessionState),
    /// Inbound text event, forwarded unmodified
    ServerText(String),
}

/// Cloneable handle for sending commands to a running controller
#[derive(Debug, Clone)]
pub struct ControlHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ControlHandle {
    /// Wrap the controller's event sender
    #[must_use]
    pub const fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { events }
    }

    /// Request a session (manual trigger)
    ///
    /// Returns `false` if the controller has stopped.
    pub fn start_session(&self) -> bool {
        self.send(SessionEvent::Command(ControlCommand::StartSession))
    }

    /// Request the current session to end
    ///
    /// Returns `false` if the controller has stopped.
    pub fn stop_session(&self) -> bool {
        self.send(SessionEvent::Command(ControlCommand::StopSession))
    }

    /// Ask the controller to release everything and exit
    ///
    /// Returns `false` if the controller has stopped.
    pub fn shutdown(&self) -> bool {
        self.send(SessionEvent::Shutdown)
    }

    fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}
