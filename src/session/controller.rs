//! Session orchestration
//!
//! [`SessionController`] owns the session state machine and is the only
//! place it changes:
//!
//! ```text
//! Idle --wake/start--> Connecting --Connected--> Active --stop/failure--> Closing --> Idle
//! ```
//!
//! Frames go to the wake word gate while idle, are dropped while connecting,
//! and stream to the transport while active. All inputs arrive through one
//! ordered channel, and wake decisions are applied before the next frame is
//! routed, so a consumer switch never splits the frame stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::event::{ControlCommand, SessionEvent, UiEvent};
use super::state::SessionState;
use super::wake_lock::ExclusiveResource;
use crate::transport::protocol::{REASON_CONNECTION_ERROR, REASON_SHUTDOWN, REASON_USER_ENDED};
use crate::transport::{ConnectionEvent, ConnectionState, InboundMessage, Transport, sleep_until_opt};
use crate::voice::{AudioFrame, PlaybackSink, WakeDecision, WakeWordGate};

/// Status shown while the gate is armed
pub const STATUS_LISTENING: &str = "Listening for wake word...";

/// Status shown once a session starts
pub const STATUS_SESSION_ACTIVE: &str = "Session active - speak now...";

/// Status shown while idle without a working gate
pub const STATUS_MANUAL_ONLY: &str = "Ready - wake word unavailable, use start";

/// Where each captured frame ended up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRouting {
    /// Frames fed to the wake word gate
    pub to_gate: u64,
    /// Frames handed to the transport
    pub to_transport: u64,
    /// Frames dropped while connecting
    pub dropped: u64,
}

impl FrameRouting {
    /// Total frames seen by the controller
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.to_gate + self.to_transport + self.dropped
    }
}

/// Drives one session at a time across gate, transport, and playback
pub struct SessionController<T, P, L> {
    state: SessionState,
    transport: T,
    playback: P,
    lock: L,
    gate: WakeWordGate,
    ui: mpsc::UnboundedSender<UiEvent>,
    max_hold: Duration,
    hold_deadline: Option<Instant>,
    session_generation: Option<u64>,
    session_dropped: u64,
    routing: FrameRouting,
    payloads_received: u64,
}

impl<T, P, L> SessionController<T, P, L>
where
    T: Transport,
    P: PlaybackSink,
    L: ExclusiveResource,
{
    /// Create an idle controller
    ///
    /// `gate` should already be initialized; an uninitialized gate simply
    /// never fires, leaving manual start as the only trigger.
    #[must_use]
    pub fn new(
        transport: T,
        playback: P,
        lock: L,
        gate: WakeWordGate,
        ui: mpsc::UnboundedSender<UiEvent>,
        max_hold: Duration,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            transport,
            playback,
            lock,
            gate,
            ui,
            max_hold,
            hold_deadline: None,
            session_generation: None,
            session_dropped: 0,
            routing: FrameRouting::default(),
            payloads_received: 0,
        }
    }

    /// Get current session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Get frame routing counters
    #[must_use]
    pub const fn routing(&self) -> FrameRouting {
        self.routing
    }

    /// Get the transport
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Get the wake word gate
    #[must_use]
    pub const fn gate(&self) -> &WakeWordGate {
        &self.gate
    }

    /// Whether the exclusive resource is held
    #[must_use]
    pub fn holds_lock(&self) -> bool {
        self.lock.is_held()
    }

    /// Process events until shutdown or until every sender is gone
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        self.status(self.idle_status());
        tracing::info!("session controller running");

        loop {
            let deadline = self.hold_deadline;
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event).await {
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("event channel closed");
                        self.shutdown().await;
                        break;
                    }
                },
                () = sleep_until_opt(deadline) => self.expire_hold(),
            }
        }

        tracing::info!(
            to_gate = self.routing.to_gate,
            to_transport = self.routing.to_transport,
            dropped = self.routing.dropped,
            "session controller stopped"
        );
    }

    /// Apply one event
    ///
    /// Returns `false` once the controller has shut down.
    pub async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Frame(frame) => self.route_frame(frame).await,
            SessionEvent::Wake(decision) => self.on_wake(decision),
            SessionEvent::Connection(event) => self.on_connection(event).await,
            SessionEvent::Inbound {
                generation,
                message,
            } => self.on_inbound(generation, message),
            SessionEvent::Command(command) => self.on_command(command).await,
            SessionEvent::Shutdown => {
                self.shutdown().await;
                return false;
            }
        }
        true
    }

    /// Release every resource regardless of state
    pub async fn shutdown(&mut self) {
        tracing::info!(state = %self.state, "shutting down session controller");

        if self.state.in_session() {
            self.close_session(REASON_SHUTDOWN).await;
        } else {
            self.transport.disconnect(REASON_SHUTDOWN).await;
        }

        self.gate.release();
        self.playback.stop();
        self.lock.release();
        self.hold_deadline = None;
        self.status("Stopped");
    }

    async fn route_frame(&mut self, frame: AudioFrame) {
        match self.state {
            SessionState::Idle => self.feed_gate(&frame),
            SessionState::Connecting | SessionState::Closing => {
                self.routing.dropped += 1;
                self.session_dropped += 1;
                tracing::trace!(seq = frame.seq(), state = %self.state, "dropping frame");
            }
            SessionState::Active => {
                if self.transport.state() == ConnectionState::Connected {
                    self.routing.to_transport += 1;
                    self.transport.send_audio(frame);
                } else {
                    // Failure not yet delivered; end the session before this frame
                    tracing::warn!(
                        connection = %self.transport.state(),
                        "transport lost while active"
                    );
                    self.status("Error: connection lost");
                    self.close_session(REASON_CONNECTION_ERROR).await;
                    self.feed_gate(&frame);
                }
            }
        }
    }

    fn feed_gate(&mut self, frame: &AudioFrame) {
        self.routing.to_gate += 1;
        if let Some(decision) = self.gate.process_audio(frame) {
            self.on_wake(decision);
        }
    }

    fn on_wake(&mut self, decision: WakeDecision) {
        if self.state != SessionState::Idle {
            tracing::debug!(state = %self.state, keyword = %decision.keyword, "ignoring stray wake decision");
            return;
        }
        tracing::info!(keyword = %decision.keyword, transcript = %decision.transcript, "starting session");
        self.begin_session();
    }

    fn begin_session(&mut self) {
        self.transition(SessionState::Connecting);
        self.session_dropped = 0;

        self.transport.connect();
        self.session_generation = Some(self.transport.generation());

        self.lock.acquire(self.max_hold);
        self.hold_deadline = Some(Instant::now() + self.max_hold);

        self.status(STATUS_SESSION_ACTIVE);

        // An already-open connection produces no new Connected event
        if self.transport.state() == ConnectionState::Connected {
            self.activate();
        }
    }

    fn activate(&mut self) {
        self.transition(SessionState::Active);
        tracing::info!(dropped = self.session_dropped, "session active, streaming audio");
    }

    async fn on_connection(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected { generation } => {
                if self.state != SessionState::Connecting
                    || self.session_generation != Some(generation)
                    || self.transport.state() != ConnectionState::Connected
                {
                    tracing::debug!(generation, state = %self.state, "ignoring stale connect event");
                    return;
                }
                self.activate();
            }
            ConnectionEvent::Failed { generation, reason } => {
                if !matches!(self.state, SessionState::Connecting | SessionState::Active)
                    || self.session_generation != Some(generation)
                {
                    tracing::debug!(generation, reason = %reason, "ignoring stale failure event");
                    return;
                }
                tracing::error!(reason = %reason, state = %self.state, "connection failed during session");
                self.status(format!("Error: {reason}"));
                self.close_session(REASON_CONNECTION_ERROR).await;
            }
        }
    }

    fn on_inbound(&mut self, generation: u64, message: InboundMessage) {
        if self.session_generation != Some(generation) {
            tracing::debug!(generation, state = %self.state, "dropping message from a closed connection");
            return;
        }

        match message {
            InboundMessage::TextEvent(text) => {
                let _ = self.ui.send(UiEvent::ServerText(text));
            }
            InboundMessage::AudioChunk(payload) => {
                self.payloads_received += 1;
                let id = self.payloads_received;
                tracing::debug!(id, bytes = payload.len(), "playing response audio");
                self.playback.play(
                    payload,
                    Box::new(move || tracing::debug!(id, "playback complete")),
                );
            }
        }
    }

    async fn on_command(&mut self, command: ControlCommand) {
        match (command, self.state) {
            (ControlCommand::StartSession, SessionState::Idle) => {
                tracing::info!("manual session start");
                self.begin_session();
            }
            (ControlCommand::StopSession, SessionState::Connecting | SessionState::Active) => {
                tracing::info!("session stop requested");
                self.close_session(REASON_USER_ENDED).await;
            }
            (command, state) => {
                tracing::debug!(?command, state = %state, "command is a no-op in this state");
            }
        }
    }

    async fn close_session(&mut self, reason: &str) {
        self.transition(SessionState::Closing);

        self.transport.disconnect(reason).await;

        self.lock.release();
        self.hold_deadline = None;
        self.gate.reset();
        self.session_generation = None;

        tracing::info!(reason, dropped = self.session_dropped, "session closed");
        self.transition(SessionState::Idle);
        self.status(self.idle_status());
    }

    fn expire_hold(&mut self) {
        tracing::warn!(
            max_hold_secs = self.max_hold.as_secs(),
            "wake lock ceiling reached, releasing"
        );
        self.lock.release();
        self.hold_deadline = None;
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        tracing::info!(from = %from, to = %to, "session state changed");
        let _ = self.ui.send(UiEvent::StateChanged(to));
    }

    fn idle_status(&self) -> &'static str {
        if self.gate.is_ready() {
            STATUS_LISTENING
        } else {
            STATUS_MANUAL_ONLY
        }
    }

    fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(status = %message, "status");
        let _ = self.ui.send(UiEvent::Status(message));
    }
}
