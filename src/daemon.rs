//! Daemon - the voice client service
//!
//! Wires microphone capture, the wake word gate, the backend transport,
//! speaker playback, and the sleep inhibitor around one session controller.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::WakeWordConfig;
use crate::session::{
    ControlHandle, SessionController, SessionEvent, UiEvent, WakeLock,
};
use crate::transport::TransportClient;
use crate::voice::{
    CaptureSource, CpalDevice, InterruptingPlayer, RecognizerEngine, SpeakerRenderer,
    WakeWordGate, default_engine,
};
use crate::{Config, Result};

/// Status shown while the daemon boots
pub const STATUS_STARTING: &str = "Starting Voice Assistant...";

/// The VCA daemon - owns every component for one process lifetime
pub struct Daemon {
    config: Config,
    engine: Arc<dyn RecognizerEngine>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    ui: mpsc::UnboundedSender<UiEvent>,
}

impl Daemon {
    /// Create a daemon reporting to `ui`
    #[must_use]
    pub fn new(config: Config, ui: mpsc::UnboundedSender<UiEvent>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            engine: default_engine(),
            events_tx,
            events_rx,
            ui,
        }
    }

    /// Use a specific recognizer engine for the wake word gate
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn RecognizerEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Handle for start/stop/shutdown commands
    #[must_use]
    pub fn control(&self) -> ControlHandle {
        ControlHandle::new(self.events_tx.clone())
    }

    /// Run until a shutdown command arrives
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            engine,
            events_tx,
            events_rx,
            ui,
        } = self;

        let _ = ui.send(UiEvent::Status(STATUS_STARTING.to_string()));
        tracing::info!(
            server = %config.transport.server_url,
            device_id = %config.transport.device_id,
            "starting voice client"
        );

        let gate = build_gate(&config.wake_word, engine, &ui);

        let mut capture = CaptureSource::new();
        let device = config.capture.device.clone();
        let frames = events_tx.clone();
        if let Err(e) = capture.start(
            move || CpalDevice::open(device.as_deref()),
            move |frame| frames.send(SessionEvent::Frame(frame)).is_ok(),
        ) {
            tracing::error!(error = %e, "failed to start audio capture");
            let _ = ui.send(UiEvent::Status(format!("Error: {e}")));
            return Err(e);
        }

        let transport = TransportClient::new(config.transport.clone(), events_tx);
        let playback = InterruptingPlayer::new(SpeakerRenderer);
        let controller = SessionController::new(
            transport,
            playback,
            WakeLock::new(),
            gate,
            ui,
            config.session.max_hold,
        );

        controller.run(events_rx).await;

        capture.stop();
        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Build the wake word gate, loading its model when gating is enabled
///
/// A load failure is reported on `ui` and leaves the gate uninitialized, so
/// sessions can still be started manually.
#[must_use]
pub fn build_gate(
    config: &WakeWordConfig,
    engine: Arc<dyn RecognizerEngine>,
    ui: &mpsc::UnboundedSender<UiEvent>,
) -> WakeWordGate {
    let mut gate = WakeWordGate::new(config.keywords.clone(), engine);

    if !config.enabled {
        tracing::info!("wake word disabled, manual start only");
        return gate;
    }

    match gate.initialize(&config.model_path) {
        Ok(()) => {
            tracing::info!(keywords = ?gate.keywords(), "wake word gate ready");
        }
        Err(e) => {
            tracing::error!(error = %e, "wake word gate unavailable");
            let _ = ui.send(UiEvent::Status(format!("Error: {e}")));
        }
    }

    gate
}
