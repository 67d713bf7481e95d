//! Streaming WebSocket client for the assistant backend
//!
//! [`TransportClient`] owns at most one connection. The network I/O runs in
//! a spawned task; callers interact through non-blocking methods and receive
//! connection events and inbound messages on an ordered channel.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::protocol::{InboundMessage, OutboundControlMessage, decode_inbound};
use crate::config::TransportConfig;
use crate::voice::AudioFrame;
use crate::{Error, Result};

/// Close reason sent with the WebSocket close frame
const CLOSE_REASON: &str = "Session ended";

/// State of the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Open; audio may flow
    Connected,
    /// The connection failed and was not recovered
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Connection lifecycle notification
///
/// `generation` identifies the `connect()` call the event belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Handshake done and `session_start` sent
    Connected {
        /// Connection generation
        generation: u64,
    },
    /// Handshake, send, receive, or liveness failure
    Failed {
        /// Connection generation
        generation: u64,
        /// Human-readable cause
        reason: String,
    },
}

/// Everything the transport reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection state change
    Connection(ConnectionEvent),
    /// Application message from the backend
    Inbound {
        /// Generation of the connection that received it
        generation: u64,
        /// Decoded message
        message: InboundMessage,
    },
}

/// Streaming transport as seen by the session controller
#[async_trait]
pub trait Transport: Send {
    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Generation of the most recent `connect()`
    fn generation(&self) -> u64;

    /// Open a connection unless one is already open; returns immediately
    fn connect(&mut self);

    /// Forward one frame as a binary message; dropped unless connected
    fn send_audio(&self, frame: AudioFrame);

    /// Send `session_end`, close, and end up `Disconnected`; idempotent
    async fn disconnect(&mut self, reason: &str);
}

struct Shared {
    state: ConnectionState,
    generation: u64,
}

enum Outbound {
    Audio(Vec<u8>),
    Close { reason: String },
}

struct Link {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

/// WebSocket implementation of [`Transport`]
///
/// Events are delivered as `E::from(TransportEvent)` so the client can feed
/// a wider event channel directly.
pub struct TransportClient<E> {
    config: TransportConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<E>,
    link: Option<Link>,
}

impl<E> TransportClient<E>
where
    E: From<TransportEvent> + Send + 'static,
{
    /// Create a disconnected client
    #[must_use]
    pub fn new(config: TransportConfig, events: mpsc::UnboundedSender<E>) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                generation: 0,
            })),
            events,
            link: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<E> Transport for TransportClient<E>
where
    E: From<TransportEvent> + Send + 'static,
{
    fn state(&self) -> ConnectionState {
        self.lock().state
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn connect(&mut self) {
        let generation = {
            let mut shared = self.lock();
            match shared.state {
                ConnectionState::Connected => {
                    tracing::info!("already connected, skipping");
                    return;
                }
                ConnectionState::Connecting if self.link.is_some() => {
                    tracing::debug!("connection already in progress");
                    return;
                }
                _ => {}
            }
            shared.generation += 1;
            shared.state = ConnectionState::Connecting;
            shared.generation
        };

        // A failed link may still be parked here
        if let Some(stale) = self.link.take() {
            stale.task.abort();
        }

        tracing::info!(url = %self.config.server_url, generation, "connecting to assistant backend");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let ctx = ConnectionCtx {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            generation,
        };
        let task = tokio::spawn(run_connection(ctx, outbound_rx));

        self.link = Some(Link {
            outbound: outbound_tx,
            task,
        });
    }

    fn send_audio(&self, frame: AudioFrame) {
        if self.state() != ConnectionState::Connected {
            tracing::trace!(seq = frame.seq(), "not connected, dropping frame");
            return;
        }
        if let Some(link) = &self.link
            && link.outbound.send(Outbound::Audio(frame.into_bytes())).is_err()
        {
            tracing::trace!("connection task gone, dropping frame");
        }
    }

    async fn disconnect(&mut self, reason: &str) {
        if let Some(mut link) = self.link.take() {
            // A task still in its handshake picks this up once session_start is out
            if link
                .outbound
                .send(Outbound::Close {
                    reason: reason.to_string(),
                })
                .is_ok()
            {
                let grace = self.config.close_timeout * 2;
                if tokio::time::timeout(grace, &mut link.task).await.is_err() {
                    tracing::warn!("connection did not close in time, aborting");
                    link.task.abort();
                }
            } else {
                link.task.abort();
            }
        }

        let mut shared = self.lock();
        // Invalidate anything the old task might still report
        shared.generation += 1;
        shared.state = ConnectionState::Disconnected;
        tracing::info!(reason, "transport disconnected");
    }
}

impl<E> Drop for TransportClient<E> {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.task.abort();
        }
    }
}

struct ConnectionCtx<E> {
    config: TransportConfig,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<E>,
    generation: u64,
}

impl<E: From<TransportEvent>> ConnectionCtx<E> {
    /// Write the state if this connection is still current
    fn set_state(&self, state: ConnectionState) -> bool {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.generation != self.generation {
            return false;
        }
        shared.state = state;
        true
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver gone means the owner is shutting down
        let _ = self.events.send(E::from(event));
    }
}

async fn run_connection<E: From<TransportEvent>>(
    ctx: ConnectionCtx<E>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    match drive(&ctx, &mut outbound).await {
        Ok(()) => {
            tracing::debug!(generation = ctx.generation, "connection task finished");
        }
        Err(e) => {
            tracing::error!(error = %e, generation = ctx.generation, "connection failed");
            if ctx.set_state(ConnectionState::Error) {
                ctx.emit(TransportEvent::Connection(ConnectionEvent::Failed {
                    generation: ctx.generation,
                    reason: e.to_string(),
                }));
            }
        }
    }
}

fn conn_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Connection(format!("{context}: {e}"))
}

#[allow(clippy::too_many_lines)]
async fn drive<E: From<TransportEvent>>(
    ctx: &ConnectionCtx<E>,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Result<()> {
    let config = &ctx.config;

    let (ws, _response) = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(config.server_url.as_str()),
    )
    .await
    .map_err(|_| Error::Connection("handshake timed out".to_string()))?
    .map_err(|e| conn_err("handshake failed", e))?;

    let (mut sink, mut stream) = ws.split();

    // session_start always goes out before anything else
    let start = OutboundControlMessage::session_start(&config.device_id);
    tracing::info!(device_id = %config.device_id, "sending session_start");
    sink.send(start.to_message()?)
        .await
        .map_err(|e| conn_err("send session_start", e))?;

    if !ctx.set_state(ConnectionState::Connected) {
        tracing::debug!(generation = ctx.generation, "connection superseded before open");
        return Ok(());
    }
    tracing::info!(generation = ctx.generation, "connected to assistant backend");
    ctx.emit(TransportEvent::Connection(ConnectionEvent::Connected {
        generation: ctx.generation,
    }));

    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    let mut awaiting_pong: Option<Instant> = None;
    let mut frames_sent: u64 = 0;

    loop {
        let pong_deadline = awaiting_pong.map(|sent| sent + config.pong_timeout);

        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Audio(bytes)) => {
                    sink.send(Message::Binary(bytes))
                        .await
                        .map_err(|e| conn_err("send audio", e))?;
                    frames_sent += 1;
                    if frames_sent % 100 == 0 {
                        tracing::debug!(frames_sent, "audio frames sent");
                    }
                }
                Some(Outbound::Close { reason }) => {
                    let end = OutboundControlMessage::session_end(&reason);
                    tracing::info!(reason = %reason, frames_sent, "sending session_end");
                    sink.send(end.to_message()?)
                        .await
                        .map_err(|e| conn_err("send session_end", e))?;
                    sink.send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: CLOSE_REASON.into(),
                    })))
                    .await
                    .map_err(|e| conn_err("send close", e))?;

                    // Give the server a moment to acknowledge the close
                    let _ = tokio::time::timeout(config.close_timeout, async {
                        while let Some(Ok(msg)) = stream.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    return Ok(());
                }
                None => return Ok(()),
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Pong(_))) => {
                    awaiting_pong = None;
                }
                Some(Ok(Message::Close(frame))) => {
                    let detail = frame.map_or_else(
                        || "no close frame".to_string(),
                        |f| format!("{} {}", u16::from(f.code), f.reason),
                    );
                    return Err(Error::Connection(format!("closed by server: {detail}")));
                }
                Some(Ok(message)) => match decode_inbound(message) {
                    Ok(Some(message)) => {
                        match &message {
                            InboundMessage::TextEvent(text) => {
                                tracing::debug!(len = text.len(), "received text message");
                            }
                            InboundMessage::AudioChunk(bytes) => {
                                tracing::debug!(bytes = bytes.len(), "received binary message");
                            }
                        }
                        ctx.emit(TransportEvent::Inbound {
                            generation: ctx.generation,
                            message,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "dropping malformed inbound message"),
                },
                Some(Err(e)) => return Err(conn_err("receive failed", e)),
                None => return Err(Error::Connection("connection closed unexpectedly".to_string())),
            },
            _ = ping.tick() => {
                if awaiting_pong.is_none() {
                    tracing::trace!("sending ping");
                    sink.send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| conn_err("send ping", e))?;
                    awaiting_pong = Some(Instant::now());
                }
            }
            () = sleep_until_opt(pong_deadline) => {
                return Err(Error::Connection("ping timeout: no pong received".to_string()));
            }
        }
    }
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
