//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use vca_client::config::TransportConfig;
use vca_client::session::ExclusiveResource;
use vca_client::voice::{
    AudioFrame, AudioRenderer, OnComplete, PcmDevice, PlaybackSink, Recognizer,
    RecognizerEngine,
};
use vca_client::{Error, Result};

/// How long any single wait in a test may take
pub const WAIT: Duration = Duration::from_secs(5);

/// Recognizer that reports one scripted partial hypothesis per frame
pub struct ScriptedRecognizer {
    script: Vec<String>,
    position: usize,
    partial: String,
}

impl Recognizer for ScriptedRecognizer {
    fn accept_waveform(&mut self, _pcm: &[u8]) -> Result<bool> {
        self.partial = self.script.get(self.position).cloned().unwrap_or_default();
        self.position += 1;
        Ok(false)
    }

    fn partial_result(&mut self) -> String {
        self.partial.clone()
    }

    fn final_result(&mut self) -> String {
        std::mem::take(&mut self.partial)
    }

    fn reset(&mut self) {
        self.partial.clear();
    }
}

/// Engine handing out [`ScriptedRecognizer`]s
pub struct ScriptedEngine {
    script: Vec<String>,
}

impl ScriptedEngine {
    pub fn new(script: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            script: script.iter().map(ToString::to_string).collect(),
        })
    }
}

impl RecognizerEngine for ScriptedEngine {
    fn load(&self, _model_path: &Path, _sample_rate: u32) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(ScriptedRecognizer {
            script: self.script.clone(),
            position: 0,
            partial: String::new(),
        }))
    }
}

/// A directory that exists, for gates that need a model path
pub fn model_dir() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

/// PCM device replaying a fixed list of reads
pub struct ScriptedDevice {
    reads: VecDeque<std::result::Result<Vec<u8>, String>>,
}

impl ScriptedDevice {
    pub fn new(reads: Vec<std::result::Result<Vec<u8>, String>>) -> Self {
        Self {
            reads: reads.into(),
        }
    }
}

impl PcmDevice for ScriptedDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(Error::CaptureRead(e)),
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(0)
            }
        }
    }
}

/// Renderer that "plays" for `payload[0] * 10` ms
pub struct SleepRenderer;

impl AudioRenderer for SleepRenderer {
    fn render(&self, payload: &[u8], cancel: &AtomicBool) -> Result<()> {
        let ticks = payload.first().copied().unwrap_or(0);
        for _ in 0..ticks {
            if cancel.load(std::sync::atomic::Ordering::Acquire) {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}

/// Playback sink that records payload sizes and completes immediately
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub played: Arc<Mutex<Vec<usize>>>,
}

impl PlaybackSink for RecordingSink {
    fn play(&mut self, payload: Vec<u8>, on_complete: OnComplete) {
        self.played.lock().unwrap().push(payload.len());
        on_complete();
    }

    fn stop(&mut self) {}

    fn is_playing(&self) -> bool {
        false
    }
}

/// Exclusive resource that only tracks whether it is held
#[derive(Clone, Default)]
pub struct FlagLock {
    pub held: Arc<Mutex<bool>>,
}

impl ExclusiveResource for FlagLock {
    fn acquire(&mut self, _max_hold: Duration) {
        *self.held.lock().unwrap() = true;
    }

    fn release(&mut self) {
        *self.held.lock().unwrap() = false;
    }

    fn is_held(&self) -> bool {
        *self.held.lock().unwrap()
    }
}

/// Transport settings pointing at `url` with short timeouts
pub fn transport_config(url: &str) -> TransportConfig {
    TransportConfig {
        server_url: url.to_string(),
        device_id: "test-device".to_string(),
        ping_interval: Duration::from_secs(30),
        pong_timeout: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
    }
}

/// What the mock backend saw from the client
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Text(serde_json::Value),
    Binary(Vec<u8>),
    Close,
}

impl Received {
    /// The `type` field of a control message
    pub fn control_type(&self) -> Option<&str> {
        match self {
            Self::Text(value) => value["type"].as_str(),
            _ => None,
        }
    }
}

/// Loopback WebSocket backend serving one connection at a time
pub struct MockServer {
    pub url: String,
    received: mpsc::UnboundedReceiver<Received>,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/audio-stream", listener.local_addr().unwrap());
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                loop {
                    tokio::select! {
                        msg = ws.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
                                let _ = received_tx.send(Received::Text(value));
                            }
                            Some(Ok(Message::Binary(bytes))) => {
                                let _ = received_tx.send(Received::Binary(bytes));
                            }
                            Some(Ok(Message::Close(_))) => {
                                let _ = received_tx.send(Received::Close);
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => break,
                        },
                        out = outbound_rx.recv() => match out {
                            Some(message) => {
                                let closing = message.is_close();
                                if ws.send(message).await.is_err() || closing {
                                    // Let the close handshake finish
                                    let _ = tokio::time::timeout(Duration::from_secs(1), async {
                                        while let Some(Ok(_)) = ws.next().await {}
                                    })
                                    .await;
                                    break;
                                }
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            url,
            received,
            outbound,
            task,
        }
    }

    /// Next message from the client
    pub async fn next(&mut self) -> Received {
        tokio::time::timeout(WAIT, self.received.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("server task ended")
    }

    /// Collect everything the client sends within `window`
    pub async fn drain(&mut self, window: Duration) -> Vec<Received> {
        let mut out = Vec::new();
        while let Ok(Some(msg)) = tokio::time::timeout(window, self.received.recv()).await {
            out.push(msg);
        }
        out
    }

    /// Push a message to the connected client
    pub fn send(&self, message: Message) {
        self.outbound.send(message).unwrap();
    }

    /// Close the current connection from the server side
    pub fn close(&self) {
        self.send(Message::Close(None));
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Backend that completes the handshake and then never reads the socket
pub struct SilentServer {
    pub url: String,
    task: JoinHandle<()>,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/audio-stream", listener.local_addr().unwrap());

        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    held.push(ws);
                }
            }
        });

        Self { url, task }
    }
}

impl Drop for SilentServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Receive from `rx` or fail the test after [`WAIT`]
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

/// A frame of silence
pub fn silence(seq: u64) -> AudioFrame {
    AudioFrame::silence(seq)
}
