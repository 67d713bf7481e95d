//! Audio capture from microphone
//!
//! A dedicated OS thread performs blocking reads against a [`PcmDevice`] and
//! pushes fixed-size [`AudioFrame`]s to a sink in capture order. Read errors
//! are logged and the loop keeps going.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::frame::{AudioFrame, FRAME_BYTES, SAMPLE_RATE, f32_to_i16};
use crate::{Error, Result};

/// How long a device read waits for audio before reporting a read error
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Max queued callback chunks between the cpal thread and the reader
const CALLBACK_QUEUE: usize = 64;

/// Blocking PCM source (16 kHz, mono, 16-bit little-endian)
///
/// Implementations are opened and used on the capture thread only, so they
/// do not need to be `Send`.
pub trait PcmDevice {
    /// Fill `buf` with PCM bytes, blocking until data is available
    ///
    /// Returns the number of bytes written. `Ok(0)` means nothing was read
    /// this cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureRead`] on a transient device failure
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the device
    fn close(&mut self) {}
}

/// Microphone input through the default (or named) cpal device
pub struct CpalDevice {
    stream: Option<Stream>,
    chunks: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl CpalDevice {
    /// Open and start the input device
    ///
    /// # Errors
    ///
    /// Returns error if no device or no 16 kHz mono config is available
    pub fn open(device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_name)?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(CALLBACK_QUEUE);
        let last_error = Arc::new(Mutex::new(None));
        let error_slot = Arc::clone(&last_error);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let bytes: Vec<u8> = data
                        .iter()
                        .flat_map(|&s| f32_to_i16(s).to_le_bytes())
                        .collect();
                    if tx.try_send(bytes).is_err() {
                        tracing::trace!("capture queue full, reader is behind");
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Ok(mut slot) = error_slot.lock() {
                        *slot = Some(err.to_string());
                    }
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            chunks: rx,
            pending: Vec::with_capacity(FRAME_BYTES * 2),
            last_error,
        })
    }
}

impl PcmDevice for CpalDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(err) = self.last_error.lock().ok().and_then(|mut e| e.take()) {
            return Err(Error::CaptureRead(err));
        }

        while self.pending.len() < buf.len() {
            match self.chunks.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    return Err(Error::CaptureRead("no audio from input device".to_string()));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Error::CaptureRead("input stream closed".to_string()));
                }
            }
        }

        let n = buf.len();
        buf.copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    let Some(name) = name else {
        return host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()));
    };

    host.input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| Error::Audio(format!("input device not found: {name}")))
}

/// Continuous frame producer running on a dedicated thread
pub struct CaptureSource {
    running: Arc<AtomicBool>,
    next_seq: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Default for CaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource {
    /// Create a stopped capture source
    #[must_use]
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            next_seq: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Start capturing; a no-op if already running
    ///
    /// `open` runs on the capture thread. `sink` receives every frame in
    /// capture order and returns `false` once nobody is listening, which
    /// ends the loop.
    ///
    /// # Errors
    ///
    /// Returns the device open error, or an IO error if the thread cannot spawn
    pub fn start<D, O, S>(&mut self, open: O, mut sink: S) -> Result<()>
    where
        D: PcmDevice,
        O: FnOnce() -> Result<D> + Send + 'static,
        S: FnMut(AudioFrame) -> bool + Send + 'static,
    {
        if self.is_capturing() {
            return Ok(());
        }
        // Reap a loop that ended on its own (sink closed)
        self.stop();

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let running = Arc::clone(&self.running);
        let next_seq = Arc::clone(&self.next_seq);
        running.store(true, Ordering::Release);

        let handle = std::thread::Builder::new()
            .name("vca-capture".to_string())
            .spawn(move || {
                let mut device = match open() {
                    Ok(device) => {
                        let _ = ready_tx.send(Ok(()));
                        device
                    }
                    Err(e) => {
                        running.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                tracing::info!(frame_bytes = FRAME_BYTES, sample_rate = SAMPLE_RATE, "audio capture started");

                let mut buf = vec![0u8; FRAME_BYTES];
                let mut frames_read: u64 = 0;
                let mut total_bytes: u64 = 0;

                while running.load(Ordering::Acquire) {
                    match device.read(&mut buf) {
                        Ok(0) => {}
                        Ok(n) => {
                            frames_read += 1;
                            total_bytes += n as u64;
                            if frames_read % 100 == 0 {
                                tracing::debug!(frames_read, total_bytes, last_chunk = n, "audio frames read");
                            }

                            let seq = next_seq.fetch_add(1, Ordering::Relaxed);
                            if !sink(AudioFrame::new(seq, buf[..n].to_vec())) {
                                tracing::debug!("frame sink closed, ending capture");
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "audio read failed");
                        }
                    }
                }

                running.store(false, Ordering::Release);
                device.close();
                tracing::info!(frames_read, total_bytes, "audio capture stopped");
            })?;

        self.handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(Error::Audio("capture thread exited during startup".to_string()))
            }
        }
    }

    /// Stop capturing and release the device; idempotent
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("capture thread panicked");
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedDevice {
        script: VecDeque<Result<Vec<u8>>>,
    }

    impl PcmDevice for ScriptedDevice {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.script.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(0)
                }
            }
        }
    }

    fn collect(rx: &mpsc::Receiver<AudioFrame>, n: usize) -> Vec<AudioFrame> {
        (0..n)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).expect("frame"))
            .collect()
    }

    #[test]
    fn test_frames_delivered_in_order_and_errors_skipped() {
        let script = VecDeque::from(vec![
            Ok(vec![1; FRAME_BYTES]),
            Err(Error::CaptureRead("overrun".into())),
            Ok(vec![2; FRAME_BYTES]),
            Ok(vec![3; FRAME_BYTES]),
        ]);
        let (tx, rx) = mpsc::channel();
        let mut capture = CaptureSource::new();
        capture
            .start(move || Ok(ScriptedDevice { script }), move |f| tx.send(f).is_ok())
            .unwrap();

        let frames = collect(&rx, 3);
        assert_eq!(frames.iter().map(AudioFrame::seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(frames[0].as_bytes()[0], 1);
        assert_eq!(frames[1].as_bytes()[0], 2);
        assert_eq!(frames[2].as_bytes()[0], 3);

        capture.stop();
        assert!(!capture.is_capturing());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (tx, _rx) = mpsc::channel::<AudioFrame>();
        let mut capture = CaptureSource::new();
        let tx2 = tx.clone();
        capture
            .start(|| Ok(ScriptedDevice { script: VecDeque::new() }), move |f| tx.send(f).is_ok())
            .unwrap();
        capture
            .start(
                || -> Result<ScriptedDevice> { Err(Error::Audio("must not open twice".into())) },
                move |f| tx2.send(f).is_ok(),
            )
            .unwrap();
        assert!(capture.is_capturing());
        capture.stop();
        capture.stop();
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mut capture = CaptureSource::new();
        let err = capture
            .start(
                || -> Result<ScriptedDevice> { Err(Error::Audio("no input device".into())) },
                |_| true,
            )
            .unwrap_err();
        assert!(err.to_string().contains("no input device"));
        assert!(!capture.is_capturing());
    }
}
