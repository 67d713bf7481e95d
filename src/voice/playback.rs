//! Audio playback to speakers
//!
//! [`PlaybackSink`] is the boundary the session controller talks to: one
//! payload at a time, a new payload interrupts the current one, and every
//! accepted payload gets exactly one completion callback.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig, SupportedStreamConfigRange};

use crate::{Error, Result};

/// Completion callback for one payload
pub type OnComplete = Box<dyn FnOnce() + Send + 'static>;

/// Plays complete audio payloads, interrupting rather than queueing
pub trait PlaybackSink: Send {
    /// Stop anything in progress, then start `payload`
    fn play(&mut self, payload: Vec<u8>, on_complete: OnComplete);

    /// Stop current playback; idempotent
    fn stop(&mut self);

    /// Whether a payload is currently playing
    fn is_playing(&self) -> bool;
}

/// Renders one payload to an output, blocking until done or cancelled
pub trait AudioRenderer: Send + Sync + 'static {
    /// Play `payload`, returning early once `cancel` is set
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or played
    fn render(&self, payload: &[u8], cancel: &AtomicBool) -> Result<()>;
}

struct ActivePlayback {
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// [`PlaybackSink`] running each payload on its own thread
pub struct InterruptingPlayer<R: AudioRenderer> {
    renderer: Arc<R>,
    current: Option<ActivePlayback>,
}

impl<R: AudioRenderer> InterruptingPlayer<R> {
    /// Create a player around a renderer
    #[must_use]
    pub fn new(renderer: R) -> Self {
        Self {
            renderer: Arc::new(renderer),
            current: None,
        }
    }
}

impl<R: AudioRenderer> PlaybackSink for InterruptingPlayer<R> {
    fn play(&mut self, payload: Vec<u8>, on_complete: OnComplete) {
        self.stop();

        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let callback = Arc::new(Mutex::new(Some(on_complete)));

        let renderer = Arc::clone(&self.renderer);
        let thread_cancel = Arc::clone(&cancel);
        let thread_done = Arc::clone(&done);
        let thread_callback = Arc::clone(&callback);
        let bytes = payload.len();

        let spawned = std::thread::Builder::new()
            .name("vca-playback".to_string())
            .spawn(move || {
                let started = Instant::now();
                match renderer.render(&payload, &thread_cancel) {
                    Ok(()) if thread_cancel.load(Ordering::Acquire) => {
                        tracing::debug!(bytes, elapsed = ?started.elapsed(), "playback interrupted");
                    }
                    Ok(()) => tracing::debug!(bytes, elapsed = ?started.elapsed(), "playback complete"),
                    Err(e) => tracing::warn!(error = %e, bytes, "playback failed"),
                }
                fire_once(&thread_callback);
                thread_done.store(true, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                self.current = Some(ActivePlayback {
                    cancel,
                    done,
                    handle,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start playback thread");
                fire_once(&callback);
            }
        }
    }

    fn stop(&mut self) {
        if let Some(active) = self.current.take() {
            active.cancel.store(true, Ordering::Release);
            if active.handle.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }

    fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|a| !a.done.load(Ordering::Acquire))
    }
}

impl<R: AudioRenderer> Drop for InterruptingPlayer<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn fire_once(callback: &Mutex<Option<OnComplete>>) {
    let taken = callback
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(f) = taken {
        f();
    }
}

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Decode an MP3 or WAV payload to mono f32
///
/// # Errors
///
/// Returns error if the payload is neither valid WAV nor valid MP3
pub fn decode_payload(payload: &[u8]) -> Result<DecodedAudio> {
    decode_until(payload, &AtomicBool::new(false))?
        .ok_or_else(|| Error::Audio("decode cancelled".to_string()))
}

/// Decode like [`decode_payload`], returning `None` once `cancel` is set
///
/// MP3 payloads are checked between frames, so a long reply can be abandoned
/// part way through decoding.
///
/// # Errors
///
/// Returns error if the payload is neither valid WAV nor valid MP3
pub fn decode_until(payload: &[u8], cancel: &AtomicBool) -> Result<Option<DecodedAudio>> {
    if cancel.load(Ordering::Acquire) {
        return Ok(None);
    }
    if payload.starts_with(b"RIFF") {
        decode_wav(payload).map(Some)
    } else {
        decode_mp3(payload, cancel)
    }
}

fn decode_wav(data: &[u8]) -> Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(data)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        (format, bits) => {
            return Err(Error::Audio(format!(
                "unsupported WAV format: {format:?} {bits}-bit"
            )));
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8], cancel: &AtomicBool) -> Result<Option<DecodedAudio>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        if cancel.load(Ordering::Acquire) {
            tracing::debug!(decoded = samples.len(), "decode abandoned");
            return Ok(None);
        }
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Audio("payload contained no audio".to_string()));
    }

    Ok(Some(DecodedAudio {
        samples,
        sample_rate,
    }))
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / n)
        .collect()
}

/// Plays decoded payloads on the default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct SpeakerRenderer;

impl SpeakerRenderer {
    fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
        let supports = |c: &SupportedStreamConfigRange, channels: u16| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        };

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| supports(c, 1))
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| supports(c, 2))
            })
            .ok_or_else(|| {
                Error::Audio(format!("no output config for {sample_rate} Hz"))
            })?;

        Ok(supported.with_sample_rate(SampleRate(sample_rate)).config())
    }
}

impl AudioRenderer for SpeakerRenderer {
    fn render(&self, payload: &[u8], cancel: &AtomicBool) -> Result<()> {
        let Some(audio) = decode_until(payload, cancel)? else {
            return Ok(());
        };
        if cancel.load(Ordering::Acquire) {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        let config = Self::output_config(&device, audio.sample_rate)?;
        let channels = usize::from(config.channels);

        let total = audio.samples.len();
        let samples = Arc::new(audio.samples);
        let position = Arc::new(AtomicUsize::new(0));

        let stream_samples = Arc::clone(&samples);
        let stream_position = Arc::clone(&position);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = stream_position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = stream_samples.get(pos).copied().unwrap_or(0.0);
                        frame.fill(sample);
                        if pos < stream_samples.len() {
                            pos += 1;
                        }
                    }
                    stream_position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (total as u64 * 1000) / u64::from(audio.sample_rate);
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        while position.load(Ordering::Relaxed) < total
            && !cancel.load(Ordering::Acquire)
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(20));
        }

        if !cancel.load(Ordering::Acquire) {
            // Let the device drain its last buffer
            std::thread::sleep(Duration::from_millis(100));
        }

        drop(stream);
        Ok(())
    }
}
