//! Fixed-size PCM audio frames

use std::time::Duration;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Frame duration in milliseconds
pub const FRAME_MS: u32 = 30;

/// Duration of one frame
pub const FRAME_DURATION: Duration = Duration::from_millis(30);

/// Samples per frame (mono)
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// Bytes per frame (16-bit PCM, mono) - 960 bytes
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// One chunk of raw 16 kHz mono 16-bit little-endian PCM
///
/// Frames are immutable once built. `seq` is the capture order assigned by
/// the producing [`CaptureSource`](super::CaptureSource).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    seq: u64,
    data: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw PCM bytes with a capture sequence number
    #[must_use]
    pub const fn new(seq: u64, data: Vec<u8>) -> Self {
        Self { seq, data }
    }

    /// Build a frame from i16 samples
    #[must_use]
    pub fn from_samples(seq: u64, samples: &[i16]) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { seq, data }
    }

    /// A frame of digital silence at nominal size
    #[must_use]
    pub fn silence(seq: u64) -> Self {
        Self {
            seq,
            data: vec![0; FRAME_BYTES],
        }
    }

    /// Capture order of this frame
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Raw PCM bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the raw bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Byte length
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the bytes as i16 samples (a trailing odd byte is ignored)
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// RMS level normalized to [0.0, 1.0]
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rms(&self) -> f32 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }

        let sum_squares: f32 = samples
            .iter()
            .map(|&s| {
                let v = f32::from(s) / 32768.0;
                v * v
            })
            .sum();
        (sum_squares / samples.len() as f32).sqrt()
    }
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
