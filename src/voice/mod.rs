//! Voice processing module
//!
//! Handles audio capture, wake word gating, and playback.
//! Streaming to the assistant backend lives in [`crate::transport`].

mod capture;
mod frame;
mod playback;
mod recognizer;
mod wake_word;

pub use capture::{CaptureSource, CpalDevice, PcmDevice};
pub use frame::{
    AudioFrame, FRAME_BYTES, FRAME_DURATION, FRAME_MS, FRAME_SAMPLES, SAMPLE_RATE, f32_to_i16,
};
pub use playback::{
    AudioRenderer, DecodedAudio, InterruptingPlayer, OnComplete, PlaybackSink, SpeakerRenderer,
    decode_payload, decode_until,
};
#[cfg(feature = "vosk")]
pub use recognizer::VoskEngine;
pub use recognizer::{Recognizer, RecognizerEngine, UnavailableEngine, default_engine};
pub use wake_word::{GateState, WakeDecision, WakeWordGate, normalize_keywords};
