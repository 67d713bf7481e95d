//! Streaming speech recognizer boundary
//!
//! The wake word gate only needs a recognizer that accepts PCM incrementally
//! and exposes its current partial and final hypotheses. The acoustic model
//! behind it is opaque.

use std::path::Path;
use std::sync::Arc;

use crate::{Error, Result};

/// Incremental speech recognizer fed with 16 kHz mono PCM
pub trait Recognizer: Send {
    /// Feed PCM bytes; returns `true` when an utterance was finalized
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the audio
    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool>;

    /// Current partial hypothesis
    fn partial_result(&mut self) -> String;

    /// Hypothesis of the utterance finalized by the last `accept_waveform`
    fn final_result(&mut self) -> String;

    /// Drop any accumulated decoding state
    fn reset(&mut self);
}

/// Loads recognizers from a model directory
pub trait RecognizerEngine: Send + Sync {
    /// Load the model at `model_path` and build a recognizer
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecognizerInit`](crate::Error::RecognizerInit) if the
    /// model is missing or rejected
    fn load(&self, model_path: &Path, sample_rate: u32) -> Result<Box<dyn Recognizer>>;
}

/// Engine used when the binary was built without a recognizer backend
///
/// Every load fails, so the gate stays uninitialized and only manual
/// session starts work.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEngine;

impl RecognizerEngine for UnavailableEngine {
    fn load(&self, model_path: &Path, _sample_rate: u32) -> Result<Box<dyn Recognizer>> {
        Err(Error::RecognizerInit {
            path: model_path.display().to_string(),
            message: "built without a speech recognizer (enable the `vosk` feature)".to_string(),
        })
    }
}

/// Best recognizer engine compiled into this build
#[must_use]
pub fn default_engine() -> Arc<dyn RecognizerEngine> {
    #[cfg(feature = "vosk")]
    {
        Arc::new(VoskEngine)
    }

    #[cfg(not(feature = "vosk"))]
    {
        Arc::new(UnavailableEngine)
    }
}

#[cfg(feature = "vosk")]
pub use vosk_engine::VoskEngine;

#[cfg(feature = "vosk")]
mod vosk_engine {
    use std::path::Path;

    use super::{Recognizer, RecognizerEngine};
    use crate::{Error, Result};

    /// Offline recognizer backed by a Vosk model directory
    #[derive(Debug, Default, Clone, Copy)]
    pub struct VoskEngine;

    struct VoskRecognizer {
        // Keeps the model alive for the recognizer
        _model: vosk::Model,
        recognizer: vosk::Recognizer,
        samples: Vec<i16>,
    }

    impl RecognizerEngine for VoskEngine {
        #[allow(clippy::cast_precision_loss)]
        fn load(&self, model_path: &Path, sample_rate: u32) -> Result<Box<dyn Recognizer>> {
            let path_str = model_path.to_string_lossy().to_string();
            let model = vosk::Model::new(path_str.clone()).ok_or_else(|| Error::RecognizerInit {
                path: path_str.clone(),
                message: "vosk rejected the model".to_string(),
            })?;
            let mut recognizer = vosk::Recognizer::new(&model, sample_rate as f32).ok_or_else(
                || Error::RecognizerInit {
                    path: path_str,
                    message: "vosk could not create a recognizer".to_string(),
                },
            )?;
            recognizer.set_words(true);

            Ok(Box::new(VoskRecognizer {
                _model: model,
                recognizer,
                samples: Vec::new(),
            }))
        }
    }

    impl Recognizer for VoskRecognizer {
        fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool> {
            self.samples.clear();
            self.samples.extend(
                pcm.chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]])),
            );
            match self.recognizer.accept_waveform(&self.samples) {
                Ok(vosk::DecodingState::Finalized) => Ok(true),
                Ok(vosk::DecodingState::Running) => Ok(false),
                Ok(vosk::DecodingState::Failed) => {
                    Err(Error::Audio("vosk failed to decode audio".to_string()))
                }
                Err(e) => Err(Error::Audio(format!("vosk rejected audio: {e:?}"))),
            }
        }

        fn partial_result(&mut self) -> String {
            self.recognizer.partial_result().partial.to_string()
        }

        fn final_result(&mut self) -> String {
            self.recognizer
                .result()
                .single()
                .map(|r| r.text.to_string())
                .unwrap_or_default()
        }

        fn reset(&mut self) {
            self.recognizer.reset();
        }
    }
}
