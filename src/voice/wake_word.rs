//! Wake word detection
//!
//! Feeds frames to a streaming recognizer and fires once when a configured
//! keyword appears (case-insensitive substring) in the partial or final
//! hypothesis. After firing the gate stays silent until [`WakeWordGate::reset`].

use std::path::Path;
use std::sync::Arc;

use super::frame::{AudioFrame, SAMPLE_RATE};
use super::recognizer::{Recognizer, RecognizerEngine};
use crate::{Error, Result};

/// State of the wake word gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No recognizer loaded yet (or loading failed)
    Uninitialized,
    /// Evaluating frames
    Listening,
    /// A decision fired; waiting for reset
    Fired,
    /// Resources freed
    Released,
}

/// Positive wake word detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeDecision {
    /// Keyword that matched (normalized)
    pub keyword: String,
    /// Hypothesis the keyword was found in
    pub transcript: String,
    /// Whether the hypothesis was final rather than partial
    pub is_final: bool,
}

impl WakeDecision {
    /// Decision for a manual trigger (tap-to-talk)
    #[must_use]
    pub fn manual() -> Self {
        Self {
            keyword: String::new(),
            transcript: String::new(),
            is_final: true,
        }
    }
}

/// Gates the microphone stream behind a keyword set
pub struct WakeWordGate {
    keywords: Vec<String>,
    engine: Arc<dyn RecognizerEngine>,
    recognizer: Option<Box<dyn Recognizer>>,
    state: GateState,
    frames_processed: u64,
}

impl WakeWordGate {
    /// Create a gate for the given keywords
    ///
    /// Keywords are trimmed and lower-cased; empty entries are dropped.
    #[must_use]
    pub fn new(keywords: Vec<String>, engine: Arc<dyn RecognizerEngine>) -> Self {
        let keywords = normalize_keywords(keywords);

        tracing::debug!(keywords = ?keywords, "wake word gate created");

        Self {
            keywords,
            engine,
            recognizer: None,
            state: GateState::Uninitialized,
            frames_processed: 0,
        }
    }

    /// Load the recognizer model
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecognizerInit`] if the model path does not exist or
    /// the engine rejects it. The gate stays uninitialized in that case.
    pub fn initialize(&mut self, model_path: &Path) -> Result<()> {
        if !model_path.exists() {
            return Err(Error::model_missing(model_path));
        }

        let recognizer = self.engine.load(model_path, SAMPLE_RATE)?;
        self.recognizer = Some(recognizer);
        self.state = GateState::Listening;
        self.frames_processed = 0;

        tracing::info!(path = %model_path.display(), "wake word recognizer loaded");
        Ok(())
    }

    /// Feed one frame; returns a decision when a keyword is heard
    pub fn process_audio(&mut self, frame: &AudioFrame) -> Option<WakeDecision> {
        if self.state != GateState::Listening {
            return None;
        }
        let recognizer = self.recognizer.as_mut()?;

        self.frames_processed += 1;
        if self.frames_processed % 100 == 0 {
            tracing::debug!(frames = self.frames_processed, "wake word frames processed");
        }

        let is_final = match recognizer.accept_waveform(frame.as_bytes()) {
            Ok(is_final) => is_final,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.seq(), "recognizer rejected frame");
                return None;
            }
        };

        let hypothesis = if is_final {
            let text = recognizer.final_result();
            tracing::debug!(text = %text, "final hypothesis");
            text
        } else {
            let text = recognizer.partial_result();
            if self.frames_processed % 50 == 0 {
                tracing::trace!(text = %text, "partial hypothesis");
            }
            text
        };

        let keyword = match_keyword(&self.keywords, &hypothesis)?.to_string();

        tracing::info!(keyword = %keyword, transcript = %hypothesis, "wake word detected");
        self.state = GateState::Fired;

        Some(WakeDecision {
            keyword,
            transcript: hypothesis,
            is_final,
        })
    }

    /// Clear recognizer state and re-arm the gate
    pub fn reset(&mut self) {
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.reset();
        }
        if self.state == GateState::Fired {
            self.state = GateState::Listening;
        }
    }

    /// Free the recognizer and model; safe to call at any time
    pub fn release(&mut self) {
        if self.recognizer.take().is_some() {
            tracing::debug!("wake word recognizer released");
        }
        self.state = GateState::Released;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> GateState {
        self.state
    }

    /// Whether a recognizer is loaded and evaluating frames
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Get the configured keywords
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Drop for WakeWordGate {
    fn drop(&mut self) {
        self.release();
    }
}

/// Trim and lower-case keywords, dropping empties
#[must_use]
pub fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// First keyword contained in `text`, ignoring case
fn match_keyword<'a>(keywords: &'a [String], text: &str) -> Option<&'a str> {
    if text.is_empty() {
        return None;
    }
    let normalized = text.to_lowercase();
    keywords
        .iter()
        .find(|k| normalized.contains(k.as_str()))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted {
        partials: VecDeque<String>,
    }

    impl Recognizer for Scripted {
        fn accept_waveform(&mut self, _pcm: &[u8]) -> Result<bool> {
            Ok(false)
        }
        fn partial_result(&mut self) -> String {
            self.partials.pop_front().unwrap_or_default()
        }
        fn final_result(&mut self) -> String {
            String::new()
        }
        fn reset(&mut self) {}
    }

    struct ScriptedEngine(Vec<&'static str>);

    impl RecognizerEngine for ScriptedEngine {
        fn load(&self, _model_path: &Path, _sample_rate: u32) -> Result<Box<dyn Recognizer>> {
            Ok(Box::new(Scripted {
                partials: self.0.iter().map(ToString::to_string).collect(),
            }))
        }
    }

    fn ready_gate(partials: Vec<&'static str>) -> WakeWordGate {
        let mut gate = WakeWordGate::new(
            vec!["assistant".to_string()],
            Arc::new(ScriptedEngine(partials)),
        );
        let dir = std::env::temp_dir();
        gate.initialize(&dir).unwrap();
        gate
    }

    #[test]
    fn test_match_keyword_case_insensitive() {
        let keywords = normalize_keywords(vec!["  Nabu ".into(), "ASSISTANT".into(), String::new()]);
        assert_eq!(keywords, vec!["nabu", "assistant"]);
        assert_eq!(match_keyword(&keywords, "hey AssistantX"), Some("assistant"));
        assert_eq!(match_keyword(&keywords, "hello world"), None);
        assert_eq!(match_keyword(&keywords, ""), None);
    }

    #[test]
    fn test_fires_once_until_reset() {
        let mut gate = ready_gate(vec!["hey", "hey assistant", "assistant again"]);
        assert!(gate.process_audio(&AudioFrame::silence(0)).is_none());

        let decision = gate.process_audio(&AudioFrame::silence(1)).unwrap();
        assert_eq!(decision.keyword, "assistant");
        assert_eq!(decision.transcript, "hey assistant");
        assert_eq!(gate.state(), GateState::Fired);

        assert!(gate.process_audio(&AudioFrame::silence(2)).is_none());

        gate.reset();
        assert_eq!(gate.state(), GateState::Listening);
    }

    #[test]
    fn test_missing_model_path() {
        let mut gate = WakeWordGate::new(vec!["nabu".into()], Arc::new(ScriptedEngine(vec![])));
        let err = gate
            .initialize(Path::new("/nonexistent/vca/model"))
            .unwrap_err();
        assert!(matches!(err, Error::RecognizerInit { .. }));
        assert!(err.to_string().contains("/nonexistent/vca/model"));
        assert_eq!(gate.state(), GateState::Uninitialized);
        assert!(gate.process_audio(&AudioFrame::silence(0)).is_none());
    }

    #[test]
    fn test_release_without_initialize() {
        let mut gate = WakeWordGate::new(vec!["nabu".into()], Arc::new(ScriptedEngine(vec![])));
        gate.release();
        gate.release();
        assert_eq!(gate.state(), GateState::Released);
        assert!(!gate.is_ready());
    }
}
