//! Configuration management for the VCA client
//!
//! Layers, lowest priority first: built-in defaults, the TOML file, then
//! `VCA_*` environment variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use self::file::VcaConfigFile;
use crate::voice::normalize_keywords;
use crate::{Error, Result};

/// Default backend endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5000/audio-stream";

/// Default wake words
pub const DEFAULT_KEYWORDS: [&str; 3] = ["nabu", "assistant", "computer"];

/// Default recognizer model directory name
pub const DEFAULT_MODEL_DIR: &str = "vosk-model-small-en-us";

/// VCA client configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Backend connection
    pub transport: TransportConfig,

    /// Wake word gate
    pub wake_word: WakeWordConfig,

    /// Session lifecycle
    pub session: SessionConfig,

    /// Microphone
    pub capture: CaptureConfig,
}

/// Backend connection configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint
    pub server_url: String,

    /// Device identifier sent in `session_start`
    pub device_id: String,

    /// Interval between liveness pings
    pub ping_interval: Duration,

    /// How long a ping may stay unanswered
    pub pong_timeout: Duration,

    /// Handshake timeout
    pub connect_timeout: Duration,

    /// How long to wait for the server to acknowledge a close
    pub close_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            device_id: default_device_id(),
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
        }
    }
}

/// Wake word gate configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Enable wake word gating
    pub enabled: bool,

    /// Normalized keywords
    pub keywords: Vec<String>,

    /// Recognizer model directory
    pub model_path: PathBuf,
}

impl Default for WakeWordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: DEFAULT_KEYWORDS.iter().map(ToString::to_string).collect(),
            model_path: default_model_path(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Safety ceiling for holding the wake lock
    pub max_hold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_hold: Duration::from_secs(10 * 60),
        }
    }
}

/// Microphone configuration
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    /// Input device name; default device when `None`
    pub device: Option<String>,
}

impl Config {
    /// Load defaults, the standard config file, and environment overrides
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        config.apply_file(file::load_config_file());
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit config file; parse errors are fatal
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or the result is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let parsed = file::parse_config_file(path)?;
        tracing::info!(path = %path.display(), "loaded config file");

        let mut config = Self::default();
        config.apply_file(parsed);
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overlay values present in the file
    pub fn apply_file(&mut self, file: VcaConfigFile) {
        let t = file.transport;
        if let Some(url) = t.server_url {
            self.transport.server_url = url;
        }
        if let Some(id) = t.device_id {
            self.transport.device_id = id;
        }
        if let Some(secs) = t.ping_interval_secs {
            self.transport.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = t.pong_timeout_secs {
            self.transport.pong_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = t.connect_timeout_secs {
            self.transport.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = t.close_timeout_ms {
            self.transport.close_timeout = Duration::from_millis(ms);
        }

        let w = file.wake_word;
        if let Some(enabled) = w.enabled {
            self.wake_word.enabled = enabled;
        }
        if let Some(keywords) = w.keywords {
            self.wake_word.keywords = keywords;
        }
        if let Some(path) = w.model_path {
            self.wake_word.model_path = PathBuf::from(path);
        }

        if let Some(secs) = file.session.max_hold_secs {
            self.session.max_hold = Duration::from_secs(secs);
        }

        if let Some(device) = file.capture.device {
            self.capture.device = Some(device);
        }
    }

    /// Overlay `VCA_*` environment variables read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("VCA_SERVER_URL") {
            self.transport.server_url = url;
        }
        if let Some(id) = lookup("VCA_DEVICE_ID") {
            self.transport.device_id = id;
        }
        if let Some(path) = lookup("VCA_MODEL_PATH") {
            self.wake_word.model_path = PathBuf::from(path);
        }
        if let Some(words) = lookup("VCA_WAKE_WORDS") {
            self.wake_word.keywords = words.split(',').map(ToString::to_string).collect();
        }
    }

    /// Normalize and check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid URL, empty device id, empty
    /// keyword list, or zero duration
    pub fn validate(&mut self) -> Result<()> {
        let url = self.transport.server_url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(Error::Config(format!(
                "transport.server_url must be a ws:// or wss:// URL, got {url:?}"
            )));
        }
        self.transport.server_url = url.to_string();

        self.transport.device_id = self.transport.device_id.trim().to_string();
        if self.transport.device_id.is_empty() {
            return Err(Error::Config("transport.device_id must not be empty".to_string()));
        }

        for (name, value) in [
            ("transport.ping_interval", self.transport.ping_interval),
            ("transport.pong_timeout", self.transport.pong_timeout),
            ("transport.connect_timeout", self.transport.connect_timeout),
            ("transport.close_timeout", self.transport.close_timeout),
            ("session.max_hold", self.session.max_hold),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        self.wake_word.keywords = normalize_keywords(std::mem::take(&mut self.wake_word.keywords));
        if self.wake_word.keywords.is_empty() {
            return Err(Error::Config("wake_word.keywords must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Host name, or a random id when the host name is unavailable
fn default_device_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| format!("vca-{}", uuid::Uuid::new_v4()))
}

/// Default model location (`~/.local/share/vca/models/...` on Linux)
fn default_model_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "vca", "vca").map_or_else(
        || PathBuf::from("models").join(DEFAULT_MODEL_DIR),
        |d| d.data_dir().join("models").join(DEFAULT_MODEL_DIR),
    )
}
