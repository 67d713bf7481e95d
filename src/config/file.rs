//! TOML configuration file loading
//!
//! Supports `~/.config/vca/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VcaConfigFile {
    /// Backend connection settings
    #[serde(default)]
    pub transport: TransportFileConfig,

    /// Wake word gate settings
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Microphone settings
    #[serde(default)]
    pub capture: CaptureFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct TransportFileConfig {
    /// WebSocket URL (e.g. "ws://192.168.1.61:5000/audio-stream")
    pub server_url: Option<String>,

    /// Device identifier sent in `session_start`
    pub device_id: Option<String>,

    /// Seconds between liveness pings
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong
    pub pong_timeout_secs: Option<u64>,

    /// Seconds allowed for the handshake
    pub connect_timeout_secs: Option<u64>,

    /// Milliseconds to wait for the server to acknowledge a close
    pub close_timeout_ms: Option<u64>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Enable wake word gating (manual trigger still works when disabled)
    pub enabled: Option<bool>,

    /// Keywords, matched case-insensitively as substrings
    pub keywords: Option<Vec<String>>,

    /// Recognizer model directory
    pub model_path: Option<String>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Ceiling for holding the wake lock, in seconds
    pub max_hold_secs: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Input device name (default device when unset)
    pub device: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VcaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VcaConfigFile {
    let Some(path) = config_file_path() else {
        return VcaConfigFile::default();
    };

    if !path.exists() {
        return VcaConfigFile::default();
    }

    match parse_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            VcaConfigFile::default()
        }
    }
}

/// Read and parse a specific config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn parse_config_file(path: &Path) -> Result<VcaConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/vca/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("vca").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let file: VcaConfigFile = toml::from_str(
            r#"
            [transport]
            server_url = "ws://10.0.0.2:5000/audio-stream"

            [wake_word]
            keywords = ["jarvis"]
            "#,
        )
        .unwrap();

        assert_eq!(
            file.transport.server_url.as_deref(),
            Some("ws://10.0.0.2:5000/audio-stream")
        );
        assert!(file.transport.device_id.is_none());
        assert_eq!(file.wake_word.keywords, Some(vec!["jarvis".to_string()]));
        assert!(file.session.max_hold_secs.is_none());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file: VcaConfigFile = toml::from_str("").unwrap();
        assert!(file.transport.server_url.is_none());
        assert!(file.capture.device.is_none());
    }

    #[test]
    fn test_parse_config_file_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transport\nserver_url = 1").unwrap();
        assert!(parse_config_file(&path).is_err());
    }
}
