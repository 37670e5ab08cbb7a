//! TOML configuration file loading
//!
//! Supports `~/.config/voice-bridge/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceBridgeConfigFile {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Capture buffer and conditioning
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Reply audio shaping
    #[serde(default)]
    pub reply: ReplyFileConfig,

    /// Transcription backend
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Dialogue backend
    #[serde(default)]
    pub dialogue: DialogueFileConfig,
}

/// Listener configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Datagram ingest address (e.g. "0.0.0.0:6980")
    pub udp_bind: Option<String>,

    /// Session listener address (e.g. "0.0.0.0:12345")
    pub tcp_bind: Option<String>,

    /// Status HTTP address; status server is off when unset
    pub status_bind: Option<String>,

    /// Grace period for the device config line, in milliseconds
    pub config_wait_ms: Option<u64>,
}

/// Capture buffer configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub gate_threshold: Option<i16>,
    pub gain: Option<f32>,
}

/// Reply audio configuration
#[derive(Debug, Default, Deserialize)]
pub struct ReplyFileConfig {
    /// Default for the per-session `includeText` option
    pub include_text: Option<bool>,

    /// Playback speed multiplier (> 0)
    pub playback_rate: Option<f64>,

    /// Upper bound on streamed PCM bytes
    pub max_bytes: Option<usize>,

    /// Output sample rate in Hz
    pub target_rate: Option<u32>,

    /// Pause between text line and audio, in milliseconds
    pub text_delay_ms: Option<u64>,

    /// Connect timeout for remote reply audio, in seconds
    pub fetch_connect_timeout_secs: Option<u64>,

    /// Longest stall between remote audio chunks, in seconds
    pub fetch_read_timeout_secs: Option<u64>,
}

/// Transcription configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper-asr" or "openai"
    pub backend: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    pub initial_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<String>,
}

/// Dialogue configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogueFileConfig {
    pub url: Option<String>,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Get the standard config file path
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("voice-bridge").join("config.toml"))
}

/// Load the TOML config file from `path`, or the standard path when `None`
///
/// Returns `VoiceBridgeConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(path: Option<&Path>) -> VoiceBridgeConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return VoiceBridgeConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return VoiceBridgeConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceBridgeConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceBridgeConfigFile::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let file: VoiceBridgeConfigFile = toml::from_str(
            r#"
            [server]
            tcp_bind = "127.0.0.1:4000"

            [reply]
            playback_rate = 1.25
            "#,
        )
        .unwrap();

        assert_eq!(file.server.tcp_bind.as_deref(), Some("127.0.0.1:4000"));
        assert!(file.server.udp_bind.is_none());
        assert_eq!(file.reply.playback_rate, Some(1.25));
        assert!(file.stt.backend.is_none());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config_file(Some(&dir.path().join("absent.toml")));
        assert!(file.server.tcp_bind.is_none());
    }

    #[test]
    fn broken_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nudp_bind = ").unwrap();

        let file = load_config_file(Some(&path));
        assert!(file.server.udp_bind.is_none());
    }
}
