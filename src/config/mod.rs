//! Configuration management for the voice bridge
//!
//! Values come from environment variables, then the TOML file, then
//! built-in defaults. CLI flags are applied on top by the binary.

pub mod file;

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::dialogue::DEFAULT_DIALOGUE_URL;
use crate::voice::{GAIN, GATE_THRESHOLD, IDLE_TIMEOUT, MAX_REPLY_BYTES, SWEEP_INTERVAL, TARGET_RATE};
use crate::{Error, Result};

use self::file::VoiceBridgeConfigFile;

/// Default datagram ingest address
pub const DEFAULT_UDP_BIND: &str = "0.0.0.0:6980";

/// Default session listener address
pub const DEFAULT_TCP_BIND: &str = "0.0.0.0:12345";

/// Default whisper-asr base URL
pub const DEFAULT_STT_URL: &str = "http://127.0.0.1:9000";

/// Default `OpenAI` transcription model
pub const DEFAULT_STT_MODEL: &str = "whisper-1";

/// Default dialogue user id
pub const DEFAULT_DIALOGUE_USER: &str = "voice-bridge";

/// Voice bridge configuration
#[derive(Debug)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Capture buffer and conditioning
    pub capture: CaptureConfig,

    /// Reply audio shaping
    pub reply: ReplyConfig,

    /// Transcription backend
    pub stt: SttConfig,

    /// Dialogue backend
    pub dialogue: DialogueConfig,
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Datagram ingest address
    pub udp_bind: SocketAddr,

    /// Session listener address
    pub tcp_bind: SocketAddr,

    /// Status HTTP address (disabled when `None`)
    pub status_bind: Option<SocketAddr>,

    /// How long a session waits for the device config line
    pub config_wait: Duration,
}

/// Capture buffer configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Buffer is cleared after this long without an append
    pub idle_timeout: Duration,

    /// How often the idle check runs
    pub sweep_interval: Duration,

    /// Noise gate threshold (absolute sample value)
    pub gate_threshold: i16,

    /// Gain applied to samples above the gate
    pub gain: f32,
}

/// Reply audio configuration
#[derive(Debug, Clone)]
pub struct ReplyConfig {
    /// Default for the per-session `includeText` option
    pub include_text: bool,

    /// Playback speed multiplier
    pub playback_rate: f64,

    /// Upper bound on streamed PCM bytes (even)
    pub max_bytes: usize,

    /// Output sample rate in Hz
    pub target_rate: u32,

    /// Pause between the text line and the audio stream
    pub text_delay: Duration,

    /// Connect timeout for remote reply audio
    pub fetch_connect_timeout: Duration,

    /// Longest stall between remote reply audio chunks
    pub fetch_read_timeout: Duration,
}

/// Transcription backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttBackend {
    /// Self-hosted whisper-asr-webservice
    #[default]
    WhisperAsr,
    /// `OpenAI` audio transcription API
    OpenAi,
}

impl FromStr for SttBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper-asr" | "whisper" => Ok(Self::WhisperAsr),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown STT backend: {other}"))),
        }
    }
}

/// Transcription configuration
#[derive(Debug)]
pub struct SttConfig {
    /// Which backend to call
    pub backend: SttBackend,

    /// whisper-asr base URL
    pub url: String,

    /// `OpenAI` model name
    pub model: String,

    /// Language hint
    pub language: Option<String>,

    /// Vocabulary prompt
    pub initial_prompt: Option<String>,

    /// Request timeout
    pub timeout: Duration,

    /// `OpenAI` API key (from `OPENAI_API_KEY`)
    pub api_key: Option<SecretString>,
}

/// Dialogue configuration
#[derive(Debug)]
pub struct DialogueConfig {
    /// Runtime base URL
    pub url: String,

    /// Conversation user id
    pub user_id: String,

    /// Runtime API key (from `VOICEFLOW_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Request timeout
    pub timeout: Duration,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(config_path);
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn from_sources<F>(fc: VoiceBridgeConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            udp_bind: parse_addr(
                env("VOICE_BRIDGE_UDP_BIND")
                    .or(fc.server.udp_bind)
                    .as_deref()
                    .unwrap_or(DEFAULT_UDP_BIND),
            )?,
            tcp_bind: parse_addr(
                env("VOICE_BRIDGE_TCP_BIND")
                    .or(fc.server.tcp_bind)
                    .as_deref()
                    .unwrap_or(DEFAULT_TCP_BIND),
            )?,
            status_bind: env("VOICE_BRIDGE_STATUS_BIND")
                .or(fc.server.status_bind)
                .as_deref()
                .map(parse_addr)
                .transpose()?,
            config_wait: Duration::from_millis(fc.server.config_wait_ms.unwrap_or(500)),
        };

        let capture = CaptureConfig {
            idle_timeout: fc
                .capture
                .idle_timeout_secs
                .map_or(IDLE_TIMEOUT, Duration::from_secs),
            sweep_interval: fc
                .capture
                .sweep_interval_secs
                .map_or(SWEEP_INTERVAL, Duration::from_secs),
            gate_threshold: fc.capture.gate_threshold.unwrap_or(GATE_THRESHOLD),
            gain: fc.capture.gain.unwrap_or(GAIN),
        };

        let reply = ReplyConfig {
            include_text: match env("VOICE_BRIDGE_INCLUDE_TEXT") {
                Some(v) => parse_bool("VOICE_BRIDGE_INCLUDE_TEXT", &v)?,
                None => fc.reply.include_text.unwrap_or(false),
            },
            playback_rate: match env("VOICE_BRIDGE_PLAYBACK_RATE") {
                Some(v) => parse_number("VOICE_BRIDGE_PLAYBACK_RATE", &v)?,
                None => fc.reply.playback_rate.unwrap_or(1.0),
            },
            max_bytes: match env("VOICE_BRIDGE_MAX_REPLY_BYTES") {
                Some(v) => parse_number("VOICE_BRIDGE_MAX_REPLY_BYTES", &v)?,
                None => fc.reply.max_bytes.unwrap_or(MAX_REPLY_BYTES),
            } & !1,
            target_rate: fc.reply.target_rate.unwrap_or(TARGET_RATE),
            text_delay: Duration::from_millis(fc.reply.text_delay_ms.unwrap_or(100)),
            fetch_connect_timeout: Duration::from_secs(
                fc.reply.fetch_connect_timeout_secs.unwrap_or(10),
            ),
            fetch_read_timeout: Duration::from_secs(fc.reply.fetch_read_timeout_secs.unwrap_or(30)),
        };

        let stt = SttConfig {
            backend: env("VOICE_BRIDGE_STT_BACKEND")
                .or(fc.stt.backend)
                .as_deref()
                .map(SttBackend::from_str)
                .transpose()?
                .unwrap_or_default(),
            url: env("VOICE_BRIDGE_STT_URL")
                .or(fc.stt.url)
                .unwrap_or_else(|| DEFAULT_STT_URL.to_string()),
            model: env("VOICE_BRIDGE_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
            language: env("VOICE_BRIDGE_STT_LANGUAGE").or(fc.stt.language),
            initial_prompt: env("VOICE_BRIDGE_STT_PROMPT").or(fc.stt.initial_prompt),
            timeout: Duration::from_secs(fc.stt.timeout_secs.unwrap_or(60)),
            api_key: env("OPENAI_API_KEY")
                .or(fc.stt.api_key)
                .map(SecretString::from),
        };

        let dialogue = DialogueConfig {
            url: env("VOICE_BRIDGE_DIALOGUE_URL")
                .or(fc.dialogue.url)
                .unwrap_or_else(|| DEFAULT_DIALOGUE_URL.to_string()),
            user_id: env("VOICE_BRIDGE_DIALOGUE_USER")
                .or(fc.dialogue.user_id)
                .unwrap_or_else(|| DEFAULT_DIALOGUE_USER.to_string()),
            api_key: env("VOICEFLOW_API_KEY")
                .or(fc.dialogue.api_key)
                .map(SecretString::from),
            timeout: Duration::from_secs(fc.dialogue.timeout_secs.unwrap_or(30)),
        };

        let config = Self {
            server,
            capture,
            reply,
            stt,
            dialogue,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail later at runtime
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if !self.reply.playback_rate.is_finite() || self.reply.playback_rate <= 0.0 {
            return Err(Error::Config(format!(
                "playback rate must be a positive number, got {}",
                self.reply.playback_rate
            )));
        }

        if self.reply.target_rate == 0 {
            return Err(Error::Config("reply target rate must be non-zero".to_string()));
        }

        if self.capture.sweep_interval.is_zero() {
            return Err(Error::Config("capture sweep interval must be non-zero".to_string()));
        }

        if !self.capture.gain.is_finite() {
            return Err(Error::Config("capture gain must be finite".to_string()));
        }

        if self.stt.backend == SttBackend::OpenAi && self.stt.api_key.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY required for the openai STT backend".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_addr(value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid socket address {value:?}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn with_env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    fn from_toml(toml: &str, vars: &[(&str, &str)]) -> Result<Config> {
        Config::from_sources(toml::from_str(toml).unwrap(), with_env(vars))
    }

    #[test]
    fn defaults() {
        let config = from_toml("", &[]).unwrap();
        assert_eq!(config.server.udp_bind, "0.0.0.0:6980".parse().unwrap());
        assert_eq!(config.server.tcp_bind, "0.0.0.0:12345".parse().unwrap());
        assert!(config.server.status_bind.is_none());
        assert_eq!(config.server.config_wait, Duration::from_millis(500));
        assert_eq!(config.capture.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.capture.gate_threshold, 500);
        assert!(!config.reply.include_text);
        assert!((config.reply.playback_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.reply.max_bytes, 480_000);
        assert_eq!(config.reply.target_rate, 16_000);
        assert_eq!(config.reply.fetch_connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reply.fetch_read_timeout, Duration::from_secs(30));
        assert_eq!(config.stt.backend, SttBackend::WhisperAsr);
        assert_eq!(config.stt.url, DEFAULT_STT_URL);
        assert_eq!(config.dialogue.user_id, "voice-bridge");
        assert!(config.dialogue.api_key.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let config = from_toml(
            r#"
            [server]
            tcp_bind = "127.0.0.1:4000"
            udp_bind = "127.0.0.1:4001"

            [reply]
            include_text = false
            "#,
            &[
                ("VOICE_BRIDGE_TCP_BIND", "127.0.0.1:5000"),
                ("VOICE_BRIDGE_INCLUDE_TEXT", "true"),
            ],
        )
        .unwrap();

        assert_eq!(config.server.tcp_bind, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.server.udp_bind, "127.0.0.1:4001".parse().unwrap());
        assert!(config.reply.include_text);
    }

    #[test]
    fn max_bytes_rounds_down_to_whole_sample() {
        let config = from_toml("", &[("VOICE_BRIDGE_MAX_REPLY_BYTES", "1001")]).unwrap();
        assert_eq!(config.reply.max_bytes, 1000);
    }

    #[test]
    fn playback_rate_must_be_positive() {
        for bad in ["0", "-1.5", "NaN", "inf"] {
            let err = from_toml("", &[("VOICE_BRIDGE_PLAYBACK_RATE", bad)]).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad} accepted");
        }
        let err = from_toml("", &[("VOICE_BRIDGE_PLAYBACK_RATE", "fast")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn openai_backend_requires_key() {
        let err = from_toml("", &[("VOICE_BRIDGE_STT_BACKEND", "openai")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = from_toml(
            "",
            &[
                ("VOICE_BRIDGE_STT_BACKEND", "openai"),
                ("OPENAI_API_KEY", "sk-test"),
            ],
        )
        .unwrap();
        assert_eq!(config.stt.backend, SttBackend::OpenAi);
        assert_eq!(config.stt.api_key.unwrap().expose_secret(), "sk-test");
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(from_toml("", &[("VOICE_BRIDGE_UDP_BIND", "nowhere")]).is_err());
        assert!(from_toml("", &[("VOICE_BRIDGE_STT_BACKEND", "deepgram")]).is_err());
        assert!(from_toml("", &[("VOICE_BRIDGE_INCLUDE_TEXT", "maybe")]).is_err());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let config = from_toml("", &[("VOICE_BRIDGE_TCP_BIND", "  ")]).unwrap();
        assert_eq!(config.server.tcp_bind, "0.0.0.0:12345".parse().unwrap());
    }

    #[test]
    fn debug_output_redacts_keys() {
        let config = from_toml(
            "",
            &[("VOICEFLOW_API_KEY", "VF.DM.supersecret"), ("OPENAI_API_KEY", "sk-hidden")],
        )
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("supersecret"));
        assert!(!debug.contains("sk-hidden"));
    }
}
