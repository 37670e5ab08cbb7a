//! Error types for the voice bridge

use thiserror::Error;

/// Result type alias for voice bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a transcription call failed
#[derive(Debug, Error)]
pub enum TranscriptionFailure {
    /// Request never produced a response (connect, timeout, reset)
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("server error: {0}")]
    Server(String),

    /// Backend answered but the body was not a transcript
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Coarse classification of a session-terminating error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Capture buffer was empty when the session drained it
    NoAudio,
    /// Captured audio failed the utterance checks
    WeakSignal,
    /// Transcription backend failed
    TranscriptionFailed,
    /// Dialogue backend failed or returned no payload
    DialogueFailed,
    /// Inline reply audio could not be decoded
    ReplyDecodeFailed,
    /// Remote reply audio could not be fetched
    ReplyFetchFailed,
    /// Peer went away mid-stream
    Transport,
    /// Anything else (configuration, I/O, encoding)
    Internal,
}

/// Errors that can occur in the voice bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Nothing was captured before the session started
    #[error("no audio data received")]
    NoAudio,

    /// Captured audio is too short or too quiet to transcribe
    #[error("no significant audio detected: {0}")]
    WeakSignal(String),

    /// Speech-to-text error
    #[error("transcription failed: {0}")]
    Transcription(#[from] TranscriptionFailure),

    /// Dialogue backend error
    #[error("dialogue error: {0}")]
    Dialogue(String),

    /// Reply audio decode error
    #[error("reply decode error: {0}")]
    ReplyDecode(String),

    /// Reply audio fetch error
    #[error("reply fetch error: {0}")]
    ReplyFetch(String),

    /// Session connection error
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Session-level classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAudio => ErrorKind::NoAudio,
            Self::WeakSignal(_) => ErrorKind::WeakSignal,
            Self::Transcription(_) => ErrorKind::TranscriptionFailed,
            Self::Dialogue(_) => ErrorKind::DialogueFailed,
            Self::ReplyDecode(_) => ErrorKind::ReplyDecodeFailed,
            Self::ReplyFetch(_) => ErrorKind::ReplyFetchFailed,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Config(_)
            | Self::Audio(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Serialization(_)
            | Self::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Message written to the device in the `{"error": ...}` line
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NoAudio => "No audio data received",
            ErrorKind::WeakSignal => "No significant audio detected",
            ErrorKind::TranscriptionFailed => "Error during transcription",
            ErrorKind::DialogueFailed => "Error getting AI response",
            ErrorKind::ReplyDecodeFailed => "Error converting audio",
            ErrorKind::ReplyFetchFailed => "Error fetching audio",
            ErrorKind::Transport | ErrorKind::Internal => "Internal error",
        }
    }
}
