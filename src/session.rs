//! Per-connection session orchestration
//!
//! A device connects once it has finished speaking. The session optionally
//! reads a one-line JSON config, drains the capture buffer, validates and
//! encodes the utterance, runs transcription and dialogue, then streams the
//! spoken reply back as raw PCM before closing.
//!
//! ```text
//! AwaitingConfig → Validating → Encoding → Transcribing → Dialoguing → StreamingReply → Closed
//!        └──────────────┴───────────┴────────────┴─────────────┴──────────→ Error(kind)
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::dialogue::{Dialogue, DialogueReply};
use crate::error::ErrorKind;
use crate::voice::{
    AudioFetcher, AudioStream, CaptureHandle, ReplyAudio, ReplyTranscoder, SAMPLE_RATE,
    Transcriber, encode_wav, validate,
};
use crate::{Error, Result};

/// Transcript used when the backend hears nothing
pub const EMPTY_TRANSCRIPT_FALLBACK: &str =
    "I could not detect any speech in the audio. Could you please try speaking again?";

/// Bytes written per socket write while streaming audio
const WRITE_CHUNK: usize = 4096;

/// Largest config message read from the device
const CONFIG_READ_LIMIT: usize = 1024;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the optional config line
    AwaitingConfig,
    /// Draining and checking the utterance
    Validating,
    /// Building the WAV upload
    Encoding,
    /// Waiting on speech-to-text
    Transcribing,
    /// Waiting on the dialogue backend
    Dialoguing,
    /// Writing reply audio to the device
    StreamingReply,
    /// Finished normally
    Closed,
    /// Ended with an error reported to the device
    Error(ErrorKind),
}

/// Options negotiated per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Send the reply text as a JSON line before the audio
    pub include_text: bool,
}

/// Read `includeText` from a device config message
///
/// Returns `None` unless the message is a JSON object with a boolean
/// `includeText` field.
#[must_use]
pub fn parse_config_message(data: &[u8]) -> Option<bool> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    value.as_object()?.get("includeText")?.as_bool()
}

/// Process-wide settings shared by every session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `includeText` when the device sends no config
    pub default_include_text: bool,
    /// How long to wait for the device's first bytes
    pub config_wait: Duration,
    /// Pause between the text line and the audio stream
    pub text_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            default_include_text: false,
            config_wait: Duration::from_millis(500),
            text_delay: Duration::from_millis(100),
        }
    }
}

/// Collaborators and shared state for sessions
pub struct SessionContext {
    capture: CaptureHandle,
    transcriber: Arc<dyn Transcriber>,
    dialogue: Arc<dyn Dialogue>,
    fetcher: Arc<dyn AudioFetcher>,
    transcoder: ReplyTranscoder,
    options: SessionOptions,
    /// Only one utterance exists, so only one session may consume it at a time
    turn: Mutex<()>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("transcriber", &self.transcriber.name())
            .field("transcoder", &self.transcoder)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Create a session context
    #[must_use]
    pub fn new(
        capture: CaptureHandle,
        transcriber: Arc<dyn Transcriber>,
        dialogue: Arc<dyn Dialogue>,
        fetcher: Arc<dyn AudioFetcher>,
        transcoder: ReplyTranscoder,
        options: SessionOptions,
    ) -> Self {
        Self {
            capture,
            transcriber,
            dialogue,
            fetcher,
            transcoder,
            options,
            turn: Mutex::new(()),
        }
    }
}

/// Outgoing JSON lines
#[derive(Serialize)]
#[serde(untagged)]
enum ControlLine<'a> {
    Error { error: &'a str },
    Text {
        #[serde(rename = "type")]
        kind: &'static str,
        message: &'a str,
    },
}

/// Reply audio ready to stream
enum PreparedReply {
    Pcm(Vec<u8>),
    Remote(AudioStream),
}

/// One device connection
pub struct Session<S> {
    stream: S,
    peer: String,
    state: SessionState,
    ctx: Arc<SessionContext>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session for an accepted connection
    pub fn new(stream: S, peer: impl Into<String>, ctx: Arc<SessionContext>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            state: SessionState::AwaitingConfig,
            ctx,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion and return its final state
    pub async fn run(mut self) -> SessionState {
        let config = self.read_config().await;
        tracing::debug!(peer = %self.peer, include_text = config.include_text, "session config");

        match self.process(config).await {
            Ok(()) => {
                self.transition(SessionState::Closed);
                tracing::info!(peer = %self.peer, "session complete");
            }
            Err(Error::Transport(reason)) => {
                tracing::info!(peer = %self.peer, reason = %reason, "client disconnected before stream finished");
                self.transition(SessionState::Closed);
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, state = ?self.state, "session failed");
                self.transition(SessionState::Error(e.kind()));
                self.ctx.capture.clear();
                self.write_line(&ControlLine::Error {
                    error: e.client_message(),
                })
                .await;
            }
        }

        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(peer = %self.peer, error = %e, "shutdown after session failed");
        }

        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(peer = %self.peer, from = ?self.state, to = ?next, "session transition");
        self.state = next;
    }

    /// Wait once for the device's first bytes and read them as config
    async fn read_config(&mut self) -> SessionConfig {
        let default = SessionConfig {
            include_text: self.ctx.options.default_include_text,
        };

        let mut buf = vec![0u8; CONFIG_READ_LIMIT];
        let read = tokio::time::timeout(self.ctx.options.config_wait, self.stream.read(&mut buf));

        match read.await {
            Ok(Ok(n)) if n > 0 => match parse_config_message(buf[..n].trim_ascii()) {
                Some(include_text) => SessionConfig { include_text },
                None => {
                    tracing::debug!(peer = %self.peer, bytes = n, "ignoring non-config data");
                    default
                }
            },
            Ok(Ok(_)) => default,
            Ok(Err(e)) => {
                tracing::debug!(peer = %self.peer, error = %e, "config read failed");
                default
            }
            Err(_) => default,
        }
    }

    async fn process(&mut self, config: SessionConfig) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);

        let reply = {
            let _turn = ctx.turn.lock().await;
            let reply = self.converse().await?;
            ctx.capture.clear();
            reply
        };

        self.transition(SessionState::StreamingReply);
        let prepared = self.prepare_reply(&reply).await?;

        if config.include_text {
            self.send_text(&reply.message).await?;
        }

        match prepared {
            PreparedReply::Pcm(pcm) => self.stream_pcm(&pcm).await,
            PreparedReply::Remote(stream) => self.stream_remote(stream).await,
        }
    }

    /// Validate, encode, transcribe and get a dialogue reply
    async fn converse(&mut self) -> Result<DialogueReply> {
        self.transition(SessionState::Validating);
        let pcm = self.ctx.capture.drain().await?;
        if pcm.is_empty() {
            return Err(Error::NoAudio);
        }

        let stats = validate(&pcm).map_err(|r| Error::WeakSignal(r.to_string()))?;
        tracing::debug!(
            peer = %self.peer,
            samples = stats.samples,
            peak = stats.peak,
            mean = stats.mean,
            "utterance accepted"
        );

        self.transition(SessionState::Encoding);
        let wav = encode_wav(&pcm, SAMPLE_RATE, 1, 16)?;

        self.transition(SessionState::Transcribing);
        tracing::info!(
            peer = %self.peer,
            backend = self.ctx.transcriber.name(),
            wav_bytes = wav.len(),
            "sending audio for transcription"
        );
        let text = self.ctx.transcriber.transcribe(&wav).await?;
        let transcript = if text.trim().is_empty() {
            tracing::info!(peer = %self.peer, "no speech detected, using fallback transcript");
            EMPTY_TRANSCRIPT_FALLBACK.to_string()
        } else {
            text
        };

        self.transition(SessionState::Dialoguing);
        self.ctx.dialogue.respond(&transcript).await
    }

    /// Resolve reply audio into something streamable
    async fn prepare_reply(&self, reply: &DialogueReply) -> Result<PreparedReply> {
        match ReplyAudio::from_uri(&reply.audio_uri)? {
            ReplyAudio::Inline(compressed) => {
                let transcoder = self.ctx.transcoder.clone();
                let pcm = tokio::task::spawn_blocking(move || transcoder.transcode(&compressed))
                    .await
                    .map_err(|e| Error::ReplyDecode(format!("transcode task failed: {e}")))??;
                Ok(PreparedReply::Pcm(pcm))
            }
            ReplyAudio::Remote(url) => Ok(PreparedReply::Remote(self.ctx.fetcher.open(&url).await?)),
        }
    }

    async fn send_text(&mut self, message: &str) -> Result<()> {
        let line = serialize_line(&ControlLine::Text {
            kind: "text",
            message,
        });
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        // Keep the text line from coalescing with the first audio bytes
        tokio::time::sleep(self.ctx.options.text_delay).await;
        Ok(())
    }

    async fn stream_pcm(&mut self, pcm: &[u8]) -> Result<()> {
        tracing::info!(peer = %self.peer, bytes = pcm.len(), "streaming reply audio");

        for chunk in pcm.chunks(WRITE_CHUNK) {
            self.stream
                .write_all(chunk)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }

        self.stream
            .flush()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn stream_remote(&mut self, mut audio: AudioStream) -> Result<()> {
        tracing::info!(peer = %self.peer, "streaming remote reply audio");
        let mut total = 0usize;
        let mut scratch = [0u8; 256];

        loop {
            // A stalled audio host must not outlive the device connection
            let next = tokio::select! {
                next = audio.next() => next,
                read = self.stream.read(&mut scratch) => match read {
                    Ok(0) => {
                        return Err(Error::Transport("device closed during remote stream".to_string()));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(Error::Transport(e.to_string())),
                },
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    // Headers are already sent; the device just sees a short stream
                    tracing::warn!(peer = %self.peer, error = %e, bytes = total, "remote audio stream failed");
                    return Ok(());
                }
                None => break,
            };

            self.stream
                .write_all(&chunk)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            total += chunk.len();
        }

        tracing::debug!(peer = %self.peer, bytes = total, "remote audio stream ended");
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    async fn write_line(&mut self, line: &ControlLine<'_>) {
        let line = serialize_line(line);
        if let Err(e) = self.stream.write_all(line.as_bytes()).await {
            tracing::debug!(peer = %self.peer, error = %e, "failed to write control line");
        }
    }
}

fn serialize_line(line: &ControlLine<'_>) -> String {
    let mut out = serde_json::to_string(line).unwrap_or_else(|_| String::from("{}"));
    out.push('\n');
    out
}
