//! Speech-to-text (STT) processing

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::error::TranscriptionFailure;
use crate::{Error, Result};

/// Turns a WAV upload into transcript text
///
/// The session only depends on this contract, so the backend can be a
/// self-hosted engine or a cloud API.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Transcribe a WAV container
    ///
    /// # Errors
    ///
    /// Returns the failure category if no transcript was obtained
    async fn transcribe(&self, wav: &[u8]) -> std::result::Result<String, TranscriptionFailure>;
}

/// Response from a Whisper-style transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// STT provider backend
#[derive(Debug)]
enum SttProvider {
    /// Self-hosted whisper-asr-webservice
    WhisperAsr { base_url: Url },
    /// `OpenAI` audio transcription API
    OpenAi { api_key: SecretString, model: String },
}

/// Recognition hints passed to the backend
#[derive(Debug, Clone, Default)]
pub struct SttHints {
    /// Language hint (ISO 639-1, e.g. "en")
    pub language: Option<String>,
    /// Prompt biasing vocabulary (names, jargon)
    pub initial_prompt: Option<String>,
}

/// Transcribes speech to text over HTTP
#[derive(Debug)]
pub struct SpeechToText {
    client: reqwest::Client,
    provider: SttProvider,
    hints: SttHints,
}

const OPENAI_TRANSCRIPTIONS_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

impl SpeechToText {
    /// Create a new STT instance using a self-hosted whisper-asr endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the client cannot be built
    pub fn new_whisper_asr(base_url: &str, hints: SttHints, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid STT url {base_url:?}: {e}")))?;

        // `join` replaces the last segment unless the path is a directory
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: build_client(timeout)?,
            provider: SttProvider::WhisperAsr { base_url },
            hints,
        })
    }

    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(
        api_key: SecretString,
        model: String,
        hints: SttHints,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: build_client(timeout)?,
            provider: SttProvider::OpenAi { api_key, model },
            hints,
        })
    }

    /// Build the whisper-asr request URL with query options
    fn whisper_asr_url(&self, base_url: &Url) -> std::result::Result<Url, TranscriptionFailure> {
        let mut url = base_url
            .join("asr")
            .map_err(|e| TranscriptionFailure::Network(format!("invalid STT url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("encode", "false")
                .append_pair("vad_filter", "true")
                .append_pair("task", "transcribe")
                .append_pair("output", "json");
            if let Some(language) = &self.hints.language {
                query.append_pair("language", language);
            }
            if let Some(prompt) = &self.hints.initial_prompt {
                query.append_pair("initial_prompt", prompt);
            }
        }

        Ok(url)
    }

    /// Transcribe using a whisper-asr webservice
    async fn transcribe_whisper_asr(
        &self,
        base_url: &Url,
        wav: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        tracing::debug!(audio_bytes = wav.len(), "starting whisper-asr transcription");

        let form = reqwest::multipart::Form::new().part("audio_file", wav_part(wav)?);

        let request = self
            .client
            .post(self.whisper_asr_url(base_url)?)
            .header("Accept", "application/json")
            .multipart(form);

        send_and_parse(request, "whisper-asr").await
    }

    /// Transcribe using `OpenAI` Whisper
    async fn transcribe_openai(
        &self,
        api_key: &SecretString,
        model: &str,
        wav: &[u8],
    ) -> std::result::Result<String, TranscriptionFailure> {
        tracing::debug!(audio_bytes = wav.len(), "starting OpenAI transcription");

        let mut form = reqwest::multipart::Form::new()
            .part("file", wav_part(wav)?)
            .text("model", model.to_string());
        if let Some(language) = &self.hints.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &self.hints.initial_prompt {
            form = form.text("prompt", prompt.clone());
        }

        let request = self
            .client
            .post(OPENAI_TRANSCRIPTIONS_URL)
            .header(
                "Authorization",
                format!("Bearer {}", api_key.expose_secret()),
            )
            .multipart(form);

        send_and_parse(request, "openai").await
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    fn name(&self) -> &'static str {
        match self.provider {
            SttProvider::WhisperAsr { .. } => "whisper-asr",
            SttProvider::OpenAi { .. } => "openai",
        }
    }

    async fn transcribe(&self, wav: &[u8]) -> std::result::Result<String, TranscriptionFailure> {
        match &self.provider {
            SttProvider::WhisperAsr { base_url } => self.transcribe_whisper_asr(base_url, wav).await,
            SttProvider::OpenAi { api_key, model } => {
                self.transcribe_openai(api_key, model, wav).await
            }
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))
}

fn wav_part(wav: &[u8]) -> std::result::Result<reqwest::multipart::Part, TranscriptionFailure> {
    reqwest::multipart::Part::bytes(wav.to_vec())
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| TranscriptionFailure::Network(e.to_string()))
}

/// Send a transcription request and pull `text` out of the JSON body
async fn send_and_parse(
    request: reqwest::RequestBuilder,
    backend: &'static str,
) -> std::result::Result<String, TranscriptionFailure> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(backend, error = %e, "transcription request failed");
        TranscriptionFailure::Network(e.to_string())
    })?;

    let status = response.status();
    tracing::debug!(backend, status = %status, "received response");

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(backend, status = %status, body = %body, "transcription API error");
        return Err(TranscriptionFailure::Server(format!("{backend} returned {status}: {body}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| TranscriptionFailure::Network(e.to_string()))?;

    parse_transcript(&body)
}

/// Extract the transcript from a Whisper-style JSON body
fn parse_transcript(body: &str) -> std::result::Result<String, TranscriptionFailure> {
    let result: WhisperResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "failed to parse transcription response");
        TranscriptionFailure::Malformed(e.to_string())
    })?;

    tracing::info!(transcript = %result.text, "transcription complete");
    Ok(result.text)
}
