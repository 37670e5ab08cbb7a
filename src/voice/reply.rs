//! Reply audio: representation, decoding, resampling and remote streaming
//!
//! Dialogue replies arrive either as an inline `data:` URI with compressed
//! audio or as an http(s) URL. Inline audio is decoded, resampled to the
//! device playback rate and bounded in size; remote audio is passed through
//! untouched.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use futures::stream::BoxStream;
use url::Url;

use crate::{Error, Result};

/// Conventional rate of decoded reply audio
pub const SOURCE_RATE: u32 = 44_100;

/// Device playback rate
pub const TARGET_RATE: u32 = 16_000;

/// Default bound on streamed reply size (15s at 16kHz mono 16-bit)
pub const MAX_REPLY_BYTES: usize = 480_000;

/// Reply audio as returned by the dialogue backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAudio {
    /// Compressed audio carried inline
    Inline(Vec<u8>),
    /// Audio hosted elsewhere
    Remote(Url),
}

impl ReplyAudio {
    /// Parse an audio reference from the dialogue backend
    ///
    /// # Errors
    ///
    /// Returns `ReplyDecode` for a malformed data URI and `ReplyFetch` for a
    /// reference that is neither a data URI nor an http(s) URL
    pub fn from_uri(uri: &str) -> Result<Self> {
        let uri = uri.trim();

        if let Some(rest) = uri.strip_prefix("data:") {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| Error::ReplyDecode("data uri has no payload".to_string()))?;

            if !meta.ends_with(";base64") {
                return Err(Error::ReplyDecode(format!(
                    "unsupported data uri encoding: {meta}"
                )));
            }

            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| Error::ReplyDecode(format!("invalid base64 audio: {e}")))?;

            return Ok(Self::Inline(bytes));
        }

        let url = Url::parse(uri)
            .map_err(|e| Error::ReplyFetch(format!("invalid audio reference {uri:?}: {e}")))?;

        match url.scheme() {
            "http" | "https" => Ok(Self::Remote(url)),
            other => Err(Error::ReplyFetch(format!(
                "unsupported audio url scheme: {other}"
            ))),
        }
    }
}

/// Mono PCM decoded from a compressed reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedAudio {
    /// Samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Decodes compressed reply audio to mono PCM
pub trait AudioDecoder: Send + Sync {
    /// Decode a complete compressed payload
    ///
    /// # Errors
    ///
    /// Returns `ReplyDecode` if the payload cannot be decoded
    fn decode(&self, data: &[u8]) -> Result<DecodedAudio>;
}

/// MP3 decoder backed by minimp3
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp3Decoder;

impl AudioDecoder for Mp3Decoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedAudio> {
        let mut decoder = minimp3::Decoder::new(Cursor::new(data));
        let mut samples = Vec::new();
        let mut sample_rate = None;

        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    if sample_rate.is_none() {
                        sample_rate = u32::try_from(frame.sample_rate).ok().filter(|&r| r > 0);
                    }

                    if frame.channels == 2 {
                        // Stereo: average channels
                        samples.extend(frame.data.chunks(2).map(|pair| {
                            let left = i32::from(pair[0]);
                            let right = i32::from(pair.get(1).copied().unwrap_or(pair[0]));
                            #[allow(clippy::cast_possible_truncation)]
                            let mono = ((left + right) / 2) as i16;
                            mono
                        }));
                    } else {
                        samples.extend_from_slice(&frame.data);
                    }
                }
                Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
                Err(minimp3::Error::SkippedData) => {}
                Err(e) => return Err(Error::ReplyDecode(format!("MP3 decode error: {e}"))),
            }
        }

        if samples.is_empty() && !data.is_empty() {
            return Err(Error::ReplyDecode("no MP3 frames found".to_string()));
        }

        Ok(DecodedAudio {
            samples,
            sample_rate: sample_rate.unwrap_or(SOURCE_RATE),
        })
    }
}

/// Resample by linear interpolation
///
/// The step through the source is `source_rate / target_rate * playback_rate`,
/// so `playback_rate` changes speed and pitch together. At most `max_samples`
/// are produced. Returns nothing for a non-positive step or fewer than two
/// source samples.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample_linear(
    samples: &[i16],
    source_rate: u32,
    target_rate: u32,
    playback_rate: f64,
    max_samples: usize,
) -> Vec<i16> {
    if target_rate == 0 || samples.len() < 2 || max_samples == 0 {
        return Vec::new();
    }

    let ratio = f64::from(source_rate) / f64::from(target_rate) * playback_rate;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Vec::new();
    }

    let last = samples.len() - 1;
    let end = last as f64;
    let mut out = Vec::with_capacity(((end / ratio) as usize).saturating_add(1).min(max_samples));

    let mut i = 0usize;
    while out.len() < max_samples {
        let pos = i as f64 * ratio;
        if pos >= end {
            break;
        }

        let i0 = pos.floor() as usize;
        let i1 = (i0 + 1).min(last);
        let frac = pos - i0 as f64;

        let value = f64::from(samples[i0]).mul_add(1.0 - frac, f64::from(samples[i1]) * frac);
        out.push(value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16);

        i += 1;
    }

    out
}

/// Serialize samples as little-endian PCM
#[must_use]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Turns inline reply audio into bounded raw PCM for the device
#[derive(Clone)]
pub struct ReplyTranscoder {
    decoder: Arc<dyn AudioDecoder>,
    target_rate: u32,
    playback_rate: f64,
    max_bytes: usize,
}

impl std::fmt::Debug for ReplyTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyTranscoder")
            .field("target_rate", &self.target_rate)
            .field("playback_rate", &self.playback_rate)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl Default for ReplyTranscoder {
    fn default() -> Self {
        Self::new(Arc::new(Mp3Decoder), TARGET_RATE, 1.0, MAX_REPLY_BYTES)
    }
}

impl ReplyTranscoder {
    /// Create a transcoder
    ///
    /// `max_bytes` is rounded down to a whole sample.
    #[must_use]
    pub fn new(
        decoder: Arc<dyn AudioDecoder>,
        target_rate: u32,
        playback_rate: f64,
        max_bytes: usize,
    ) -> Self {
        Self {
            decoder,
            target_rate,
            playback_rate,
            max_bytes: max_bytes & !1,
        }
    }

    /// Playback rate multiplier
    #[must_use]
    pub const fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Output bound in bytes
    #[must_use]
    pub const fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Decode, resample and bound compressed reply audio
    ///
    /// # Errors
    ///
    /// Returns `ReplyDecode` if the payload cannot be decoded
    pub fn transcode(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let decoded = self.decoder.decode(compressed)?;
        Ok(self.transcode_decoded(&decoded))
    }

    /// Resample and bound already-decoded audio
    #[must_use]
    pub fn transcode_decoded(&self, decoded: &DecodedAudio) -> Vec<u8> {
        let resampled = resample_linear(
            &decoded.samples,
            decoded.sample_rate,
            self.target_rate,
            self.playback_rate,
            self.max_bytes / 2,
        );

        let bytes = samples_to_bytes(&resampled);

        tracing::debug!(
            source_samples = decoded.samples.len(),
            source_rate = decoded.sample_rate,
            output_bytes = bytes.len(),
            "reply audio transcoded"
        );

        bytes
    }
}

/// A stream of remote audio chunks
pub type AudioStream = BoxStream<'static, Result<Vec<u8>>>;

/// Opens remote reply audio for pass-through
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Start streaming the audio at `url`
    ///
    /// # Errors
    ///
    /// Returns `ReplyFetch` if the request fails or is rejected
    async fn open(&self, url: &Url) -> Result<AudioStream>;
}

/// Fetches remote reply audio over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpAudioFetcher {
    client: reqwest::Client,
}

impl HttpAudioFetcher {
    /// Create a fetcher using the given client
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Create a fetcher whose requests give up on a slow connect or a stalled body
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AudioFetcher for HttpAudioFetcher {
    async fn open(&self, url: &Url) -> Result<AudioStream> {
        tracing::debug!(url = %url, "fetching reply audio");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::ReplyFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ReplyFetch(format!("audio host returned {status}")));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| Error::ReplyFetch(e.to_string()))
            })
            .boxed())
    }
}
