//! Shared test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use url::Url;

use voice_bridge::voice::{
    AudioDecoder, AudioFetcher, AudioStream, CaptureHandle, DecodedAudio, ReplyTranscoder,
    SAMPLE_RATE, Transcriber, samples_to_bytes,
};
use voice_bridge::{
    Dialogue, DialogueReply, Error, Result, SessionContext, SessionOptions, TranscriptionFailure,
};

/// Generate a 440 Hz tone as little-endian PCM
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn tone_pcm(samples: usize, amplitude: f32) -> Vec<u8> {
    let pcm: Vec<i16> = (0..samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            (amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()) as i16
        })
        .collect();
    samples_to_bytes(&pcm)
}

/// Generate silence as little-endian PCM
pub fn silence_pcm(samples: usize) -> Vec<u8> {
    vec![0; samples * 2]
}

/// Wrap bytes in a base64 data URI
pub fn data_uri(bytes: &[u8]) -> String {
    format!(
        "data:audio/mp3;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Samples per channel in one MPEG-1 Layer III frame
pub const MP3_FRAME_SAMPLES: usize = 1152;

/// Build a silent 128 kbps MPEG-1 Layer III stream
///
/// Side info and main data are zeroed, so each frame decodes to
/// `MP3_FRAME_SAMPLES` zero samples per channel.
pub fn silent_mp3(frames: usize, sample_rate: u32, stereo: bool) -> Vec<u8> {
    let (rate_bits, frame_len) = match sample_rate {
        44_100 => (0b00, 417),
        48_000 => (0b01, 384),
        32_000 => (0b10, 576),
        other => panic!("not an MPEG-1 sample rate: {other}"),
    };

    let mut frame = vec![0u8; frame_len];
    frame[..4].copy_from_slice(&[
        0xff,
        0xfb,
        0x90 | (rate_bits << 2),
        if stereo { 0x04 } else { 0xc4 },
    ]);
    frame.repeat(frames)
}

/// Transcriber returning a fixed result
pub struct ScriptedTranscriber {
    transcript: Option<String>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub last_wav: Mutex<Vec<u8>>,
}

impl ScriptedTranscriber {
    pub fn text(transcript: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Some(transcript.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_wav: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(transcript: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            transcript: Some(transcript.to_string()),
            delay,
            calls: AtomicUsize::new(0),
            last_wav: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            transcript: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            last_wav: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(&self, wav: &[u8]) -> std::result::Result<String, TranscriptionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_wav.lock().unwrap() = wav.to_vec();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.transcript
            .clone()
            .ok_or_else(|| TranscriptionFailure::Server("scripted failure".to_string()))
    }
}

/// Dialogue returning a fixed reply and recording transcripts
pub struct ScriptedDialogue {
    reply: Option<DialogueReply>,
    pub transcripts: Mutex<Vec<String>>,
}

impl ScriptedDialogue {
    pub fn reply(message: &str, audio_uri: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(DialogueReply {
                message: message.to_string(),
                audio_uri: audio_uri.to_string(),
            }),
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            transcripts: Mutex::new(Vec::new()),
        })
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.transcripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dialogue for ScriptedDialogue {
    async fn respond(&self, transcript: &str) -> Result<DialogueReply> {
        self.transcripts.lock().unwrap().push(transcript.to_string());
        self.reply
            .clone()
            .ok_or_else(|| Error::Dialogue("no payload in dialogue response".to_string()))
    }
}

/// Fetcher serving canned chunks, optionally failing part way
pub struct ScriptedFetcher {
    chunks: Vec<Vec<u8>>,
    fail_after: Option<usize>,
    stall: bool,
    pub opened: Mutex<Vec<Url>>,
}

impl ScriptedFetcher {
    pub fn chunks(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            fail_after: None,
            stall: false,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn failing_after(chunks: Vec<Vec<u8>>, fail_after: usize) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            fail_after: Some(fail_after),
            stall: false,
            opened: Mutex::new(Vec::new()),
        })
    }

    /// Serve `chunks`, then never yield again
    pub fn stalling_after(chunks: Vec<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            fail_after: None,
            stall: true,
            opened: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AudioFetcher for ScriptedFetcher {
    async fn open(&self, url: &Url) -> Result<AudioStream> {
        self.opened.lock().unwrap().push(url.clone());

        let mut items: Vec<Result<Vec<u8>>> = self.chunks.iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(Error::ReplyFetch("connection reset".to_string())));
        }
        let served = futures::stream::iter(items);
        if self.stall {
            Ok(Box::pin(served.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(served))
        }
    }
}

/// Decoder that reads the payload as raw little-endian PCM at a fixed rate
pub struct RawPcmDecoder {
    pub sample_rate: u32,
}

impl AudioDecoder for RawPcmDecoder {
    fn decode(&self, data: &[u8]) -> Result<DecodedAudio> {
        Ok(DecodedAudio {
            samples: data
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
            sample_rate: self.sample_rate,
        })
    }
}

/// Session options with short waits
pub fn quick_options(default_include_text: bool) -> SessionOptions {
    SessionOptions {
        default_include_text,
        config_wait: Duration::from_millis(50),
        text_delay: Duration::from_millis(5),
    }
}

/// Build a session context around scripted collaborators
pub fn context(
    capture: CaptureHandle,
    transcriber: Arc<dyn Transcriber>,
    dialogue: Arc<dyn Dialogue>,
    fetcher: Arc<dyn AudioFetcher>,
    max_bytes: usize,
    options: SessionOptions,
) -> Arc<SessionContext> {
    let transcoder = ReplyTranscoder::new(
        Arc::new(RawPcmDecoder {
            sample_rate: SAMPLE_RATE,
        }),
        SAMPLE_RATE,
        1.0,
        max_bytes,
    );

    Arc::new(SessionContext::new(
        capture,
        transcriber,
        dialogue,
        fetcher,
        transcoder,
        options,
    ))
}
