//! Voice processing module
//!
//! Handles datagram classification, signal conditioning, the shared capture
//! buffer, utterance checks, WAV upload encoding, transcription and reply
//! audio transcoding.

mod capture;
mod conditioner;
mod packet;
mod reply;
mod stt;
mod validate;
mod wav;

pub use capture::{
    CaptureBuffer, CaptureHandle, CaptureStatus, CaptureTask, IDLE_TIMEOUT, SAMPLE_RATE,
    SWEEP_INTERVAL, spawn_capture,
};
pub use conditioner::{Conditioner, GAIN, GATE_THRESHOLD};
pub use packet::{FramedHeader, HEADER_LEN, HeaderError, MAGIC, Packet, classify};
pub use reply::{
    AudioDecoder, AudioFetcher, AudioStream, DecodedAudio, HttpAudioFetcher, MAX_REPLY_BYTES,
    Mp3Decoder, ReplyAudio, ReplyTranscoder, SOURCE_RATE, TARGET_RATE, resample_linear,
    samples_to_bytes,
};
pub use stt::{SpeechToText, SttHints, Transcriber};
pub use validate::{MIN_BYTES, MIN_MEAN, MIN_PEAK, Rejection, UtteranceStats, validate};
pub use wav::{WavAudio, decode_wav, encode_wav};
