//! Utterance validation
//!
//! Cheap noise-floor checks that decide whether a captured buffer is worth
//! sending for transcription. Not a voice activity detector: loud
//! non-speech passes and very quiet speech is rejected.

use std::fmt;

/// Minimum utterance size in bytes
pub const MIN_BYTES: usize = 1024;

/// Minimum peak absolute amplitude
pub const MIN_PEAK: u16 = 1000;

/// Minimum mean absolute amplitude
pub const MIN_MEAN: f64 = 100.0;

/// Amplitude statistics for an utterance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtteranceStats {
    /// Number of whole samples
    pub samples: usize,
    /// Peak absolute amplitude
    pub peak: u16,
    /// Mean absolute amplitude
    pub mean: f64,
}

impl UtteranceStats {
    /// Measure little-endian 16-bit PCM
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn measure(pcm: &[u8]) -> Self {
        let mut peak = 0u16;
        let mut total = 0u64;
        let mut samples = 0usize;

        for pair in pcm.chunks_exact(2) {
            let magnitude = i16::from_le_bytes([pair[0], pair[1]]).unsigned_abs();
            peak = peak.max(magnitude);
            total += u64::from(magnitude);
            samples += 1;
        }

        let mean = if samples == 0 {
            0.0
        } else {
            total as f64 / samples as f64
        };

        Self {
            samples,
            peak,
            mean,
        }
    }
}

/// Why an utterance was rejected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Fewer than `MIN_BYTES` bytes
    TooShort {
        /// Byte count received
        bytes: usize,
    },
    /// Peak amplitude below `MIN_PEAK`
    TooQuiet {
        /// Observed peak
        peak: u16,
    },
    /// Mean amplitude below `MIN_MEAN`
    TooFlat {
        /// Observed mean
        mean: f64,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { bytes } => {
                write!(f, "utterance too short ({bytes} bytes, need {MIN_BYTES})")
            }
            Self::TooQuiet { peak } => {
                write!(f, "peak amplitude {peak} below {MIN_PEAK}")
            }
            Self::TooFlat { mean } => {
                write!(f, "mean amplitude {mean:.1} below {MIN_MEAN}")
            }
        }
    }
}

/// Check whether an utterance carries enough signal to transcribe
///
/// # Errors
///
/// Returns the first failed check
pub fn validate(pcm: &[u8]) -> Result<UtteranceStats, Rejection> {
    if pcm.len() < MIN_BYTES {
        return Err(Rejection::TooShort { bytes: pcm.len() });
    }

    let stats = UtteranceStats::measure(pcm);

    if stats.peak < MIN_PEAK {
        return Err(Rejection::TooQuiet { peak: stats.peak });
    }

    if stats.mean < MIN_MEAN {
        return Err(Rejection::TooFlat { mean: stats.mean });
    }

    Ok(stats)
}
