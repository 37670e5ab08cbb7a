//! Noise gate and fixed gain for captured PCM

/// Samples quieter than this are zeroed
pub const GATE_THRESHOLD: i16 = 500;

/// Gain applied to samples that pass the gate
pub const GAIN: f32 = 5.0;

/// Stateless per-sample noise gate followed by fixed gain
///
/// Operates on little-endian 16-bit samples. Because no state carries
/// between calls, conditioning a buffer in pieces gives the same bytes as
/// conditioning it whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioner {
    threshold: i32,
    gain: f64,
}

impl Default for Conditioner {
    fn default() -> Self {
        Self::new(GATE_THRESHOLD, GAIN)
    }
}

impl Conditioner {
    /// Create a conditioner with the given gate threshold and gain
    #[must_use]
    pub fn new(threshold: i16, gain: f32) -> Self {
        Self {
            threshold: i32::from(threshold).abs(),
            gain: f64::from(gain),
        }
    }

    /// Condition a single sample
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply_sample(&self, sample: i16) -> i16 {
        if i32::from(sample).abs() < self.threshold {
            return 0;
        }

        (f64::from(sample) * self.gain)
            .round()
            .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
    }

    /// Condition PCM bytes in place
    ///
    /// A trailing odd byte is left untouched.
    pub fn apply(&self, pcm: &mut [u8]) {
        for pair in pcm.chunks_exact_mut(2) {
            let sample = self.apply_sample(i16::from_le_bytes([pair[0], pair[1]]));
            pair.copy_from_slice(&sample.to_le_bytes());
        }
    }

    /// Condition PCM bytes into a new buffer of the same length
    #[must_use]
    pub fn condition(&self, pcm: &[u8]) -> Vec<u8> {
        let mut out = pcm.to_vec();
        self.apply(&mut out);
        out
    }
}
