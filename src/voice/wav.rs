//! WAV container encoding for transcription uploads

use std::io::Cursor;

use crate::{Error, Result};

/// Size of the canonical PCM WAV header
pub const HEADER_LEN: usize = 44;

/// Wrap little-endian PCM bytes in a WAV container
///
/// Only 16-bit integer PCM is supported. A trailing odd byte is not a whole
/// sample and is left out. No signal checks happen here.
///
/// # Errors
///
/// Returns error if the format is unsupported or WAV encoding fails
pub fn encode_wav(
    pcm: &[u8],
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> Result<Vec<u8>> {
    if bits_per_sample != 16 {
        return Err(Error::Audio(format!(
            "unsupported bit depth {bits_per_sample}, only 16-bit PCM is encoded"
        )));
    }

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + pcm.len()));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Decoded WAV payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavAudio {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Little-endian 16-bit PCM
    pub pcm: Vec<u8>,
}

/// Read a 16-bit PCM WAV container back into raw bytes
///
/// # Errors
///
/// Returns error if the bytes are not a 16-bit integer WAV
pub fn decode_wav(bytes: &[u8]) -> Result<WavAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;

    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Audio(format!(
            "expected 16-bit integer WAV, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        let sample = sample.map_err(|e| Error::Audio(e.to_string()))?;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }

    Ok(WavAudio {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        pcm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn header_fields_are_canonical() {
        let pcm = vec![0u8; 3200];
        let wav = encode_wav(&pcm, 16000, 1, 16).unwrap();

        assert_eq!(wav.len(), HEADER_LEN + pcm.len());
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32_at(&wav, 4), 36 + 3200);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32_at(&wav, 16), 16);
        assert_eq!(u16_at(&wav, 20), 1);
        assert_eq!(u16_at(&wav, 22), 1);
        assert_eq!(u32_at(&wav, 24), 16000);
        assert_eq!(u32_at(&wav, 28), 32000);
        assert_eq!(u16_at(&wav, 32), 2);
        assert_eq!(u16_at(&wav, 34), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32_at(&wav, 40), 3200);
    }

    #[test]
    fn payload_follows_header_verbatim() {
        let pcm: Vec<u8> = (0..200u8).collect();
        let wav = encode_wav(&pcm, 16000, 1, 16).unwrap();
        assert_eq!(&wav[HEADER_LEN..], pcm.as_slice());
    }

    #[test]
    fn roundtrip_preserves_pcm() {
        let pcm: Vec<u8> = [0i16, 1, -1, 12_345, i16::MIN, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let decoded = decode_wav(&encode_wav(&pcm, 16000, 1, 16).unwrap()).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.pcm, pcm);
    }

    #[test]
    fn empty_payload_is_header_only() {
        let wav = encode_wav(&[], 16000, 1, 16).unwrap();
        assert_eq!(wav.len(), HEADER_LEN);
        assert_eq!(u32_at(&wav, 4), 36);
        assert_eq!(u32_at(&wav, 40), 0);
    }

    #[test]
    fn other_bit_depths_are_rejected() {
        assert!(encode_wav(&[0; 4], 16000, 1, 8).is_err());
    }
}
