//! Inbound datagram classification
//!
//! Capture devices either prefix each datagram with a 28-byte VBAN-style
//! header or send bare little-endian PCM. Classification never rejects a
//! datagram: anything without the magic tag is treated as raw samples.

use std::fmt;

/// Size of the framed-audio header in bytes
pub const HEADER_LEN: usize = 28;

/// Magic tag at offset 0 of a framed datagram
pub const MAGIC: [u8; 4] = *b"VBAN";

/// Maximum stream name length (null padded on the wire)
const STREAM_NAME_LEN: usize = 8;

/// Why a datagram could not be read as a framed packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than `HEADER_LEN` bytes
    TooShort,
    /// First four bytes are not the magic tag
    BadMagic,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "datagram shorter than {HEADER_LEN} bytes"),
            Self::BadMagic => write!(f, "magic tag mismatch"),
        }
    }
}

impl std::error::Error for HeaderError {}

/// Parsed framed-audio header
///
/// Declared format fields are informational; the payload is always treated
/// as 16 kHz mono 16-bit PCM downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedHeader {
    /// Declared sample rate in Hz
    pub sample_rate: u32,
    /// Samples per frame (raw byte)
    pub samples_per_frame: u8,
    /// Channel byte as sent (VBAN senders write channels minus one)
    pub channels: u8,
    /// Data format code
    pub data_format: u8,
    /// Protocol / format byte
    pub protocol: u8,
    /// Stream name with null padding stripped
    pub stream_name: String,
    /// Frame counter
    pub frame_counter: u32,
}

impl FramedHeader {
    /// Parse the header at the start of `datagram`
    ///
    /// # Errors
    ///
    /// Returns the reason the bytes are not a framed header
    pub fn parse(datagram: &[u8]) -> Result<Self, HeaderError> {
        let Some(header) = datagram.get(..HEADER_LEN) else {
            return Err(HeaderError::TooShort);
        };

        if header[..4] != MAGIC {
            return Err(HeaderError::BadMagic);
        }

        let name = &header[16..16 + STREAM_NAME_LEN];
        let name_end = name.iter().position(|&b| b == 0).unwrap_or(STREAM_NAME_LEN);

        Ok(Self {
            sample_rate: u32::from_le_bytes([header[4], header[5], header[6], header[7]]),
            samples_per_frame: header[8],
            channels: header[9],
            data_format: header[10],
            protocol: header[11],
            stream_name: String::from_utf8_lossy(&name[..name_end]).into_owned(),
            frame_counter: u32::from_le_bytes([header[24], header[25], header[26], header[27]]),
        })
    }

    /// Serialize the header to its wire form
    ///
    /// Stream names longer than eight bytes are truncated.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[8] = self.samples_per_frame;
        out[9] = self.channels;
        out[10] = self.data_format;
        out[11] = self.protocol;

        let name = self.stream_name.as_bytes();
        let len = name.len().min(STREAM_NAME_LEN);
        out[16..16 + len].copy_from_slice(&name[..len]);

        out[24..28].copy_from_slice(&self.frame_counter.to_le_bytes());
        out
    }
}

/// A classified datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Header, when the datagram was framed
    pub header: Option<FramedHeader>,
    /// PCM payload
    pub payload: &'a [u8],
}

impl Packet<'_> {
    /// Whether this datagram carried a framed header
    #[must_use]
    pub const fn is_framed(&self) -> bool {
        self.header.is_some()
    }
}

/// Classify one datagram into header metadata and PCM payload
///
/// Framed datagrams yield everything after the header whatever their declared
/// format; anything else yields the whole datagram as raw PCM.
#[must_use]
pub fn classify(datagram: &[u8]) -> Packet<'_> {
    match FramedHeader::parse(datagram) {
        Ok(header) => Packet {
            header: Some(header),
            payload: &datagram[HEADER_LEN..],
        },
        Err(_) => Packet {
            header: None,
            payload: datagram,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_header() -> FramedHeader {
        FramedHeader {
            sample_rate: 44_100,
            samples_per_frame: 64,
            channels: 1,
            data_format: 1,
            protocol: 0,
            stream_name: "test1".to_string(),
            frame_counter: 7,
        }
    }

    #[test]
    fn framed_datagram_strips_header() {
        let mut datagram = test_header().encode().to_vec();
        datagram.extend_from_slice(&[1, 2, 3, 4]);

        let packet = classify(&datagram);
        assert!(packet.is_framed());
        assert_eq!(packet.payload, &[1, 2, 3, 4]);

        let header = packet.header.unwrap();
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.samples_per_frame, 64);
        assert_eq!(header.stream_name, "test1");
        assert_eq!(header.frame_counter, 7);
    }

    #[test]
    fn wire_layout_matches_offsets() {
        let bytes = test_header().encode();
        assert_eq!(&bytes[0..4], b"VBAN");
        assert_eq!(&bytes[4..8], &44_100u32.to_le_bytes());
        assert_eq!(bytes[8], 64);
        assert_eq!(bytes[9], 1);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
        assert_eq!(&bytes[16..24], b"test1\0\0\0");
        assert_eq!(&bytes[24..28], &7u32.to_le_bytes());
    }

    #[test]
    fn short_datagram_is_raw() {
        let datagram = b"VBAN\x00\x01";
        let packet = classify(datagram);
        assert!(!packet.is_framed());
        assert_eq!(packet.payload, datagram);
    }

    #[test]
    fn wrong_magic_is_raw() {
        let datagram = vec![7u8; 64];
        let packet = classify(&datagram);
        assert!(!packet.is_framed());
        assert_eq!(packet.payload.len(), 64);
    }

    #[test]
    fn declared_format_is_not_enforced() {
        // Mono VBAN senders put 0 in the channel byte
        let mut header = test_header();
        header.channels = 0;
        header.sample_rate = 0;
        header.data_format = 0xff;
        let mut datagram = header.encode().to_vec();
        datagram.extend_from_slice(&[9, 9]);

        let packet = classify(&datagram);
        assert!(packet.is_framed());
        assert_eq!(packet.header.unwrap().channels, 0);
        assert_eq!(packet.payload, &[9, 9]);
    }

    #[test]
    fn header_only_datagram_has_empty_payload() {
        let datagram = test_header().encode();
        let packet = classify(&datagram);
        assert!(packet.is_framed());
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn long_stream_name_is_truncated() {
        let mut header = test_header();
        header.stream_name = "kitchen-mic".to_string();
        let parsed = FramedHeader::parse(&header.encode()).unwrap();
        assert_eq!(parsed.stream_name, "kitchen-");
    }
}
