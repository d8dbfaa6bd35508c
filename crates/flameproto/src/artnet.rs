//! ArtNet-like DMX frames
//!
//! Controllers on the sculpture speak a stripped-down ArtDmx: a fixed 18 byte
//! header followed by two bytes per nozzle. There is no acknowledgment and no
//! retry; every frame carries the complete state for its controller, so a
//! lost frame is simply superseded by the next one.

use bytes::{BufMut, BytesMut};

/// Packet signature, NUL terminated
pub const SIGNATURE: &[u8; 8] = b"Art-Net\0";

/// ArtDmx opcode (sent low byte first, as `00 50`)
pub const OPCODE_DMX: u16 = 0x5000;

/// Protocol revision (sent high byte first, as `00 14`)
pub const PROTOCOL_VERSION: u16 = 0x14;

/// Fixed header length in bytes
pub const HEADER_SIZE: usize = 18;

/// Default UDP port for controllers
pub const ARTNET_PORT: u16 = 6454;

/// Universe used when a controller does not configure one
pub const DEFAULT_UNIVERSE: u16 = 0;

/// Bytes per nozzle in the payload: solenoid then aperture
pub const SLOT_SIZE: usize = 2;

/// Largest payload one DMX universe carries
pub const MAX_PAYLOAD: usize = 512;

/// Most nozzles one controller can drive
pub const MAX_SLOTS: usize = MAX_PAYLOAD / SLOT_SIZE;

/// Errors while decoding a frame
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid signature: expected Art-Net")]
    InvalidSignature,

    #[error("Unsupported opcode: {0:#06x}")]
    UnsupportedOpcode(u16),

    #[error("Unsupported protocol version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("Length field says {declared} payload bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Write one complete frame into `buf`.
///
/// `buf` is cleared first so a transmitter can reuse the allocation every
/// cycle. The sequence byte is written as given; wrapping is the caller's job.
/// Payloads longer than [`MAX_PAYLOAD`] are cut to fit the length field.
pub fn encode_dmx(buf: &mut BytesMut, sequence: u8, universe: u16, payload: &[u8]) {
    debug_assert!(payload.len() <= MAX_PAYLOAD, "payload of {} bytes", payload.len());
    let payload = &payload[..payload.len().min(MAX_PAYLOAD)];

    buf.clear();
    buf.reserve(HEADER_SIZE + payload.len());

    buf.put_slice(SIGNATURE);
    buf.put_u16_le(OPCODE_DMX);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u8(sequence);
    buf.put_u8(0); // physical port
    buf.put_u16_le(universe);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
}

/// One `(solenoid, aperture)` pair from a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NozzleSlot {
    pub solenoid: u8,
    pub aperture: u8,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmxFrame {
    pub sequence: u8,
    pub physical: u8,
    pub universe: u16,
    pub payload: Vec<u8>,
}

impl DmxFrame {
    /// Decode a datagram, validating signature, opcode and length field
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        if &bytes[0..8] != SIGNATURE {
            return Err(FrameError::InvalidSignature);
        }

        let opcode = u16::from_le_bytes([bytes[8], bytes[9]]);
        if opcode != OPCODE_DMX {
            return Err(FrameError::UnsupportedOpcode(opcode));
        }

        let version = u16::from_be_bytes([bytes[10], bytes[11]]);
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        let declared = u16::from_be_bytes([bytes[16], bytes[17]]) as usize;
        let payload = &bytes[HEADER_SIZE..];
        if declared != payload.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        Ok(Self {
            sequence: bytes[12],
            physical: bytes[13],
            universe: u16::from_le_bytes([bytes[14], bytes[15]]),
            payload: payload.to_vec(),
        })
    }

    /// Number of nozzle slots carried
    pub fn slot_count(&self) -> usize {
        self.payload.len() / SLOT_SIZE
    }

    /// Slot at controller-local position `index`
    pub fn slot(&self, index: usize) -> Option<NozzleSlot> {
        let at = index * SLOT_SIZE;
        let pair = self.payload.get(at..at + SLOT_SIZE)?;
        Some(NozzleSlot {
            solenoid: pair[0],
            aperture: pair[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 7, 0x0102, &[1, 200, 0, 0]);

        assert_eq!(&buf[0..12], b"Art-Net\x00\x00\x50\x00\x14");
        assert_eq!(buf[12], 7);
        assert_eq!(buf[13], 0);
        // universe little endian
        assert_eq!(buf[14], 0x02);
        assert_eq!(buf[15], 0x01);
        // length big endian
        assert_eq!(buf[16], 0);
        assert_eq!(buf[17], 4);
        assert_eq!(buf.len(), HEADER_SIZE + 4);
    }

    #[test]
    fn test_parse_rejects_other_versions() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 0, 0, &[0, 0]);
        assert_eq!(&buf[10..12], &[0x00, 0x14]);

        buf[11] = 14;
        assert_eq!(
            DmxFrame::parse(&buf),
            Err(FrameError::UnsupportedVersion(0x000e))
        );
    }

    #[test]
    fn test_large_payload_length_is_big_endian() {
        let mut buf = BytesMut::new();
        let payload = vec![0u8; 300];
        encode_dmx(&mut buf, 0, 0, &payload);
        assert_eq!(buf[16], 0x01);
        assert_eq!(buf[17], 0x2c);
    }

    #[test]
    fn test_encode_reuses_buffer() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 1, 0, &[9; 60]);
        encode_dmx(&mut buf, 2, 0, &[1, 2]);
        assert_eq!(buf.len(), HEADER_SIZE + 2);
        assert_eq!(buf[12], 2);
    }

    #[test]
    fn test_parse_reads_slots() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 42, 3, &[1, 100, 0, 37]);

        let frame = DmxFrame::parse(&buf).unwrap();
        assert_eq!(frame.sequence, 42);
        assert_eq!(frame.physical, 0);
        assert_eq!(frame.universe, 3);
        assert_eq!(frame.slot_count(), 2);
        assert_eq!(
            frame.slot(0),
            Some(NozzleSlot {
                solenoid: 1,
                aperture: 100
            })
        );
        assert_eq!(frame.slot(1).map(|s| s.aperture), Some(37));
        assert_eq!(frame.slot(2), None);
    }

    #[test]
    fn test_parse_rejects_short_frame() {
        let err = DmxFrame::parse(b"Art-Net\0").unwrap_err();
        assert_eq!(
            err,
            FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: 8
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 0, 0, &[]);
        buf[0] = b'X';
        assert_eq!(DmxFrame::parse(&buf), Err(FrameError::InvalidSignature));
    }

    #[test]
    fn test_parse_rejects_other_opcodes() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 0, 0, &[]);
        // ArtPoll
        buf[8] = 0x00;
        buf[9] = 0x20;
        assert_eq!(
            DmxFrame::parse(&buf),
            Err(FrameError::UnsupportedOpcode(0x2000))
        );
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let mut buf = BytesMut::new();
        encode_dmx(&mut buf, 0, 0, &[1, 2, 3, 4]);
        buf.truncate(HEADER_SIZE + 2);
        assert_eq!(
            DmxFrame::parse(&buf),
            Err(FrameError::LengthMismatch {
                declared: 4,
                actual: 2
            })
        );
    }
}
