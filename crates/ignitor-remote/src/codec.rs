//! Remote frame encoder/decoder.
//!
//! The controller speaks a fixed-length binary protocol: every request and
//! every reply is exactly [`FRAME_LEN`] bytes. This module handles the pure
//! byte-level encoding and decoding of those frames and the interpretation of
//! their 4-byte payload.
//!
//! # Frame format
//!
//! ```text
//! 0xAA <cmd> <p0> <p1> <p2> <p3> <sum>
//! ```
//!
//! - `0xAA`: header sentinel
//! - `cmd`: command byte (top bit set for SET commands on most revisions)
//! - `p0..p3`: payload, little-endian
//! - `sum`: additive checksum of the six preceding bytes, mod 256
//!
//! The additive checksum cannot detect every corruption: two compensating
//! bit flips, or reordered bytes, leave the sum unchanged. Such frames decode
//! successfully with wrong contents.

use bytes::{BufMut, BytesMut};
use ignitor_core::{Direction, Error, Result};

/// Header byte at the start of every frame.
pub const HEADER: u8 = 0xAA;

/// Length of every request and reply frame.
pub const FRAME_LEN: usize = 7;

/// Number of payload bytes in a frame.
pub const PAYLOAD_LEN: usize = 4;

/// Offset of the command byte.
pub const CMD_OFFSET: usize = 1;

/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 2;

/// Offset of the checksum byte.
pub const CHECKSUM_OFFSET: usize = 6;

/// Additive checksum: the sum of all bytes, truncated to 8 bits.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Payload of a timing-table frame.
///
/// Byte 0 holds the slot index, byte 1 the timing value, bytes 2..=3 the
/// RPM breakpoint (little-endian). GET requests only fill in the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordPayload {
    /// Slot index into the timing table.
    pub slot: u8,
    /// Raw timing value.
    pub value: u8,
    /// RPM breakpoint.
    pub rpm: u16,
}

/// A decoded (or to-be-encoded) frame: command byte plus raw payload.
///
/// The header and checksum are implied; [`encode_frame`] adds them and
/// [`decode_frame`] verifies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Command byte as sent on the wire.
    pub command: u8,
    /// Payload bytes, little-endian.
    pub payload: [u8; PAYLOAD_LEN],
}

impl Frame {
    /// Build a frame from up to four payload bytes; missing bytes are zero.
    pub fn new(command: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() > PAYLOAD_LEN {
            return Err(Error::InvalidParameter(format!(
                "payload of {} bytes exceeds {PAYLOAD_LEN}",
                payload.len()
            )));
        }
        let mut bytes = [0u8; PAYLOAD_LEN];
        bytes[..payload.len()].copy_from_slice(payload);
        Ok(Frame {
            command,
            payload: bytes,
        })
    }

    /// Build a frame carrying one 32-bit little-endian value.
    pub fn with_value(command: u8, value: u32) -> Self {
        Frame {
            command,
            payload: value.to_le_bytes(),
        }
    }

    /// Build a timing-table frame.
    pub fn record(command: u8, record: RecordPayload) -> Self {
        let rpm = record.rpm.to_le_bytes();
        Frame {
            command,
            payload: [record.slot, record.value, rpm[0], rpm[1]],
        }
    }

    /// Direction according to the command byte's top bit.
    pub fn direction(&self) -> Direction {
        Direction::of(self.command)
    }

    /// All four payload bytes as one little-endian `u32`.
    pub fn value32(&self) -> u32 {
        u32::from_le_bytes(self.payload)
    }

    /// The first two payload bytes as a little-endian `u16`.
    pub fn value16(&self) -> u16 {
        u16::from_le_bytes([self.payload[0], self.payload[1]])
    }

    /// The first payload byte.
    pub fn value8(&self) -> u8 {
        self.payload[0]
    }

    /// Interpret the payload as a timing-table slot.
    pub fn record_payload(&self) -> RecordPayload {
        RecordPayload {
            slot: self.payload[0],
            value: self.payload[1],
            rpm: u16::from_le_bytes([self.payload[2], self.payload[3]]),
        }
    }
}

/// Encode a frame into its 7 wire bytes.
///
/// # Example
///
/// ```
/// use ignitor_remote::codec::{encode_frame, Frame, HEADER};
///
/// // SET LED on, timing-meter firmware
/// let bytes = encode_frame(&Frame::with_value(0x05, 1));
/// assert_eq!(bytes, vec![HEADER, 0x05, 0x01, 0x00, 0x00, 0x00, 0xB0]);
/// ```
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(FRAME_LEN);
    buf.put_u8(HEADER);
    buf.put_u8(frame.command);
    buf.put_slice(&frame.payload);
    let sum = checksum(&buf);
    buf.put_u8(sum);
    buf.to_vec()
}

/// Decode exactly one frame.
///
/// Fails with [`Error::Protocol`] if `bytes` is not [`FRAME_LEN`] long,
/// [`Error::ChecksumMismatch`] if the trailing byte disagrees with the sum of
/// the others, and [`Error::HeaderMismatch`] if the first byte is not
/// [`HEADER`]. The checksum is verified first.
///
/// # Example
///
/// ```
/// use ignitor_remote::codec::decode_frame;
///
/// let frame = decode_frame(&[0xAA, 0x05, 0x01, 0x00, 0x00, 0x00, 0xB0]).unwrap();
/// assert_eq!(frame.command, 0x05);
/// assert_eq!(frame.value32(), 1);
/// ```
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    if bytes.len() != FRAME_LEN {
        return Err(Error::Protocol(format!(
            "frame length {} (expected {FRAME_LEN})",
            bytes.len()
        )));
    }

    let expected = checksum(&bytes[..CHECKSUM_OFFSET]);
    let actual = bytes[CHECKSUM_OFFSET];
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    if bytes[0] != HEADER {
        return Err(Error::HeaderMismatch(bytes[0]));
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&bytes[PAYLOAD_OFFSET..CHECKSUM_OFFSET]);
    Ok(Frame {
        command: bytes[CMD_OFFSET],
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Encoding
    // ---------------------------------------------------------------

    #[test]
    fn encode_set_led_on() {
        let bytes = encode_frame(&Frame::new(0x05, &[0x01]).unwrap());
        let sum = ((HEADER as u16 + 0x05 + 0x01) % 256) as u8;
        assert_eq!(bytes, vec![HEADER, 0x05, 0x01, 0x00, 0x00, 0x00, sum]);
    }

    #[test]
    fn encode_get_rpm_request() {
        let bytes = encode_frame(&Frame::new(0x01, &[]).unwrap());
        assert_eq!(bytes, vec![0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0xAB]);
    }

    #[test]
    fn encode_checksum_wraps() {
        // 0xAA + 0xA1 + 0x0A + 0x14 + 0x54 + 0x06 = 0x1C3 -> 0xC3
        let frame = Frame::record(
            0xA1,
            RecordPayload {
                slot: 0x0A,
                value: 0x14,
                rpm: 0x0654,
            },
        );
        let bytes = encode_frame(&frame);
        assert_eq!(bytes, vec![0xAA, 0xA1, 0x0A, 0x14, 0x54, 0x06, 0xC3]);
    }

    #[test]
    fn payload_longer_than_four_bytes_is_rejected() {
        let result = Frame::new(0x81, &[1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn value_little_endian() {
        let frame = Frame::with_value(0x81, 0x1234_5678);
        assert_eq!(frame.payload, [0x78, 0x56, 0x34, 0x12]);
        assert_eq!(frame.value32(), 0x1234_5678);
        assert_eq!(frame.value16(), 0x5678);
        assert_eq!(frame.value8(), 0x78);
    }

    #[test]
    fn record_payload_layout() {
        let frame = Frame::new(0x21, &[0x03, 0x0C, 0x4C, 0x06]).unwrap();
        let record = frame.record_payload();
        assert_eq!(record.slot, 3);
        assert_eq!(record.value, 12);
        assert_eq!(record.rpm, 1612);
        assert_eq!(Frame::record(0x21, record), frame);
    }

    // ---------------------------------------------------------------
    // Decoding
    // ---------------------------------------------------------------

    #[test]
    fn decode_set_led_end_to_end() {
        let sum = HEADER.wrapping_add(0x05).wrapping_add(0x01);
        let frame = decode_frame(&[HEADER, 0x05, 0x01, 0x00, 0x00, 0x00, sum]).unwrap();
        assert_eq!(frame.command, 0x05);
        assert_eq!(frame.value32(), 1);
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        let result = decode_frame(&[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0xAC]);
        match result {
            Err(Error::ChecksumMismatch { expected, actual }) => {
                assert_eq!(expected, 0xAB);
                assert_eq!(actual, 0xAC);
            }
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_bad_header_with_valid_sum() {
        let mut bytes = vec![0x55, 0x01, 0x00, 0x00, 0x00, 0x00];
        bytes.push(checksum(&bytes));
        assert!(matches!(
            decode_frame(&bytes),
            Err(Error::HeaderMismatch(0x55))
        ));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(decode_frame(&[]), Err(Error::Protocol(_))));
        assert!(matches!(
            decode_frame(&[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00]),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            decode_frame(&[0xAA, 0x01, 0x00, 0x00, 0x00, 0x00, 0xAB, 0x00]),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn round_trip_representative_frames() {
        let frames = [
            Frame::new(0x01, &[]).unwrap(),
            Frame::with_value(0x81, 360),
            Frame::with_value(0x02, u32::MAX),
            Frame::record(
                0xA1,
                RecordPayload {
                    slot: 10,
                    value: 180,
                    rpm: 5100,
                },
            ),
            Frame::new(0xAF, &[]).unwrap(),
        ];
        for frame in frames {
            let encoded = encode_frame(&frame);
            assert_eq!(encoded.len(), FRAME_LEN);
            assert_eq!(decode_frame(&encoded).unwrap(), frame);
        }
    }

    // ---------------------------------------------------------------
    // Checksum sensitivity
    // ---------------------------------------------------------------

    #[test]
    fn every_single_bit_flip_is_detected() {
        // A single flipped bit changes exactly one byte by +/- 2^k, which
        // always changes an 8-bit additive sum. Flips in the header byte are
        // caught by the checksum first.
        let encoded = encode_frame(&Frame::record(
            0xA1,
            RecordPayload {
                slot: 4,
                value: 21,
                rpm: 2580,
            },
        ));
        for byte in 0..FRAME_LEN {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte] ^= 1 << bit;
                let result = decode_frame(&corrupted);
                assert!(
                    matches!(result, Err(Error::ChecksumMismatch { .. })),
                    "flip of byte {byte} bit {bit} decoded as {result:?}"
                );
            }
        }
    }

    #[test]
    fn compensating_double_flip_goes_undetected() {
        // Known weakness of additive sums: +1 in one byte and -1 in another
        // leave the checksum intact.
        let mut encoded = encode_frame(&Frame::with_value(0x81, 0x0000_0102));
        encoded[2] += 1;
        encoded[3] -= 1;
        let frame = decode_frame(&encoded).unwrap();
        assert_eq!(frame.value32(), 0x0000_0003);
    }

    #[test]
    fn swapped_payload_bytes_go_undetected() {
        let mut encoded = encode_frame(&Frame::with_value(0x81, 0x0000_0201));
        encoded.swap(2, 3);
        assert_eq!(decode_frame(&encoded).unwrap().value32(), 0x0000_0102);
    }
}
