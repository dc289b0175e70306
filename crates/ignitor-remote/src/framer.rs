//! Reply framer: reassembles fixed-length frames from a byte stream.
//!
//! The serial port hands over bytes at arbitrary granularity: half a frame
//! on one read, a frame and a half on the next. [`ReplyFramer`] buffers them
//! and yields whole, header-aligned frames. It is pull-based; callers feed
//! whatever arrived and then call [`ReplyFramer::try_extract_frame`] until it
//! returns `None`.
//!
//! If the stream starts mid-frame (controller reset, port opened while the
//! controller was talking), leading bytes that are not the header sentinel
//! are discarded one at a time until alignment is recovered.

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::codec::{FRAME_LEN, HEADER};

/// Maximum buffered bytes before the buffer is reset.
const MAX_BUFFERED: usize = 4096;

/// Byte-stream to frame reassembler.
#[derive(Debug, Default)]
pub struct ReplyFramer {
    buf: BytesMut,
    discarded: u64,
}

impl ReplyFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes.
    ///
    /// The buffer never holds more than `MAX_BUFFERED` bytes. On overflow the
    /// old contents are dropped, and of an oversized chunk only the newest
    /// `MAX_BUFFERED` bytes are kept.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.buf.len() + bytes.len() > MAX_BUFFERED {
            warn!(
                len = self.buf.len() + bytes.len(),
                "reply buffer overflow, resetting"
            );
            self.discarded += self.buf.len() as u64;
            self.buf.clear();
        }
        let keep_from = bytes.len().saturating_sub(MAX_BUFFERED);
        self.discarded += keep_from as u64;
        self.buf.extend_from_slice(&bytes[keep_from..]);
    }

    /// Extract the next complete frame, if one is buffered.
    ///
    /// Drops leading non-header bytes first. Returns `None` while fewer than
    /// [`FRAME_LEN`] bytes starting at a header byte are available; the
    /// partial frame stays buffered for the next call.
    pub fn try_extract_frame(&mut self) -> Option<[u8; FRAME_LEN]> {
        let skip = self
            .buf
            .iter()
            .position(|&b| b == HEADER)
            .unwrap_or(self.buf.len());
        if skip > 0 {
            debug!(bytes = skip, "discarding bytes before header");
            self.buf.advance(skip);
            self.discarded += skip as u64;
        }

        if self.buf.len() < FRAME_LEN {
            return None;
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.buf[..FRAME_LEN]);
        self.buf.advance(FRAME_LEN);
        Some(frame)
    }

    /// Give back a candidate frame that failed to decode.
    ///
    /// Its header byte was probably a data byte that happened to equal the
    /// sentinel, so only that byte is dropped; the remaining six go back in
    /// front of the buffer and are rescanned for the real header.
    pub fn reject(&mut self, raw: &[u8; FRAME_LEN]) {
        let mut rebuilt = BytesMut::with_capacity(FRAME_LEN - 1 + self.buf.len());
        rebuilt.extend_from_slice(&raw[1..]);
        rebuilt.extend_from_slice(&self.buf);
        self.buf = rebuilt;
        self.discarded += 1;
    }

    /// Drop everything buffered (transport swap).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the count of bytes discarded since the last call.
    pub fn take_discarded(&mut self) -> u64 {
        std::mem::take(&mut self.discarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, encode_frame, Frame};

    fn rpm_reply(rpm: u32) -> Vec<u8> {
        encode_frame(&Frame::with_value(0x01, rpm))
    }

    #[test]
    fn extracts_single_frame() {
        let mut framer = ReplyFramer::new();
        let frame = rpm_reply(1800);
        framer.feed(&frame);
        assert_eq!(framer.try_extract_frame().unwrap().to_vec(), frame);
        assert!(framer.try_extract_frame().is_none());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn partial_frame_accumulates_across_feeds() {
        let mut framer = ReplyFramer::new();
        let frame = rpm_reply(2400);
        framer.feed(&frame[..3]);
        assert!(framer.try_extract_frame().is_none());
        framer.feed(&frame[3..6]);
        assert!(framer.try_extract_frame().is_none());
        framer.feed(&frame[6..]);
        assert_eq!(framer.try_extract_frame().unwrap().to_vec(), frame);
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let mut framer = ReplyFramer::new();
        let frame = rpm_reply(3000);
        let mut extracted = Vec::new();
        for &b in &frame {
            framer.feed(&[b]);
            if let Some(f) = framer.try_extract_frame() {
                extracted.push(f);
            }
        }
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].to_vec(), frame);
    }

    #[test]
    fn garbage_prefix_is_discarded() {
        let mut framer = ReplyFramer::new();
        let frame = rpm_reply(1620);
        framer.feed(&[0x00, 0x13, 0xFF, 0x42]);
        framer.feed(&frame);

        let extracted = framer.try_extract_frame().unwrap();
        assert_eq!(extracted.to_vec(), frame);
        assert!(framer.try_extract_frame().is_none());
        assert_eq!(framer.take_discarded(), 4);
        assert_eq!(framer.take_discarded(), 0);
    }

    #[test]
    fn garbage_only_buffer_is_emptied() {
        let mut framer = ReplyFramer::new();
        framer.feed(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert!(framer.try_extract_frame().is_none());
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.take_discarded(), 8);
    }

    #[test]
    fn back_to_back_frames() {
        let mut framer = ReplyFramer::new();
        let first = rpm_reply(1000);
        let second = rpm_reply(2000);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        framer.feed(&stream);
        assert_eq!(framer.try_extract_frame().unwrap().to_vec(), first);
        assert_eq!(framer.try_extract_frame().unwrap().to_vec(), second);
        assert!(framer.try_extract_frame().is_none());
    }

    #[test]
    fn false_header_in_garbage_recovers_after_reject() {
        // A stray 0xAA in the garbage produces a bogus candidate; rejecting
        // it drops one byte and the real frame is found afterwards.
        let mut framer = ReplyFramer::new();
        let frame = rpm_reply(4200);
        framer.feed(&[0x10, HEADER, 0x20, 0x30]);
        framer.feed(&frame);

        let candidate = framer.try_extract_frame().unwrap();
        assert!(decode_frame(&candidate).is_err());
        framer.reject(&candidate);

        let real = framer.try_extract_frame().unwrap();
        assert_eq!(real.to_vec(), frame);
        assert_eq!(decode_frame(&real).unwrap().value32(), 4200);
        assert!(framer.try_extract_frame().is_none());
    }

    #[test]
    fn clear_drops_partial_frame() {
        let mut framer = ReplyFramer::new();
        framer.feed(&rpm_reply(1)[..4]);
        framer.clear();
        assert_eq!(framer.buffered(), 0);
        assert!(framer.try_extract_frame().is_none());
    }

    #[test]
    fn overflow_resets_buffer() {
        let mut framer = ReplyFramer::new();
        framer.feed(&[HEADER; 6]);
        framer.feed(&vec![0u8; MAX_BUFFERED]);
        assert_eq!(framer.buffered(), MAX_BUFFERED);
        assert_eq!(framer.take_discarded(), 6);
    }

    #[test]
    fn oversized_feed_keeps_newest_bytes() {
        let mut framer = ReplyFramer::new();
        framer.feed(&[0x00; 10]);
        let mut chunk = vec![0x11u8; MAX_BUFFERED + 100];
        chunk.extend(rpm_reply(2400));
        framer.feed(&chunk);

        assert_eq!(framer.buffered(), MAX_BUFFERED);
        assert_eq!(framer.take_discarded(), 10 + 100 + FRAME_LEN as u64);

        // The reply at the tail of the chunk survives the truncation.
        let raw = framer.try_extract_frame().unwrap();
        assert_eq!(decode_frame(&raw).unwrap().value32(), 2400);
        assert_eq!(framer.buffered(), 0);
    }
}
