//! Stream framing for the Meshtastic serial client API.
//!
//! Every protobuf on the serial link is wrapped as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! The device also prints plain-text debug output on the same port, so the decoder
//! skips anything that does not start with the magic and resynchronises on the next
//! `0x94` byte after a malformed header.
use bytes::{Buf, BufMut, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
const HEADER_LEN: usize = 4;
/// The firmware never emits frames larger than this.
pub const MAX_FRAME_SIZE: usize = 512;

/// Incremental decoder: feed arbitrary chunks, pull whole frames.
#[derive(Debug)]
pub struct StreamFramer {
    buf: BytesMut,
    frames_seen: u64,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            frames_seen: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// True once at least one well-formed frame was decoded (device is in PROTO mode).
    pub fn binary_detected(&self) -> bool {
        self.frames_seen > 0
    }

    /// Extract the next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Drop noise before the next candidate header.
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => self.buf.advance(pos),
                None => {
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
            if declared == 0 || declared > MAX_FRAME_SIZE {
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            let frame = self.buf.split_to(declared).to_vec();
            self.frames_seen += 1;
            return Some(frame);
        }
    }
}

/// Wrap an encoded protobuf in the serial header.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u8(START1);
    out.put_u8(START2);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    out.to_vec()
}
