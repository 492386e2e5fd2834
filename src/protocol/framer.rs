//! COBS byte framer.
//!
//! Frames are COBS-encoded payloads terminated by a `0x00` delimiter, so the
//! delimiter can never appear inside a frame. The decoder is a streaming
//! state machine: feed it whatever the serial driver hands over and it yields
//! complete payloads.
//!
//! Serial links drop and flip bytes. The decoder never reports errors: a
//! frame that fails to decode is discarded and decoding resumes after the next
//! delimiter.
//!
//! # Example
//!
//! ```
//! use dongle_fleet::protocol::framer::{Framer, encode};
//!
//! let frame = encode(&[0x05, 0x00, 0xFA]);
//! let mut framer = Framer::new();
//!
//! // Arbitrary chunking is fine.
//! assert!(framer.feed(&frame[..2]).is_empty());
//! assert_eq!(framer.feed(&frame[2..]), vec![vec![0x05, 0x00, 0xFA]]);
//! ```

// ============================================================================
// Imports
// ============================================================================

use tracing::trace;

// ============================================================================
// Constants
// ============================================================================

/// Frame delimiter.
pub const DELIMITER: u8 = 0x00;

/// Longest encoded frame accepted before the buffer is discarded.
pub const MAX_FRAME_LEN: usize = 512;

/// Largest COBS block code (254 data bytes, no implied zero).
const MAX_BLOCK_CODE: u8 = 0xFF;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a payload into a delimited frame.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 254 + 2);
    let mut code_index = 0;
    let mut code: u8 = 1;
    out.push(0);

    for &byte in payload {
        if byte == DELIMITER {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
            continue;
        }

        out.push(byte);
        code += 1;

        if code == MAX_BLOCK_CODE {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
        }
    }

    out[code_index] = code;
    out.push(DELIMITER);
    out
}

/// Decodes one frame. A single trailing delimiter is ignored.
///
/// Returns `None` if the frame is structurally invalid (zero code byte,
/// block overrunning the frame, or a delimiter inside the frame).
#[must_use]
pub fn decode(frame: &[u8]) -> Option<Vec<u8>> {
    let frame = frame.strip_suffix(&[DELIMITER]).unwrap_or(frame);
    let mut out = Vec::with_capacity(frame.len());
    let mut index = 0;

    while index < frame.len() {
        let code = frame[index];
        if code == DELIMITER {
            return None;
        }

        let end = index + code as usize;
        let block = frame.get(index + 1..end)?;
        if block.contains(&DELIMITER) {
            return None;
        }

        out.extend_from_slice(block);
        index = end;

        if code != MAX_BLOCK_CODE && index < frame.len() {
            out.push(DELIMITER);
        }
    }

    Some(out)
}

// ============================================================================
// Framer
// ============================================================================

/// Streaming frame decoder.
///
/// Buffers partial frames across [`feed`](Self::feed) calls.
#[derive(Debug, Default)]
pub struct Framer {
    /// Bytes of the frame currently being received.
    buffer: Vec<u8>,
    /// Set when the current frame exceeded [`MAX_FRAME_LEN`].
    overflow: bool,
    /// Frames discarded since creation.
    dropped: u64,
}

impl Framer {
    /// Creates an empty framer.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes a chunk and returns every payload completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut payloads = Vec::new();

        for &byte in chunk {
            if byte == DELIMITER {
                self.finish_frame(&mut payloads);
                continue;
            }

            if self.overflow {
                continue;
            }

            if self.buffer.len() >= MAX_FRAME_LEN {
                trace!(len = self.buffer.len(), "Frame overflow, skipping to delimiter");
                self.overflow = true;
                self.buffer.clear();
                continue;
            }

            self.buffer.push(byte);
        }

        payloads
    }

    /// Number of buffered bytes of an incomplete frame.
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of frames discarded as malformed or oversized.
    #[inline]
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflow = false;
    }

    fn finish_frame(&mut self, payloads: &mut Vec<Vec<u8>>) {
        if self.overflow {
            self.overflow = false;
            self.dropped += 1;
            return;
        }

        if self.buffer.is_empty() {
            return;
        }

        match decode(&self.buffer) {
            Some(payload) => payloads.push(payload),
            None => {
                self.dropped += 1;
                trace!(len = self.buffer.len(), "Dropped malformed frame");
            }
        }

        self.buffer.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
