//! Delimiter framer.
//!
//! Accumulates raw bytes from the transport and splits them into frames at
//! each occurrence of the delimiter byte. Frame boundaries are found on raw
//! bytes; no text decoding happens here.

use bytes::{Buf, Bytes, BytesMut};

/// Default frame delimiter (`;`).
pub const DEFAULT_DELIMITER: u8 = b';';

const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// An unterminated frame grew past the configured buffer limit.
    #[error("unterminated frame exceeds buffer limit ({buffered} bytes, max {max})")]
    BufferLimit { buffered: usize, max: usize },
}

/// Per-connection frame accumulator.
///
/// Holds exactly the unconsumed suffix of everything fed so far. Bytes are
/// never reordered.
#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,
    delimiter: u8,
    /// Maximum length of an unterminated frame (0 = unlimited).
    max_buffer_size: usize,
    /// Leading bytes of `buffer` already known to be delimiter-free.
    searched: usize,
    /// Length of the trailing partial frame after the last delimiter.
    tail_len: usize,
}

impl Framer {
    /// Create a framer splitting on `delimiter`.
    ///
    /// A `max_buffer_size` of 0 disables the limit.
    pub fn new(delimiter: u8, max_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            delimiter,
            max_buffer_size,
            searched: 0,
            tail_len: 0,
        }
    }

    /// The delimiter byte.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered bytes and free the buffer's memory.
    pub fn release(&mut self) {
        self.buffer = BytesMut::new();
        self.searched = 0;
        self.tail_len = 0;
    }

    /// The unterminated tail: bytes after the last delimiter seen so far.
    pub fn pending(&self) -> &[u8] {
        &self.buffer[self.buffer.len() - self.tail_len..]
    }

    /// Append `chunk` and return an iterator over the complete frames now
    /// available, in arrival order.
    ///
    /// Frames are removed from the buffer as the iterator yields them; any
    /// left unread are yielded by the next call. An empty chunk yields only
    /// frames that were already pending. End-of-stream is the caller's
    /// concern, as is calling [`Framer::check_limit`] once the frames are
    /// handled.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk);

        self.tail_len = match chunk.iter().rposition(|&b| b == self.delimiter) {
            Some(pos) => chunk.len() - pos - 1,
            None => self.tail_len + chunk.len(),
        };

        Frames { framer: self }
    }

    /// Fail if the unterminated tail has grown past the buffer limit.
    ///
    /// Complete frames never count against the limit.
    pub fn check_limit(&self) -> Result<(), FrameError> {
        if self.max_buffer_size > 0 && self.tail_len > self.max_buffer_size {
            return Err(FrameError::BufferLimit {
                buffered: self.tail_len,
                max: self.max_buffer_size,
            });
        }
        Ok(())
    }

    /// Split the next frame off the front of the buffer.
    fn next_frame(&mut self) -> Option<Bytes> {
        let start = self.searched;
        match self.buffer[start..]
            .iter()
            .position(|&b| b == self.delimiter)
        {
            Some(offset) => {
                let frame = self.buffer.split_to(start + offset).freeze();
                // Drop the delimiter itself
                self.buffer.advance(1);
                self.searched = 0;
                Some(frame)
            }
            None => {
                self.searched = self.buffer.len();
                None
            }
        }
    }
}

/// Lazy iterator over the frames produced by one [`Framer::feed`] call.
pub struct Frames<'a> {
    framer: &'a mut Framer,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.framer.next_frame()
    }
}
