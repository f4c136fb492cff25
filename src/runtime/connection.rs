//! Per-connection protocol state.
//!
//! A `Connection` owns the framing buffer for one peer and turns each chunk
//! read from the socket into the bytes to send back. It performs no I/O
//! itself, so both runtimes drive it the same way.

use crate::config::Config;
use crate::protocols::delimited::{
    decode_bytes, respond, FrameError, Framer, DEFAULT_DELIMITER,
};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-connection settings derived from the configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub delimiter: u8,
    /// Maximum unterminated frame size (0 = unlimited).
    pub max_buffer_size: usize,
    /// Bytes requested per read.
    pub read_buffer_size: usize,
    pub idle_timeout: Option<Duration>,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delimiter: config.delimiter,
            max_buffer_size: config.max_buffer_size,
            read_buffer_size: config.read_buffer_size,
            idle_timeout: match config.idle_timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            max_buffer_size: 1024 * 1024,
            read_buffer_size: 1024,
            idle_timeout: None,
        }
    }
}

/// Current state of a connection.
///
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closed,
}

/// Result of processing one chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Responses for `frames` complete frames were appended to the output.
    Responses { frames: usize },
    /// Peer signalled end-of-stream.
    Closed,
}

/// Errors that terminate a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("idle for {0:?}")]
    IdleTimeout(Duration),
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    state: ConnState,
    framer: Framer,
    /// Frames answered so far.
    frames: u64,
}

impl Connection {
    /// Create a new connection in the open state.
    pub fn new(peer: SocketAddr, settings: &Settings) -> Self {
        debug!(peer = %peer, "connection_opened");
        Self {
            peer,
            state: ConnState::Open,
            framer: Framer::new(settings.delimiter, settings.max_buffer_size),
            frames: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Process one chunk read from the transport.
    ///
    /// Every complete frame is decoded and its echo appended to `output`,
    /// in arrival order. An empty chunk is end-of-stream and closes the
    /// connection. A tail over the buffer limit also closes it; the echoes
    /// for frames completed by the same chunk are still in `output` when
    /// the error is returned.
    pub fn receive(
        &mut self,
        chunk: &[u8],
        output: &mut BytesMut,
    ) -> Result<ProcessResult, FrameError> {
        if self.state == ConnState::Closed {
            return Ok(ProcessResult::Closed);
        }

        if chunk.is_empty() {
            self.close();
            return Ok(ProcessResult::Closed);
        }

        let delimiter = self.framer.delimiter();
        let mut count = 0;
        for frame in self.framer.feed(chunk) {
            let message = decode_bytes(&frame);
            debug!(
                peer = %self.peer,
                command = %message.command,
                args = ?message.args,
                "message_received"
            );
            if message.ignored > 0 {
                debug!(
                    peer = %self.peer,
                    ignored = message.ignored,
                    frame = %String::from_utf8_lossy(&frame),
                    "parse_error"
                );
            }

            output.extend_from_slice(&respond(&frame, delimiter));
            count += 1;
        }
        self.frames += count as u64;

        if let Err(e) = self.framer.check_limit() {
            warn!(peer = %self.peer, error = %e, "Closing connection");
            self.close();
            return Err(e);
        }

        Ok(ProcessResult::Responses { frames: count })
    }

    /// Mark the connection closed, releasing the framing buffer.
    pub fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        let discarded = self.framer.buffered();
        self.framer.release();
        debug!(
            peer = %self.peer,
            frames = self.frames,
            discarded,
            "connection_closed"
        );
    }
}
