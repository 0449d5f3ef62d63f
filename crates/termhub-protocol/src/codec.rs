//! Newline-delimited JSON framing.
//!
//! [`JsonLinesCodec`] splits an incoming byte stream into lines and decodes
//! each line into a [`Frame`]. Lines may arrive split across any number of
//! reads. A line that is not a valid message becomes [`Frame::Invalid`]
//! instead of a decoder error, so one bad line never tears down the stream.
//! Lines longer than the configured maximum are discarded up to the next
//! newline.

use std::io;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio_util::codec::Decoder;

use crate::message::{ClientMessage, DecodeError};

/// Default maximum line length (8 MiB).
///
/// Large enough for a pasted block of input, small enough to bound
/// per-connection memory.
pub const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// One decoded line.
#[derive(Debug)]
pub enum Frame {
    /// A well-formed message
    Message(ClientMessage),
    /// A line that could not be decoded
    Invalid(FrameError),
}

/// Why a line was rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    #[error("{0}")]
    Decode(#[from] DecodeError),

    #[error("line exceeds {max} bytes")]
    TooLong { max: usize },
}

impl FrameError {
    /// The request id, if the rejected line carried one.
    pub fn request_id(&self) -> Option<&crate::RequestId> {
        match self {
            Self::Decode(err) => err.request_id(),
            Self::TooLong { .. } => None,
        }
    }
}

/// Decoder for newline-delimited JSON client messages.
#[derive(Debug, Clone)]
pub struct JsonLinesCodec {
    max_length: usize,
    /// Where to resume the newline search in the buffer
    next_index: usize,
    /// Currently skipping the remainder of an overlong line
    discarding: bool,
}

impl JsonLinesCodec {
    /// Creates a codec with the default [`MAX_LINE_LENGTH`].
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    /// Creates a codec that rejects lines longer than `max_length` bytes.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for JsonLinesCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(line: &[u8]) -> Frame {
    match ClientMessage::from_slice(line) {
        Ok(msg) => Frame::Message(msg),
        Err(err) => Frame::Invalid(err.into()),
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    line.get(start..end).unwrap_or_default()
}

impl Decoder for JsonLinesCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let read_to = self.max_length.saturating_add(1).min(buf.len());
            let newline = buf
                .get(self.next_index..read_to)
                .and_then(|window| window.iter().position(|b| *b == b'\n'));

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    // End of the overlong line; resume normal decoding after it
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let newline_index = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(newline_index + 1);
                    let line = trim_line(line.get(..newline_index).unwrap_or_default());
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(decode_line(line)));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    return Ok(Some(Frame::Invalid(FrameError::TooLong {
                        max: self.max_length,
                    })));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        // Final line without a trailing newline
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        let line = trim_line(&rest);
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(decode_line(line)))
    }
}

/// Serializes a message as one wire line, including the trailing newline.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Arc<str>, serde_json::Error> {
    let mut json = serde_json::to_string(msg)?;
    json.push('\n');
    Ok(Arc::from(json))
}
