//! Newline framing for the incoming byte stream

use bytes::BytesMut;
use thiserror::Error;

/// Longest partial line kept while waiting for its terminator (4KB)
pub const MAX_LINE_LEN: usize = 4096;

/// Record terminator
pub const TERMINATOR: u8 = b'\n';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("line exceeds {max} bytes without a terminator ({size} buffered)")]
    LineTooLong { size: usize, max: usize },
}

/// Output of one [`LineBuffer::push`]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Framed {
    /// Complete, trimmed, non-empty lines in arrival order
    pub lines: Vec<String>,
    /// Set when a partial line outgrew [`MAX_LINE_LEN`] during this push
    pub overflow: Option<FramingError>,
}

/// Accumulates raw chunks and splits them into lines.
///
/// Bytes are buffered until a `\n` arrives; only complete lines are decoded,
/// so a UTF-8 sequence split across two reads still decodes correctly.
pub struct LineBuffer {
    buffer: BytesMut,
    /// Dropping the rest of an oversized line up to its terminator
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completes.
    ///
    /// A partial line that grows past [`MAX_LINE_LEN`] is dropped as a whole:
    /// everything up to and including its terminator is discarded, so no tail
    /// of it is ever emitted. Lines completed before or after it still come out.
    pub fn push(&mut self, chunk: &[u8]) -> Framed {
        self.buffer.extend_from_slice(chunk);

        let mut framed = Framed::default();
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == TERMINATOR) else {
                break;
            };
            let raw = self.buffer.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }

            let text = String::from_utf8_lossy(&raw[..pos]);
            let line = text.trim();
            if !line.is_empty() {
                framed.lines.push(line.to_string());
            }
        }

        if self.discarding {
            self.buffer.clear();
        } else if self.buffer.len() > MAX_LINE_LEN {
            framed.overflow = Some(FramingError::LineTooLong {
                size: self.buffer.len(),
                max: MAX_LINE_LEN,
            });
            self.buffer.clear();
            self.discarding = true;
        }

        framed
    }

    /// Bytes held for the line still being received
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
