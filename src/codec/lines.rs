//! NDJSON line framing
//!
//! A `tokio_util` decoder that yields one frame per line of input. Lines
//! longer than the configured maximum are skipped without buffering them
//! and reported as `Oversized`, so the caller can account for the line and
//! carry on with the next one.

use bytes::{Bytes, BytesMut};
use std::io::Error as IoError;
use tokio_util::codec::Decoder;

/// One line of input, newline and trailing `\r` removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineFrame {
    Line(Bytes),
    /// A line over the limit; only its length is kept
    Oversized { length: usize },
}

#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where to resume scanning for `\n` in the buffered bytes
    next_index: usize,
    /// Bytes dropped so far from an oversized line
    discarding: Option<usize>,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        LineCodec {
            max_length,
            next_index: 0,
            discarding: None,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn frame(&self, mut line: BytesMut) -> LineFrame {
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        if line.len() > self.max_length {
            LineFrame::Oversized { length: line.len() }
        } else {
            LineFrame::Line(line.freeze())
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl Decoder for LineCodec {
    type Item = LineFrame;
    type Error = IoError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<LineFrame>, IoError> {
        if let Some(dropped) = self.discarding {
            return match memchr::memchr(b'\n', buf) {
                Some(pos) => {
                    let _ = buf.split_to(pos + 1);
                    self.discarding = None;
                    Ok(Some(LineFrame::Oversized {
                        length: dropped + pos,
                    }))
                }
                None => {
                    self.discarding = Some(dropped + buf.len());
                    buf.clear();
                    Ok(None)
                }
            };
        }

        match memchr::memchr(b'\n', &buf[self.next_index..]) {
            Some(offset) => {
                let end = self.next_index + offset;
                self.next_index = 0;
                let mut line = buf.split_to(end + 1);
                line.truncate(end);
                Ok(Some(self.frame(line)))
            }
            None if buf.len() > self.max_length => {
                self.discarding = Some(buf.len());
                self.next_index = 0;
                buf.clear();
                Ok(None)
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<LineFrame>, IoError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // Final line without a terminating newline
        if let Some(dropped) = self.discarding.take() {
            return Ok(Some(LineFrame::Oversized { length: dropped }));
        }
        self.next_index = 0;
        if buf.is_empty() {
            Ok(None)
        } else {
            let line = buf.split_to(buf.len());
            Ok(Some(self.frame(line)))
        }
    }
}
