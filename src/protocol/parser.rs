//! Streaming RESP parser.
//!
//! The parser accumulates socket reads and yields complete frames. It is
//! designed for streaming input (partial data is fine), bounded allocations,
//! and binary-safe payloads.

use super::frame::Frame;
use super::markers;
use crate::error::ProtocolError;
use crate::{MAX_ARGUMENTS, MAX_BULK_SIZE, MAX_INLINE_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

/// RESP protocol parser with streaming support.
///
/// # Usage
///
/// ```ignore
/// let mut parser = RespParser::new();
/// parser.extend(data);
/// while let Some(frame) = parser.parse()? {
///     // handle frame
/// }
/// ```
///
/// # Limits
///
/// - Maximum bulk string size: 512 MiB
/// - Maximum array elements: 1M
/// - Maximum inline command size: 64 KiB
#[derive(Debug, Default)]
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the parser buffer.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns true if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the parser buffer (after an unrecoverable protocol error).
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Try to parse a complete frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(e)` if the data is malformed
    pub fn parse(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        // Inline command (doesn't start with a RESP marker)
        if !is_resp_marker(self.buffer[0]) {
            return self.parse_inline();
        }

        // A frame may be split across reads. Parsing consumes the buffer, so
        // on Incomplete the consumed prefix must be restored for retry.
        let checkpoint = self.buffer.clone();
        match self.parse_frame() {
            Ok(frame) => Ok(Some(frame)),
            Err(ProtocolError::Incomplete) => {
                self.buffer = checkpoint;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Parse an inline command (plain text, space-separated).
    fn parse_inline(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let line_end = match find_crlf(&self.buffer) {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > MAX_INLINE_SIZE {
                    return Err(ProtocolError::LineTooLong {
                        len: self.buffer.len(),
                        max: MAX_INLINE_SIZE,
                    });
                }
                return Ok(None);
            }
        };

        let line = self.buffer.split_to(line_end);
        self.buffer.advance(2); // CRLF

        let args: Vec<Frame> = line
            .as_ref()
            .split(|&b| b == b' ')
            .filter(|part| !part.is_empty())
            .map(|part| Frame::Bulk(Bytes::copy_from_slice(part)))
            .collect();

        if args.is_empty() {
            return Ok(None);
        }

        Ok(Some(Frame::Array(args)))
    }

    /// Parse a single RESP frame (recursive for arrays).
    fn parse_frame(&mut self) -> Result<Frame, ProtocolError> {
        if self.buffer.is_empty() {
            return Err(ProtocolError::Incomplete);
        }

        let marker = self.buffer[0];
        self.buffer.advance(1);

        match marker {
            markers::SIMPLE_STRING => self.parse_simple_string(),
            markers::ERROR => self.parse_error(),
            markers::INTEGER => self.parse_integer(),
            markers::BULK_STRING => self.parse_bulk_string(),
            markers::ARRAY => self.parse_array(),
            _ => Err(ProtocolError::InvalidTypeMarker(marker)),
        }
    }

    /// Parse a simple string (+...\r\n).
    fn parse_simple_string(&mut self) -> Result<Frame, ProtocolError> {
        let line = self.read_line()?;
        let s = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Frame::Simple(s.to_string()))
    }

    /// Parse an error (-...\r\n).
    fn parse_error(&mut self) -> Result<Frame, ProtocolError> {
        let line = self.read_line()?;
        let s = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Frame::Error(s.to_string()))
    }

    /// Parse an integer (:...\r\n).
    fn parse_integer(&mut self) -> Result<Frame, ProtocolError> {
        let line = self.read_line()?;
        let s = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let n: i64 = s.parse()?;
        Ok(Frame::Integer(n))
    }

    /// Parse a bulk string ($len\r\n...\r\n).
    fn parse_bulk_string(&mut self) -> Result<Frame, ProtocolError> {
        let len_line = self.read_line()?;
        let len_str = std::str::from_utf8(&len_line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let len: i64 = len_str.parse()?;

        // Null bulk string
        if len < 0 {
            return Ok(Frame::Null);
        }

        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(ProtocolError::BulkTooLarge {
                len,
                max: MAX_BULK_SIZE,
            });
        }

        if self.buffer.len() < len + 2 {
            return Err(ProtocolError::Incomplete);
        }

        let data = self.buffer.split_to(len).freeze();

        if &self.buffer[..2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf);
        }
        self.buffer.advance(2);

        Ok(Frame::Bulk(data))
    }

    /// Parse an array (*len\r\n...).
    fn parse_array(&mut self) -> Result<Frame, ProtocolError> {
        let len_line = self.read_line()?;
        let len_str = std::str::from_utf8(&len_line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let len: i64 = len_str.parse()?;

        // Null array
        if len < 0 {
            return Ok(Frame::Null);
        }

        let len = len as usize;
        if len > MAX_ARGUMENTS {
            return Err(ProtocolError::TooManyElements {
                count: len,
                max: MAX_ARGUMENTS,
            });
        }

        let mut frames = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            frames.push(self.parse_frame()?);
        }

        Ok(Frame::Array(frames))
    }

    /// Read a line (up to CRLF) from the buffer.
    fn read_line(&mut self) -> Result<Bytes, ProtocolError> {
        match find_crlf(&self.buffer) {
            Some(pos) => {
                let line = self.buffer.split_to(pos).freeze();
                self.buffer.advance(2);
                Ok(line)
            }
            None => {
                if self.buffer.len() > MAX_INLINE_SIZE {
                    return Err(ProtocolError::LineTooLong {
                        len: self.buffer.len(),
                        max: MAX_INLINE_SIZE,
                    });
                }
                Err(ProtocolError::Incomplete)
            }
        }
    }
}

/// Check if a byte is a RESP type marker.
#[inline]
fn is_resp_marker(b: u8) -> bool {
    matches!(
        b,
        markers::SIMPLE_STRING
            | markers::ERROR
            | markers::INTEGER
            | markers::BULK_STRING
            | markers::ARRAY
    )
}

/// Find the position of the first CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut start = 0;
    while let Some(pos) = memchr(b'\r', &buf[start..]) {
        let abs = start + pos;
        if abs + 1 < buf.len() {
            if buf[abs + 1] == b'\n' {
                return Some(abs);
            }
            start = abs + 1;
        } else {
            return None;
        }
    }
    None
}
