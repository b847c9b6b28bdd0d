//! RESP frame types.
//!
//! A `Frame` is one complete protocol message, inbound or outbound.
//! Frames are cheap to clone (`Bytes` payloads) and serialize with
//! precomputed encodings for the common replies.

use super::responses;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A RESP frame representing a complete protocol message.
#[derive(Clone, PartialEq)]
pub enum Frame {
    /// Simple string (no newlines allowed)
    Simple(String),

    /// Error message
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Bulk string (binary-safe)
    Bulk(Bytes),

    /// Null bulk string
    Null,

    /// Array of frames
    Array(Vec<Frame>),
}

impl Frame {
    /// Create a simple string frame.
    #[inline]
    pub fn simple(s: impl Into<String>) -> Self {
        Self::Simple(s.into())
    }

    /// Create an error frame.
    #[inline]
    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    /// Create an integer frame.
    #[inline]
    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    /// Create a bulk string frame.
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    /// Create a null frame.
    #[inline]
    pub const fn null() -> Self {
        Self::Null
    }

    /// Create an array frame.
    #[inline]
    pub fn array(frames: Vec<Frame>) -> Self {
        Self::Array(frames)
    }

    /// Create an empty array frame.
    #[inline]
    pub fn empty_array() -> Self {
        Self::Array(Vec::new())
    }

    /// Create an OK response.
    #[inline]
    pub fn ok() -> Self {
        Self::Simple("OK".to_string())
    }

    /// Create a PONG response.
    #[inline]
    pub fn pong() -> Self {
        Self::Simple("PONG".to_string())
    }

    /// Check if this is a null frame.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is an error frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Try to get the frame as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Simple(s) | Self::Error(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get the frame as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Bulk(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            Self::Simple(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get the frame as an array.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Convert frame payload to owned Bytes.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Bulk(b) => Some(b.clone()),
            Self::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            _ => None,
        }
    }

    /// Serialize the frame to a buffer.
    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            Self::Simple(s) => match s.as_str() {
                "OK" => buf.put_slice(responses::OK),
                "PONG" => buf.put_slice(responses::PONG),
                _ => {
                    buf.put_u8(b'+');
                    buf.put_slice(s.as_bytes());
                    buf.put_slice(b"\r\n");
                }
            },
            Self::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            Self::Integer(n) => {
                if let Some(static_resp) = responses::integer(*n) {
                    buf.put_slice(static_resp);
                } else {
                    buf.put_u8(b':');
                    let mut temp = itoa::Buffer::new();
                    buf.put_slice(temp.format(*n).as_bytes());
                    buf.put_slice(b"\r\n");
                }
            }
            Self::Bulk(data) => {
                if data.is_empty() {
                    buf.put_slice(responses::EMPTY_BULK);
                } else {
                    buf.put_u8(b'$');
                    let mut temp = itoa::Buffer::new();
                    buf.put_slice(temp.format(data.len() as i64).as_bytes());
                    buf.put_slice(b"\r\n");
                    buf.put_slice(data);
                    buf.put_slice(b"\r\n");
                }
            }
            Self::Null => {
                buf.put_slice(responses::NULL_BULK);
            }
            Self::Array(frames) => {
                if frames.is_empty() {
                    buf.put_slice(responses::EMPTY_ARRAY);
                } else {
                    buf.put_u8(b'*');
                    let mut temp = itoa::Buffer::new();
                    buf.put_slice(temp.format(frames.len() as i64).as_bytes());
                    buf.put_slice(b"\r\n");
                    for frame in frames {
                        frame.serialize(buf);
                    }
                }
            }
        }
    }

    /// Convert to a `Vec<u8>` for convenience.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64);
        self.serialize(&mut buf);
        buf.to_vec()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(s) => write!(f, "Simple({s:?})"),
            Self::Error(s) => write!(f, "Error({s:?})"),
            Self::Integer(n) => write!(f, "Integer({n})"),
            Self::Bulk(b) => {
                if let Ok(s) = std::str::from_utf8(b) {
                    write!(f, "Bulk({s:?})")
                } else {
                    write!(f, "Bulk({b:?})")
                }
            }
            Self::Null => write!(f, "Null"),
            Self::Array(arr) => {
                write!(f, "Array[")?;
                for (i, frame) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{frame:?}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self::Bulk(Bytes::from(s))
    }
}

impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Self::Bulk(b)
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<Vec<Frame>> for Frame {
    fn from(frames: Vec<Frame>) -> Self {
        Self::Array(frames)
    }
}

/// Fast integer to string conversion without heap allocation.
mod itoa {
    pub struct Buffer {
        bytes: [u8; 20],
    }

    impl Buffer {
        pub fn new() -> Self {
            Self { bytes: [0; 20] }
        }

        pub fn format(&mut self, n: i64) -> &str {
            let negative = n < 0;
            let mut n = n.unsigned_abs();

            let mut i = self.bytes.len();
            loop {
                i -= 1;
                self.bytes[i] = b'0' + (n % 10) as u8;
                n /= 10;
                if n == 0 {
                    break;
                }
            }

            if negative {
                i -= 1;
                self.bytes[i] = b'-';
            }

            // Only ASCII digits and '-' are written, so this is always valid UTF-8
            std::str::from_utf8(&self.bytes[i..]).expect("itoa produces valid UTF-8")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_string_serialize() {
        let frame = Frame::simple("OK");
        assert_eq!(frame.to_vec(), b"+OK\r\n");
    }

    #[test]
    fn test_error_serialize() {
        let frame = Frame::error("ERR unknown command");
        assert_eq!(frame.to_vec(), b"-ERR unknown command\r\n");
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Frame::integer(42).to_vec(), b":42\r\n");
        assert_eq!(Frame::integer(-1).to_vec(), b":-1\r\n");
        assert_eq!(Frame::integer(0).to_vec(), b":0\r\n");
        assert_eq!(Frame::integer(i64::MIN).to_vec(), b":-9223372036854775808\r\n");
    }

    #[test]
    fn test_bulk_string_serialize() {
        assert_eq!(Frame::bulk("hello").to_vec(), b"$5\r\nhello\r\n");
        assert_eq!(Frame::bulk("").to_vec(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_null_serialize() {
        assert_eq!(Frame::null().to_vec(), b"$-1\r\n");
    }

    #[test]
    fn test_array_serialize() {
        let frame = Frame::array(vec![
            Frame::bulk("SET"),
            Frame::bulk("key"),
            Frame::bulk("value"),
        ]);
        assert_eq!(
            frame.to_vec(),
            b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n"
        );
    }

    #[test]
    fn test_empty_array_serialize() {
        assert_eq!(Frame::empty_array().to_vec(), b"*0\r\n");
    }

    #[test]
    fn test_nested_array_serialize() {
        let frame = Frame::array(vec![
            Frame::integer(1),
            Frame::array(vec![Frame::integer(2), Frame::integer(3)]),
        ]);
        assert_eq!(frame.to_vec(), b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n");
    }
}
