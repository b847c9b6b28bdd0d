//! RESP wire protocol implementation.
//!
//! The codec is stateless between requests: the parser owns only a
//! connection-local read buffer, and responses are serialized directly
//! into the connection's write buffer.

mod frame;
mod parser;
pub mod responses;

pub use frame::Frame;
pub use parser::RespParser;

/// RESP type markers.
pub mod markers {
    /// Simple string marker (+)
    pub const SIMPLE_STRING: u8 = b'+';
    /// Error marker (-)
    pub const ERROR: u8 = b'-';
    /// Integer marker (:)
    pub const INTEGER: u8 = b':';
    /// Bulk string marker ($)
    pub const BULK_STRING: u8 = b'$';
    /// Array marker (*)
    pub const ARRAY: u8 = b'*';
}
