//! Error types for fiscus.
//!
//! Components return typed errors; the command executor is the only place
//! that translates them into wire error strings.

use std::io;
use std::net::AddrParseError;
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Result type alias for fiscus operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fiscus.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol parsing errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Command execution errors
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection errors
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),

    /// Address parsing error
    #[error("address parse error: {0}")]
    AddrParse(#[from] AddrParseError),
}

/// Protocol-level errors during RESP parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid RESP data type marker
    #[error("invalid type marker: {0:?}")]
    InvalidTypeMarker(u8),

    /// Invalid UTF-8 in simple string
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Line too long (exceeds inline limit)
    #[error("line too long: {len} bytes (max: {max})")]
    LineTooLong {
        /// Actual line length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Bulk string too large
    #[error("bulk string too large: {len} bytes (max: {max})")]
    BulkTooLarge {
        /// Actual bulk string length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Too many array elements
    #[error("too many array elements: {count} (max: {max})")]
    TooManyElements {
        /// Actual element count
        count: usize,
        /// Maximum allowed count
        max: usize,
    },

    /// Missing CRLF terminator
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// Incomplete frame - need more data
    #[error("incomplete frame, need more data")]
    Incomplete,
}

/// Command execution errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Unknown command
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Wrong number of arguments
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity {
        /// Command name that received wrong arity
        command: String,
    },

    /// Wrong type for operation
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Syntax error
    #[error("ERR syntax error")]
    SyntaxError,

    /// Not an integer
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// Not a float
    #[error("ERR value is not a valid float")]
    NotFloat,

    /// No such key
    #[error("ERR no such key")]
    NoSuchKey,

    /// No such member in a typed index
    #[error("ERR no such member '{0}'")]
    NoSuchMember(String),

    /// Invalid expire time
    #[error("ERR invalid expire time")]
    InvalidExpireTime,

    /// Coordinate outside canonical bounds
    #[error("ERR invalid longitude,latitude pair {lon:.6},{lat:.6}")]
    InvalidCoordinates {
        /// Longitude outside [-180, 180]
        lon: f64,
        /// Latitude outside [-90, 90]
        lat: f64,
    },

    /// Cardinality register precision outside [4, 16]
    #[error("ERR precision must be between 4 and 16, got {0}")]
    InvalidPrecision(u8),

    /// Merge of register banks with different precisions
    #[error("ERR cannot merge registers with different precision: {0} != {1}")]
    PrecisionMismatch(u8, u8),

    /// Cluster redirect - key owned by another node
    #[error("MOVED {slot} {addr}")]
    Moved {
        /// Hash slot number
        slot: u16,
        /// Target node address
        addr: String,
    },

    /// Cluster is in a down state
    #[error("CLUSTERDOWN The cluster is down")]
    ClusterDown,

    /// Script not found in cache
    #[error("NOSCRIPT No matching script. Please use EVAL.")]
    NoScript(String),

    /// Script execution error
    #[error("ERR Error running script: {0}")]
    ScriptError(String),

    /// Document index already exists for a field
    #[error("ERR index already exists for field '{0}'")]
    IndexExists(String),

    /// Unknown predicate operator in a document query
    #[error("ERR unknown query operator '{0}'")]
    UnknownOperator(String),
}

/// Storage-level errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Snapshot encode/decode failure
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Corrupted snapshot data
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true if this is a client error (4xx equivalent).
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Command(_))
    }

    /// Returns true if this is a server error (5xx equivalent).
    #[inline]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Internal(_) | Error::Io(_))
    }

    /// Converts the error to a wire error string.
    ///
    /// The command executor is the sole caller on the request path.
    #[must_use]
    pub fn to_wire_error(&self) -> String {
        match self {
            Error::Protocol(e) => format!("ERR {e}"),
            Error::Command(e) => e.to_string(),
            Error::Storage(e) => format!("ERR {e}"),
            Error::Io(e) => format!("ERR I/O error: {e}"),
            Error::Connection(e) => format!("ERR connection error: {e}"),
            Error::Config(e) => format!("ERR configuration error: {e}"),
            Error::Internal(e) => format!("ERR internal error: {e}"),
            Error::AddrParse(e) => format!("ERR address parse error: {e}"),
        }
    }
}

impl From<ParseIntError> for ProtocolError {
    fn from(e: ParseIntError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}

impl From<ParseFloatError> for ProtocolError {
    fn from(e: ParseFloatError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Command(CommandError::WrongArity {
            command: "GET".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "command error: ERR wrong number of arguments for 'GET' command"
        );
    }

    #[test]
    fn test_wire_error_passthrough() {
        let err = Error::Command(CommandError::WrongType);
        assert_eq!(
            err.to_wire_error(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );
    }

    #[test]
    fn test_moved_error_format() {
        let err = Error::Command(CommandError::Moved {
            slot: 1234,
            addr: "10.0.0.2:6379".to_string(),
        });
        assert_eq!(err.to_wire_error(), "MOVED 1234 10.0.0.2:6379");
    }

    #[test]
    fn test_error_classification() {
        let client_err = Error::Command(CommandError::SyntaxError);
        assert!(client_err.is_client_error());
        assert!(!client_err.is_server_error());

        let server_err = Error::Internal("test".to_string());
        assert!(!server_err.is_client_error());
        assert!(server_err.is_server_error());
    }
}
