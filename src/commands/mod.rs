//! Command parsing, routing, and execution.

pub mod dispatch;
mod executor;
mod registry;

mod cluster;
mod connection;
mod docs;
mod geo;
mod hyperloglog;
mod keys;
mod pubsub;
mod scripting;
mod server_cmds;
mod sorted_sets;
mod strings;

pub use executor::CommandExecutor;
pub use registry::{Command, CommandRegistry};
pub use scripting::preload_financial_scripts;

use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use bytes::Bytes;

/// Parsed command with name and arguments.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    /// Command name (uppercase)
    pub name: String,
    /// Command arguments
    pub args: Vec<Bytes>,
}

impl ParsedCommand {
    /// Parse a command from a RESP frame.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let frames = match frame {
            Frame::Array(arr) if !arr.is_empty() => arr,
            _ => return Err(CommandError::SyntaxError.into()),
        };

        let mut iter = frames.into_iter();

        let name_frame = iter.next().ok_or(CommandError::SyntaxError)?;
        let name_bytes = name_frame.to_bytes().ok_or(CommandError::SyntaxError)?;
        let name = std::str::from_utf8(&name_bytes)
            .map_err(|_| CommandError::SyntaxError)?
            .to_uppercase();

        let args: Vec<Bytes> = iter.map(|f| f.to_bytes().unwrap_or_default()).collect();

        Ok(Self { name, args })
    }

    /// Number of arguments (excluding the command name).
    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Get an argument as bytes.
    #[inline]
    pub fn get_arg(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    /// Get an argument as a string.
    pub fn get_str(&self, index: usize) -> Result<&str> {
        let bytes = self
            .args
            .get(index)
            .ok_or_else(|| CommandError::WrongArity {
                command: self.name.clone(),
            })?;
        std::str::from_utf8(bytes).map_err(|_| CommandError::SyntaxError.into())
    }

    /// Get an argument as an i64.
    pub fn get_i64(&self, index: usize) -> Result<i64> {
        let s = self.get_str(index)?;
        s.parse().map_err(|_| CommandError::NotInteger.into())
    }

    /// Get an argument as an f64.
    pub fn get_f64(&self, index: usize) -> Result<f64> {
        let s = self.get_str(index)?;
        s.parse().map_err(|_| CommandError::NotFloat.into())
    }

    /// Validate minimum argument count.
    pub fn require_args(&self, min: usize) -> Result<()> {
        if self.args.len() < min {
            Err(CommandError::WrongArity {
                command: self.name.clone(),
            }
            .into())
        } else {
            Ok(())
        }
    }

    /// Validate exact argument count.
    pub fn require_exact_args(&self, count: usize) -> Result<()> {
        if self.args.len() != count {
            Err(CommandError::WrongArity {
                command: self.name.clone(),
            }
            .into())
        } else {
            Ok(())
        }
    }
}

bitflags::bitflags! {
    /// Command behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        /// Command is read-only
        const READONLY = 1 << 0;
        /// Command modifies data
        const WRITE    = 1 << 1;
        /// Command is for admin use
        const ADMIN    = 1 << 2;
        /// Command touches no keyspace keys (skip slot routing)
        const NO_KEYS  = 1 << 3;
        /// Command is for pub/sub
        const PUBSUB   = 1 << 4;
    }
}

impl CommandFlags {
    /// Flags for read-only keyed commands.
    #[inline]
    pub const fn readonly() -> Self {
        Self::READONLY
    }

    /// Flags for write commands.
    #[inline]
    pub const fn write() -> Self {
        Self::WRITE
    }

    /// Flags for admin commands.
    #[inline]
    pub const fn admin() -> Self {
        Self::ADMIN.union(Self::NO_KEYS)
    }

    /// Flags for pub/sub commands.
    #[inline]
    pub const fn pubsub_cmd() -> Self {
        Self::PUBSUB.union(Self::NO_KEYS)
    }

    /// Whether the command skips slot routing.
    #[inline]
    pub const fn no_keys(self) -> bool {
        self.contains(Self::NO_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_from_frame() {
        let frame = Frame::Array(vec![
            Frame::bulk("set"),
            Frame::bulk("foo"),
            Frame::bulk("bar"),
        ]);
        let cmd = ParsedCommand::from_frame(frame).unwrap();
        assert_eq!(cmd.name, "SET");
        assert_eq!(cmd.arg_count(), 2);
        assert_eq!(cmd.get_str(0).unwrap(), "foo");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ParsedCommand::from_frame(Frame::Array(vec![])).is_err());
        assert!(ParsedCommand::from_frame(Frame::Integer(1)).is_err());
    }

    #[test]
    fn test_typed_arg_accessors() {
        let frame = Frame::Array(vec![
            Frame::bulk("EXPIRE"),
            Frame::bulk("k"),
            Frame::bulk("10"),
        ]);
        let cmd = ParsedCommand::from_frame(frame).unwrap();
        assert_eq!(cmd.get_i64(1).unwrap(), 10);
        assert!(cmd.get_i64(0).is_err());
        assert!(cmd.get_str(5).is_err());
    }

    #[test]
    fn test_arity_checks() {
        let frame = Frame::Array(vec![Frame::bulk("GET"), Frame::bulk("k")]);
        let cmd = ParsedCommand::from_frame(frame).unwrap();
        assert!(cmd.require_args(1).is_ok());
        assert!(cmd.require_args(2).is_err());
        assert!(cmd.require_exact_args(1).is_ok());
        assert!(cmd.require_exact_args(2).is_err());
    }
}
