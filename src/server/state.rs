//! Per-client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// State shared between a connection and the command handlers.
///
/// Pub/sub receivers are owned by the connection's subscriber loop, not
/// stored here; on connection close their drop is the deterministic
/// unsubscribe.
#[derive(Debug)]
pub struct ClientState {
    /// Connection id (monotonic per server)
    id: u64,
    /// Set when the connection should close (QUIT, fatal error)
    closed: AtomicBool,
    /// Commands processed on this connection
    commands: AtomicU64,
}

impl ClientState {
    /// Create state for a new connection.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            commands: AtomicU64::new(0),
        }
    }

    /// The connection id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the connection for closing.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the connection should close.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record one processed command.
    pub fn record_command(&self) {
        self.commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Commands processed so far.
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_flag() {
        let state = ClientState::new(7);
        assert_eq!(state.id(), 7);
        assert!(!state.is_closed());
        state.close();
        assert!(state.is_closed());
    }

    #[test]
    fn test_command_counter() {
        let state = ClientState::new(1);
        state.record_command();
        state.record_command();
        assert_eq!(state.command_count(), 2);
    }
}
