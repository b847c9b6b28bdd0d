//! Command executor.
//!
//! The sole place where typed component errors become wire errors, and
//! where the cluster routing map is consulted before a keyed command runs.

use super::dispatch;
use super::registry::CommandRegistry;
use super::ParsedCommand;
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::server::cluster::SlotCheck;
use crate::storage::Db;
use std::sync::Arc;
use tracing::{debug, trace};

/// Command executor responsible for routing and executing commands.
#[derive(Debug)]
pub struct CommandExecutor {
    registry: CommandRegistry,
    db: Arc<Db>,
}

impl CommandExecutor {
    /// Create a new executor over a keyspace.
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            registry: CommandRegistry::new(),
            db,
        }
    }

    /// The keyspace.
    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// The registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Execute a parsed command, producing the reply frame.
    ///
    /// All component errors are translated to wire errors here.
    pub async fn execute(&self, cmd: ParsedCommand, client: Arc<ClientState>) -> Frame {
        trace!(command = %cmd.name, args = cmd.arg_count(), "executing");
        client.record_command();

        let id = dispatch::lookup_command(cmd.name.as_bytes());

        let Some(command) = self.registry.get(id) else {
            return Frame::error(format!("ERR unknown command '{}'", cmd.name));
        };

        // Arity validation
        let argc = cmd.arg_count() as i32;
        if argc < command.min_args || (command.max_args >= 0 && argc > command.max_args) {
            return Frame::error(
                CommandError::WrongArity {
                    command: cmd.name.clone(),
                }
                .to_string(),
            );
        }

        // Slot routing for keyed commands in cluster mode
        if !command.flags.no_keys() {
            if let Some(key) = cmd.args.first() {
                match self.db.cluster().check_key(key) {
                    SlotCheck::Owned => {}
                    SlotCheck::Moved { slot, addr } => {
                        return Frame::error(format!("MOVED {slot} {addr}"));
                    }
                    SlotCheck::Unavailable => {
                        return Frame::error(CommandError::ClusterDown.to_string());
                    }
                }
            }
        }

        match (command.handler)(cmd, self.db.clone(), client).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "command failed");
                Frame::error(e.to_wire_error())
            }
        }
    }
}
