//! Command registry.
//!
//! Maps command ids to their arity constraints, flags, and handlers.
//! Arity validation happens in the executor before a handler runs.

use super::dispatch::CommandId;
use super::{CommandFlags, ParsedCommand};
use crate::Result;
use crate::protocol::Frame;
use crate::server::ClientState;
use crate::storage::Db;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Async command handler.
pub type CommandHandler = fn(
    ParsedCommand,
    Arc<Db>,
    Arc<ClientState>,
) -> Pin<Box<dyn Future<Output = Result<Frame>> + Send>>;

/// Command definition.
#[derive(Clone)]
pub struct Command {
    /// Command name (uppercase, as dispatched)
    pub name: &'static str,
    /// Minimum argument count
    pub min_args: i32,
    /// Maximum argument count (-1 for unlimited)
    pub max_args: i32,
    /// Behavior flags
    pub flags: CommandFlags,
    /// Handler function
    pub handler: CommandHandler,
}

impl Command {
    /// Create a new command definition.
    pub const fn new(
        name: &'static str,
        min_args: i32,
        max_args: i32,
        flags: CommandFlags,
        handler: CommandHandler,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            flags,
            handler,
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Registry of all available commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<CommandId, Command>,
}

impl CommandRegistry {
    /// Create a registry with all built-in commands.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    /// Register a command under an id.
    pub fn register(&mut self, id: CommandId, cmd: Command) {
        self.commands.insert(id, cmd);
    }

    /// Look up a command by id.
    pub fn get(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(&id)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn register_all(&mut self) {
        self.register_connection_commands();
        self.register_keyspace_commands();
        self.register_sorted_set_commands();
        self.register_geo_commands();
        self.register_hyperloglog_commands();
        self.register_pubsub_commands();
        self.register_scripting_commands();
        self.register_cluster_commands();
        self.register_document_commands();
        self.register_server_commands();
    }

    fn register_connection_commands(&mut self) {
        use super::connection::*;

        self.register(
            CommandId::Ping,
            Command::new("PING", 0, 1, CommandFlags::readonly().union(CommandFlags::NO_KEYS), cmd_ping),
        );
        self.register(
            CommandId::Echo,
            Command::new("ECHO", 1, 1, CommandFlags::readonly().union(CommandFlags::NO_KEYS), cmd_echo),
        );
        self.register(
            CommandId::Quit,
            Command::new("QUIT", 0, 0, CommandFlags::readonly().union(CommandFlags::NO_KEYS), cmd_quit),
        );
    }

    fn register_keyspace_commands(&mut self) {
        use super::keys::*;
        use super::strings::*;

        self.register(
            CommandId::Set,
            Command::new("SET", 2, 4, CommandFlags::write(), cmd_set),
        );
        self.register(
            CommandId::Get,
            Command::new("GET", 1, 1, CommandFlags::readonly(), cmd_get),
        );
        self.register(
            CommandId::Del,
            Command::new("DEL", 1, -1, CommandFlags::write(), cmd_del),
        );
        self.register(
            CommandId::Exists,
            Command::new("EXISTS", 1, -1, CommandFlags::readonly(), cmd_exists),
        );
        self.register(
            CommandId::Setex,
            Command::new("SETEX", 3, 3, CommandFlags::write(), cmd_setex),
        );
        self.register(
            CommandId::Mset,
            Command::new("MSET", 2, -1, CommandFlags::write(), cmd_mset),
        );
        self.register(
            CommandId::Mget,
            Command::new("MGET", 1, -1, CommandFlags::readonly(), cmd_mget),
        );
        self.register(
            CommandId::Keys,
            Command::new("KEYS", 1, 1, CommandFlags::readonly().union(CommandFlags::NO_KEYS), cmd_keys),
        );
        self.register(
            CommandId::Ttl,
            Command::new("TTL", 1, 1, CommandFlags::readonly(), cmd_ttl),
        );
        self.register(
            CommandId::Expire,
            Command::new("EXPIRE", 2, 2, CommandFlags::write(), cmd_expire),
        );
        self.register(
            CommandId::Flushdb,
            Command::new("FLUSHDB", 0, 0, CommandFlags::write().union(CommandFlags::NO_KEYS), cmd_flushdb),
        );
    }

    fn register_sorted_set_commands(&mut self) {
        use super::sorted_sets::*;

        self.register(
            CommandId::Zadd,
            Command::new("ZADD", 3, -1, CommandFlags::write(), cmd_zadd),
        );
        self.register(
            CommandId::Zrem,
            Command::new("ZREM", 2, -1, CommandFlags::write(), cmd_zrem),
        );
        self.register(
            CommandId::Zscore,
            Command::new("ZSCORE", 2, 2, CommandFlags::readonly(), cmd_zscore),
        );
        self.register(
            CommandId::Zrank,
            Command::new("ZRANK", 2, 2, CommandFlags::readonly(), cmd_zrank),
        );
        self.register(
            CommandId::Zrevrank,
            Command::new("ZREVRANK", 2, 2, CommandFlags::readonly(), cmd_zrevrank),
        );
        self.register(
            CommandId::Zrange,
            Command::new("ZRANGE", 3, 4, CommandFlags::readonly(), cmd_zrange),
        );
        self.register(
            CommandId::Zrevrange,
            Command::new("ZREVRANGE", 3, 4, CommandFlags::readonly(), cmd_zrevrange),
        );
        self.register(
            CommandId::Zrangebyscore,
            Command::new("ZRANGEBYSCORE", 3, 3, CommandFlags::readonly(), cmd_zrangebyscore),
        );
        self.register(
            CommandId::Zcount,
            Command::new("ZCOUNT", 3, 3, CommandFlags::readonly(), cmd_zcount),
        );
        self.register(
            CommandId::Zcard,
            Command::new("ZCARD", 1, 1, CommandFlags::readonly(), cmd_zcard),
        );
        self.register(
            CommandId::Zincrby,
            Command::new("ZINCRBY", 3, 3, CommandFlags::write(), cmd_zincrby),
        );
        self.register(
            CommandId::Zremrangebyrank,
            Command::new("ZREMRANGEBYRANK", 3, 3, CommandFlags::write(), cmd_zremrangebyrank),
        );
        self.register(
            CommandId::Zremrangebyscore,
            Command::new("ZREMRANGEBYSCORE", 3, 3, CommandFlags::write(), cmd_zremrangebyscore),
        );
        self.register(
            CommandId::BookTop,
            Command::new("BOOK.TOP", 2, 2, CommandFlags::readonly(), cmd_book_top),
        );
        self.register(
            CommandId::BookSpread,
            Command::new("BOOK.SPREAD", 1, 1, CommandFlags::readonly(), cmd_book_spread),
        );
    }

    fn register_geo_commands(&mut self) {
        use super::geo::*;

        self.register(
            CommandId::Geoadd,
            Command::new("GEOADD", 4, -1, CommandFlags::write(), cmd_geoadd),
        );
        self.register(
            CommandId::Georem,
            Command::new("GEOREM", 2, -1, CommandFlags::write(), cmd_georem),
        );
        self.register(
            CommandId::Geopos,
            Command::new("GEOPOS", 2, -1, CommandFlags::readonly(), cmd_geopos),
        );
        self.register(
            CommandId::Geodist,
            Command::new("GEODIST", 3, 4, CommandFlags::readonly(), cmd_geodist),
        );
        self.register(
            CommandId::Georadius,
            Command::new("GEORADIUS", 5, 7, CommandFlags::readonly(), cmd_georadius),
        );
        self.register(
            CommandId::Georadiusbymember,
            Command::new("GEORADIUSBYMEMBER", 4, 6, CommandFlags::readonly(), cmd_georadiusbymember),
        );
        self.register(
            CommandId::Geosearch,
            Command::new("GEOSEARCH", 5, 5, CommandFlags::readonly(), cmd_geosearch),
        );
        self.register(
            CommandId::Geohash,
            Command::new("GEOHASH", 2, -1, CommandFlags::readonly(), cmd_geohash),
        );
    }

    fn register_hyperloglog_commands(&mut self) {
        use super::hyperloglog::*;

        self.register(
            CommandId::Pfadd,
            Command::new("PFADD", 1, -1, CommandFlags::write(), cmd_pfadd),
        );
        self.register(
            CommandId::Pfcount,
            Command::new("PFCOUNT", 1, -1, CommandFlags::readonly(), cmd_pfcount),
        );
        self.register(
            CommandId::Pfmerge,
            Command::new("PFMERGE", 2, -1, CommandFlags::write(), cmd_pfmerge),
        );
    }

    fn register_pubsub_commands(&mut self) {
        use super::pubsub::*;

        self.register(
            CommandId::Publish,
            Command::new("PUBLISH", 2, 2, CommandFlags::pubsub_cmd(), cmd_publish),
        );
        self.register(
            CommandId::Pubsub,
            Command::new("PUBSUB", 1, -1, CommandFlags::pubsub_cmd(), cmd_pubsub),
        );
    }

    fn register_scripting_commands(&mut self) {
        use super::scripting::*;

        self.register(
            CommandId::Eval,
            Command::new("EVAL", 2, -1, CommandFlags::write().union(CommandFlags::NO_KEYS), cmd_eval),
        );
        self.register(
            CommandId::Evalsha,
            Command::new("EVALSHA", 2, -1, CommandFlags::write().union(CommandFlags::NO_KEYS), cmd_evalsha),
        );
        self.register(
            CommandId::Script,
            Command::new("SCRIPT", 1, -1, CommandFlags::admin(), cmd_script),
        );
    }

    fn register_cluster_commands(&mut self) {
        use super::cluster::*;

        self.register(
            CommandId::Cluster,
            Command::new("CLUSTER", 1, -1, CommandFlags::admin(), cmd_cluster),
        );
    }

    fn register_document_commands(&mut self) {
        use super::docs::*;

        self.register(
            CommandId::DocSet,
            Command::new("DOC.SET", 2, 3, CommandFlags::write().union(CommandFlags::NO_KEYS), cmd_doc_set),
        );
        self.register(
            CommandId::DocGet,
            Command::new("DOC.GET", 1, 1, CommandFlags::readonly().union(CommandFlags::NO_KEYS), cmd_doc_get),
        );
        self.register(
            CommandId::DocDel,
            Command::new("DOC.DEL", 1, 1, CommandFlags::write().union(CommandFlags::NO_KEYS), cmd_doc_del),
        );
        self.register(
            CommandId::DocQuery,
            Command::new("DOC.QUERY", 0, -1, CommandFlags::readonly().union(CommandFlags::NO_KEYS), cmd_doc_query),
        );
        self.register(
            CommandId::DocIndex,
            Command::new("DOC.INDEX", 1, 1, CommandFlags::write().union(CommandFlags::NO_KEYS), cmd_doc_index),
        );
    }

    fn register_server_commands(&mut self) {
        use super::server_cmds::*;

        self.register(
            CommandId::Info,
            Command::new("INFO", 0, 1, CommandFlags::admin(), cmd_info),
        );
        self.register(
            CommandId::Dbsize,
            Command::new("DBSIZE", 0, 0, CommandFlags::admin(), cmd_dbsize),
        );
        self.register(
            CommandId::Save,
            Command::new("SAVE", 0, 0, CommandFlags::admin(), cmd_save),
        );
    }
}
