//! Command-name lookup.
//!
//! A compile-time perfect-hash map gives O(1) case-insensitive lookup
//! from a command name to its identifier, with the uppercase conversion
//! done on the stack.

use phf::phf_map;

/// Command identifier for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    // Connection
    Ping = 0,
    Echo,
    Quit,

    // Keyspace
    Set,
    Get,
    Del,
    Exists,
    Keys,
    Ttl,
    Expire,
    Flushdb,
    Info,
    Mset,
    Mget,
    Setex,
    Dbsize,
    Save,

    // Sorted index
    Zadd,
    Zrem,
    Zscore,
    Zrank,
    Zrevrank,
    Zrange,
    Zrevrange,
    Zrangebyscore,
    Zcount,
    Zcard,
    Zincrby,
    Zremrangebyrank,
    Zremrangebyscore,
    BookTop,
    BookSpread,

    // Geospatial
    Geoadd,
    Georem,
    Geopos,
    Geodist,
    Georadius,
    Georadiusbymember,
    Geosearch,
    Geohash,

    // Cardinality registers
    Pfadd,
    Pfcount,
    Pfmerge,

    // Pub/sub
    Subscribe,
    Unsubscribe,
    Psubscribe,
    Punsubscribe,
    Publish,
    Pubsub,

    // Scripting
    Eval,
    Evalsha,
    Script,

    // Cluster
    Cluster,

    // Documents
    DocSet,
    DocGet,
    DocDel,
    DocQuery,
    DocIndex,

    // Unknown command (fallback)
    Unknown = 0xFFFF,
}

/// Static perfect-hash map for command lookup. Names are uppercase.
static COMMANDS: phf::Map<&'static [u8], CommandId> = phf_map! {
    b"PING" => CommandId::Ping,
    b"ECHO" => CommandId::Echo,
    b"QUIT" => CommandId::Quit,

    b"SET" => CommandId::Set,
    b"GET" => CommandId::Get,
    b"DEL" => CommandId::Del,
    b"EXISTS" => CommandId::Exists,
    b"KEYS" => CommandId::Keys,
    b"TTL" => CommandId::Ttl,
    b"EXPIRE" => CommandId::Expire,
    b"FLUSHDB" => CommandId::Flushdb,
    b"INFO" => CommandId::Info,
    b"MSET" => CommandId::Mset,
    b"MGET" => CommandId::Mget,
    b"SETEX" => CommandId::Setex,
    b"DBSIZE" => CommandId::Dbsize,
    b"SAVE" => CommandId::Save,

    b"ZADD" => CommandId::Zadd,
    b"ZREM" => CommandId::Zrem,
    b"ZSCORE" => CommandId::Zscore,
    b"ZRANK" => CommandId::Zrank,
    b"ZREVRANK" => CommandId::Zrevrank,
    b"ZRANGE" => CommandId::Zrange,
    b"ZREVRANGE" => CommandId::Zrevrange,
    b"ZRANGEBYSCORE" => CommandId::Zrangebyscore,
    b"ZCOUNT" => CommandId::Zcount,
    b"ZCARD" => CommandId::Zcard,
    b"ZINCRBY" => CommandId::Zincrby,
    b"ZREMRANGEBYRANK" => CommandId::Zremrangebyrank,
    b"ZREMRANGEBYSCORE" => CommandId::Zremrangebyscore,
    b"BOOK.TOP" => CommandId::BookTop,
    b"BOOK.SPREAD" => CommandId::BookSpread,

    b"GEOADD" => CommandId::Geoadd,
    b"GEOREM" => CommandId::Georem,
    b"GEOPOS" => CommandId::Geopos,
    b"GEODIST" => CommandId::Geodist,
    b"GEORADIUS" => CommandId::Georadius,
    b"GEORADIUSBYMEMBER" => CommandId::Georadiusbymember,
    b"GEOSEARCH" => CommandId::Geosearch,
    b"GEOHASH" => CommandId::Geohash,

    b"PFADD" => CommandId::Pfadd,
    b"PFCOUNT" => CommandId::Pfcount,
    b"PFMERGE" => CommandId::Pfmerge,

    b"SUBSCRIBE" => CommandId::Subscribe,
    b"UNSUBSCRIBE" => CommandId::Unsubscribe,
    b"PSUBSCRIBE" => CommandId::Psubscribe,
    b"PUNSUBSCRIBE" => CommandId::Punsubscribe,
    b"PUBLISH" => CommandId::Publish,
    b"PUBSUB" => CommandId::Pubsub,

    b"EVAL" => CommandId::Eval,
    b"EVALSHA" => CommandId::Evalsha,
    b"SCRIPT" => CommandId::Script,

    b"CLUSTER" => CommandId::Cluster,

    b"DOC.SET" => CommandId::DocSet,
    b"DOC.GET" => CommandId::DocGet,
    b"DOC.DEL" => CommandId::DocDel,
    b"DOC.QUERY" => CommandId::DocQuery,
    b"DOC.INDEX" => CommandId::DocIndex,
};

/// Uppercase a command name on the stack; 64 bytes covers every name.
#[inline]
fn to_uppercase_stack(src: &[u8]) -> Option<[u8; 64]> {
    if src.len() > 64 {
        return None;
    }
    let mut buf = [0u8; 64];
    for (i, &b) in src.iter().enumerate() {
        buf[i] = b.to_ascii_uppercase();
    }
    Some(buf)
}

/// Look up a command id from its name bytes, case-insensitively.
#[inline]
pub fn lookup_command(name: &[u8]) -> CommandId {
    let upper = match to_uppercase_stack(name) {
        Some(u) => u,
        None => return CommandId::Unknown,
    };

    COMMANDS
        .get(&upper[..name.len()])
        .copied()
        .unwrap_or(CommandId::Unknown)
}

/// True for the subscribe-family commands the connection loop handles
/// itself (they switch the connection into subscriber mode).
#[inline]
pub fn is_subscribe_family(id: CommandId) -> bool {
    matches!(
        id,
        CommandId::Subscribe
            | CommandId::Unsubscribe
            | CommandId::Psubscribe
            | CommandId::Punsubscribe
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_case_insensitive() {
        assert_eq!(lookup_command(b"GET"), CommandId::Get);
        assert_eq!(lookup_command(b"get"), CommandId::Get);
        assert_eq!(lookup_command(b"Get"), CommandId::Get);
        assert_eq!(lookup_command(b"zadd"), CommandId::Zadd);
        assert_eq!(lookup_command(b"cluster"), CommandId::Cluster);
        assert_eq!(lookup_command(b"doc.query"), CommandId::DocQuery);
        assert_eq!(lookup_command(b"book.top"), CommandId::BookTop);
    }

    #[test]
    fn test_lookup_unknown() {
        assert_eq!(lookup_command(b"NOTACOMMAND"), CommandId::Unknown);
        assert_eq!(lookup_command(b""), CommandId::Unknown);
        let long = [b'A'; 65];
        assert_eq!(lookup_command(&long), CommandId::Unknown);
    }

    #[test]
    fn test_subscribe_family() {
        assert!(is_subscribe_family(CommandId::Subscribe));
        assert!(is_subscribe_family(CommandId::Punsubscribe));
        assert!(!is_subscribe_family(CommandId::Publish));
        assert!(!is_subscribe_family(CommandId::Get));
    }
}
