//! Server configuration.
//!
//! Defaults cover a standalone development instance; a redis.conf-style
//! file (`key value` lines, `#` comments) and CLI flags override them.

use std::fs;
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address
    pub bind: String,
    /// Port number
    pub port: u16,
    /// Maximum number of concurrent clients
    pub max_clients: usize,
    /// Idle-client read deadline in seconds (0 to disable)
    pub timeout: u32,
    /// Log level
    pub loglevel: LogLevel,
    /// Max memory in bytes (0 for no limit)
    pub maxmemory: usize,
    /// Eviction policy
    pub maxmemory_policy: MaxMemoryPolicy,
    /// Snapshot file path (empty disables snapshot save/load)
    pub snapshot_path: Option<PathBuf>,
    /// Expiry sweeper cadence in seconds
    pub expire_interval_secs: u64,
    /// Cluster mode
    pub cluster_enabled: bool,
    /// This node's cluster id (generated when empty)
    pub cluster_node_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: crate::DEFAULT_PORT,
            max_clients: crate::MAX_CLIENTS,
            timeout: 30,
            loglevel: LogLevel::default(),
            maxmemory: 0,
            maxmemory_policy: MaxMemoryPolicy::default(),
            snapshot_path: None,
            expire_interval_secs: 60,
            cluster_enabled: false,
            cluster_node_id: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a redis.conf-style file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;

        let mut config = Self::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k.to_ascii_lowercase(), v.trim()),
                None => {
                    return Err(ConfigError::Parse(line_no + 1, line.to_string()));
                }
            };

            match key.as_str() {
                "bind" => config.bind = value.to_string(),
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "maxclients" => {
                    config.max_clients = value
                        .parse()
                        .map_err(|_| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "timeout" => {
                    config.timeout = value
                        .parse()
                        .map_err(|_| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "loglevel" => {
                    config.loglevel = LogLevel::parse(value)
                        .ok_or_else(|| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "maxmemory" => {
                    config.maxmemory = parse_memory(value)
                        .ok_or_else(|| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "maxmemory-policy" => {
                    config.maxmemory_policy = MaxMemoryPolicy::parse(value)
                        .ok_or_else(|| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "snapshotfile" => config.snapshot_path = Some(PathBuf::from(value)),
                "expire-interval" => {
                    config.expire_interval_secs = value
                        .parse()
                        .map_err(|_| ConfigError::Parse(line_no + 1, line.to_string()))?;
                }
                "cluster-enabled" => {
                    config.cluster_enabled = matches!(value, "yes" | "true" | "1");
                }
                "cluster-node-id" => config.cluster_node_id = value.to_string(),
                // Unknown keys are ignored for forward compatibility
                _ => {}
            }
        }

        Ok(config)
    }
}

/// Parse a memory size with optional kb/mb/gb suffix.
pub fn parse_memory(value: &str) -> Option<usize> {
    let value = value.trim().to_lowercase();
    let (num, multiplier) = if let Some(n) = value.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix('g') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix('k') {
        (n, 1024)
    } else {
        (value.as_str(), 1)
    };

    num.trim().parse::<usize>().ok().map(|n| n * multiplier)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, String),

    /// Malformed line
    #[error("config parse error at line {0}: {1}")]
    Parse(usize, String),
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Debug output
    Debug,
    /// Normal operation
    #[default]
    Notice,
    /// Warnings only
    Warning,
}

impl LogLevel {
    /// Parse a level name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "verbose" => Some(Self::Debug),
            "notice" => Some(Self::Notice),
            "warning" => Some(Self::Warning),
            _ => None,
        }
    }

    /// The tracing filter directive for this level.
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Notice => "info",
            Self::Warning => "warn",
        }
    }
}

/// Eviction policy under the memory budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxMemoryPolicy {
    /// Reject nothing; never evict
    NoEviction,
    /// Sampled LRU over all keys (default policy when a limit is set)
    #[default]
    AllKeysLru,
    /// Sampled LRU over keys with an expiry
    VolatileLru,
}

impl MaxMemoryPolicy {
    /// Parse a policy name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "noeviction" => Some(Self::NoEviction),
            "allkeys-lru" => Some(Self::AllKeysLru),
            "volatile-lru" => Some(Self::VolatileLru),
            _ => None,
        }
    }

    /// The policy's config name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoEviction => "noeviction",
            Self::AllKeysLru => "allkeys-lru",
            Self::VolatileLru => "volatile-lru",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 6379);
        assert_eq!(config.timeout, 30);
        assert!(!config.cluster_enabled);
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("1024"), Some(1024));
        assert_eq!(parse_memory("1kb"), Some(1024));
        assert_eq!(parse_memory("2mb"), Some(2 * 1024 * 1024));
        assert_eq!(parse_memory("1gb"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory("junk"), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile_path("fiscus-config-test.conf");
        writeln!(file.1, "# comment").unwrap();
        writeln!(file.1, "port 7000").unwrap();
        writeln!(file.1, "maxmemory 64mb").unwrap();
        writeln!(file.1, "maxmemory-policy allkeys-lru").unwrap();
        writeln!(file.1, "cluster-enabled yes").unwrap();
        writeln!(file.1, "unknown-key whatever").unwrap();
        file.1.flush().unwrap();

        let config = Config::load_from_file(&file.0).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.maxmemory, 64 * 1024 * 1024);
        assert_eq!(config.maxmemory_policy, MaxMemoryPolicy::AllKeysLru);
        assert!(config.cluster_enabled);

        std::fs::remove_file(&file.0).ok();
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load_from_file(Path::new("/nonexistent/fiscus.conf")).is_err());
    }

    fn tempfile_path(name: &str) -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(name);
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
