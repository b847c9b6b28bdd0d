//! The fiscus server.
//!
//! Owns the listener, the keyspace and its collaborators, and the
//! background sweepers (TTL, pub/sub idle GC, cluster heartbeats). All
//! sweepers observe the shutdown signal; on SIGINT/SIGTERM the accept
//! loop stops, in-flight connections drain under a bounded deadline, and
//! a final snapshot is written when configured.

pub mod cluster;
pub mod config;
mod connection;
pub mod pubsub;
mod state;

pub use cluster::{ClusterManager, SharedClusterManager};
pub use config::{Config, ConfigError, LogLevel, MaxMemoryPolicy};
pub use connection::Connection;
pub use pubsub::{PubSubHub, SharedPubSubHub};
pub use state::ClientState;

use crate::Result;
use crate::commands::{CommandExecutor, preload_financial_scripts};
use crate::storage::{
    Db, ExpiryConfig, ExpiryManager, MemoryManager, SnapshotLoader, SnapshotWriter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore};
use tracing::{error, info, warn};

/// Deadline for draining connections at shutdown.
const SHUTDOWN_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// The main server.
#[derive(Debug)]
pub struct Server {
    config: Config,
    db: Arc<Db>,
    executor: Arc<CommandExecutor>,
    expiry_manager: Arc<ExpiryManager>,
    pubsub: SharedPubSubHub,
    cluster: SharedClusterManager,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    connection_count: AtomicU64,
    total_connections: AtomicU64,
    connection_semaphore: Arc<Semaphore>,
    /// Bound address, available once `run` has bound the listener
    bound_addr: parking_lot::Mutex<Option<SocketAddr>>,
    bound: Arc<Notify>,
}

impl Server {
    /// Create a new server from a configuration.
    pub fn new(config: Config) -> Self {
        let pubsub = Arc::new(PubSubHub::new());

        let cluster = if config.cluster_enabled {
            let node_id = if config.cluster_node_id.is_empty() {
                format!("fiscus-{}-{}", config.port, std::process::id())
            } else {
                config.cluster_node_id.clone()
            };
            Arc::new(ClusterManager::new(node_id, config.bind.clone(), config.port))
        } else {
            Arc::new(ClusterManager::standalone())
        };

        let memory = Arc::new(MemoryManager::new(config.maxmemory, config.maxmemory_policy));
        let db = Arc::new(Db::new(pubsub.clone(), cluster.clone(), memory));
        db.set_snapshot_path(config.snapshot_path.clone());

        let executor = Arc::new(CommandExecutor::new(db.clone()));
        let expiry_manager = Arc::new(ExpiryManager::with_config(
            db.clone(),
            ExpiryConfig {
                cycle_interval: Duration::from_secs(config.expire_interval_secs.max(1)),
                ..Default::default()
            },
        ));

        let connection_semaphore =
            Arc::new(Semaphore::new(config.max_clients.min(crate::MAX_CLIENTS)));

        Self {
            config,
            db,
            executor,
            expiry_manager,
            pubsub,
            cluster,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            connection_count: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            connection_semaphore,
            bound_addr: parking_lot::Mutex::new(None),
            bound: Arc::new(Notify::new()),
        }
    }

    /// Run the server until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        // Rehydrate from the last snapshot if one exists
        if let Some(path) = &self.config.snapshot_path {
            if path.exists() {
                match std::fs::File::open(path) {
                    Ok(mut file) => match SnapshotLoader::load(&self.db, &mut file) {
                        Ok(result) => info!(
                            keys = result.keys_loaded,
                            expired = result.keys_expired,
                            documents = result.documents_loaded,
                            "snapshot loaded on startup"
                        ),
                        Err(e) => error!(error = %e, "failed to load snapshot"),
                    },
                    Err(e) => error!(error = %e, "failed to open snapshot file"),
                }
            }
        }

        let scripts = preload_financial_scripts();
        info!(count = scripts.len(), "financial scripts available");

        let addr: SocketAddr = format!("{}:{}", self.config.bind, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.bound_addr.lock() = Some(local_addr);
        self.bound.notify_waiters();
        info!(addr = %local_addr, "ready to accept connections");

        self.running.store(true, Ordering::SeqCst);

        // Background sweepers
        let expiry_handle = self.expiry_manager.clone().start();
        let pubsub_handle = self.pubsub.clone().start_sweeper();
        let heartbeat_handle = if self.cluster.is_enabled() {
            Some(self.cluster.clone().start_heartbeat())
        } else {
            None
        };

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            if let Err(e) = socket.set_nodelay(true) {
                                warn!(error = %e, "failed to set TCP_NODELAY");
                            }

                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(peer = %peer_addr, "max clients reached, rejecting");
                                    continue;
                                }
                            };

                            self.connection_count.fetch_add(1, Ordering::Relaxed);
                            let conn_id = self.total_connections.fetch_add(1, Ordering::Relaxed) + 1;

                            let server = self.clone();
                            tokio::spawn(async move {
                                let _permit = permit;

                                let mut connection = Connection::new(
                                    socket,
                                    peer_addr,
                                    conn_id,
                                    server.executor.clone(),
                                    server.config.timeout,
                                );

                                if let Err(e) = connection.run().await {
                                    error!(peer = %peer_addr, error = %e, "connection error");
                                }

                                server.connection_count.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Drain in-flight connections under a deadline
        let active = self.connection_count.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "waiting for connections to drain");
        }
        let start = Instant::now();
        while self.connection_count.load(Ordering::Relaxed) > 0 {
            if start.elapsed() > SHUTDOWN_DRAIN_DEADLINE {
                warn!(
                    remaining = self.connection_count.load(Ordering::Relaxed),
                    "drain deadline reached"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Stop sweepers
        self.expiry_manager.stop();
        expiry_handle.await.ok();
        self.pubsub.stop_sweeper();
        pubsub_handle.await.ok();
        if let Some(handle) = heartbeat_handle {
            self.cluster.stop_heartbeat();
            handle.await.ok();
        }

        // Final best-effort snapshot
        if let Some(path) = &self.config.snapshot_path {
            let tmp = path.with_extension("tmp");
            let result = std::fs::File::create(&tmp)
                .map_err(crate::error::StorageError::Io)
                .map_err(crate::error::Error::from)
                .and_then(|mut file| SnapshotWriter::save(&self.db, &mut file))
                .and_then(|_| {
                    std::fs::rename(&tmp, path)
                        .map_err(crate::error::StorageError::Io)
                        .map_err(crate::error::Error::from)
                });
            match result {
                Ok(()) => info!("final snapshot saved"),
                Err(e) => error!(error = %e, "failed to save final snapshot"),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("fiscus exiting");

        Ok(())
    }

    /// Signal the server to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The bound address, once `run` has bound the listener.
    ///
    /// Useful for tests binding port 0.
    pub async fn wait_until_bound(&self) -> SocketAddr {
        loop {
            let notified = self.bound.notified();
            if let Some(addr) = *self.bound_addr.lock() {
                return addr;
            }
            notified.await;
        }
    }

    /// Active connection count.
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// The keyspace.
    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
