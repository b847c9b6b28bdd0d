//! Background TTL sweeper.
//!
//! Lazy expiry on access keeps readers correct; this task guarantees
//! eventual removal of keys nobody reads again.

use super::Db;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;
use tracing::{info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often to run a sweep
    pub cycle_interval: Duration,
    /// Maximum keys to remove per sweep
    pub keys_per_cycle: usize,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            keys_per_cycle: 1000,
        }
    }
}

/// Background expiration sweeper.
#[derive(Debug)]
pub struct ExpiryManager {
    db: Arc<Db>,
    config: ExpiryConfig,
    running: AtomicBool,
    shutdown: Arc<Notify>,
}

impl ExpiryManager {
    /// Create a sweeper with the default cadence.
    pub fn new(db: Arc<Db>) -> Self {
        Self::with_config(db, ExpiryConfig::default())
    }

    /// Create a sweeper with a custom configuration.
    pub fn with_config(db: Arc<Db>, config: ExpiryConfig) -> Self {
        Self {
            db,
            config,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the background task. Returns its join handle.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Signal the sweeper to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Check if the sweeper is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run(&self) {
        info!("expiry sweeper started");

        let mut interval = time::interval(self.config.cycle_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a sweep never races
        // server startup.
        interval.tick().await;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.db.expire_keys(self.config.keys_per_cycle);
                    if removed > 0 {
                        trace!(removed, "expiry sweep removed keys");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        info!("expiry sweeper stopped");
    }

    /// Run one sweep immediately (tests).
    pub fn force_cycle(&self) -> usize {
        self.db.expire_keys(self.config.keys_per_cycle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::cluster::ClusterManager;
    use crate::server::pubsub::PubSubHub;
    use crate::storage::MemoryManager;
    use crate::types::{Expiry, FiscusValue, Key};

    fn test_db() -> Arc<Db> {
        Arc::new(Db::new(
            Arc::new(PubSubHub::new()),
            Arc::new(ClusterManager::standalone()),
            Arc::new(MemoryManager::default()),
        ))
    }

    #[tokio::test]
    async fn test_force_cycle_removes_expired() {
        let db = test_db();
        for i in 0..10 {
            db.set_with_expiry(
                Key::from(format!("key{i}")),
                FiscusValue::string("value"),
                Expiry::At(0),
            );
        }
        for i in 10..20 {
            db.set(Key::from(format!("key{i}")), FiscusValue::string("value"));
        }

        let manager = Arc::new(ExpiryManager::new(db.clone()));
        let removed = manager.force_cycle();

        assert_eq!(removed, 10);
        assert_eq!(db.len(), 10);
    }

    #[tokio::test]
    async fn test_sweeper_lifecycle() {
        let db = test_db();
        let manager = Arc::new(ExpiryManager::with_config(
            db,
            ExpiryConfig {
                cycle_interval: Duration::from_millis(10),
                ..Default::default()
            },
        ));

        let handle = manager.clone().start();
        time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_running());

        manager.stop();
        handle.await.unwrap();
        assert!(!manager.is_running());
    }
}
