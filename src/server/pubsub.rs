//! Publish/subscribe fan-out.
//!
//! Two routing tables map exact channels and glob patterns to broadcast
//! senders. Each subscribing connection holds receivers; dropping a
//! receiver (connection close) is an implicit unsubscribe and never
//! aborts fan-out to other subscribers. Per-publisher message order is
//! preserved by the broadcast channels.
//!
//! A background sweeper reclaims routing entries that have lost all
//! receivers or have been idle beyond a generous threshold.

use crate::types::glob_match;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info};

/// Maximum buffered messages per channel before slow receivers lag.
const CHANNEL_CAPACITY: usize = 1024;

/// Idle threshold after which a routing entry is reclaimed.
const IDLE_THRESHOLD: Duration = Duration::from_secs(30 * 60);

/// Sweeper cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A message delivered to subscribers.
#[derive(Debug, Clone)]
pub struct PubSubMessage {
    /// The channel the message was published to
    pub channel: Bytes,
    /// The payload
    pub payload: Bytes,
    /// The pattern that matched, for pattern subscriptions
    pub pattern: Option<Bytes>,
}

/// One routing entry: a broadcast sender plus activity bookkeeping.
#[derive(Debug)]
struct Route {
    sender: broadcast::Sender<PubSubMessage>,
    last_activity: AtomicI64,
}

impl Route {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            last_activity: AtomicI64::new(crate::types::current_timestamp_ms()),
        }
    }

    fn touch(&self) {
        self.last_activity
            .store(crate::types::current_timestamp_ms(), Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_activity.load(Ordering::Relaxed);
        let now = crate::types::current_timestamp_ms();
        Duration::from_millis(now.saturating_sub(last).max(0) as u64)
    }
}

/// The pub/sub hub.
#[derive(Debug, Default)]
pub struct PubSubHub {
    /// Exact channel name -> route
    channels: DashMap<Bytes, Arc<Route>>,
    /// Glob pattern -> route
    patterns: DashMap<Bytes, Arc<Route>>,
    /// Sweeper shutdown flag
    stopped: AtomicBool,
    /// Sweeper shutdown signal
    shutdown: Notify,
}

impl PubSubHub {
    /// Create a new hub.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            patterns: DashMap::new(),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Subscribe to an exact channel. Returns a receiver for its messages.
    pub fn subscribe(&self, channel: Bytes) -> broadcast::Receiver<PubSubMessage> {
        let route = self
            .channels
            .entry(channel)
            .or_insert_with(|| Arc::new(Route::new()));
        route.touch();
        route.sender.subscribe()
    }

    /// Subscribe to a glob pattern. Returns a receiver.
    pub fn psubscribe(&self, pattern: Bytes) -> broadcast::Receiver<PubSubMessage> {
        let route = self
            .patterns
            .entry(pattern)
            .or_insert_with(|| Arc::new(Route::new()));
        route.touch();
        route.sender.subscribe()
    }

    /// Drop a channel route once its last receiver is gone.
    pub fn unsubscribe(&self, channel: &Bytes) {
        if let Some(route) = self.channels.get(channel) {
            if route.sender.receiver_count() == 0 {
                drop(route);
                self.channels.remove(channel);
            }
        }
    }

    /// Drop a pattern route once its last receiver is gone.
    pub fn punsubscribe(&self, pattern: &Bytes) {
        if let Some(route) = self.patterns.get(pattern) {
            if route.sender.receiver_count() == 0 {
                drop(route);
                self.patterns.remove(pattern);
            }
        }
    }

    /// Publish a payload to a channel.
    ///
    /// Delivers to exact subscribers of the channel and to every pattern
    /// route whose pattern matches the channel name. Returns the total
    /// number of receivers the message was handed to.
    pub fn publish(&self, channel: Bytes, payload: Bytes) -> usize {
        let mut delivered = 0;

        if let Some(route) = self.channels.get(&channel) {
            route.touch();
            let msg = PubSubMessage {
                channel: channel.clone(),
                payload: payload.clone(),
                pattern: None,
            };
            delivered += route.sender.send(msg).unwrap_or(0);
        }

        for entry in self.patterns.iter() {
            if glob_match(entry.key(), &channel) {
                entry.value().touch();
                let msg = PubSubMessage {
                    channel: channel.clone(),
                    payload: payload.clone(),
                    pattern: Some(entry.key().clone()),
                };
                delivered += entry.value().sender.send(msg).unwrap_or(0);
            }
        }

        delivered
    }

    /// Number of subscribers of an exact channel.
    pub fn numsub(&self, channel: &Bytes) -> usize {
        self.channels
            .get(channel)
            .map(|route| route.sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of pattern routes.
    pub fn numpat(&self) -> usize {
        self.patterns.len()
    }

    /// Active channels, optionally filtered by a glob pattern.
    pub fn channels(&self, pattern: Option<&Bytes>) -> Vec<Bytes> {
        self.channels
            .iter()
            .filter(|entry| entry.value().sender.receiver_count() > 0)
            .filter(|entry| pattern.map_or(true, |p| glob_match(p, entry.key())))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Start the idle-route sweeper. Returns its join handle.
    pub fn start_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("pub/sub idle sweeper started");
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if self.stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        self.sweep_idle();
                    }
                    _ = self.shutdown.notified() => break,
                }
            }
            info!("pub/sub idle sweeper stopped");
        })
    }

    /// Stop the sweeper.
    pub fn stop_sweeper(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Reclaim routes with no receivers or idle past the threshold.
    pub fn sweep_idle(&self) {
        let before = self.channels.len() + self.patterns.len();
        self.channels.retain(|_, route| {
            route.sender.receiver_count() > 0 && route.idle_for() < IDLE_THRESHOLD
        });
        self.patterns.retain(|_, route| {
            route.sender.receiver_count() > 0 && route.idle_for() < IDLE_THRESHOLD
        });
        let removed = before - (self.channels.len() + self.patterns.len());
        if removed > 0 {
            debug!(removed, "reclaimed idle pub/sub routes");
        }
    }
}

/// Shared hub reference.
pub type SharedPubSubHub = Arc<PubSubHub>;
