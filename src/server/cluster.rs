//! Horizontal partitioning map.
//!
//! A fixed space of 16384 slots is distributed over primary nodes;
//! replicas attach to a primary and own no slots. The key-to-slot hash is
//! CRC16-CCITT truncated mod 16384, with `{hash-tag}` extraction so
//! related keys can be pinned to one slot.
//!
//! A heartbeat task escalates node states on missed heartbeats:
//! `connected` -> `disconnected` (transient) -> `suspected-fail` -> `fail`,
//! and back to `connected` on recovery. Failover promotes a replica,
//! transfers the slot set, marks the old primary failed, and bumps the
//! epoch.

use crate::types::{Timestamp, current_timestamp_ms};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Total number of slots.
pub const CLUSTER_SLOTS: u16 = 16384;

/// Slot type (0-16383).
pub type Slot = u16;

/// Calculate the slot for a key.
///
/// Honors hash tags: for `{tag}rest`, only `tag` is hashed.
#[must_use]
pub fn key_slot(key: &[u8]) -> Slot {
    match extract_hash_tag(key) {
        Some(tag) => crc16_ccitt(tag) % CLUSTER_SLOTS,
        None => crc16_ccitt(key) % CLUSTER_SLOTS,
    }
}

/// Extract the hash tag: the substring between the first `{` and the
/// first `}` after it, if non-empty.
fn extract_hash_tag(key: &[u8]) -> Option<&[u8]> {
    let start = key.iter().position(|&b| b == b'{')?;
    let end = key[start + 1..].iter().position(|&b| b == b'}')?;
    if end > 0 {
        Some(&key[start + 1..start + 1 + end])
    } else {
        None
    }
}

/// CRC16-CCITT, table-driven.
fn crc16_ccitt(data: &[u8]) -> u16 {
    const CRC16_TABLE: [u16; 256] = [
        0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50a5, 0x60c6, 0x70e7, 0x8108, 0x9129, 0xa14a,
        0xb16b, 0xc18c, 0xd1ad, 0xe1ce, 0xf1ef, 0x1231, 0x0210, 0x3273, 0x2252, 0x52b5, 0x4294,
        0x72f7, 0x62d6, 0x9339, 0x8318, 0xb37b, 0xa35a, 0xd3bd, 0xc39c, 0xf3ff, 0xe3de, 0x2462,
        0x3443, 0x0420, 0x1401, 0x64e6, 0x74c7, 0x44a4, 0x5485, 0xa56a, 0xb54b, 0x8528, 0x9509,
        0xe5ee, 0xf5cf, 0xc5ac, 0xd58d, 0x3653, 0x2672, 0x1611, 0x0630, 0x76d7, 0x66f6, 0x5695,
        0x46b4, 0xb75b, 0xa77a, 0x9719, 0x8738, 0xf7df, 0xe7fe, 0xd79d, 0xc7bc, 0x48c4, 0x58e5,
        0x6886, 0x78a7, 0x0840, 0x1861, 0x2802, 0x3823, 0xc9cc, 0xd9ed, 0xe98e, 0xf9af, 0x8948,
        0x9969, 0xa90a, 0xb92b, 0x5af5, 0x4ad4, 0x7ab7, 0x6a96, 0x1a71, 0x0a50, 0x3a33, 0x2a12,
        0xdbfd, 0xcbdc, 0xfbbf, 0xeb9e, 0x9b79, 0x8b58, 0xbb3b, 0xab1a, 0x6ca6, 0x7c87, 0x4ce4,
        0x5cc5, 0x2c22, 0x3c03, 0x0c60, 0x1c41, 0xedae, 0xfd8f, 0xcdec, 0xddcd, 0xad2a, 0xbd0b,
        0x8d68, 0x9d49, 0x7e97, 0x6eb6, 0x5ed5, 0x4ef4, 0x3e13, 0x2e32, 0x1e51, 0x0e70, 0xff9f,
        0xefbe, 0xdfdd, 0xcffc, 0xbf1b, 0xaf3a, 0x9f59, 0x8f78, 0x9188, 0x81a9, 0xb1ca, 0xa1eb,
        0xd10c, 0xc12d, 0xf14e, 0xe16f, 0x1080, 0x00a1, 0x30c2, 0x20e3, 0x5004, 0x4025, 0x7046,
        0x6067, 0x83b9, 0x9398, 0xa3fb, 0xb3da, 0xc33d, 0xd31c, 0xe37f, 0xf35e, 0x02b1, 0x1290,
        0x22f3, 0x32d2, 0x4235, 0x5214, 0x6277, 0x7256, 0xb5ea, 0xa5cb, 0x95a8, 0x8589, 0xf56e,
        0xe54f, 0xd52c, 0xc50d, 0x34e2, 0x24c3, 0x14a0, 0x0481, 0x7466, 0x6447, 0x5424, 0x4405,
        0xa7db, 0xb7fa, 0x8799, 0x97b8, 0xe75f, 0xf77e, 0xc71d, 0xd73c, 0x26d3, 0x36f2, 0x0691,
        0x16b0, 0x6657, 0x7676, 0x4615, 0x5634, 0xd94c, 0xc96d, 0xf90e, 0xe92f, 0x99c8, 0x89e9,
        0xb98a, 0xa9ab, 0x5844, 0x4865, 0x7806, 0x6827, 0x18c0, 0x08e1, 0x3882, 0x28a3, 0xcb7d,
        0xdb5c, 0xeb3f, 0xfb1e, 0x8bf9, 0x9bd8, 0xabbb, 0xbb9a, 0x4a75, 0x5a54, 0x6a37, 0x7a16,
        0x0af1, 0x1ad0, 0x2ab3, 0x3a92, 0xfd2e, 0xed0f, 0xdd6c, 0xcd4d, 0xbdaa, 0xad8b, 0x9de8,
        0x8dc9, 0x7c26, 0x6c07, 0x5c64, 0x4c45, 0x3ca2, 0x2c83, 0x1ce0, 0x0cc1, 0xef1f, 0xff3e,
        0xcf5d, 0xdf7c, 0xaf9b, 0xbfba, 0x8fd9, 0x9ff8, 0x6e17, 0x7e36, 0x4e55, 0x5e74, 0x2e93,
        0x3eb2, 0x0ed1, 0x1ef0,
    ];

    let mut crc: u16 = 0;
    for &byte in data {
        let index = ((crc >> 8) ^ u16::from(byte)) as usize;
        crc = (crc << 8) ^ CRC16_TABLE[index];
    }
    crc
}

/// Node role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Owns slots and serves writes
    Primary,
    /// Attached to a primary; owns no slots
    Replica,
}

impl NodeRole {
    /// Wire name of the role.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "master",
            Self::Replica => "slave",
        }
    }
}

/// Node liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Healthy and reachable
    Connected,
    /// Observed unresponsive, not yet timed out
    Disconnected,
    /// Timed out; suspected failing
    SuspectedFail,
    /// Confirmed failed
    Fail,
}

impl NodeState {
    /// Wire name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::SuspectedFail => "fail?",
            Self::Fail => "fail",
        }
    }
}

/// A known cluster node.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Node identifier
    pub id: String,
    /// Host address
    pub address: String,
    /// Port
    pub port: u16,
    /// Role
    pub role: NodeRole,
    /// Liveness state
    pub state: NodeState,
    /// Slots owned (empty for replicas)
    pub slots: Vec<Slot>,
    /// Primary this node replicates, if a replica
    pub replica_of: Option<String>,
    /// Monotonic epoch, bumped on failover
    pub epoch: u64,
    /// Last heartbeat receipt (milliseconds since epoch)
    pub last_heartbeat: Timestamp,
}

impl ClusterNode {
    /// host:port form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Contiguous slot ranges for CLUSTER NODES / CLUSTER SLOTS output.
    pub fn slot_ranges(&self) -> Vec<(Slot, Slot)> {
        let mut slots = self.slots.clone();
        slots.sort_unstable();

        let mut ranges = Vec::new();
        let mut iter = slots.into_iter();
        let Some(first) = iter.next() else {
            return ranges;
        };
        let mut start = first;
        let mut prev = first;
        for slot in iter {
            if slot != prev + 1 {
                ranges.push((start, prev));
                start = slot;
            }
            prev = slot;
        }
        ranges.push((start, prev));
        ranges
    }

    /// CLUSTER NODES line for this node.
    pub fn to_nodes_line(&self, myself: bool) -> String {
        let mut flags = Vec::new();
        if myself {
            flags.push("myself");
        }
        flags.push(self.role.as_str());
        match self.state {
            NodeState::SuspectedFail => flags.push("fail?"),
            NodeState::Fail => flags.push("fail"),
            _ => {}
        }

        let replica_of = self.replica_of.as_deref().unwrap_or("-");
        let link = match self.state {
            NodeState::Connected => "connected",
            _ => "disconnected",
        };
        let slots: Vec<String> = self
            .slot_ranges()
            .iter()
            .map(|(start, end)| {
                if start == end {
                    format!("{start}")
                } else {
                    format!("{start}-{end}")
                }
            })
            .collect();

        format!(
            "{} {} {} {} 0 0 {} {} {}",
            self.id,
            self.addr(),
            flags.join(","),
            replica_of,
            self.epoch,
            link,
            slots.join(" ")
        )
        .trim_end()
        .to_string()
    }
}

/// Result of checking slot ownership for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCheck {
    /// This node owns the slot (or cluster mode is off)
    Owned,
    /// A healthy remote primary owns the slot
    Moved {
        /// The slot
        slot: Slot,
        /// Owner address, host:port
        addr: String,
    },
    /// The slot's owner is unknown or not connected
    Unavailable,
}

/// Heartbeat cadence and escalation thresholds.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Cadence of the heartbeat task
    pub interval: Duration,
    /// Missed-heartbeat window after which a node is suspected failing
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
struct Topology {
    nodes: HashMap<String, ClusterNode>,
    /// slot -> owning primary's node id
    slot_owners: Vec<Option<String>>,
}

/// The cluster routing map.
#[derive(Debug)]
pub struct ClusterManager {
    enabled: bool,
    self_id: String,
    topology: RwLock<Topology>,
    current_epoch: AtomicU64,
    heartbeat: HeartbeatConfig,
    stopped: AtomicBool,
    shutdown: Notify,
}

/// Shared cluster manager reference.
pub type SharedClusterManager = Arc<ClusterManager>;

impl ClusterManager {
    /// Create a disabled (standalone) manager: every key is local.
    pub fn standalone() -> Self {
        Self {
            enabled: false,
            self_id: String::new(),
            topology: RwLock::new(Topology {
                nodes: HashMap::new(),
                slot_owners: vec![None; CLUSTER_SLOTS as usize],
            }),
            current_epoch: AtomicU64::new(0),
            heartbeat: HeartbeatConfig::default(),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Create an enabled manager with this node as a primary owning the
    /// whole slot space.
    pub fn new(self_id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self::with_heartbeat(self_id, address, port, HeartbeatConfig::default())
    }

    /// Create an enabled manager with custom heartbeat thresholds.
    pub fn with_heartbeat(
        self_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        heartbeat: HeartbeatConfig,
    ) -> Self {
        let self_id = self_id.into();
        let node = ClusterNode {
            id: self_id.clone(),
            address: address.into(),
            port,
            role: NodeRole::Primary,
            state: NodeState::Connected,
            slots: (0..CLUSTER_SLOTS).collect(),
            replica_of: None,
            epoch: 1,
            last_heartbeat: current_timestamp_ms(),
        };

        let mut topology = Topology {
            nodes: HashMap::new(),
            slot_owners: vec![Some(self_id.clone()); CLUSTER_SLOTS as usize],
        };
        topology.nodes.insert(self_id.clone(), node);

        Self {
            enabled: true,
            self_id,
            topology: RwLock::new(topology),
            current_epoch: AtomicU64::new(1),
            heartbeat,
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Whether cluster mode is on.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// This node's id.
    #[inline]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Current cluster epoch.
    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Add a primary node owning the given slots.
    ///
    /// Slots it claims are transferred from their previous owners.
    pub fn add_node(
        &self,
        id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        slots: Vec<Slot>,
    ) -> bool {
        let id = id.into();
        let mut topo = self.topology.write();
        if topo.nodes.contains_key(&id) {
            return false;
        }

        for &slot in &slots {
            if let Some(prev_owner) = topo.slot_owners[slot as usize].clone() {
                if let Some(prev) = topo.nodes.get_mut(&prev_owner) {
                    prev.slots.retain(|&s| s != slot);
                }
            }
            topo.slot_owners[slot as usize] = Some(id.clone());
        }

        let node = ClusterNode {
            id: id.clone(),
            address: address.into(),
            port,
            role: NodeRole::Primary,
            state: NodeState::Connected,
            slots,
            replica_of: None,
            epoch: self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1,
            last_heartbeat: current_timestamp_ms(),
        };
        info!(node = %id, addr = %node.addr(), "node added to cluster");
        topo.nodes.insert(id, node);
        true
    }

    /// Attach a replica to a primary. Replicas own no slots.
    pub fn add_replica(
        &self,
        primary_id: &str,
        id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> bool {
        let id = id.into();
        let mut topo = self.topology.write();
        match topo.nodes.get(primary_id) {
            Some(primary) if primary.role == NodeRole::Primary => {}
            _ => return false,
        }
        if topo.nodes.contains_key(&id) {
            return false;
        }

        let node = ClusterNode {
            id: id.clone(),
            address: address.into(),
            port,
            role: NodeRole::Replica,
            state: NodeState::Connected,
            slots: Vec::new(),
            replica_of: Some(primary_id.to_string()),
            epoch: self.current_epoch.load(Ordering::SeqCst),
            last_heartbeat: current_timestamp_ms(),
        };
        info!(replica = %id, primary = %primary_id, "replica attached");
        topo.nodes.insert(id, node);
        true
    }

    /// Remove a node and release its slots.
    pub fn remove_node(&self, id: &str) -> bool {
        let mut topo = self.topology.write();
        let Some(node) = topo.nodes.remove(id) else {
            return false;
        };
        for slot in node.slots {
            topo.slot_owners[slot as usize] = None;
        }
        // Detach replicas of a removed primary
        for other in topo.nodes.values_mut() {
            if other.replica_of.as_deref() == Some(id) {
                other.replica_of = None;
            }
        }
        info!(node = %id, "node removed from cluster");
        true
    }

    /// Redistribute all 16384 slots evenly across the primaries.
    ///
    /// Any remainder is spread over the first `16384 mod N` primaries in
    /// id order.
    pub fn rebalance(&self) -> bool {
        let mut topo = self.topology.write();

        let mut primary_ids: Vec<String> = topo
            .nodes
            .values()
            .filter(|n| n.role == NodeRole::Primary)
            .map(|n| n.id.clone())
            .collect();
        if primary_ids.is_empty() {
            return false;
        }
        primary_ids.sort();

        let per_node = CLUSTER_SLOTS as usize / primary_ids.len();
        let remainder = CLUSTER_SLOTS as usize % primary_ids.len();

        for node in topo.nodes.values_mut() {
            node.slots.clear();
        }

        let mut slot: Slot = 0;
        for (i, id) in primary_ids.iter().enumerate() {
            let count = per_node + usize::from(i < remainder);
            let mut assigned = Vec::with_capacity(count);
            for _ in 0..count {
                topo.slot_owners[slot as usize] = Some(id.clone());
                assigned.push(slot);
                slot = slot.wrapping_add(1);
            }
            if let Some(node) = topo.nodes.get_mut(id) {
                node.slots = assigned;
            }
        }

        info!(primaries = primary_ids.len(), "cluster slots rebalanced");
        true
    }

    /// Promote a replica of `primary_id`, transferring its slot set.
    ///
    /// The old primary is marked failed and the epoch is bumped.
    /// Returns the promoted replica's id.
    pub fn failover(&self, primary_id: &str) -> Option<String> {
        let mut topo = self.topology.write();

        let slots = match topo.nodes.get(primary_id) {
            Some(node) if node.role == NodeRole::Primary => node.slots.clone(),
            _ => return None,
        };

        let replica_id = topo
            .nodes
            .values()
            .filter(|n| {
                n.role == NodeRole::Replica
                    && n.replica_of.as_deref() == Some(primary_id)
                    && n.state == NodeState::Connected
            })
            .map(|n| n.id.clone())
            .min()?;

        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;

        for &slot in &slots {
            topo.slot_owners[slot as usize] = Some(replica_id.clone());
        }

        if let Some(replica) = topo.nodes.get_mut(&replica_id) {
            replica.role = NodeRole::Primary;
            replica.replica_of = None;
            replica.slots = slots;
            replica.epoch = new_epoch;
        }
        if let Some(old) = topo.nodes.get_mut(primary_id) {
            old.state = NodeState::Fail;
            old.slots = Vec::new();
        }

        warn!(
            old_primary = %primary_id,
            new_primary = %replica_id,
            epoch = new_epoch,
            "failover completed"
        );
        Some(replica_id)
    }

    /// Record a heartbeat from a node; recovers it to connected.
    pub fn record_heartbeat(&self, id: &str) -> bool {
        let mut topo = self.topology.write();
        match topo.nodes.get_mut(id) {
            Some(node) => {
                node.last_heartbeat = current_timestamp_ms();
                if node.state != NodeState::Connected {
                    info!(node = %id, "node recovered");
                    node.state = NodeState::Connected;
                }
                true
            }
            None => false,
        }
    }

    /// One escalation pass over the node table.
    ///
    /// Thresholds: twice the cadence marks a node `disconnected`; the
    /// timeout marks it `suspected-fail`; twice the timeout marks `fail`.
    pub fn escalate_states(&self) {
        let now = current_timestamp_ms();
        let disconnect_after = (self.heartbeat.interval.as_millis() * 2) as i64;
        let suspect_after = self.heartbeat.timeout.as_millis() as i64;
        let fail_after = suspect_after * 2;

        let mut topo = self.topology.write();
        for node in topo.nodes.values_mut() {
            if node.id == self.self_id {
                node.last_heartbeat = now;
                continue;
            }
            let elapsed = now - node.last_heartbeat;
            let next = if elapsed >= fail_after {
                NodeState::Fail
            } else if elapsed >= suspect_after {
                NodeState::SuspectedFail
            } else if elapsed >= disconnect_after {
                NodeState::Disconnected
            } else {
                NodeState::Connected
            };
            if next != node.state {
                warn!(node = %node.id, from = node.state.as_str(), to = next.as_str(),
                      "node state escalated");
                node.state = next;
            }
        }
    }

    /// Start the heartbeat/escalation task. Returns its join handle.
    pub fn start_heartbeat(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("cluster heartbeat task started");
            let mut interval = tokio::time::interval(self.heartbeat.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if self.stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        self.escalate_states();
                    }
                    _ = self.shutdown.notified() => break,
                }
            }
            info!("cluster heartbeat task stopped");
        })
    }

    /// Stop the heartbeat task.
    pub fn stop_heartbeat(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Routing contract: where should a key be served?
    pub fn check_key(&self, key: &[u8]) -> SlotCheck {
        if !self.enabled {
            return SlotCheck::Owned;
        }
        self.check_slot(key_slot(key))
    }

    /// Routing contract for an already-computed slot.
    pub fn check_slot(&self, slot: Slot) -> SlotCheck {
        if !self.enabled {
            return SlotCheck::Owned;
        }

        let topo = self.topology.read();
        let Some(owner_id) = topo.slot_owners[slot as usize].as_ref() else {
            return SlotCheck::Unavailable;
        };
        if *owner_id == self.self_id {
            return SlotCheck::Owned;
        }
        match topo.nodes.get(owner_id) {
            Some(owner) if owner.state == NodeState::Connected => SlotCheck::Moved {
                slot,
                addr: owner.addr(),
            },
            _ => SlotCheck::Unavailable,
        }
    }

    /// Snapshot of all known nodes.
    pub fn nodes(&self) -> Vec<ClusterNode> {
        let mut nodes: Vec<ClusterNode> = self.topology.read().nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Fetch one node.
    pub fn node(&self, id: &str) -> Option<ClusterNode> {
        self.topology.read().nodes.get(id).cloned()
    }

    /// CLUSTER INFO key-value lines.
    pub fn info(&self) -> String {
        let topo = self.topology.read();
        let assigned = topo.slot_owners.iter().filter(|o| o.is_some()).count();
        let known = topo.nodes.len();
        let primaries = topo
            .nodes
            .values()
            .filter(|n| n.role == NodeRole::Primary && n.state != NodeState::Fail)
            .count();
        let state = if self.enabled && assigned == CLUSTER_SLOTS as usize {
            "ok"
        } else if self.enabled {
            "fail"
        } else {
            "disabled"
        };

        format!(
            "cluster_enabled:{}\r\ncluster_state:{}\r\ncluster_slots_assigned:{}\r\n\
             cluster_known_nodes:{}\r\ncluster_size:{}\r\ncluster_current_epoch:{}\r\n",
            u8::from(self.enabled),
            state,
            assigned,
            known,
            primaries,
            self.current_epoch.load(Ordering::SeqCst),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_primary_cluster() -> ClusterManager {
        let cm = ClusterManager::new("node-a", "10.0.0.1", 6379);
        cm.add_node("node-b", "10.0.0.2", 6379, vec![]);
        cm.add_node("node-c", "10.0.0.3", 6379, vec![]);
        cm.rebalance();
        cm
    }

    #[test]
    fn test_key_slot_deterministic() {
        let s1 = key_slot(b"user:123");
        let s2 = key_slot(b"user:123");
        assert_eq!(s1, s2);
        assert!(s1 < CLUSTER_SLOTS);
    }

    #[test]
    fn test_hash_tag_pins_slot() {
        assert_eq!(key_slot(b"{user:1}:balance"), key_slot(b"{user:1}:orders"));
        // Empty tag falls back to whole key
        assert_ne!(key_slot(b"{}:a"), key_slot(b"{}:b"));
    }

    #[test]
    fn test_standalone_owns_everything() {
        let cm = ClusterManager::standalone();
        assert!(!cm.is_enabled());
        assert_eq!(cm.check_key(b"anything"), SlotCheck::Owned);
    }

    #[test]
    fn test_initial_node_owns_all_slots() {
        let cm = ClusterManager::new("node-a", "10.0.0.1", 6379);
        assert_eq!(cm.check_key(b"k"), SlotCheck::Owned);
        assert_eq!(cm.nodes()[0].slots.len(), CLUSTER_SLOTS as usize);
    }

    #[test]
    fn test_rebalance_even_distribution() {
        let cm = three_primary_cluster();
        let nodes = cm.nodes();
        let counts: Vec<usize> = nodes.iter().map(|n| n.slots.len()).collect();

        let total: usize = counts.iter().sum();
        assert_eq!(total, CLUSTER_SLOTS as usize);

        // 16384 = 3 * 5461 + 1: remainder goes to the first primary
        let mut sorted = counts.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![5461, 5461, 5462]);

        // Every slot owned by exactly one primary
        for slot in 0..CLUSTER_SLOTS {
            let owners = nodes
                .iter()
                .filter(|n| n.slots.contains(&slot))
                .count();
            assert_eq!(owners, 1, "slot {slot} owner count");
        }
    }

    #[test]
    fn test_routing_to_remote() {
        let cm = three_primary_cluster();
        let mut saw_moved = false;
        let mut saw_owned = false;
        for i in 0..64 {
            match cm.check_key(format!("key:{i}").as_bytes()) {
                SlotCheck::Owned => saw_owned = true,
                SlotCheck::Moved { addr, .. } => {
                    saw_moved = true;
                    assert!(addr.starts_with("10.0.0."));
                }
                SlotCheck::Unavailable => panic!("healthy cluster returned unavailable"),
            }
        }
        assert!(saw_owned && saw_moved);
    }

    #[test]
    fn test_replica_owns_no_slots() {
        let cm = ClusterManager::new("node-a", "10.0.0.1", 6379);
        assert!(cm.add_replica("node-a", "node-r", "10.0.0.9", 6379));
        let replica = cm.node("node-r").unwrap();
        assert_eq!(replica.role, NodeRole::Replica);
        assert!(replica.slots.is_empty());

        // Replica of a missing primary is refused
        assert!(!cm.add_replica("nope", "node-x", "10.0.0.10", 6379));
    }

    #[test]
    fn test_failover_promotes_replica() {
        let cm = ClusterManager::new("node-a", "10.0.0.1", 6379);
        cm.add_replica("node-a", "node-r", "10.0.0.9", 6379);
        let epoch_before = cm.current_epoch();

        let promoted = cm.failover("node-a").unwrap();
        assert_eq!(promoted, "node-r");

        let new_primary = cm.node("node-r").unwrap();
        assert_eq!(new_primary.role, NodeRole::Primary);
        assert_eq!(new_primary.slots.len(), CLUSTER_SLOTS as usize);
        assert!(new_primary.replica_of.is_none());

        let old = cm.node("node-a").unwrap();
        assert_eq!(old.state, NodeState::Fail);
        assert!(old.slots.is_empty());

        assert!(cm.current_epoch() > epoch_before);
    }

    #[test]
    fn test_failover_without_replica_fails() {
        let cm = ClusterManager::new("node-a", "10.0.0.1", 6379);
        assert!(cm.failover("node-a").is_none());
    }

    #[test]
    fn test_unavailable_when_owner_down() {
        let cm = ClusterManager::with_heartbeat(
            "node-a",
            "10.0.0.1",
            6379,
            HeartbeatConfig {
                interval: Duration::from_millis(1),
                timeout: Duration::from_millis(1),
            },
        );
        cm.add_node("node-b", "10.0.0.2", 6379, vec![]);
        cm.rebalance();

        // Age node-b's heartbeat into the fail window
        {
            let mut topo = cm.topology.write();
            topo.nodes.get_mut("node-b").unwrap().last_heartbeat = 0;
        }
        cm.escalate_states();
        assert_eq!(cm.node("node-b").unwrap().state, NodeState::Fail);

        // Keys owned by node-b are now unavailable
        let mut saw_unavailable = false;
        for i in 0..128 {
            if cm.check_key(format!("key:{i}").as_bytes()) == SlotCheck::Unavailable {
                saw_unavailable = true;
                break;
            }
        }
        assert!(saw_unavailable);

        // Recovery returns it to connected
        cm.record_heartbeat("node-b");
        assert_eq!(cm.node("node-b").unwrap().state, NodeState::Connected);
    }

    #[test]
    fn test_state_escalation_ladder() {
        let cm = ClusterManager::with_heartbeat(
            "node-a",
            "10.0.0.1",
            6379,
            HeartbeatConfig {
                interval: Duration::from_millis(100),
                timeout: Duration::from_millis(1000),
            },
        );
        cm.add_node("node-b", "10.0.0.2", 6379, vec![]);

        let now = current_timestamp_ms();
        let set_age = |age_ms: i64| {
            let mut topo = cm.topology.write();
            topo.nodes.get_mut("node-b").unwrap().last_heartbeat = now - age_ms;
        };

        set_age(0);
        cm.escalate_states();
        assert_eq!(cm.node("node-b").unwrap().state, NodeState::Connected);

        set_age(300);
        cm.escalate_states();
        assert_eq!(cm.node("node-b").unwrap().state, NodeState::Disconnected);

        set_age(1200);
        cm.escalate_states();
        assert_eq!(cm.node("node-b").unwrap().state, NodeState::SuspectedFail);

        set_age(2500);
        cm.escalate_states();
        assert_eq!(cm.node("node-b").unwrap().state, NodeState::Fail);
    }

    #[test]
    fn test_slot_ranges_compression() {
        let node = ClusterNode {
            id: "n".into(),
            address: "h".into(),
            port: 1,
            role: NodeRole::Primary,
            state: NodeState::Connected,
            slots: vec![0, 1, 2, 5, 7, 8],
            replica_of: None,
            epoch: 1,
            last_heartbeat: 0,
        };
        assert_eq!(node.slot_ranges(), vec![(0, 2), (5, 5), (7, 8)]);
    }

    #[test]
    fn test_remove_node_releases_slots() {
        let cm = three_primary_cluster();
        assert!(cm.remove_node("node-b"));
        assert!(!cm.remove_node("node-b"));

        let mut saw_unavailable = false;
        for i in 0..256 {
            if cm.check_key(format!("k{i}").as_bytes()) == SlotCheck::Unavailable {
                saw_unavailable = true;
                break;
            }
        }
        assert!(saw_unavailable);
    }
}
