//! # Summary
//!
//! Static configuration of a replication node. All durations are kept in
//! milliseconds, which is the unit of the clock handed to every state machine.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::identity::NodeId;
use crate::quorum::{MajorityQuorum, Quorum};

const INTERNAL_PORT: u16 = 20000;

/// Round timeout of the log proposer.
pub const PAXOS_TIMEOUT: u64 = 3000;

/// Round timeout of the lease proposer.
pub const ACQUIRE_LEASE_TIMEOUT: u64 = 2000;

/// Lease length, also the startup quiet period.
pub const MAX_LEASE_TIME: u64 = 7000;

/// Minimum gap between catch-up requests for the same position.
pub const REQUEST_CHOSEN_INTERVAL: u64 = 7000;

const LOG_CACHE_SIZE: usize = 1000;
const RECONNECT_INTERVAL: u64 = 1000;

#[derive(Clone, Debug)]
pub struct Config {
    /// Unique node ID
    id: NodeId,

    /// Every node that receives broadcasts, including learners outside the quorum
    nodes: Vec<NodeId>,

    /// Directory for stable storage
    data_dir: PathBuf,

    /// Port of node 0; node `i` listens on `base_port + i`
    base_port: u16,

    /// Timeout for log proposer rounds
    paxos_timeout: u64,

    /// Timeout for lease proposer rounds
    acquire_lease_timeout: u64,

    /// Lease length
    max_lease_time: u64,

    /// Rate limit on catch-up requests
    request_chosen_interval: u64,

    /// Number of recently chosen values kept in memory
    log_cache_size: usize,

    /// Delay between reconnection attempts to dropped peers
    reconnect_interval: u64,
}

impl Config {
    /// Configuration for node `id` in a cluster of `count` nodes numbered from 0.
    pub fn new(id: NodeId, count: usize) -> Self {
        Config {
            id,
            nodes: (0..count as NodeId).collect(),
            data_dir: PathBuf::from("."),
            base_port: INTERNAL_PORT,
            paxos_timeout: PAXOS_TIMEOUT,
            acquire_lease_timeout: ACQUIRE_LEASE_TIMEOUT,
            max_lease_time: MAX_LEASE_TIME,
            request_chosen_interval: REQUEST_CHOSEN_INTERVAL,
            log_cache_size: LOG_CACHE_SIZE,
            reconnect_interval: RECONNECT_INTERVAL,
        }
    }

    pub fn with_nodes<I: IntoIterator<Item = NodeId>>(mut self, nodes: I) -> Self {
        self.nodes = nodes.into_iter().collect();
        self
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, data_dir: P) -> Self {
        self.data_dir = data_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn with_paxos_timeout(mut self, timeout: Duration) -> Self {
        self.paxos_timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_acquire_lease_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_lease_timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_lease_time(mut self, lease: Duration) -> Self {
        self.max_lease_time = lease.as_millis() as u64;
        self
    }

    pub fn with_request_chosen_interval(mut self, interval: Duration) -> Self {
        self.request_chosen_interval = interval.as_millis() as u64;
        self
    }

    pub fn with_log_cache_size(mut self, size: usize) -> Self {
        self.log_cache_size = size;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval.as_millis() as u64;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        let id = self.id;
        self.nodes.iter().copied().filter(move |node| *node != id)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of this node's stable storage file.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join(format!("node-{}.db", self.id))
    }

    pub fn paxos_timeout(&self) -> u64 {
        self.paxos_timeout
    }

    pub fn acquire_lease_timeout(&self) -> u64 {
        self.acquire_lease_timeout
    }

    pub fn max_lease_time(&self) -> u64 {
        self.max_lease_time
    }

    pub fn request_chosen_interval(&self) -> u64 {
        self.request_chosen_interval
    }

    pub fn log_cache_size(&self) -> usize {
        self.log_cache_size
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    /// Loopback address node `id` listens on. Port 0 requests an ephemeral port.
    pub fn address(&self, id: NodeId) -> SocketAddr {
        let port = if self.base_port == 0 { 0 } else { self.base_port + id as u16 };
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    /// Majority quorum over every configured node.
    pub fn majority_quorum(&self) -> MajorityQuorum {
        let mut quorum = MajorityQuorum::new();
        for id in &self.nodes {
            quorum.add_node(0, *id);
        }
        quorum
    }
}
