//! Deterministic in-memory cluster. Every message takes a random delay, may
//! be lost or duplicated, and nodes can be isolated, crashed and restarted.
//! Time only moves when the simulator jumps to the next delivery or timer.

#![allow(dead_code)]

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use replication::replicated::Chosen;
use replication::{Config, MajorityQuorum, MemoryStorage, Node, NodeId, Outbox, PaxosId};

pub type SimNode = Node<Outbox, MemoryStorage>;

#[derive(Copy, Clone, Debug)]
pub struct Chaos {
    pub loss: f64,
    pub duplicate: f64,
    pub max_delay: u64,
}

impl Chaos {
    pub const NONE: Chaos = Chaos { loss: 0.0, duplicate: 0.0, max_delay: 1 };
    pub const LOSSY: Chaos = Chaos { loss: 0.05, duplicate: 0.05, max_delay: 40 };
}

struct Envelope {
    at: u64,
    to: NodeId,
    bytes: Vec<u8>,
}

pub struct Cluster {
    configs: Vec<Config>,
    voters: Vec<NodeId>,
    nodes: Vec<Option<SimNode>>,
    crashed: Vec<Option<MemoryStorage>>,
    isolated: Vec<bool>,
    network: Vec<Envelope>,
    chaos: Chaos,
    rng: StdRng,
    now: u64,
    decided: BTreeMap<PaxosId, Vec<u8>>,
    learned: Vec<Vec<Chosen>>,
}

impl Cluster {
    /// `count` nodes, of which `voters` form the quorum; the rest only learn.
    pub fn new(count: usize, voters: &[NodeId], seed: u64) -> Self {
        let configs: Vec<_> = (0..count as NodeId).map(|id| Config::new(id, count)).collect();
        let mut cluster = Cluster {
            voters: voters.to_vec(),
            nodes: (0..count).map(|_| None).collect(),
            crashed: (0..count).map(|_| Some(MemoryStorage::new())).collect(),
            isolated: vec![false; count],
            network: Vec::new(),
            chaos: Chaos::NONE,
            rng: StdRng::seed_from_u64(seed),
            now: 0,
            decided: BTreeMap::new(),
            learned: vec![Vec::new(); count],
            configs,
        };
        for id in 0..count as NodeId {
            cluster.restart(id);
        }
        cluster
    }

    pub fn with_chaos(mut self, chaos: Chaos) -> Self {
        self.chaos = chaos;
        self
    }

    pub fn set_chaos(&mut self, chaos: Chaos) {
        self.chaos = chaos;
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &SimNode {
        match &self.nodes[id as usize] {
        | Some(node) => node,
        | None => panic!("node {} is down", id),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut SimNode {
        match &mut self.nodes[id as usize] {
        | Some(node) => node,
        | None => panic!("node {} is down", id),
        }
    }

    pub fn is_up(&self, id: NodeId) -> bool {
        self.nodes[id as usize].is_some()
    }

    pub fn append(&mut self, id: NodeId, value: &[u8]) -> replication::Result<()> {
        let now = self.now;
        let result = self.node_mut(id).append(now, value.to_vec());
        self.flush();
        result
    }

    pub fn acquire_lease(&mut self, id: NodeId) {
        let now = self.now;
        self.node_mut(id).acquire_lease(now);
        self.flush();
    }

    pub fn isolate(&mut self, id: NodeId) {
        self.isolated[id as usize] = true;
    }

    pub fn heal(&mut self, id: NodeId) {
        self.isolated[id as usize] = false;
    }

    pub fn heal_all(&mut self) {
        for isolated in &mut self.isolated {
            *isolated = false;
        }
    }

    /// Stops the node, keeping only its durable storage.
    pub fn crash(&mut self, id: NodeId) {
        if let Some(node) = self.nodes[id as usize].take() {
            let mut storage = node.into_storage();
            storage.crash();
            self.crashed[id as usize] = Some(storage);
        }
    }

    pub fn restart(&mut self, id: NodeId) {
        let storage = match self.crashed[id as usize].take() {
        | Some(storage) => storage,
        | None => return,
        };
        let quorum = Box::new(MajorityQuorum::with_nodes(self.voters.clone()));
        let config = self.configs[id as usize].clone();
        match Node::open(config, quorum, Outbox::new(), storage, self.now) {
        | Ok(node) => self.nodes[id as usize] = Some(node),
        | Err(error) => panic!("node {} failed to open: {}", id, error),
        }
    }

    /// Values each position settled on, across all nodes.
    pub fn decided(&self) -> &BTreeMap<PaxosId, Vec<u8>> {
        &self.decided
    }

    pub fn learned(&self, id: NodeId) -> &[Chosen] {
        &self.learned[id as usize]
    }

    pub fn learned_values(&self, id: NodeId) -> Vec<Vec<u8>> {
        self.learned(id).iter().map(|chosen| chosen.value.clone()).collect()
    }

    /// Nodes that currently believe they hold the lease.
    pub fn owners(&self) -> Vec<NodeId> {
        let now = self.now;
        self.nodes
            .iter()
            .flatten()
            .filter(|node| node.lease_status(now).is_owner)
            .map(|node| node.identity().node_id())
            .collect()
    }

    pub fn run_for(&mut self, duration: u64) {
        let end = self.now + duration;
        self.run_until(end, |_| ());
    }

    /// Processes deliveries and timers up to `end`, calling `check` after
    /// every step.
    pub fn run_until<F: FnMut(&Cluster)>(&mut self, end: u64, mut check: F) {
        let mut steps_at_instant = 0;
        loop {
            self.flush();
            self.collect();
            check(self);

            let next_delivery = self.network.iter().map(|envelope| envelope.at).min();
            let next_timer = self.nodes.iter().flatten().filter_map(|node| node.next_deadline()).min();
            let next = match (next_delivery, next_timer) {
            | (Some(delivery), Some(timer)) => std::cmp::min(delivery, timer),
            | (Some(next), None) | (None, Some(next)) => next,
            | (None, None) => end + 1,
            };
            if next > end {
                self.now = end;
                return
            }
            if next <= self.now {
                steps_at_instant += 1;
                assert!(steps_at_instant < 100_000, "simulation stuck at {}", self.now);
            } else {
                steps_at_instant = 0;
                self.now = next;
            }

            let now = self.now;
            let (due, rest): (Vec<_>, Vec<_>) = self.network.drain(..).partition(|envelope| envelope.at <= now);
            self.network = rest;
            for envelope in due {
                let to = envelope.to as usize;
                if self.isolated[to] {
                    continue
                }
                if let Some(node) = &mut self.nodes[to] {
                    node.on_bytes(now, &envelope.bytes);
                }
            }

            for node in self.nodes.iter_mut().flatten() {
                if node.next_deadline().map_or(false, |deadline| deadline <= now) {
                    node.on_timeout(now);
                }
            }
        }
    }

    fn flush(&mut self) {
        let chaos = self.chaos;
        for from in 0..self.nodes.len() {
            let sent: Vec<_> = match &mut self.nodes[from] {
            | Some(node) => node.transport_mut().drain().collect(),
            | None => continue,
            };
            for (to, message) in sent {
                if self.isolated[from] || self.isolated[to as usize] {
                    continue
                }
                if self.rng.gen_bool(chaos.loss) {
                    continue
                }
                let copies = if self.rng.gen_bool(chaos.duplicate) { 2 } else { 1 };
                let bytes = message.encode();
                for _ in 0..copies {
                    let at = self.now + self.rng.gen_range(1..=chaos.max_delay);
                    self.network.push(Envelope { at, to, bytes: bytes.clone() });
                }
            }
        }
    }

    fn collect(&mut self) {
        for (id, node) in self.nodes.iter_mut().enumerate() {
            let node = match node {
            | Some(node) => node,
            | None => continue,
            };
            node.take_lease_events();
            for chosen in node.take_chosen() {
                match self.decided.get(&chosen.paxos_id) {
                | Some(value) => assert_eq!(
                    value, &chosen.value,
                    "node {} learned a different value at paxos ID {}", id, chosen.paxos_id,
                ),
                | None => {
                    self.decided.insert(chosen.paxos_id, chosen.value.clone());
                }
                }
                if let Some(last) = self.learned[id].last() {
                    assert!(last.paxos_id < chosen.paxos_id, "node {} learned paxos ID {} twice", id, chosen.paxos_id);
                }
                self.learned[id].push(chosen);
            }
        }
    }
}
