//! # Summary
//!
//! This module implements a central hub for message forwarding between the
//! node driver and its peer connections. We wrap the central `State` type
//! with Arc<RwLock<T>> to share the connections between concurrently running
//! tasks.

use std::sync::Arc;

use hashbrown::HashMap as Map;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;

use crate::identity::NodeId;
use crate::message::Message;
use crate::transport::Transport;

pub type Tx<T> = mpsc::UnboundedSender<T>;
pub type Rx<T> = mpsc::UnboundedReceiver<T>;

/// Thread-safe wrapper around `State` forwarding hub.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug)]
pub struct Shared(Arc<RwLock<State>>);

impl Shared {
    /// Initializes a hub that hands frames addressed to `id` to `inbound_tx`.
    pub fn new(id: NodeId, inbound_tx: Tx<Vec<u8>>) -> Self {
        Shared(Arc::new(RwLock::new(State::new(id, inbound_tx))))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State> {
        self.0.write()
    }
}

/// Collection of outbound peer channels.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct State {
    id: NodeId,

    /// Channel of each connected peer, tagged with its connection generation
    #[derivative(Debug = "ignore")]
    peer_txs: Map<NodeId, (u64, Tx<Vec<u8>>)>,

    #[derivative(Debug = "ignore")]
    inbound_tx: Tx<Vec<u8>>,

    next_generation: u64,
}

impl State {
    fn new(id: NodeId, inbound_tx: Tx<Vec<u8>>) -> Self {
        State {
            id,
            peer_txs: Map::default(),
            inbound_tx,
            next_generation: 0,
        }
    }

    /// Registers the provided peer channel with this hub, replacing any
    /// older connection. Returns the generation of the new connection.
    pub fn connect_peer(&mut self, id: NodeId, tx: Tx<Vec<u8>>) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.peer_txs.insert(id, (generation, tx));
        generation
    }

    /// Disconnects the provided peer, unless it has already reconnected.
    pub fn disconnect_peer(&mut self, id: NodeId, generation: u64) {
        if let Some((current, _)) = self.peer_txs.get(&id) {
            if *current == generation {
                self.peer_txs.remove(&id);
            }
        }
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        self.peer_txs.contains_key(&id)
    }

    /// Hands a frame received from the network to the local node.
    pub fn deliver(&self, frame: Vec<u8>) {
        // Driver may have shut down
        self.inbound_tx.send(frame).ok();
    }

    /// Forwards a frame to `id`, looping it back if it is addressed to us.
    pub fn send(&self, id: NodeId, frame: Vec<u8>) {
        if id == self.id {
            return self.deliver(frame)
        }
        match self.peer_txs.get(&id) {
        | Some((_, tx)) => {
            // Peer task may be tearing down
            tx.send(frame).ok();
        }
        | None => trace!("dropping frame for disconnected node {}", id),
        }
    }
}

/// Transport that sends through the hub. Delivery is best effort.
#[derive(Clone, Debug)]
pub struct HubTransport(pub Shared);

impl Transport for HubTransport {
    fn send_message(&mut self, node_id: NodeId, message: &Message) {
        self.0.read().send(node_id, message.encode());
    }
}
