//! # Summary
//!
//! Outbound side of the message transport. Delivery is best effort: the
//! protocol tolerates loss, duplication and reordering.

use std::collections::VecDeque;

use crate::identity::NodeId;
use crate::message::Message;

pub trait Transport {
    fn send_message(&mut self, node_id: NodeId, message: &Message);

    /// Sends to every listed node, the local node included.
    fn broadcast_message(&mut self, nodes: &[NodeId], message: &Message) {
        for node_id in nodes {
            self.send_message(*node_id, message);
        }
    }
}

/// Buffers outbound messages until the driver of the node drains them.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<(NodeId, Message)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (NodeId, Message)> + '_ {
        self.queue.drain(..)
    }
}

impl Transport for Outbox {
    fn send_message(&mut self, node_id: NodeId, message: &Message) {
        self.queue.push_back((node_id, message.clone()));
    }
}
