use rand::rngs::StdRng;
use rand::Rng;

use crate::config::Config;
use crate::identity::{NodeId, NodeIdentity};
use crate::message::Message;
use crate::quorum::Quorum;
use crate::storage::Storage;
use crate::transport::Transport;

/// Collaborators and clock reading lent to a role for one event.
pub struct Context<'a> {
    pub identity: &'a NodeIdentity,
    pub config: &'a Config,
    pub quorum: &'a dyn Quorum,
    pub transport: &'a mut dyn Transport,
    pub storage: &'a mut dyn Storage,
    pub rng: &'a mut StdRng,

    /// Milliseconds on the local monotonic clock
    pub now: u64,
}

impl<'a> Context<'a> {
    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    pub fn run_id(&self) -> u64 {
        self.identity.run_id()
    }

    pub fn send<M: Into<Message>>(&mut self, node_id: NodeId, message: M) {
        let message = message.into();
        trace!("sending {:?} to {}", message, node_id);
        self.transport.send_message(node_id, &message);
    }

    /// Sends to every configured node, learners outside the quorum included.
    pub fn broadcast<M: Into<Message>>(&mut self, message: M) {
        let message = message.into();
        trace!("broadcasting {:?}", message);
        self.transport.broadcast_message(self.config.nodes(), &message);
    }

    /// Uniform random delay in `[0, bound)`.
    pub fn jitter(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.rng.gen_range(0..bound)
        }
    }
}
