use crate::context::Context;
use crate::identity::{NodeId, PaxosId};
use crate::paxos::PaxosMessage;

/// Records the value chosen at the current position and serves it to
/// nodes that missed the announcement.
#[derive(Debug)]
pub struct Learner {
    paxos_id: PaxosId,
    learned: bool,
    value: Vec<u8>,

    /// Position and time of the last catch-up request
    last_request: Option<(PaxosId, u64)>,
}

impl Learner {
    pub fn new(paxos_id: PaxosId) -> Self {
        Learner {
            paxos_id,
            learned: false,
            value: Vec::new(),
            last_request: None,
        }
    }

    pub fn paxos_id(&self) -> PaxosId {
        self.paxos_id
    }

    pub fn is_learned(&self) -> bool {
        self.learned
    }

    pub fn value(&self) -> Option<&[u8]> {
        if self.learned {
            Some(&self.value)
        } else {
            None
        }
    }

    pub fn reset(&mut self, paxos_id: PaxosId) {
        self.paxos_id = paxos_id;
        self.learned = false;
        self.value.clear();
    }

    pub fn on_learn_chosen(&mut self, value: Vec<u8>) {
        if self.learned {
            assert!(
                self.value == value,
                "[INTERNAL ERROR]: conflicting values chosen at paxos ID {}",
                self.paxos_id,
            );
            return
        }
        debug!("learned value of {} bytes at paxos ID {}", value.len(), self.paxos_id);
        self.learned = true;
        self.value = value;
    }

    /// Asks `node_id` for the value chosen at the current position, at most
    /// once per request interval.
    pub fn request_chosen(&mut self, ctx: &mut Context, node_id: NodeId) {
        if let Some((paxos_id, sent)) = self.last_request {
            if paxos_id == self.paxos_id && ctx.now < sent + ctx.config.request_chosen_interval() {
                trace!("suppressing catch-up request for paxos ID {}", self.paxos_id);
                return
            }
        }
        self.last_request = Some((self.paxos_id, ctx.now));
        debug!("requesting paxos ID {} from {}", self.paxos_id, node_id);
        ctx.send(node_id, PaxosMessage::RequestChosen {
            paxos_id: self.paxos_id,
            node_id: ctx.node_id(),
        });
    }

    pub fn on_request_chosen(&self, ctx: &mut Context, node_id: NodeId) {
        if !self.learned {
            return
        }
        ctx.send(node_id, PaxosMessage::LearnValue {
            paxos_id: self.paxos_id,
            node_id: ctx.node_id(),
            run_id: ctx.run_id(),
            value: self.value.clone(),
        });
    }
}
