use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::context::Context;
use crate::identity::{NodeId, NodeIdentity};
use crate::lease::LeaseMessage;
use crate::message::Message;
use crate::paxos::PaxosMessage;
use crate::quorum::MajorityQuorum;
use crate::storage::MemoryStorage;
use crate::transport::Outbox;

/// Collaborators of a single role under test.
pub struct Fixture {
    pub identity: NodeIdentity,
    pub config: Config,
    pub quorum: MajorityQuorum,
    pub outbox: Outbox,
    pub storage: MemoryStorage,
    pub rng: StdRng,
}

impl Fixture {
    /// Node `id` of a `count` node cluster whose quorum is every node.
    pub fn new(id: NodeId, count: usize) -> Self {
        let config = Config::new(id, count);
        Fixture {
            identity: NodeIdentity::new(id, 1),
            quorum: config.majority_quorum(),
            config,
            outbox: Outbox::new(),
            storage: MemoryStorage::new(),
            rng: StdRng::seed_from_u64(id),
        }
    }

    pub fn ctx(&mut self, now: u64) -> Context<'_> {
        Context {
            identity: &self.identity,
            config: &self.config,
            quorum: &self.quorum,
            transport: &mut self.outbox,
            storage: &mut self.storage,
            rng: &mut self.rng,
            now,
        }
    }

    pub fn sent(&mut self) -> Vec<(NodeId, Message)> {
        self.outbox.drain().collect()
    }

    pub fn sent_paxos(&mut self) -> Vec<(NodeId, PaxosMessage)> {
        self.sent()
            .into_iter()
            .filter_map(|(to, message)| match message {
            | Message::Paxos(message) => Some((to, message)),
            | Message::Lease(_) => None,
            })
            .collect()
    }

    pub fn sent_lease(&mut self) -> Vec<(NodeId, LeaseMessage)> {
        self.sent()
            .into_iter()
            .filter_map(|(to, message)| match message {
            | Message::Lease(message) => Some((to, message)),
            | Message::Paxos(_) => None,
            })
            .collect()
    }
}
