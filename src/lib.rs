#[macro_use] extern crate derivative;
#[macro_use] extern crate log;

mod codec;
mod config;
mod context;
mod error;
mod identity;
mod message;
mod node;
mod quorum;
mod storage;
mod transport;

pub mod lease;
pub mod net;
pub mod paxos;
pub mod replicated;

#[cfg(test)]
mod testing;

pub use crate::config::{
    Config,
    ACQUIRE_LEASE_TIMEOUT,
    MAX_LEASE_TIME,
    PAXOS_TIMEOUT,
    REQUEST_CHOSEN_INTERVAL,
};
pub use crate::context::Context;
pub use crate::error::{Error, Result};
pub use crate::identity::{NodeId, NodeIdentity, PaxosId, ProposalId};
pub use crate::message::Message;
pub use crate::node::Node;
pub use crate::quorum::{
    DoubleMajorityQuorum,
    MajorityQuorum,
    Quorum,
    QuorumVote,
    SingleQuorum,
    TotalQuorum,
    MAX_QUORUM_SIZE,
};
pub use crate::storage::{Commit, FileStorage, MemoryStorage, Storage, Ticket};
pub use crate::transport::{Outbox, Transport};
