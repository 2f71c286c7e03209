//! # Summary
//!
//! This module defines the identifiers shared by every consensus role:
//! node IDs, log positions, and the packed 64-bit `ProposalID`.
//!
//! A `ProposalID` embeds three fields, most significant first:
//!
//! ```text
//! | round (32 bits) | run ID (16 bits) | node ID (16 bits) |
//! ```
//!
//! so plain integer comparison is lexicographic on (round, run, node).

use std::fmt;

use serde_derive::{Deserialize, Serialize};

/// Numeric identifier of a participating node.
pub type NodeId = u64;

/// Position of a single decree in the replicated log.
pub type PaxosId = u64;

const WIDTH_NODE_ID: u32 = 16;
const WIDTH_RUN_ID: u32 = 16;
const WIDTH_LOW: u32 = WIDTH_NODE_ID + WIDTH_RUN_ID;
const MASK_NODE_ID: u64 = (1 << WIDTH_NODE_ID) - 1;
const MASK_RUN_ID: u64 = (1 << WIDTH_RUN_ID) - 1;
const MAX_ROUND: u64 = (1 << (64 - WIDTH_LOW)) - 1;

/// Globally ordered round identifier. No two nodes can generate the same one.
#[derive(Serialize, Deserialize)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalId(u64);

impl ProposalId {
    pub const ZERO: ProposalId = ProposalId(0);

    pub fn new(round: u64, run_id: u64, node_id: NodeId) -> Self {
        assert!(round <= MAX_ROUND, "[INTERNAL ERROR]: proposal round {} overflowed", round);
        assert!(node_id <= MASK_NODE_ID, "[INTERNAL ERROR]: node ID {} is too wide", node_id);
        ProposalId(
            (round << WIDTH_LOW)
            | ((run_id & MASK_RUN_ID) << WIDTH_NODE_ID)
            | node_id
        )
    }

    pub fn from_raw(raw: u64) -> Self {
        ProposalId(raw)
    }

    /// Like `from_raw`, but refuses IDs in the last round, which no proposal
    /// ID can follow.
    pub fn checked(raw: u64) -> Option<Self> {
        let proposal_id = ProposalId(raw);
        if proposal_id.round() < MAX_ROUND {
            Some(proposal_id)
        } else {
            None
        }
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn round(self) -> u64 {
        self.0 >> WIDTH_LOW
    }

    pub fn run_id(self) -> u64 {
        (self.0 >> WIDTH_NODE_ID) & MASK_RUN_ID
    }

    pub fn node_id(self) -> NodeId {
        self.0 & MASK_NODE_ID
    }
}

impl fmt::Debug for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ProposalId({}.{}.{})", self.round(), self.run_id(), self.node_id())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the local process, threaded explicitly through every role.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: NodeId,
    run_id: u64,
}

impl NodeIdentity {
    pub fn new(node_id: NodeId, run_id: u64) -> Self {
        assert!(node_id <= MASK_NODE_ID, "[INTERNAL ERROR]: node ID {} is too wide", node_id);
        NodeIdentity { node_id, run_id }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Identity of the same node after a process restart.
    pub fn restarted(&self) -> Self {
        NodeIdentity {
            node_id: self.node_id,
            run_id: self.run_id + 1,
        }
    }

    /// Whether `proposal_id` was generated by this node during its current run.
    pub fn generated(&self, proposal_id: ProposalId) -> bool {
        proposal_id.node_id() == self.node_id && proposal_id.run_id() == self.run_id & MASK_RUN_ID
    }

    /// Returns a proposal ID strictly greater than `previous`, owned by this node.
    pub fn next_proposal_id(&self, previous: ProposalId) -> ProposalId {
        ProposalId::new(previous.round() + 1, self.run_id, self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_round_trip() {
        let id = ProposalId::new(7, 3, 42);
        assert_eq!(id.round(), 7);
        assert_eq!(id.run_id(), 3);
        assert_eq!(id.node_id(), 42);
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(ProposalId::new(2, 0, 0) > ProposalId::new(1, 9, 9));
        assert!(ProposalId::new(1, 2, 0) > ProposalId::new(1, 1, 9));
        assert!(ProposalId::new(1, 1, 2) > ProposalId::new(1, 1, 1));
    }

    #[test]
    fn next_is_strictly_greater() {
        let identity = NodeIdentity::new(1, 1);
        let mut previous = ProposalId::ZERO;
        for _ in 0..100 {
            let next = identity.next_proposal_id(previous);
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn next_exceeds_foreign_proposals() {
        let identity = NodeIdentity::new(1, 1);
        let foreign = ProposalId::new(10, 60, 9);
        let next = identity.next_proposal_id(foreign);
        assert!(next > foreign);
        assert_eq!(next.node_id(), 1);
    }

    #[test]
    fn monotonic_across_restart() {
        let before = NodeIdentity::new(3, 5);
        let last = before.next_proposal_id(before.next_proposal_id(ProposalId::ZERO));
        let after = before.restarted();
        assert_eq!(after.run_id(), 6);
        let next = after.next_proposal_id(last);
        assert!(next > last);
        assert_eq!(next.run_id(), 6);
    }

    #[test]
    fn generated_compares_truncated_run_ids() {
        let identity = NodeIdentity::new(3, (1 << 16) + 5);
        let id = identity.next_proposal_id(ProposalId::ZERO);
        assert_eq!(id.run_id(), 5);
        assert!(identity.generated(id));
        assert!(!identity.restarted().generated(id));
        assert!(!NodeIdentity::new(4, 5).generated(id));
    }

    #[test]
    fn distinct_nodes_never_collide() {
        let a = NodeIdentity::new(1, 1);
        let b = NodeIdentity::new(2, 1);
        let base = ProposalId::new(4, 0, 0);
        assert_ne!(a.next_proposal_id(base), b.next_proposal_id(base));
    }

    #[test]
    fn last_round_has_no_successor() {
        assert_eq!(ProposalId::checked(u64::MAX), None);
        assert_eq!(ProposalId::checked(MAX_ROUND << WIDTH_LOW), None);
        let last = ProposalId::checked((MAX_ROUND - 1) << WIDTH_LOW).unwrap();
        let next = NodeIdentity::new(1, 1).next_proposal_id(last);
        assert_eq!(next.round(), MAX_ROUND);
    }

    #[test]
    #[should_panic]
    fn wide_node_id_is_rejected() {
        NodeIdentity::new(1 << 20, 0);
    }
}
