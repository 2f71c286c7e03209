//! # Summary
//!
//! Pluggable vote counting. A `Quorum` holds the ordered membership of a
//! replication context, and hands out a fresh `QuorumVote` per round that
//! turns accept/reject replies into three outcomes: accepted, rejected,
//! and complete.
//!
//! Four policies are provided:
//!
//! - `MajorityQuorum`: strict majority of a single group.
//! - `DoubleMajorityQuorum`: strict majority of each of two groups.
//! - `TotalQuorum`: every member must accept.
//! - `SingleQuorum`: one fixed node decides alone.

use std::fmt;

use crate::identity::NodeId;

/// Upper bound on quorum membership.
pub const MAX_QUORUM_SIZE: usize = 10;

/// Membership of a replication context.
pub trait Quorum: fmt::Debug + Send {
    /// Registers `node_id` in `group`. Re-adding a member is a no-op.
    fn add_node(&mut self, group: usize, node_id: NodeId);

    /// All members, in the order they were added.
    fn nodes(&self) -> &[NodeId];

    fn is_member(&self, node_id: NodeId) -> bool {
        self.nodes().contains(&node_id)
    }

    /// Creates a tally bound to the current membership.
    fn new_vote(&self) -> Box<dyn QuorumVote>;
}

/// Per-round tally of replies.
pub trait QuorumVote: fmt::Debug + Send {
    fn register_accepted(&mut self, node_id: NodeId);
    fn register_rejected(&mut self, node_id: NodeId);
    fn is_round_accepted(&self) -> bool;
    fn is_round_rejected(&self) -> bool;
    fn is_round_complete(&self) -> bool;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Threshold {
    Majority,
    Unanimous,
}

#[derive(Clone, Debug)]
struct Group {
    members: Vec<NodeId>,
    accepted: usize,
    rejected: usize,
}

impl Group {
    fn new(members: Vec<NodeId>) -> Self {
        Group { members, accepted: 0, rejected: 0 }
    }

    fn needed(&self, threshold: Threshold) -> usize {
        let size = self.members.len();
        match threshold {
        | Threshold::Majority if size == 0 => 0,
        | Threshold::Majority => size / 2 + 1,
        | Threshold::Unanimous => size,
        }
    }

    fn is_accepted(&self, threshold: Threshold) -> bool {
        self.accepted >= self.needed(threshold)
    }

    fn is_rejected(&self, threshold: Threshold) -> bool {
        let size = self.members.len();
        size > 0 && self.rejected > size - self.needed(threshold)
    }

    fn is_complete(&self) -> bool {
        self.accepted + self.rejected == self.members.len()
    }
}

/// Tally over one or more groups. Each member is counted at most once,
/// so duplicated replies cannot fake a majority.
#[derive(Clone, Debug)]
pub struct GroupVote {
    groups: Vec<Group>,
    replied: Vec<NodeId>,
    threshold: Threshold,
}

impl GroupVote {
    fn new(groups: Vec<Vec<NodeId>>, threshold: Threshold) -> Self {
        GroupVote {
            groups: groups.into_iter().map(Group::new).collect(),
            replied: Vec::new(),
            threshold,
        }
    }

    fn register(&mut self, node_id: NodeId, accepted: bool) {
        if self.replied.contains(&node_id) {
            trace!("ignoring duplicate reply from {}", node_id);
            return
        }
        let group = match self.groups.iter_mut().find(|group| group.members.contains(&node_id)) {
        | Some(group) => group,
        | None => {
            trace!("ignoring reply from non-member {}", node_id);
            return
        }
        };
        if accepted {
            group.accepted += 1;
        } else {
            group.rejected += 1;
        }
        self.replied.push(node_id);
    }
}

impl QuorumVote for GroupVote {
    fn register_accepted(&mut self, node_id: NodeId) {
        self.register(node_id, true);
    }

    fn register_rejected(&mut self, node_id: NodeId) {
        self.register(node_id, false);
    }

    fn is_round_accepted(&self) -> bool {
        self.groups.iter().all(|group| group.is_accepted(self.threshold))
    }

    fn is_round_rejected(&self) -> bool {
        self.groups.iter().any(|group| group.is_rejected(self.threshold))
    }

    fn is_round_complete(&self) -> bool {
        self.groups.iter().all(Group::is_complete)
    }
}

fn push_member(nodes: &mut Vec<NodeId>, node_id: NodeId) {
    if nodes.contains(&node_id) {
        return
    }
    assert!(nodes.len() < MAX_QUORUM_SIZE, "[INTERNAL ERROR]: quorum is full");
    nodes.push(node_id);
}

/// Strict majority of a single group.
#[derive(Clone, Debug, Default)]
pub struct MajorityQuorum {
    nodes: Vec<NodeId>,
}

impl MajorityQuorum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes<I: IntoIterator<Item = NodeId>>(nodes: I) -> Self {
        let mut quorum = Self::new();
        for node_id in nodes {
            quorum.add_node(0, node_id);
        }
        quorum
    }
}

impl Quorum for MajorityQuorum {
    fn add_node(&mut self, group: usize, node_id: NodeId) {
        assert_eq!(group, 0, "[INTERNAL ERROR]: majority quorum has a single group");
        push_member(&mut self.nodes, node_id);
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn new_vote(&self) -> Box<dyn QuorumVote> {
        Box::new(GroupVote::new(vec![self.nodes.clone()], Threshold::Majority))
    }
}

/// Strict majority of each of two groups. Nodes must be added in group order.
#[derive(Clone, Debug, Default)]
pub struct DoubleMajorityQuorum {
    nodes: Vec<NodeId>,
    split: usize,
}

impl DoubleMajorityQuorum {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Quorum for DoubleMajorityQuorum {
    fn add_node(&mut self, group: usize, node_id: NodeId) {
        assert!(group < 2, "[INTERNAL ERROR]: double majority quorum has two groups");
        if self.nodes.len() > self.split {
            assert_eq!(group, 1, "[INTERNAL ERROR]: add nodes in group order");
        }
        if self.nodes.contains(&node_id) {
            return
        }
        push_member(&mut self.nodes, node_id);
        if group == 0 {
            self.split += 1;
        }
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn new_vote(&self) -> Box<dyn QuorumVote> {
        let (first, second) = self.nodes.split_at(self.split);
        Box::new(GroupVote::new(vec![first.to_vec(), second.to_vec()], Threshold::Majority))
    }
}

/// Every member must accept; a single rejection fails the round.
#[derive(Clone, Debug, Default)]
pub struct TotalQuorum {
    nodes: Vec<NodeId>,
}

impl TotalQuorum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_nodes(&mut self) {
        self.nodes.clear();
    }
}

impl Quorum for TotalQuorum {
    fn add_node(&mut self, group: usize, node_id: NodeId) {
        assert_eq!(group, 0, "[INTERNAL ERROR]: total quorum has a single group");
        push_member(&mut self.nodes, node_id);
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn new_vote(&self) -> Box<dyn QuorumVote> {
        trace!("creating new vote with {} nodes", self.nodes.len());
        Box::new(GroupVote::new(vec![self.nodes.clone()], Threshold::Unanimous))
    }
}

/// A single fixed node decides alone.
#[derive(Clone, Debug, Default)]
pub struct SingleQuorum {
    nodes: Vec<NodeId>,
}

impl SingleQuorum {
    pub fn new(node_id: NodeId) -> Self {
        SingleQuorum { nodes: vec![node_id] }
    }
}

impl Quorum for SingleQuorum {
    fn add_node(&mut self, group: usize, node_id: NodeId) {
        assert_eq!(group, 0, "[INTERNAL ERROR]: single quorum has a single group");
        if let Some(existing) = self.nodes.first() {
            assert_eq!(*existing, node_id, "[INTERNAL ERROR]: single quorum already has a member");
            return
        }
        self.nodes.push(node_id);
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn new_vote(&self) -> Box<dyn QuorumVote> {
        Box::new(GroupVote::new(vec![self.nodes.clone()], Threshold::Unanimous))
    }
}
