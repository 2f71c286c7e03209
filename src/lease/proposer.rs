//! # Summary
//!
//! The lease proposer runs Paxos rounds whose value is "this node holds the
//! lease for `max_lease_time`". A round only proposes when no other live
//! owner was reported during prepare. After a successful round the lease is
//! announced and renewal is scheduled after a seventh of the remaining time.
//!
//! A rejected round is retried at once with a higher proposal ID. A round
//! that finds another live owner goes idle until the acquire timeout runs
//! out, which leaves room for the current owner.

use crate::context::Context;
use crate::identity::{NodeId, PaxosId, ProposalId};
use crate::lease::{LeaseMessage, LEASE_MARGIN};
use crate::quorum::QuorumVote;

const RENEWAL_FRACTION: u64 = 7;

#[derive(Debug)]
enum Phase {
    Idle,
    Preparing {
        vote: Box<dyn QuorumVote>,
        highest_received: ProposalId,
        /// Owner of the most recently accepted lease reported by acceptors
        lease_owner: Option<NodeId>,
    },
    Proposing {
        vote: Box<dyn QuorumVote>,
        /// Local expiry of the lease being proposed
        expire_time: u64,
    },
}

#[derive(Debug)]
pub struct LeaseProposer {
    phase: Phase,
    proposal_id: ProposalId,
    highest_promised: ProposalId,
    acquiring: bool,
    acquire_deadline: Option<u64>,
    extend_deadline: Option<u64>,
}

impl Default for LeaseProposer {
    fn default() -> Self {
        LeaseProposer {
            phase: Phase::Idle,
            proposal_id: ProposalId::ZERO,
            highest_promised: ProposalId::ZERO,
            acquiring: false,
            acquire_deadline: None,
            extend_deadline: None,
        }
    }
}

impl LeaseProposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proposal_id(&self) -> ProposalId {
        self.proposal_id
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    pub fn is_preparing(&self) -> bool {
        match self.phase {
        | Phase::Preparing { .. } => true,
        | _ => false,
        }
    }

    pub fn is_proposing(&self) -> bool {
        match self.phase {
        | Phase::Proposing { .. } => true,
        | _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match (self.acquire_deadline, self.extend_deadline) {
        | (Some(acquire), Some(extend)) => Some(std::cmp::min(acquire, extend)),
        | (deadline, None) | (None, deadline) => deadline,
        }
    }

    /// Raises the floor for the next proposal ID.
    pub fn observe(&mut self, proposal_id: ProposalId) {
        self.highest_promised = std::cmp::max(self.highest_promised, proposal_id);
    }

    pub fn start_acquiring(&mut self, ctx: &mut Context, paxos_id: PaxosId) {
        self.acquiring = true;
        if !self.is_preparing() && !self.is_proposing() {
            self.start_preparing(ctx, paxos_id);
        }
    }

    pub fn stop(&mut self) {
        self.acquiring = false;
        self.phase = Phase::Idle;
        self.acquire_deadline = None;
        self.extend_deadline = None;
    }

    fn start_preparing(&mut self, ctx: &mut Context, paxos_id: PaxosId) {
        self.extend_deadline = None;
        let floor = std::cmp::max(self.proposal_id, self.highest_promised);
        self.proposal_id = ctx.identity.next_proposal_id(floor);
        self.phase = Phase::Preparing {
            vote: ctx.quorum.new_vote(),
            highest_received: ProposalId::ZERO,
            lease_owner: None,
        };
        self.acquire_deadline = Some(ctx.now + ctx.config.acquire_lease_timeout());
        debug!("preparing lease round {:?}", self.proposal_id);
        ctx.broadcast(LeaseMessage::PrepareRequest {
            node_id: ctx.node_id(),
            proposal_id: self.proposal_id,
            paxos_id,
        });
    }

    fn start_proposing(&mut self, ctx: &mut Context) {
        let duration = ctx.config.max_lease_time();
        self.phase = Phase::Proposing {
            vote: ctx.quorum.new_vote(),
            expire_time: ctx.now + duration,
        };
        debug!("proposing lease round {:?}", self.proposal_id);
        ctx.broadcast(LeaseMessage::ProposeRequest {
            node_id: ctx.node_id(),
            proposal_id: self.proposal_id,
            lease_owner: ctx.node_id(),
            duration,
        });
    }

    pub fn on_prepare_response(&mut self, ctx: &mut Context, paxos_id: PaxosId, message: &LeaseMessage) {
        let (accepted, rejected, complete, lease_owner) = {
            let (vote, highest_received, lease_owner) = match &mut self.phase {
            | Phase::Preparing { vote, highest_received, lease_owner } => (vote, highest_received, lease_owner),
            | _ => return,
            };
            if !ctx.quorum.is_member(message.node_id()) {
                return
            }
            match message {
            | LeaseMessage::PrepareRejected { proposal_id, .. }
            | LeaseMessage::PreviouslyAccepted { proposal_id, .. }
            | LeaseMessage::CurrentlyOpen { proposal_id, .. } if *proposal_id != self.proposal_id => return,
            | LeaseMessage::PrepareRejected { node_id, .. } => vote.register_rejected(*node_id),
            | LeaseMessage::PreviouslyAccepted { node_id, accepted_proposal_id, lease_owner: owner, .. } => {
                vote.register_accepted(*node_id);
                if *accepted_proposal_id >= *highest_received {
                    *highest_received = *accepted_proposal_id;
                    *lease_owner = Some(*owner);
                }
            }
            | LeaseMessage::CurrentlyOpen { node_id, .. } => vote.register_accepted(*node_id),
            | _ => panic!("[INTERNAL ERROR]: {:?} is not a lease prepare response", message),
            }
            (vote.is_round_accepted(), vote.is_round_rejected(), vote.is_round_complete(), *lease_owner)
        };

        if accepted {
            match lease_owner {
            | Some(owner) if owner != ctx.node_id() => {
                debug!("lease is held by {}", owner);
                self.phase = Phase::Idle;
            }
            | _ => self.start_proposing(ctx),
            }
        } else if rejected || complete {
            debug!("lease round {:?} failed", self.proposal_id);
            self.restart(ctx, paxos_id);
        }
    }

    pub fn on_propose_response(&mut self, ctx: &mut Context, paxos_id: PaxosId, message: &LeaseMessage) {
        let (accepted, rejected, complete, expire_time) = {
            let (vote, expire_time) = match &mut self.phase {
            | Phase::Proposing { vote, expire_time } => (vote, *expire_time),
            | _ => return,
            };
            match message {
            | LeaseMessage::ProposeRejected { proposal_id, .. }
            | LeaseMessage::ProposeAccepted { proposal_id, .. } if *proposal_id != self.proposal_id => return,
            | LeaseMessage::ProposeRejected { node_id, .. } => vote.register_rejected(*node_id),
            | LeaseMessage::ProposeAccepted { node_id, .. } => vote.register_accepted(*node_id),
            | _ => panic!("[INTERNAL ERROR]: {:?} is not a lease propose response", message),
            }
            (vote.is_round_accepted(), vote.is_round_rejected(), vote.is_round_complete(), expire_time)
        };

        if accepted {
            self.phase = Phase::Idle;
            self.acquire_deadline = None;
            let remaining = expire_time.saturating_sub(ctx.now);
            if remaining <= LEASE_MARGIN {
                debug!("lease round {:?} succeeded too late, retrying", self.proposal_id);
                self.start_preparing(ctx, paxos_id);
                return
            }
            self.extend_deadline = Some(ctx.now + remaining / RENEWAL_FRACTION);
            debug!("acquired lease until {}", expire_time);
            ctx.broadcast(LeaseMessage::LearnChosen {
                node_id: ctx.node_id(),
                lease_owner: ctx.node_id(),
                duration: remaining,
                local_expire_time: expire_time,
                paxos_id,
            });
        } else if rejected || complete {
            debug!("lease round {:?} rejected", self.proposal_id);
            self.restart(ctx, paxos_id);
        }
    }

    fn restart(&mut self, ctx: &mut Context, paxos_id: PaxosId) {
        if self.acquiring {
            self.start_preparing(ctx, paxos_id);
        } else {
            self.phase = Phase::Idle;
        }
    }

    pub fn on_timeout(&mut self, ctx: &mut Context, paxos_id: PaxosId) {
        let now = ctx.now;
        if self.extend_deadline.map_or(false, |deadline| deadline <= now) {
            trace!("extending lease");
            self.extend_deadline = None;
            if self.acquiring {
                self.start_preparing(ctx, paxos_id);
            }
        } else if self.acquire_deadline.map_or(false, |deadline| deadline <= now) {
            self.acquire_deadline = None;
            self.phase = Phase::Idle;
            if self.acquiring {
                self.start_preparing(ctx, paxos_id);
            }
        }
    }
}
