//! # Summary
//!
//! The proposer drives one log position through prepare and propose rounds.
//!
//! Each round uses a fresh `ProposalId` and a fresh vote from the quorum, so
//! replies to earlier rounds are recognized and dropped by ID mismatch. The
//! proposer never gives up: rejected, inconclusive and timed out rounds
//! restart preparing, with a short randomized delay after a rejection to
//! break up duelling proposers.
//!
//! While `multi` is set, the previous round's promise still covers this
//! position and the first round skips prepare entirely.

use crate::context::Context;
use crate::identity::{PaxosId, ProposalId};
use crate::paxos::PaxosMessage;
use crate::quorum::QuorumVote;

#[derive(Debug)]
enum Phase {
    Idle,
    Preparing {
        vote: Box<dyn QuorumVote>,
        /// Highest accepted proposal reported so far
        highest_received: ProposalId,
    },
    Proposing {
        vote: Box<dyn QuorumVote>,
    },
    /// Waiting out a randomized delay before preparing again
    Backoff,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Tally {
    Accepted,
    Rejected,
    Complete,
    Open,
}

impl Tally {
    fn of(vote: &dyn QuorumVote) -> Self {
        if vote.is_round_accepted() {
            Tally::Accepted
        } else if vote.is_round_rejected() {
            Tally::Rejected
        } else if vote.is_round_complete() {
            Tally::Complete
        } else {
            Tally::Open
        }
    }
}

#[derive(Debug)]
pub struct Proposer {
    paxos_id: PaxosId,
    phase: Phase,

    /// ID of the current or most recent round
    proposal_id: ProposalId,

    /// Highest promise reported by rejecting acceptors
    highest_promised: ProposalId,

    /// Value of the current round, possibly adopted from an acceptor
    value: Option<Vec<u8>>,

    /// Whether `value` is the one handed to `propose`
    own_value: bool,

    /// Whether the first round may skip prepare
    multi: bool,

    /// Rounds started for this position
    num_proposals: u64,

    deadline: Option<u64>,
}

impl Proposer {
    pub fn new(paxos_id: PaxosId) -> Self {
        Proposer {
            paxos_id,
            phase: Phase::Idle,
            proposal_id: ProposalId::ZERO,
            highest_promised: ProposalId::ZERO,
            value: None,
            own_value: false,
            multi: false,
            num_proposals: 0,
            deadline: None,
        }
    }

    pub fn paxos_id(&self) -> PaxosId {
        self.paxos_id
    }

    pub fn proposal_id(&self) -> ProposalId {
        self.proposal_id
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// False once a value accepted in another node's round was adopted.
    pub fn is_own_value(&self) -> bool {
        self.value.is_some() && self.own_value
    }

    pub fn is_active(&self) -> bool {
        match self.phase {
        | Phase::Idle => false,
        | _ => true,
        }
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

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    pub fn set_multi(&mut self, multi: bool) {
        if self.multi != multi {
            debug!("multi-paxos {} at paxos ID {}", if multi { "enabled" } else { "disabled" }, self.paxos_id);
        }
        self.multi = multi;
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadline
    }

    /// Starts driving `value` to be chosen at the current position.
    pub fn propose(&mut self, ctx: &mut Context, value: Vec<u8>) {
        assert!(!self.is_active(), "[INTERNAL ERROR]: proposer for paxos ID {} is already running", self.paxos_id);
        self.value = Some(value);
        self.own_value = true;
        if self.multi && self.num_proposals == 0 {
            self.num_proposals += 1;
            self.start_proposing(ctx);
        } else {
            self.start_preparing(ctx);
        }
    }

    /// Abandons the current round without choosing anything.
    pub fn stop(&mut self) {
        if self.is_active() {
            debug!("stopping proposer for paxos ID {}", self.paxos_id);
        }
        self.phase = Phase::Idle;
        self.deadline = None;
        self.value = None;
        self.own_value = false;
        self.multi = false;
    }

    /// Raises the floor for the next proposal ID.
    pub fn observe(&mut self, proposal_id: ProposalId) {
        self.highest_promised = std::cmp::max(self.highest_promised, proposal_id);
    }

    /// Moves to a new log position, keeping the proposal floor and `multi`.
    pub fn reset(&mut self, paxos_id: PaxosId) {
        self.paxos_id = paxos_id;
        self.phase = Phase::Idle;
        self.deadline = None;
        self.value = None;
        self.own_value = false;
        self.num_proposals = 0;
    }

    fn start_preparing(&mut self, ctx: &mut Context) {
        self.num_proposals += 1;
        self.set_multi(false);
        let floor = std::cmp::max(self.proposal_id, self.highest_promised);
        self.proposal_id = ctx.identity.next_proposal_id(floor);
        self.phase = Phase::Preparing {
            vote: ctx.quorum.new_vote(),
            highest_received: ProposalId::ZERO,
        };
        self.deadline = Some(ctx.now + ctx.config.paxos_timeout());
        debug!("preparing {:?} for paxos ID {}", self.proposal_id, self.paxos_id);
        ctx.broadcast(PaxosMessage::PrepareRequest {
            paxos_id: self.paxos_id,
            node_id: ctx.node_id(),
            proposal_id: self.proposal_id,
        });
    }

    fn start_proposing(&mut self, ctx: &mut Context) {
        let value = match &self.value {
        | Some(value) => value.clone(),
        | None => panic!("[INTERNAL ERROR]: proposing without a value at paxos ID {}", self.paxos_id),
        };
        self.phase = Phase::Proposing { vote: ctx.quorum.new_vote() };
        self.deadline = Some(ctx.now + ctx.config.paxos_timeout());
        debug!("proposing {:?} for paxos ID {}", self.proposal_id, self.paxos_id);
        ctx.broadcast(PaxosMessage::ProposeRequest {
            paxos_id: self.paxos_id,
            node_id: ctx.node_id(),
            proposal_id: self.proposal_id,
            value,
        });
    }

    fn back_off(&mut self, ctx: &mut Context) {
        let bound = ctx.config.paxos_timeout() / 10;
        let delay = 1 + ctx.jitter(bound);
        debug!("round {:?} failed, retrying in {}ms", self.proposal_id, delay);
        self.phase = Phase::Backoff;
        self.deadline = Some(ctx.now + delay);
    }

    pub fn on_prepare_response(&mut self, ctx: &mut Context, message: &PaxosMessage) {
        let tally = {
            let (vote, highest_received) = match &mut self.phase {
            | Phase::Preparing { vote, highest_received } => (vote, highest_received),
            | _ => {
                trace!("ignoring {:?}: not preparing", message);
                return
            }
            };
            if !ctx.quorum.is_member(message.node_id()) {
                trace!("ignoring {:?}: not a quorum member", message);
                return
            }
            match message {
            | PaxosMessage::PrepareRejected { proposal_id, .. }
            | PaxosMessage::PreviouslyAccepted { proposal_id, .. }
            | PaxosMessage::CurrentlyOpen { proposal_id, .. } if *proposal_id != self.proposal_id => {
                trace!("ignoring {:?}: stale round", message);
                return
            }
            | PaxosMessage::PrepareRejected { node_id, promised_proposal_id, .. } => {
                self.highest_promised = std::cmp::max(self.highest_promised, *promised_proposal_id);
                vote.register_rejected(*node_id);
            }
            | PaxosMessage::PreviouslyAccepted { node_id, accepted_proposal_id, value, .. } => {
                vote.register_accepted(*node_id);
                if *accepted_proposal_id >= *highest_received {
                    trace!("adopting value accepted in {:?}", accepted_proposal_id);
                    *highest_received = *accepted_proposal_id;
                    if !ctx.identity.generated(*accepted_proposal_id) {
                        self.own_value = false;
                    }
                    self.value = Some(value.clone());
                }
            }
            | PaxosMessage::CurrentlyOpen { node_id, .. } => {
                vote.register_accepted(*node_id);
            }
            | _ => panic!("[INTERNAL ERROR]: {:?} is not a prepare response", message),
            }
            Tally::of(&**vote)
        };

        match tally {
        | Tally::Accepted => self.start_proposing(ctx),
        | Tally::Rejected | Tally::Complete => self.back_off(ctx),
        | Tally::Open => (),
        }
    }

    pub fn on_propose_response(&mut self, ctx: &mut Context, message: &PaxosMessage) {
        let tally = {
            let vote = match &mut self.phase {
            | Phase::Proposing { vote } => vote,
            | _ => {
                trace!("ignoring {:?}: not proposing", message);
                return
            }
            };
            match message {
            | PaxosMessage::ProposeRejected { proposal_id, .. }
            | PaxosMessage::ProposeAccepted { proposal_id, .. } if *proposal_id != self.proposal_id => {
                trace!("ignoring {:?}: stale round", message);
                return
            }
            | PaxosMessage::ProposeRejected { node_id, .. } => vote.register_rejected(*node_id),
            | PaxosMessage::ProposeAccepted { node_id, .. } => vote.register_accepted(*node_id),
            | _ => panic!("[INTERNAL ERROR]: {:?} is not a propose response", message),
            }
            Tally::of(&**vote)
        };

        match tally {
        | Tally::Accepted => {
            debug!("{:?} chosen for paxos ID {}", self.proposal_id, self.paxos_id);
            self.phase = Phase::Idle;
            self.deadline = None;
            ctx.broadcast(PaxosMessage::LearnProposal {
                paxos_id: self.paxos_id,
                node_id: ctx.node_id(),
                proposal_id: self.proposal_id,
            });
        }
        | Tally::Rejected | Tally::Complete => self.back_off(ctx),
        | Tally::Open => (),
        }
    }

    pub fn on_timeout(&mut self, ctx: &mut Context) {
        match self.deadline {
        | Some(deadline) if deadline <= ctx.now => (),
        | _ => return,
        }
        match self.phase {
        | Phase::Idle => self.deadline = None,
        | Phase::Backoff => self.start_preparing(ctx),
        | Phase::Preparing { .. } | Phase::Proposing { .. } => {
            debug!("round {:?} for paxos ID {} timed out", self.proposal_id, self.paxos_id);
            self.start_preparing(ctx);
        }
        }
    }
}
