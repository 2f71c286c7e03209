//! # Summary
//!
//! PaxosLease: the same prepare/propose/learn triplet as the log, agreeing on
//! which node holds an exclusive lease for a bounded time instead of on a
//! value. Nothing is persisted. Safety across restarts comes from a startup
//! guard: for one full lease period after start the acceptor ignores
//! requests and the proposer stays put, so any lease granted before the
//! restart has lapsed before this node votes again.
//!
//! Owners renew continuously. Other nodes learn the owner through
//! `LearnChosen`, which also carries the owner's log position so lagging
//! nodes can catch up.

use std::collections::VecDeque;

use crate::config::Config;
use crate::context::Context;
use crate::identity::{NodeId, PaxosId};

mod acceptor;
mod learner;
mod message;
mod proposer;

pub use self::acceptor::{LeaseAcceptor, LeaseAcceptorState};
pub use self::learner::LeaseLearner;
pub use self::message::LeaseMessage;
pub use self::proposer::LeaseProposer;

/// Subtracted from announced durations by non-owners to absorb message delay.
pub const LEASE_MARGIN: u64 = 500;

/// Snapshot of lease ownership handed to the replicated log.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseStatus {
    pub owner: Option<NodeId>,
    pub is_owner: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaseState {
    Unleased,
    Preparing,
    Proposing,
    Leased,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeaseEvent {
    /// A lease was announced, by `owner` at log position `paxos_id`
    Learned { owner: NodeId, paxos_id: PaxosId },
    /// The known lease lapsed
    TimedOut,
}

#[derive(Debug)]
pub struct PaxosLease {
    node_id: NodeId,
    proposer: LeaseProposer,
    acceptor: LeaseAcceptor,
    learner: LeaseLearner,
    startup_until: u64,
    acquire: bool,
    events: VecDeque<LeaseEvent>,
}

impl PaxosLease {
    pub fn new(config: &Config, now: u64) -> Self {
        PaxosLease {
            node_id: config.id(),
            proposer: LeaseProposer::new(),
            acceptor: LeaseAcceptor::new(),
            learner: LeaseLearner::new(),
            startup_until: now + config.max_lease_time(),
            acquire: false,
            events: VecDeque::new(),
        }
    }

    fn in_startup(&self, now: u64) -> bool {
        now < self.startup_until
    }

    pub fn acceptor(&self) -> &LeaseAcceptor {
        &self.acceptor
    }

    pub fn learner(&self) -> &LeaseLearner {
        &self.learner
    }

    /// Keeps trying to acquire and renew the lease until `stop`.
    pub fn acquire_lease(&mut self, ctx: &mut Context, log_paxos_id: PaxosId) {
        self.acquire = true;
        if self.in_startup(ctx.now) {
            debug!("deferring lease acquisition until {}", self.startup_until);
            return
        }
        if !self.proposer.is_acquiring() {
            self.proposer.start_acquiring(ctx, log_paxos_id);
        }
    }

    pub fn stop(&mut self) {
        self.acquire = false;
        self.proposer.stop();
    }

    pub fn on_message(&mut self, ctx: &mut Context, log_paxos_id: PaxosId, message: LeaseMessage) {
        trace!("received {:?}", message);
        match message {
        | LeaseMessage::PrepareRequest { node_id, proposal_id, paxos_id } => {
            self.proposer.observe(proposal_id);
            if self.in_startup(ctx.now) {
                trace!("ignoring lease prepare from {} during startup", node_id);
                return
            }
            self.acceptor.on_prepare_request(ctx, log_paxos_id, node_id, proposal_id, paxos_id);
        }
        | LeaseMessage::ProposeRequest { node_id, proposal_id, lease_owner, duration } => {
            self.proposer.observe(proposal_id);
            if self.in_startup(ctx.now) {
                trace!("ignoring lease propose from {} during startup", node_id);
                return
            }
            self.acceptor.on_propose_request(ctx, node_id, proposal_id, lease_owner, duration);
        }
        | LeaseMessage::PrepareRejected { .. }
        | LeaseMessage::PreviouslyAccepted { .. }
        | LeaseMessage::CurrentlyOpen { .. } => {
            self.proposer.on_prepare_response(ctx, log_paxos_id, &message);
        }
        | LeaseMessage::ProposeRejected { .. }
        | LeaseMessage::ProposeAccepted { .. } => {
            self.proposer.on_propose_response(ctx, log_paxos_id, &message);
        }
        | LeaseMessage::LearnChosen { lease_owner, duration, local_expire_time, paxos_id, .. } => {
            let duration = duration.min(ctx.config.max_lease_time());
            self.learner.on_learn_chosen(ctx.now, self.node_id, lease_owner, duration, local_expire_time);
            if self.learner.lease_owner(ctx.now) == Some(lease_owner) {
                self.events.push_back(LeaseEvent::Learned { owner: lease_owner, paxos_id });
            }
        }
        }
    }

    pub fn on_timeout(&mut self, ctx: &mut Context, log_paxos_id: PaxosId) {
        let now = ctx.now;
        if self.acquire && !self.in_startup(now) && !self.proposer.is_acquiring() {
            debug!("startup guard over, acquiring lease");
            self.proposer.start_acquiring(ctx, log_paxos_id);
        }
        self.acceptor.on_timeout(now);
        self.proposer.on_timeout(ctx, log_paxos_id);
        if self.learner.check_expired(now) {
            self.events.push_back(LeaseEvent::TimedOut);
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        let startup = if self.acquire && !self.proposer.is_acquiring() {
            Some(self.startup_until)
        } else {
            None
        };
        vec![
            startup,
            self.proposer.next_deadline(),
            self.acceptor.next_deadline(),
            self.learner.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn take_events(&mut self) -> Vec<LeaseEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_lease_owner(&self, now: u64) -> bool {
        self.learner.is_lease_owner(self.node_id, now)
    }

    pub fn is_lease_known(&self, now: u64) -> bool {
        self.learner.is_lease_known(now)
    }

    pub fn lease_owner(&self, now: u64) -> Option<NodeId> {
        self.learner.lease_owner(now)
    }

    pub fn status(&self, now: u64) -> LeaseStatus {
        LeaseStatus {
            owner: self.lease_owner(now),
            is_owner: self.is_lease_owner(now),
        }
    }

    pub fn state(&self, now: u64) -> LeaseState {
        if self.is_lease_owner(now) {
            LeaseState::Leased
        } else if self.proposer.is_preparing() {
            LeaseState::Preparing
        } else if self.proposer.is_proposing() {
            LeaseState::Proposing
        } else {
            LeaseState::Unleased
        }
    }
}
