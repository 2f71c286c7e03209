use crate::context::Context;
use crate::identity::{NodeId, PaxosId, ProposalId};
use crate::lease::LeaseMessage;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaseAcceptorState {
    pub promised_proposal_id: ProposalId,
    pub accepted: bool,
    pub accepted_proposal_id: ProposalId,
    pub accepted_lease_owner: NodeId,
    pub accepted_duration: u64,

    /// Local time at which the accepted lease lapses
    pub accepted_expire_time: u64,
}

/// Votes on lease proposals. State is volatile: a restarted node stays
/// silent for a full lease period instead of remembering its votes.
#[derive(Debug, Default)]
pub struct LeaseAcceptor {
    state: LeaseAcceptorState,
}

impl LeaseAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LeaseAcceptorState {
        &self.state
    }

    pub fn next_deadline(&self) -> Option<u64> {
        if self.state.accepted {
            Some(self.state.accepted_expire_time)
        } else {
            None
        }
    }

    fn expire(&mut self, now: u64) {
        if self.state.accepted && now >= self.state.accepted_expire_time {
            debug!("accepted lease of {} expired", self.state.accepted_lease_owner);
            self.state.accepted = false;
            self.state.accepted_proposal_id = ProposalId::ZERO;
            self.state.accepted_lease_owner = 0;
            self.state.accepted_duration = 0;
            self.state.accepted_expire_time = 0;
        }
    }

    pub fn on_timeout(&mut self, now: u64) {
        self.expire(now);
    }

    /// `log_paxos_id` is this node's log position, `paxos_id` the candidate's.
    pub fn on_prepare_request(
        &mut self,
        ctx: &mut Context,
        log_paxos_id: PaxosId,
        node_id: NodeId,
        proposal_id: ProposalId,
        paxos_id: PaxosId,
    ) {
        self.expire(ctx.now);

        let is_owner = self.state.accepted && self.state.accepted_lease_owner == node_id;
        if paxos_id < log_paxos_id && !is_owner {
            trace!("ignoring lease prepare from {} at paxos ID {} behind {}", node_id, paxos_id, log_paxos_id);
            return
        }

        if proposal_id < self.state.promised_proposal_id {
            ctx.send(node_id, LeaseMessage::PrepareRejected {
                node_id: ctx.node_id(),
                proposal_id,
            });
            return
        }

        self.state.promised_proposal_id = proposal_id;
        let reply = if self.state.accepted {
            LeaseMessage::PreviouslyAccepted {
                node_id: ctx.node_id(),
                proposal_id,
                accepted_proposal_id: self.state.accepted_proposal_id,
                lease_owner: self.state.accepted_lease_owner,
                duration: self.state.accepted_duration,
            }
        } else {
            LeaseMessage::CurrentlyOpen {
                node_id: ctx.node_id(),
                proposal_id,
            }
        };
        ctx.send(node_id, reply);
    }

    pub fn on_propose_request(
        &mut self,
        ctx: &mut Context,
        node_id: NodeId,
        proposal_id: ProposalId,
        lease_owner: NodeId,
        duration: u64,
    ) {
        self.expire(ctx.now);

        if duration > ctx.config.max_lease_time() {
            warn!("rejecting lease of {} ms from {}: longer than {} ms", duration, node_id, ctx.config.max_lease_time());
            ctx.send(node_id, LeaseMessage::ProposeRejected {
                node_id: ctx.node_id(),
                proposal_id,
            });
            return
        }

        if proposal_id < self.state.promised_proposal_id {
            ctx.send(node_id, LeaseMessage::ProposeRejected {
                node_id: ctx.node_id(),
                proposal_id,
            });
            return
        }

        self.state.promised_proposal_id = proposal_id;
        self.state.accepted = true;
        self.state.accepted_proposal_id = proposal_id;
        self.state.accepted_lease_owner = lease_owner;
        self.state.accepted_duration = duration;
        self.state.accepted_expire_time = ctx.now.saturating_add(duration);
        ctx.send(node_id, LeaseMessage::ProposeAccepted {
            node_id: ctx.node_id(),
            proposal_id,
        });
    }
}
