//! # Summary
//!
//! The acceptor votes on prepare and propose requests for the current log
//! position. Its state is made durable before any reply leaves the node: when
//! storage reports a pending commit, the reply is parked until the commit
//! completes, and further requests are rejected in the meantime.
//!
//! A promise is not tied to a position. It carries over when the log
//! advances, which is what lets a stable proposer skip prepare.

use crate::context::Context;
use crate::identity::{NodeId, PaxosId, ProposalId};
use crate::paxos::PaxosMessage;
use crate::storage::{self, Commit, Storage, Ticket};

const PAXOS_ID: &str = "paxosID";
const ACCEPTED: &str = "accepted";
const PROMISED_PROPOSAL_ID: &str = "promisedProposalID";
const ACCEPTED_PROPOSAL_ID: &str = "acceptedProposalID";
const ACCEPTED_VALUE: &str = "acceptedValue";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptorState {
    pub promised_proposal_id: ProposalId,
    pub accepted: bool,
    pub accepted_proposal_id: ProposalId,
    pub accepted_value: Vec<u8>,
}

#[derive(Debug)]
struct PendingReply {
    ticket: Ticket,
    node_id: NodeId,
    message: PaxosMessage,
}

#[derive(Debug)]
pub struct Acceptor {
    paxos_id: PaxosId,
    state: AcceptorState,
    pending: Option<PendingReply>,
}

impl Acceptor {
    pub fn new(paxos_id: PaxosId) -> Self {
        Acceptor {
            paxos_id,
            state: AcceptorState::default(),
            pending: None,
        }
    }

    /// Restores the position and votes persisted before a restart.
    pub fn open(storage: &dyn Storage) -> Self {
        let paxos_id = storage::get_u64(storage, PAXOS_ID).unwrap_or(0);
        let state = AcceptorState {
            promised_proposal_id: storage::get_u64(storage, PROMISED_PROPOSAL_ID)
                .map(ProposalId::from_raw)
                .unwrap_or_default(),
            accepted: storage::get_bool(storage, ACCEPTED).unwrap_or(false),
            accepted_proposal_id: storage::get_u64(storage, ACCEPTED_PROPOSAL_ID)
                .map(ProposalId::from_raw)
                .unwrap_or_default(),
            accepted_value: storage.get(ACCEPTED_VALUE).unwrap_or_default(),
        };
        if paxos_id > 0 || state.accepted {
            info!("recovered acceptor at paxos ID {} with promise {:?}", paxos_id, state.promised_proposal_id);
        }
        Acceptor {
            paxos_id,
            state,
            pending: None,
        }
    }

    pub fn paxos_id(&self) -> PaxosId {
        self.paxos_id
    }

    pub fn state(&self) -> &AcceptorState {
        &self.state
    }

    pub fn is_commit_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Value accepted under exactly `proposal_id`, if any.
    pub fn accepted_value(&self, proposal_id: ProposalId) -> Option<&[u8]> {
        if self.state.accepted && self.state.accepted_proposal_id == proposal_id {
            Some(&self.state.accepted_value)
        } else {
            None
        }
    }

    /// Moves to a new log position. The promise is kept.
    pub fn reset(&mut self, paxos_id: PaxosId) {
        self.paxos_id = paxos_id;
        self.state.accepted = false;
        self.state.accepted_proposal_id = ProposalId::ZERO;
        self.state.accepted_value.clear();
    }

    /// Stages the full acceptor state into the open transaction.
    pub(crate) fn write_state(&self, storage: &mut dyn Storage) {
        storage::set_u64(storage, PAXOS_ID, self.paxos_id);
        storage::set_bool(storage, ACCEPTED, self.state.accepted);
        storage::set_u64(storage, PROMISED_PROPOSAL_ID, self.state.promised_proposal_id.raw());
        storage::set_u64(storage, ACCEPTED_PROPOSAL_ID, self.state.accepted_proposal_id.raw());
        storage.set(ACCEPTED_VALUE, &self.state.accepted_value);
    }

    fn rejects(&self, paxos_id: PaxosId, proposal_id: ProposalId) -> bool {
        if self.pending.is_some() {
            trace!("rejecting {:?}: commit pending", proposal_id);
            return true
        }
        if paxos_id != self.paxos_id {
            trace!("rejecting {:?}: paxos ID {} is not {}", proposal_id, paxos_id, self.paxos_id);
            return true
        }
        proposal_id < self.state.promised_proposal_id
    }

    pub fn on_prepare_request(&mut self, ctx: &mut Context, paxos_id: PaxosId, node_id: NodeId, proposal_id: ProposalId) {
        if self.rejects(paxos_id, proposal_id) {
            ctx.send(node_id, PaxosMessage::PrepareRejected {
                paxos_id,
                node_id: ctx.node_id(),
                proposal_id,
                promised_proposal_id: self.state.promised_proposal_id,
            });
            return
        }

        let previous = self.state.clone();
        self.state.promised_proposal_id = proposal_id;
        let reply = if self.state.accepted {
            PaxosMessage::PreviouslyAccepted {
                paxos_id,
                node_id: ctx.node_id(),
                proposal_id,
                accepted_proposal_id: self.state.accepted_proposal_id,
                value: self.state.accepted_value.clone(),
            }
        } else {
            PaxosMessage::CurrentlyOpen {
                paxos_id,
                node_id: ctx.node_id(),
                proposal_id,
            }
        };
        self.persist_and_reply(ctx, previous, node_id, reply);
    }

    pub fn on_propose_request(&mut self, ctx: &mut Context, paxos_id: PaxosId, node_id: NodeId, proposal_id: ProposalId, value: &[u8]) {
        if self.rejects(paxos_id, proposal_id) {
            ctx.send(node_id, PaxosMessage::ProposeRejected {
                paxos_id,
                node_id: ctx.node_id(),
                proposal_id,
            });
            return
        }

        let previous = self.state.clone();
        self.state.promised_proposal_id = proposal_id;
        self.state.accepted = true;
        self.state.accepted_proposal_id = proposal_id;
        self.state.accepted_value = value.to_vec();
        let reply = PaxosMessage::ProposeAccepted {
            paxos_id,
            node_id: ctx.node_id(),
            proposal_id,
        };
        self.persist_and_reply(ctx, previous, node_id, reply);
    }

    /// Releases the reply parked behind `ticket`.
    pub fn on_commit_complete(&mut self, ctx: &mut Context, ticket: Ticket) {
        match self.pending.take() {
        | Some(pending) if pending.ticket == ticket => ctx.send(pending.node_id, pending.message),
        | other => self.pending = other,
        }
    }

    fn persist_and_reply(&mut self, ctx: &mut Context, previous: AcceptorState, node_id: NodeId, reply: PaxosMessage) {
        ctx.storage.begin();
        self.write_state(ctx.storage);
        match ctx.storage.commit() {
        | Ok(Commit::Durable) => ctx.send(node_id, reply),
        | Ok(Commit::Pending(ticket)) => {
            trace!("parking {:?} behind commit {}", reply, ticket);
            self.pending = Some(PendingReply { ticket, node_id, message: reply });
        }
        | Err(error) => {
            warn!("failed to persist acceptor state at paxos ID {}: {}", self.paxos_id, error);
            self.state = previous;
        }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    fn id(round: u64, node_id: NodeId) -> ProposalId {
        ProposalId::new(round, 1, node_id)
    }

    #[test]
    fn promises_then_reports_accepted_value() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(0);

        acceptor.on_prepare_request(&mut fixture.ctx(0), 0, 1, id(1, 1));
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::CurrentlyOpen {
            paxos_id: 0,
            node_id: 0,
            proposal_id: id(1, 1),
        })]);

        acceptor.on_propose_request(&mut fixture.ctx(0), 0, 1, id(1, 1), b"x");
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::ProposeAccepted {
            paxos_id: 0,
            node_id: 0,
            proposal_id: id(1, 1),
        })]);

        acceptor.on_prepare_request(&mut fixture.ctx(0), 0, 2, id(2, 2));
        assert_eq!(fixture.sent_paxos(), vec![(2, PaxosMessage::PreviouslyAccepted {
            paxos_id: 0,
            node_id: 0,
            proposal_id: id(2, 2),
            accepted_proposal_id: id(1, 1),
            value: b"x".to_vec(),
        })]);
    }

    #[test]
    fn rejects_below_promise() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(0);
        acceptor.on_prepare_request(&mut fixture.ctx(0), 0, 2, id(5, 2));
        fixture.sent();

        acceptor.on_prepare_request(&mut fixture.ctx(0), 0, 1, id(4, 1));
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::PrepareRejected {
            paxos_id: 0,
            node_id: 0,
            proposal_id: id(4, 1),
            promised_proposal_id: id(5, 2),
        })]);

        acceptor.on_propose_request(&mut fixture.ctx(0), 0, 1, id(4, 1), b"late");
        assert_eq!(fixture.sent_paxos()[0].1, PaxosMessage::ProposeRejected {
            paxos_id: 0,
            node_id: 0,
            proposal_id: id(4, 1),
        });
        assert!(!acceptor.state().accepted);
    }

    #[test]
    fn accepting_raises_promise() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(0);
        acceptor.on_propose_request(&mut fixture.ctx(0), 0, 1, id(3, 1), b"x");
        assert_eq!(acceptor.state().promised_proposal_id, id(3, 1));
        fixture.sent();
        acceptor.on_prepare_request(&mut fixture.ctx(0), 0, 2, id(2, 2));
        match &fixture.sent_paxos()[0].1 {
        | PaxosMessage::PrepareRejected { .. } => (),
        | other => panic!("expected rejection, found {:?}", other),
        }
    }

    #[test]
    fn rejects_other_positions() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(4);
        acceptor.on_prepare_request(&mut fixture.ctx(0), 5, 1, id(1, 1));
        match &fixture.sent_paxos()[0].1 {
        | PaxosMessage::PrepareRejected { paxos_id: 5, .. } => (),
        | other => panic!("expected rejection, found {:?}", other),
        }
    }

    #[test]
    fn promise_survives_advancement() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(0);
        acceptor.on_propose_request(&mut fixture.ctx(0), 0, 1, id(3, 1), b"x");
        acceptor.reset(1);
        assert!(!acceptor.state().accepted);
        assert_eq!(acceptor.state().promised_proposal_id, id(3, 1));
        fixture.sent();
        acceptor.on_propose_request(&mut fixture.ctx(0), 1, 2, id(2, 2), b"y");
        match &fixture.sent_paxos()[0].1 {
        | PaxosMessage::ProposeRejected { .. } => (),
        | other => panic!("expected rejection, found {:?}", other),
        }
    }

    #[test]
    fn reply_waits_for_durable_commit() {
        let mut fixture = Fixture::new(0, 3);
        fixture.storage.set_deferred(true);
        let mut acceptor = Acceptor::new(0);

        acceptor.on_propose_request(&mut fixture.ctx(0), 0, 1, id(1, 1), b"x");
        assert!(fixture.sent().is_empty());
        assert!(acceptor.is_commit_pending());

        acceptor.on_prepare_request(&mut fixture.ctx(0), 0, 2, id(9, 2));
        match &fixture.sent_paxos()[0] {
        | (2, PaxosMessage::PrepareRejected { .. }) => (),
        | other => panic!("expected rejection while pending, found {:?}", other),
        }

        let tickets = fixture.storage.complete_all();
        acceptor.on_commit_complete(&mut fixture.ctx(1), tickets[0] + 100);
        assert!(fixture.sent().is_empty());
        acceptor.on_commit_complete(&mut fixture.ctx(1), tickets[0]);
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::ProposeAccepted {
            paxos_id: 0,
            node_id: 0,
            proposal_id: id(1, 1),
        })]);
        assert!(!acceptor.is_commit_pending());
    }

    #[test]
    fn failed_commit_sends_nothing_and_keeps_old_state() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(0);
        fixture.storage.fail_next_commit();
        acceptor.on_propose_request(&mut fixture.ctx(0), 0, 1, id(1, 1), b"x");
        assert!(fixture.sent().is_empty());
        assert_eq!(acceptor.state(), &AcceptorState::default());
    }

    #[test]
    fn recovers_from_storage() {
        let mut fixture = Fixture::new(0, 3);
        let mut acceptor = Acceptor::new(7);
        acceptor.on_propose_request(&mut fixture.ctx(0), 7, 1, id(2, 1), b"kept");
        let recovered = Acceptor::open(&fixture.storage);
        assert_eq!(recovered.paxos_id(), 7);
        assert_eq!(recovered.state(), acceptor.state());
        assert_eq!(recovered.accepted_value(id(2, 1)), Some(&b"kept"[..]));
        assert_eq!(recovered.accepted_value(id(3, 1)), None);
    }
}
