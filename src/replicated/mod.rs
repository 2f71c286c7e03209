//! # Summary
//!
//! The replicated log runs one Paxos instance per position, one position at
//! a time. When a value is chosen it is persisted, cached, handed to the
//! consumer and the log moves to the next position, re-submitting whatever
//! the local node still has queued.
//!
//! Only the lease owner proposes. Once the owner has completed a round of its
//! own, later positions skip prepare (multi-paxos) until the lease is lost or
//! a competing prepare shows up.
//!
//! Nodes that fall behind catch up by asking the node that revealed a later
//! position for the value at their own position, one position at a time.
//! Requests about positions that are already closed are answered directly
//! from the cache, or from storage once the cache has moved on.

mod cache;

use std::collections::VecDeque;

use crate::config::Config;
use crate::context::Context;
use crate::identity::{NodeId, PaxosId};
use crate::lease::LeaseStatus;
use crate::paxos::{Acceptor, Learner, PaxosMessage, Proposer};
use crate::storage::{Storage, Ticket};

pub use self::cache::LogCache;

const THROUGHPUT_WINDOW: u64 = 1000;

fn chosen_key(paxos_id: PaxosId) -> String {
    format!("chosen/{}", paxos_id)
}

/// A value that has been chosen at `paxos_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chosen {
    pub paxos_id: PaxosId,
    pub value: Vec<u8>,

    /// Whether this completes a value appended on this node
    pub own: bool,
}

/// Counters describing how fast the log is advancing.
#[derive(Clone, Debug, Default)]
pub struct ReplicationStats {
    chosen: u64,
    bytes: u64,
    last_learn_time: Option<u64>,
    throughput: u64,
    window_start: u64,
    window_bytes: u64,
}

impl ReplicationStats {
    fn record(&mut self, now: u64, bytes: usize) {
        self.chosen += 1;
        self.bytes += bytes as u64;
        self.window_bytes += bytes as u64;
        self.last_learn_time = Some(now);
        let elapsed = now.saturating_sub(self.window_start);
        if elapsed >= THROUGHPUT_WINDOW {
            self.throughput = self.window_bytes * 1000 / elapsed;
            self.window_start = now;
            self.window_bytes = 0;
        }
    }

    /// Positions learned since startup.
    pub fn chosen(&self) -> u64 {
        self.chosen
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn last_learn_time(&self) -> Option<u64> {
        self.last_learn_time
    }

    /// Bytes per second over the last completed window.
    pub fn throughput(&self) -> u64 {
        self.throughput
    }
}

#[derive(Debug)]
pub struct ReplicatedLog {
    paxos_id: PaxosId,
    proposer: Proposer,
    acceptor: Acceptor,
    learner: Learner,
    cache: LogCache,

    /// Local appends not yet submitted
    pending: VecDeque<Vec<u8>>,

    /// Local append currently being driven, kept until it is chosen
    in_flight: Option<Vec<u8>>,

    /// Chosen values not yet taken by the consumer
    chosen: VecDeque<Chosen>,

    /// Furthest position revealed by another node, and who revealed it
    highest_seen: Option<(NodeId, PaxosId)>,

    stats: ReplicationStats,
}

impl ReplicatedLog {
    /// Resumes the log at the position persisted in `storage`.
    pub fn open(config: &Config, storage: &dyn Storage) -> Self {
        let acceptor = Acceptor::open(storage);
        let paxos_id = acceptor.paxos_id();
        let mut proposer = Proposer::new(paxos_id);
        proposer.observe(acceptor.state().promised_proposal_id);
        ReplicatedLog {
            paxos_id,
            proposer,
            acceptor,
            learner: Learner::new(paxos_id),
            cache: LogCache::new(config.log_cache_size()),
            pending: VecDeque::new(),
            in_flight: None,
            chosen: VecDeque::new(),
            highest_seen: None,
            stats: ReplicationStats::default(),
        }
    }

    pub fn paxos_id(&self) -> PaxosId {
        self.paxos_id
    }

    pub fn is_multi(&self) -> bool {
        self.proposer.is_multi()
    }

    pub fn is_appending(&self) -> bool {
        self.in_flight.is_some() || self.proposer.is_active()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len() + self.in_flight.iter().count()
    }

    pub fn stats(&self) -> &ReplicationStats {
        &self.stats
    }

    pub fn cache(&self) -> &LogCache {
        &self.cache
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.proposer.next_deadline()
    }

    /// Drains the values chosen since the last call, in log order.
    pub fn take_chosen(&mut self) -> Vec<Chosen> {
        self.chosen.drain(..).collect()
    }

    /// Queues `value` for replication. It is proposed while this node holds the lease.
    pub fn append(&mut self, ctx: &mut Context, lease: LeaseStatus, value: Vec<u8>) {
        self.pending.push_back(value);
        self.try_append_next(ctx, lease);
    }

    fn try_append_next(&mut self, ctx: &mut Context, lease: LeaseStatus) {
        if !lease.is_owner || self.proposer.is_active() || self.learner.is_learned() {
            return
        }
        if self.in_flight.is_none() {
            self.in_flight = self.pending.pop_front();
        }
        if let Some(value) = &self.in_flight {
            let value = value.clone();
            self.proposer.propose(ctx, value);
        }
    }

    pub fn on_message(&mut self, ctx: &mut Context, lease: LeaseStatus, message: PaxosMessage) {
        trace!("received {:?}", message);
        let paxos_id = message.paxos_id();
        let from = message.node_id();

        if paxos_id < self.paxos_id {
            if !message.is_learn() && from != ctx.node_id() {
                self.serve_chosen(ctx, paxos_id, from);
            }
            return
        }

        if paxos_id > self.paxos_id {
            self.catch_up(ctx, lease, from, paxos_id);
            return
        }

        match message {
        | PaxosMessage::PrepareRequest { node_id, proposal_id, .. } => {
            if node_id != ctx.node_id() && proposal_id > self.proposer.proposal_id() {
                self.proposer.set_multi(false);
            }
            self.proposer.observe(proposal_id);
            self.acceptor.on_prepare_request(ctx, paxos_id, node_id, proposal_id);
        }
        | PaxosMessage::ProposeRequest { node_id, proposal_id, value, .. } => {
            self.acceptor.on_propose_request(ctx, paxos_id, node_id, proposal_id, &value);
        }
        | PaxosMessage::PrepareRejected { .. }
        | PaxosMessage::PreviouslyAccepted { .. }
        | PaxosMessage::CurrentlyOpen { .. } => {
            self.proposer.on_prepare_response(ctx, &message);
        }
        | PaxosMessage::ProposeRejected { .. }
        | PaxosMessage::ProposeAccepted { .. } => {
            self.proposer.on_propose_response(ctx, &message);
        }
        | PaxosMessage::LearnValue { node_id, run_id, value, .. } => {
            let own_round = node_id == ctx.node_id() && run_id == ctx.run_id();
            self.on_learn_chosen(ctx, lease, own_round, false, value);
        }
        | PaxosMessage::LearnProposal { node_id, proposal_id, .. } => {
            let own_round = ctx.identity.generated(proposal_id);
            let proposer = &self.proposer;
            let current = proposer.proposal_id() == proposal_id;
            let own = own_round && current && proposer.is_own_value();
            let value = match self.acceptor.accepted_value(proposal_id) {
            | Some(value) => Some(value.to_vec()),
            | None if current => proposer.value().map(<[u8]>::to_vec),
            | None => None,
            };
            match value {
            | Some(value) => self.on_learn_chosen(ctx, lease, own_round, own, value),
            | None => self.learner.request_chosen(ctx, node_id),
            }
        }
        | PaxosMessage::RequestChosen { node_id, .. } => {
            self.learner.on_request_chosen(ctx, node_id);
        }
        }
    }

    /// Records that `node_id` has reached `paxos_id` and asks it for the
    /// value at this node's position if this node is behind.
    pub fn catch_up(&mut self, ctx: &mut Context, lease: LeaseStatus, node_id: NodeId, paxos_id: PaxosId) {
        if paxos_id <= self.paxos_id || node_id == ctx.node_id() {
            return
        }
        match self.highest_seen {
        | Some((_, highest)) if highest >= paxos_id => (),
        | _ => self.highest_seen = Some((node_id, paxos_id)),
        }
        if lease.is_owner {
            debug!("lease owner is behind {} at paxos ID {}", node_id, paxos_id);
        }
        self.learner.request_chosen(ctx, node_id);
    }

    fn serve_chosen(&self, ctx: &mut Context, paxos_id: PaxosId, node_id: NodeId) {
        let value = match self.cache.get(paxos_id) {
        | Some(value) => Some(value.to_vec()),
        | None => ctx.storage.get(&chosen_key(paxos_id)),
        };
        match value {
        | Some(value) => {
            trace!("serving paxos ID {} to {}", paxos_id, node_id);
            ctx.send(node_id, PaxosMessage::LearnValue {
                paxos_id,
                node_id: ctx.node_id(),
                run_id: ctx.run_id(),
                value,
            });
        }
        | None => warn!("paxos ID {} requested by {} is no longer available", paxos_id, node_id),
        }
    }

    /// `own_round` is set when this node's proposer ran the deciding round,
    /// `own` when that round carried the local in-flight append.
    fn on_learn_chosen(&mut self, ctx: &mut Context, lease: LeaseStatus, own_round: bool, own: bool, value: Vec<u8>) {
        let paxos_id = self.paxos_id;
        self.learner.on_learn_chosen(value.clone());
        self.proposer.set_multi(own_round && lease.is_owner);

        let own = own && self.in_flight.is_some();
        if own {
            self.in_flight = None;
        }

        self.new_paxos_round();
        ctx.storage.begin();
        ctx.storage.set(&chosen_key(paxos_id), &value);
        self.acceptor.write_state(ctx.storage);
        if let Err(error) = ctx.storage.commit() {
            warn!("failed to persist chosen value at paxos ID {}: {}", paxos_id, error);
        }

        self.stats.record(ctx.now, value.len());
        self.cache.push(paxos_id, value.clone());
        if value.is_empty() {
            trace!("skipping empty value at paxos ID {}", paxos_id);
        } else {
            self.chosen.push_back(Chosen { paxos_id, value, own });
        }

        if let Some((node_id, highest)) = self.highest_seen {
            if highest > self.paxos_id {
                self.catch_up(ctx, lease, node_id, highest);
            } else {
                self.highest_seen = None;
            }
        }

        self.try_append_next(ctx, lease);
    }

    fn new_paxos_round(&mut self) {
        self.paxos_id += 1;
        self.proposer.reset(self.paxos_id);
        self.acceptor.reset(self.paxos_id);
        self.learner.reset(self.paxos_id);
    }

    pub fn on_timeout(&mut self, ctx: &mut Context) {
        self.proposer.on_timeout(ctx);
    }

    pub fn on_commit_complete(&mut self, ctx: &mut Context, ticket: Ticket) {
        self.acceptor.on_commit_complete(ctx, ticket);
    }

    /// The lease was learned or renewed. A new owner without multi-paxos
    /// appends an empty value to establish it.
    pub fn on_lease_learned(&mut self, ctx: &mut Context, lease: LeaseStatus) {
        if !lease.is_owner {
            self.proposer.set_multi(false);
            return
        }
        if !self.proposer.is_multi() && !self.is_appending() && self.pending.is_empty() {
            debug!("appending empty value to activate multi-paxos at paxos ID {}", self.paxos_id);
            self.in_flight = Some(Vec::new());
        }
        self.try_append_next(ctx, lease);
    }

    pub fn on_lease_timeout(&mut self) {
        self.proposer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{NodeIdentity, ProposalId};
    use crate::message::Message;
    use crate::testing::Fixture;

    const OWNER: LeaseStatus = LeaseStatus { owner: Some(0), is_owner: true };
    const FOLLOWER: LeaseStatus = LeaseStatus { owner: Some(0), is_owner: false };

    fn open(fixture: &Fixture) -> ReplicatedLog {
        ReplicatedLog::open(&fixture.config, &fixture.storage)
    }

    fn learn(paxos_id: PaxosId, value: &[u8]) -> PaxosMessage {
        PaxosMessage::LearnValue { paxos_id, node_id: 1, run_id: 1, value: value.to_vec() }
    }

    /// Feeds the node's own messages back to it and answers for two peers.
    fn settle(log: &mut ReplicatedLog, fixture: &mut Fixture, lease: LeaseStatus) {
        for _ in 0..16 {
            let sent = fixture.sent_paxos();
            if sent.is_empty() {
                return
            }
            for (to, message) in sent {
                if to == 0 {
                    log.on_message(&mut fixture.ctx(0), lease, message.clone());
                }
                let reply = match &message {
                | PaxosMessage::PrepareRequest { paxos_id, proposal_id, .. } if to == 1 => {
                    Some(PaxosMessage::CurrentlyOpen { paxos_id: *paxos_id, node_id: 1, proposal_id: *proposal_id })
                }
                | PaxosMessage::ProposeRequest { paxos_id, proposal_id, .. } if to == 1 => {
                    Some(PaxosMessage::ProposeAccepted { paxos_id: *paxos_id, node_id: 1, proposal_id: *proposal_id })
                }
                | _ => None,
                };
                if let Some(reply) = reply {
                    log.on_message(&mut fixture.ctx(0), lease, reply);
                }
            }
        }
    }

    #[test]
    fn owner_appends_and_advances() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        settle(&mut log, &mut fixture, OWNER);

        assert_eq!(log.paxos_id(), 1);
        assert_eq!(log.take_chosen(), vec![Chosen { paxos_id: 0, value: b"a".to_vec(), own: true }]);
        assert!(log.is_multi());
        assert_eq!(log.cache().get(0), Some(&b"a"[..]));
        assert_eq!(fixture.storage.get("chosen/0"), Some(b"a".to_vec()));
        assert_eq!(fixture.storage.get("paxosID"), Some(b"1".to_vec()));
    }

    #[test]
    fn multi_paxos_skips_prepare() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        settle(&mut log, &mut fixture, OWNER);

        log.append(&mut fixture.ctx(0), OWNER, b"b".to_vec());
        let sent = fixture.sent_paxos();
        assert!(sent.iter().all(|(_, message)| match message {
        | PaxosMessage::ProposeRequest { paxos_id: 1, .. } => true,
        | _ => false,
        }));
        for (to, message) in sent {
            if to == 0 {
                log.on_message(&mut fixture.ctx(0), OWNER, message);
            }
        }
        settle(&mut log, &mut fixture, OWNER);
        assert_eq!(log.paxos_id(), 1);

        let proposal_id = log.proposer.proposal_id();
        log.on_message(&mut fixture.ctx(0), OWNER, PaxosMessage::ProposeAccepted { paxos_id: 1, node_id: 1, proposal_id });
        settle(&mut log, &mut fixture, OWNER);
        assert_eq!(log.paxos_id(), 2);
        assert_eq!(log.take_chosen().len(), 2);
    }

    #[test]
    fn followers_queue_appends() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), FOLLOWER, b"a".to_vec());
        assert!(fixture.sent().is_empty());
        assert_eq!(log.pending_len(), 1);
    }

    #[test]
    fn learns_foreign_values_in_order() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(0, b"x"));
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(1, b"y"));
        assert_eq!(log.paxos_id(), 2);
        let chosen = log.take_chosen();
        assert_eq!(chosen.len(), 2);
        assert!(chosen.iter().all(|chosen| !chosen.own));
        assert!(!log.is_multi());
    }

    #[test]
    fn empty_values_are_not_handed_out() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(0, b""));
        assert_eq!(log.paxos_id(), 1);
        assert!(log.take_chosen().is_empty());
    }

    #[test]
    fn past_positions_are_served_from_cache_then_storage() {
        let mut fixture = Fixture::new(0, 3);
        fixture.config = fixture.config.clone().with_log_cache_size(1);
        let mut log = open(&fixture);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(0, b"x"));
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(1, b"y"));

        log.on_message(&mut fixture.ctx(0), FOLLOWER, PaxosMessage::RequestChosen { paxos_id: 1, node_id: 2 });
        log.on_message(&mut fixture.ctx(0), FOLLOWER, PaxosMessage::PrepareRequest {
            paxos_id: 0,
            node_id: 2,
            proposal_id: ProposalId::new(1, 1, 2),
        });
        let sent = fixture.sent_paxos();
        assert_eq!(sent, vec![
            (2, PaxosMessage::LearnValue { paxos_id: 1, node_id: 0, run_id: 1, value: b"y".to_vec() }),
            (2, PaxosMessage::LearnValue { paxos_id: 0, node_id: 0, run_id: 1, value: b"x".to_vec() }),
        ]);
    }

    #[test]
    fn future_positions_trigger_catch_up() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, PaxosMessage::PrepareRequest {
            paxos_id: 2,
            node_id: 1,
            proposal_id: ProposalId::new(1, 1, 1),
        });
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::RequestChosen { paxos_id: 0, node_id: 0 })]);

        log.on_message(&mut fixture.ctx(10), FOLLOWER, learn(0, b"x"));
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::RequestChosen { paxos_id: 1, node_id: 0 })]);

        log.on_message(&mut fixture.ctx(20), FOLLOWER, learn(1, b"y"));
        assert!(fixture.sent().is_empty());
        assert_eq!(log.paxos_id(), 2);
    }

    #[test]
    fn learn_proposal_resolves_from_accepted_value() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        let proposal_id = ProposalId::new(1, 1, 1);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, PaxosMessage::ProposeRequest {
            paxos_id: 0,
            node_id: 1,
            proposal_id,
            value: b"x".to_vec(),
        });
        fixture.sent();

        log.on_message(&mut fixture.ctx(0), FOLLOWER, PaxosMessage::LearnProposal { paxos_id: 0, node_id: 1, proposal_id });
        assert_eq!(log.paxos_id(), 1);
        assert_eq!(log.take_chosen()[0].value, b"x".to_vec());

        let other = ProposalId::new(2, 1, 1);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, PaxosMessage::LearnProposal { paxos_id: 1, node_id: 1, proposal_id: other });
        assert_eq!(log.paxos_id(), 1);
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::RequestChosen { paxos_id: 1, node_id: 0 })]);
    }

    #[test]
    fn new_owner_appends_empty_value() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.on_lease_learned(&mut fixture.ctx(0), OWNER);
        let sent = fixture.sent();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|(_, message)| match message {
        | Message::Paxos(PaxosMessage::PrepareRequest { .. }) => true,
        | _ => false,
        }));
        assert!(log.is_appending());
    }

    #[test]
    fn foreign_prepare_disables_multi() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        settle(&mut log, &mut fixture, OWNER);
        assert!(log.is_multi());

        let higher = ProposalId::new(log.proposer.proposal_id().round() + 1, 1, 2);
        log.on_message(&mut fixture.ctx(0), OWNER, PaxosMessage::PrepareRequest { paxos_id: 1, node_id: 2, proposal_id: higher });
        assert!(!log.is_multi());
    }

    #[test]
    fn losing_lease_to_another_owner_disables_multi() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        settle(&mut log, &mut fixture, OWNER);
        assert!(log.is_multi());

        let other = LeaseStatus { owner: Some(2), is_owner: false };
        log.on_lease_learned(&mut fixture.ctx(0), other);
        assert!(!log.is_multi());
        assert!(fixture.sent().is_empty());
    }

    #[test]
    fn lagging_owner_still_catches_up() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.on_message(&mut fixture.ctx(0), OWNER, PaxosMessage::ProposeAccepted {
            paxos_id: 3,
            node_id: 1,
            proposal_id: ProposalId::new(1, 1, 0),
        });
        assert_eq!(fixture.sent_paxos(), vec![(1, PaxosMessage::RequestChosen { paxos_id: 0, node_id: 0 })]);
    }

    #[test]
    fn foreign_value_with_equal_bytes_is_not_own() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        fixture.sent();

        log.on_message(&mut fixture.ctx(0), OWNER, learn(0, b"a"));
        assert_eq!(log.take_chosen(), vec![Chosen { paxos_id: 0, value: b"a".to_vec(), own: false }]);
        assert_eq!(log.pending_len(), 1);
        assert!(log.proposer.is_active());
        assert_eq!(log.proposer.paxos_id(), 1);
        assert_eq!(log.proposer.value(), Some(&b"a"[..]));

        settle(&mut log, &mut fixture, OWNER);
        assert_eq!(log.take_chosen(), vec![Chosen { paxos_id: 1, value: b"a".to_vec(), own: true }]);
        assert_eq!(log.pending_len(), 0);
    }

    #[test]
    fn own_rounds_are_recognized_after_many_restarts() {
        let mut fixture = Fixture::new(0, 3);
        fixture.identity = NodeIdentity::new(0, (1 << 16) + 1);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        settle(&mut log, &mut fixture, OWNER);
        assert_eq!(log.take_chosen(), vec![Chosen { paxos_id: 0, value: b"a".to_vec(), own: true }]);
        assert!(log.is_multi());
    }

    #[test]
    fn lease_timeout_stops_proposer_and_keeps_value() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.append(&mut fixture.ctx(0), OWNER, b"a".to_vec());
        assert!(log.next_deadline().is_some());
        log.on_lease_timeout();
        assert_eq!(log.next_deadline(), None);
        assert_eq!(log.pending_len(), 1);
    }

    #[test]
    fn resumes_from_storage() {
        let mut fixture = Fixture::new(0, 3);
        let mut log = open(&fixture);
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(0, b"x"));
        log.on_message(&mut fixture.ctx(0), FOLLOWER, learn(1, b"y"));
        let log = open(&fixture);
        assert_eq!(log.paxos_id(), 2);
    }
}
