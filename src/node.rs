//! # Summary
//!
//! A `Node` bundles one replicated log and one lease with the collaborators
//! they share: identity, configuration, quorum, transport and storage. It is
//! a plain state machine. Whoever drives it feeds in inbound messages, local
//! appends, timer expiries and storage completions, together with the current
//! time, and drains outbound messages from the transport.
//!
//! Every start increments the persisted run ID, so proposal IDs issued after
//! a restart never collide with those issued before it.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::identity::{NodeIdentity, PaxosId};
use crate::lease::{LeaseEvent, LeaseState, LeaseStatus, PaxosLease};
use crate::message::Message;
use crate::quorum::Quorum;
use crate::replicated::{Chosen, ReplicatedLog, ReplicationStats};
use crate::storage::{self, Storage, Ticket};
use crate::transport::Transport;

const RUN_ID: &str = "runID";

pub struct Node<T: Transport, S: Storage> {
    identity: NodeIdentity,
    config: Config,
    quorum: Box<dyn Quorum>,
    transport: T,
    storage: S,
    rng: StdRng,
    log: ReplicatedLog,
    lease: PaxosLease,

    /// Lease events not yet taken by the application
    events: VecDeque<LeaseEvent>,
}

impl<T: Transport, S: Storage> Node<T, S> {
    /// Recovers persisted state and starts a new run. The lease stays silent
    /// until one maximum lease period after `now`.
    pub fn open(config: Config, quorum: Box<dyn Quorum>, transport: T, mut storage: S, now: u64) -> Result<Self> {
        let run_id = storage::get_u64(&storage, RUN_ID).unwrap_or(0) + 1;
        storage.begin();
        storage::set_u64(&mut storage, RUN_ID, run_id);
        storage.commit()?;

        let identity = NodeIdentity::new(config.id(), run_id);
        let log = ReplicatedLog::open(&config, &storage);
        let lease = PaxosLease::new(&config, now);
        info!("node {} starting run {} at paxos ID {}", config.id(), run_id, log.paxos_id());

        Ok(Node {
            rng: StdRng::seed_from_u64(run_id << 16 | config.id()),
            identity,
            config,
            quorum,
            transport,
            storage,
            log,
            lease,
            events: VecDeque::new(),
        })
    }

    fn split(&mut self, now: u64) -> (Context<'_>, &mut ReplicatedLog, &mut PaxosLease) {
        let ctx = Context {
            identity: &self.identity,
            config: &self.config,
            quorum: &*self.quorum,
            transport: &mut self.transport,
            storage: &mut self.storage,
            rng: &mut self.rng,
            now,
        };
        (ctx, &mut self.log, &mut self.lease)
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paxos_id(&self) -> PaxosId {
        self.log.paxos_id()
    }

    pub fn stats(&self) -> &ReplicationStats {
        self.log.stats()
    }

    pub fn log(&self) -> &ReplicatedLog {
        &self.log
    }

    pub fn lease_status(&self, now: u64) -> LeaseStatus {
        self.lease.status(now)
    }

    pub fn lease_state(&self, now: u64) -> LeaseState {
        self.lease.state(now)
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Tears the node down, keeping only what survives a crash.
    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn on_bytes(&mut self, now: u64, bytes: &[u8]) {
        match Message::decode(bytes) {
        | Ok(message) => self.on_message(now, message),
        | Err(error) => warn!("dropping malformed message: {}", error),
        }
    }

    pub fn on_message(&mut self, now: u64, message: Message) {
        match message {
        | Message::Paxos(message) => {
            let status = self.lease.status(now);
            let (mut ctx, log, _) = self.split(now);
            log.on_message(&mut ctx, status, message);
        }
        | Message::Lease(message) => {
            let paxos_id = self.log.paxos_id();
            let (mut ctx, _, lease) = self.split(now);
            lease.on_message(&mut ctx, paxos_id, message);
            self.on_lease_events(now);
        }
        }
    }

    /// Queues `value` for the log. Fails fast if another node holds the
    /// lease; starts acquiring it if nobody does.
    pub fn append(&mut self, now: u64, value: Vec<u8>) -> Result<()> {
        if value.is_empty() {
            return Err(Error::EmptyValue)
        }
        let status = self.lease.status(now);
        match status.owner {
        | Some(owner) if !status.is_owner => return Err(Error::NotLeaseOwner { owner }),
        | _ => (),
        }
        let paxos_id = self.log.paxos_id();
        let (mut ctx, log, lease) = self.split(now);
        log.append(&mut ctx, status, value);
        if status.owner.is_none() {
            lease.acquire_lease(&mut ctx, paxos_id);
        }
        Ok(())
    }

    pub fn acquire_lease(&mut self, now: u64) {
        let paxos_id = self.log.paxos_id();
        let (mut ctx, _, lease) = self.split(now);
        lease.acquire_lease(&mut ctx, paxos_id);
    }

    pub fn stop_lease(&mut self) {
        self.lease.stop();
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match (self.log.next_deadline(), self.lease.next_deadline()) {
        | (Some(log), Some(lease)) => Some(std::cmp::min(log, lease)),
        | (deadline, None) | (None, deadline) => deadline,
        }
    }

    /// Fires every timer due at `now`.
    pub fn on_timeout(&mut self, now: u64) {
        let paxos_id = self.log.paxos_id();
        let (mut ctx, log, lease) = self.split(now);
        log.on_timeout(&mut ctx);
        lease.on_timeout(&mut ctx, paxos_id);
        self.on_lease_events(now);
    }

    pub fn on_commit_complete(&mut self, now: u64, ticket: Ticket) {
        let (mut ctx, log, _) = self.split(now);
        log.on_commit_complete(&mut ctx, ticket);
    }

    pub fn take_chosen(&mut self) -> Vec<Chosen> {
        self.log.take_chosen()
    }

    pub fn take_lease_events(&mut self) -> Vec<LeaseEvent> {
        self.events.drain(..).collect()
    }

    fn on_lease_events(&mut self, now: u64) {
        let events = self.lease.take_events();
        if events.is_empty() {
            return
        }
        let status = self.lease.status(now);
        let (mut ctx, log, _) = self.split(now);
        for event in &events {
            match *event {
            | LeaseEvent::Learned { owner, paxos_id } => {
                log.catch_up(&mut ctx, status, owner, paxos_id);
                log.on_lease_learned(&mut ctx, status);
            }
            | LeaseEvent::TimedOut => log.on_lease_timeout(),
            }
        }
        self.events.extend(events);
    }
}
