//! # Summary
//!
//! This module abstracts over stable storage. To perform failure recovery, Paxos
//! requires that some state persist between failures.
//!
//! Writes are grouped into transactions: `begin`, any number of `set`, then
//! `commit`. A commit is either durable on return, or pending until the owner
//! of the storage reports completion with its ticket.
//!
//! `FileStorage` uses `bincode` to serialize the whole key space to the
//! filesystem on every commit. This is a naive, inefficient implementation
//! that clears the file on every write and re-serializes data from scratch.

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use hashbrown::HashMap as Map;

use crate::error::{Error, Result};

/// Identifies a commit whose durability is reported later.
pub type Ticket = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Commit {
    /// Data is durable.
    Durable,

    /// Data becomes durable once the ticket is completed.
    Pending(Ticket),
}

/// Transactional key-value store holding the durable consensus state.
pub trait Storage: Send {
    /// Starts a new transaction, discarding anything staged but uncommitted.
    fn begin(&mut self);

    fn set(&mut self, key: &str, value: &[u8]);

    /// Reads the latest value, including staged and pending writes.
    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn commit(&mut self) -> Result<Commit>;
}

pub(crate) fn get_u64(storage: &dyn Storage, key: &str) -> Option<u64> {
    let bytes = storage.get(key)?;
    match std::str::from_utf8(&bytes).ok().and_then(|text| text.parse().ok()) {
    | Some(number) => Some(number),
    | None => panic!("[STORAGE ERROR]: corrupt integer under key {}", key),
    }
}

pub(crate) fn set_u64(storage: &mut dyn Storage, key: &str, value: u64) {
    storage.set(key, value.to_string().as_bytes());
}

pub(crate) fn get_bool(storage: &dyn Storage, key: &str) -> Option<bool> {
    get_u64(storage, key).map(|value| value != 0)
}

pub(crate) fn set_bool(storage: &mut dyn Storage, key: &str, value: bool) {
    set_u64(storage, key, value as u64);
}

/// Volatile storage for tests and single-process clusters.
///
/// In deferred mode commits return `Commit::Pending` until `complete` is
/// called, and `crash` discards every write that has not completed.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    durable: Map<String, Vec<u8>>,
    staged: Map<String, Vec<u8>>,
    pending: Vec<(Ticket, Map<String, Vec<u8>>)>,
    deferred: bool,
    fail_next: bool,
    next_ticket: Ticket,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deferred() -> Self {
        MemoryStorage {
            deferred: true,
            ..Self::default()
        }
    }

    pub fn set_deferred(&mut self, deferred: bool) {
        self.deferred = deferred;
    }

    /// Makes the next commit fail and lose its writes.
    pub fn fail_next_commit(&mut self) {
        self.fail_next = true;
    }

    pub fn pending_tickets(&self) -> Vec<Ticket> {
        self.pending.iter().map(|(ticket, _)| *ticket).collect()
    }

    /// Makes a pending commit durable. Returns false for unknown tickets.
    pub fn complete(&mut self, ticket: Ticket) -> bool {
        match self.pending.iter().position(|(pending, _)| *pending == ticket) {
        | Some(index) => {
            let (_, writes) = self.pending.remove(index);
            self.durable.extend(writes);
            true
        }
        | None => false,
        }
    }

    /// Completes every pending commit in order and returns their tickets.
    pub fn complete_all(&mut self) -> Vec<Ticket> {
        let tickets = self.pending_tickets();
        for ticket in &tickets {
            self.complete(*ticket);
        }
        tickets
    }

    /// Drops everything that is not yet durable.
    pub fn crash(&mut self) {
        self.staged.clear();
        self.pending.clear();
    }
}

impl Storage for MemoryStorage {
    fn begin(&mut self) {
        self.staged.clear();
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.staged.insert(key.to_string(), value.to_vec());
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(value) = self.staged.get(key) {
            return Some(value.clone())
        }
        self.pending
            .iter()
            .rev()
            .find_map(|(_, writes)| writes.get(key))
            .or_else(|| self.durable.get(key))
            .cloned()
    }

    fn commit(&mut self) -> Result<Commit> {
        let writes = std::mem::take(&mut self.staged);
        if self.fail_next {
            self.fail_next = false;
            return Err(Error::CommitFailed)
        }
        if self.deferred {
            self.next_ticket += 1;
            self.pending.push((self.next_ticket, writes));
            Ok(Commit::Pending(self.next_ticket))
        } else {
            self.durable.extend(writes);
            Ok(Commit::Durable)
        }
    }
}

/// Persistent storage backed by a single bincode file.
#[derive(Debug)]
pub struct FileStorage {
    file: std::fs::File,
    durable: BTreeMap<String, Vec<u8>>,
    staged: BTreeMap<String, Vec<u8>>,
}

impl FileStorage {
    /// Opens or creates the storage file at `path`, loading any existing state.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let durable = if file.metadata()?.len() == 0 {
            BTreeMap::new()
        } else {
            bincode::deserialize_from(&file)?
        };
        Ok(FileStorage {
            file,
            durable,
            staged: BTreeMap::new(),
        })
    }
}

impl Storage for FileStorage {
    fn begin(&mut self) {
        self.staged.clear();
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.staged.insert(key.to_string(), value.to_vec());
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.staged
            .get(key)
            .or_else(|| self.durable.get(key))
            .cloned()
    }

    fn commit(&mut self) -> Result<Commit> {
        let writes = std::mem::take(&mut self.staged);
        let mut next = self.durable.clone();
        next.extend(writes);
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        bincode::serialize_into(&mut self.file, &next)?;
        self.file.sync_all()?;
        self.durable = next;
        Ok(Commit::Durable)
    }
}
