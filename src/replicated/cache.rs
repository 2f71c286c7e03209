use std::collections::VecDeque;

use crate::identity::PaxosId;

/// Bounded window of the most recently chosen values, used to answer
/// lagging nodes without touching storage.
#[derive(Debug)]
pub struct LogCache {
    capacity: usize,
    first: PaxosId,
    entries: VecDeque<Vec<u8>>,
}

impl LogCache {
    pub fn new(capacity: usize) -> Self {
        LogCache {
            capacity,
            first: 0,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest cached position, if any.
    pub fn first(&self) -> Option<PaxosId> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.first)
        }
    }

    /// Records the value chosen at `paxos_id`. Positions must arrive in order;
    /// a gap restarts the window.
    pub fn push(&mut self, paxos_id: PaxosId, value: Vec<u8>) {
        if self.capacity == 0 {
            return
        }
        if self.entries.is_empty() || paxos_id != self.first + self.entries.len() as PaxosId {
            self.entries.clear();
            self.first = paxos_id;
        }
        self.entries.push_back(value);
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
            self.first += 1;
        }
    }

    pub fn get(&self, paxos_id: PaxosId) -> Option<&[u8]> {
        if paxos_id < self.first {
            return None
        }
        self.entries
            .get((paxos_id - self.first) as usize)
            .map(Vec::as_slice)
    }
}
