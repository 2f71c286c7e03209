use crate::identity::NodeId;
use crate::lease::LEASE_MARGIN;

/// Tracks the most recently announced lease and when it lapses locally.
#[derive(Debug, Default)]
pub struct LeaseLearner {
    learned: bool,
    lease_owner: NodeId,
    expire_time: u64,
}

impl LeaseLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// The owner trusts its own expiry; everyone else counts down the
    /// remaining duration minus a safety margin from receipt.
    pub fn on_learn_chosen(
        &mut self,
        now: u64,
        node_id: NodeId,
        lease_owner: NodeId,
        duration: u64,
        local_expire_time: u64,
    ) {
        let expire_time = if lease_owner == node_id {
            local_expire_time
        } else {
            now.saturating_add(duration.saturating_sub(LEASE_MARGIN))
        };
        if expire_time <= now {
            trace!("ignoring lapsed lease of {}", lease_owner);
            return
        }
        if !self.learned || self.lease_owner != lease_owner {
            info!("node {} holds the lease", lease_owner);
        }
        self.learned = true;
        self.lease_owner = lease_owner;
        self.expire_time = expire_time;
    }

    /// Forgets a lapsed lease. Returns whether one just lapsed.
    pub fn check_expired(&mut self, now: u64) -> bool {
        if self.learned && now >= self.expire_time {
            info!("lease of {} expired", self.lease_owner);
            self.learned = false;
            self.lease_owner = 0;
            self.expire_time = 0;
            true
        } else {
            false
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        if self.learned {
            Some(self.expire_time)
        } else {
            None
        }
    }

    pub fn is_lease_known(&self, now: u64) -> bool {
        self.learned && now < self.expire_time
    }

    pub fn is_lease_owner(&self, node_id: NodeId, now: u64) -> bool {
        self.is_lease_known(now) && self.lease_owner == node_id
    }

    pub fn lease_owner(&self, now: u64) -> Option<NodeId> {
        if self.is_lease_known(now) {
            Some(self.lease_owner)
        } else {
            None
        }
    }

    pub fn expire_time(&self) -> Option<u64> {
        self.next_deadline()
    }
}
