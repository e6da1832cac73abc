//! Connection scheduler
//!
//! Picks the poll group for a new qpair. All scheduling state lives in one
//! `ConnScheduler` that the target keeps behind a mutex:
//!
//! - `PollGroupRing` - live poll groups in creation order plus a cursor
//! - `AffinityCache` - host address → poll group, for `HostIp`
//!
//! Round-robin hands out the group at the cursor and advances it. `HostIp`
//! reuses the cached group of the qpair's host, and otherwise places the
//! qpair round-robin and remembers the choice. When the peer address
//! cannot be read or the cache cannot take another entry, `HostIp` falls
//! back to plain round-robin.

use pollgroup_core::{HostAddr, PollGroupId, PollGroupRef, Qpair};
use tracing::{debug, warn};

use crate::affinity::AffinityCache;
use crate::config::ConnSchedPolicy;
use crate::error::{Result, TargetError};

/// Live poll groups in insertion order, with a rotation cursor.
#[derive(Debug, Default)]
pub struct PollGroupRing {
    groups: Vec<PollGroupRef>,
    cursor: usize,
}

impl PollGroupRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `group`. The first group inserted is where rotation starts.
    pub fn insert(&mut self, group: PollGroupRef) {
        self.groups.push(group);
    }

    /// Remove `id`, keeping the cursor on the group it pointed at (or on
    /// the group after a removed one).
    pub fn remove(&mut self, id: PollGroupId) -> Option<PollGroupRef> {
        let pos = self.groups.iter().position(|g| g.id == id)?;
        let removed = self.groups.remove(pos);
        if pos < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.groups.len() {
            self.cursor = 0;
        }
        Some(removed)
    }

    /// Group at the cursor; advances the cursor, wrapping at the end.
    pub fn next(&mut self) -> Option<PollGroupRef> {
        let group = *self.groups.get(self.cursor)?;
        self.cursor = (self.cursor + 1) % self.groups.len();
        Some(group)
    }

    pub fn contains(&self, id: PollGroupId) -> bool {
        self.groups.iter().any(|g| g.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PollGroupRef> {
        self.groups.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[derive(Debug)]
pub struct ConnScheduler {
    policy: ConnSchedPolicy,
    ring: PollGroupRing,
    cache: AffinityCache,
}

impl ConnScheduler {
    pub fn new(policy: ConnSchedPolicy, max_affinity_entries: usize) -> Self {
        Self {
            policy,
            ring: PollGroupRing::new(),
            cache: AffinityCache::new(max_affinity_entries),
        }
    }

    #[inline]
    pub fn policy(&self) -> ConnSchedPolicy {
        self.policy
    }

    pub fn add_group(&mut self, group: PollGroupRef) {
        self.ring.insert(group);
    }

    /// Take `id` out of rotation and forget every host cached on it.
    pub fn remove_group(&mut self, id: PollGroupId) -> bool {
        if self.ring.remove(id).is_none() {
            return false;
        }
        let purged = self.cache.purge_group(id);
        if purged > 0 {
            debug!(group = %id, purged, "affinity entries purged");
        }
        true
    }

    pub fn groups(&self) -> Vec<PollGroupRef> {
        self.ring.iter().copied().collect()
    }

    pub fn cache(&self) -> &AffinityCache {
        &self.cache
    }

    /// Choose the poll group for `qpair`.
    ///
    /// When the choice went through the affinity cache the qpair records
    /// its host, so the reference can be released on disconnect.
    pub fn select(&mut self, qpair: &mut Qpair) -> Result<PollGroupRef> {
        match self.policy {
            ConnSchedPolicy::RoundRobin => self.round_robin(),
            ConnSchedPolicy::HostIp => self.host_affinity(qpair),
        }
    }

    /// Release the cache reference a qpair placed on `group` took for
    /// `host`.
    pub fn release(&mut self, host: &HostAddr, group: PollGroupId) -> bool {
        self.cache.release(host, group)
    }

    fn round_robin(&mut self) -> Result<PollGroupRef> {
        self.ring.next().ok_or(TargetError::NoPollGroup)
    }

    fn host_affinity(&mut self, qpair: &mut Qpair) -> Result<PollGroupRef> {
        if self.ring.is_empty() {
            return Err(TargetError::NoPollGroup);
        }
        let host = match qpair.peer_addr() {
            Ok(addr) => addr.traddr,
            Err(e) => {
                warn!(qpair = %qpair.id(), error = %e, "peer address unavailable, using round-robin");
                return self.round_robin();
            }
        };

        if let Some(group) = self.cache.lookup(&host) {
            qpair.set_affinity_host(Some(host));
            return Ok(group);
        }

        let group = self.round_robin()?;
        match self.cache.insert(host, group) {
            Ok(()) => qpair.set_affinity_host(Some(host)),
            Err(e) => {
                warn!(%host, error = %e, "host not cached, placed round-robin");
            }
        }
        Ok(group)
    }
}
