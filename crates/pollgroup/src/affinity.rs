//! Host affinity cache
//!
//! Maps a host address to the poll group its first qpair was placed on.
//! Each entry counts the qpairs that were placed through it; the entry is
//! evicted when the last of them is released, and all entries of a poll
//! group are purged when that group leaves the live set.
//!
//! Keys are `HostAddr`, compared over the full fixed-length buffer. The
//! service id (port) is not part of the key.

use std::collections::HashMap;

use pollgroup_core::{HostAddr, PollGroupId, PollGroupRef};

use crate::error::{Result, TargetError};

#[derive(Debug, Clone, Copy)]
struct AffinityEntry {
    group: PollGroupRef,
    refs: u32,
}

#[derive(Debug, Default)]
pub struct AffinityCache {
    entries: HashMap<HostAddr, AffinityEntry>,
    /// 0 = unbounded
    max_entries: usize,
}

impl AffinityCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
        }
    }

    /// Poll group cached for `host`, taking a reference on a hit.
    pub fn lookup(&mut self, host: &HostAddr) -> Option<PollGroupRef> {
        let entry = self.entries.get_mut(host)?;
        entry.refs = entry.refs.saturating_add(1);
        Some(entry.group)
    }

    /// Cache `host -> group` with one reference.
    ///
    /// Fails with `ResourceExhausted` when the bound is reached or the
    /// table cannot grow; the caller places the qpair without caching.
    pub fn insert(&mut self, host: HostAddr, group: PollGroupRef) -> Result<()> {
        if self.max_entries != 0 && self.entries.len() >= self.max_entries {
            return Err(TargetError::ResourceExhausted("affinity cache full"));
        }
        self.entries
            .try_reserve(1)
            .map_err(|_| TargetError::ResourceExhausted("affinity cache allocation"))?;
        self.entries.insert(host, AffinityEntry { group, refs: 1 });
        Ok(())
    }

    /// Drop one reference held on `host -> group`. Returns `true` if the
    /// entry was evicted.
    ///
    /// An entry that now points at another poll group was created after
    /// `group` was purged and is left alone.
    pub fn release(&mut self, host: &HostAddr, group: PollGroupId) -> bool {
        let Some(entry) = self.entries.get_mut(host) else {
            return false;
        };
        if entry.group.id != group {
            return false;
        }
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            self.entries.remove(host);
            true
        } else {
            false
        }
    }

    /// Remove every entry pointing at `group`. Returns how many went.
    pub fn purge_group(&mut self, group: PollGroupId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.group.id != group);
        before - self.entries.len()
    }

    pub fn refs(&self, host: &HostAddr) -> Option<u32> {
        self.entries.get(host).map(|e| e.refs)
    }

    pub fn group(&self, host: &HostAddr) -> Option<PollGroupRef> {
        self.entries.get(host).map(|e| e.group)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
