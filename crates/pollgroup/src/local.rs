//! Thread-local poll group registry.
//!
//! One map per event-loop thread, keyed by target id: at most one poll
//! group per (thread, target). Closures passed to `with` must not call
//! back into this module.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::poll_group::PollGroup;

thread_local! {
    static GROUPS: RefCell<HashMap<u64, PollGroup>> = RefCell::new(HashMap::new());
}

pub(crate) fn contains(target: u64) -> bool {
    GROUPS.with(|g| g.borrow().contains_key(&target))
}

pub(crate) fn insert(target: u64, group: PollGroup) {
    GROUPS.with(|g| {
        g.borrow_mut().insert(target, group);
    });
}

/// Run `f` on this thread's poll group for `target`, if there is one.
pub(crate) fn with<R>(target: u64, f: impl FnOnce(&mut PollGroup) -> R) -> Option<R> {
    GROUPS.with(|g| g.borrow_mut().get_mut(&target).map(f))
}

pub(crate) fn remove(target: u64) -> Option<PollGroup> {
    GROUPS.with(|g| g.borrow_mut().remove(&target))
}
