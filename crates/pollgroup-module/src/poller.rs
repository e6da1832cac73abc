//! Per-thread poller table
//!
//! Pollers are registered from code already running on the thread, so the
//! table lives in a `RefCell` owned by that thread. While a poller runs its
//! closure is taken out of the table, which lets the closure itself
//! register or unregister pollers without a double borrow.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use pollgroup_core::{PollError, PollFn, PollerId};

struct PollerEntry {
    id: PollerId,
    period: Duration,
    next_due: Instant,
    /// `None` while the poller is running.
    poll: Option<PollFn>,
}

#[derive(Default)]
pub(crate) struct PollerTable {
    entries: Vec<PollerEntry>,
}

/// Outcome of one pass over the table.
#[derive(Debug, Default)]
pub(crate) struct PollPass {
    pub work: usize,
    pub failures: Vec<(PollerId, PollError)>,
}

impl PollerTable {
    pub fn register(&mut self, id: PollerId, poll: PollFn, period: Duration, now: Instant) {
        self.entries.push(PollerEntry {
            id,
            period,
            next_due: now,
            poll: Some(poll),
        });
    }

    pub fn unregister(&mut self, id: PollerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Run every poller that is due at `now`, in registration order.
pub(crate) fn run_due(table: &RefCell<PollerTable>, now: Instant) -> PollPass {
    let mut pass = PollPass::default();
    let mut idx = 0;

    loop {
        let (id, mut poll) = {
            let mut t = table.borrow_mut();
            let Some(entry) = t.entries.get_mut(idx) else {
                break;
            };
            idx += 1;
            if entry.next_due > now {
                continue;
            }
            let Some(poll) = entry.poll.take() else {
                continue;
            };
            entry.next_due = now + entry.period;
            (entry.id, poll)
        };

        match poll() {
            Ok(n) => pass.work += n,
            Err(e) => pass.failures.push((id, e)),
        }

        // Put it back unless it unregistered itself meanwhile.
        let mut t = table.borrow_mut();
        if let Some(entry) = t.entries.iter_mut().find(|e| e.id == id) {
            entry.poll = Some(poll);
        }
    }

    pass
}
