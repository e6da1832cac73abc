//! Event-loop thread main loop
//!
//! Each thread owns a mailbox and a poller table. One loop iteration:
//!
//! 1. run up to `msg_batch` queued messages, in submission order
//! 2. run every due poller
//! 3. park for `park_timeout` if neither did any work
//!
//! On shutdown the mailbox is drained before the thread exits so that
//! completion callbacks already in flight still run.

use std::cell::{Cell, RefCell};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use pollgroup_core::ThreadId;
use tracing::{debug, error, warn};

use crate::event_loop::PoolShared;
use crate::poller::{self, PollerTable};

thread_local! {
    /// (pool id, thread id) of the event loop running on this OS thread.
    static CURRENT: Cell<Option<(u64, ThreadId)>> = const { Cell::new(None) };

    static POLLERS: RefCell<PollerTable> = RefCell::new(PollerTable::default());
}

/// Runtime thread the caller is on, if it belongs to pool `pool_id`.
#[inline]
pub(crate) fn current(pool_id: u64) -> Option<ThreadId> {
    CURRENT
        .with(|c| c.get())
        .and_then(|(pool, id)| (pool == pool_id).then_some(id))
}

/// Access this thread's poller table.
pub(crate) fn with_pollers<R>(f: impl FnOnce(&mut PollerTable) -> R) -> R {
    POLLERS.with(|p| f(&mut p.borrow_mut()))
}

pub(crate) fn run(shared: Arc<PoolShared>, index: usize) {
    let slot = &shared.slots[index];
    CURRENT.with(|c| c.set(Some((shared.pool_id, slot.id))));
    #[cfg(unix)]
    slot.stats
        .os_thread
        .store(unsafe { libc::pthread_self() } as usize as u64, Ordering::Relaxed);

    let span = tracing::debug_span!("pg_thread", thread = %slot.id);
    let _enter = span.enter();

    if shared.config.pin_threads {
        pin_to_cpu(index);
    }
    debug!("event loop started");

    loop {
        let mut busy = 0usize;

        for _ in 0..shared.config.msg_batch {
            let Some(msg) = slot.mailbox.pop() else {
                break;
            };
            msg();
            busy += 1;
        }
        slot.stats.messages.fetch_add(busy as u64, Ordering::Relaxed);

        let pass = POLLERS.with(|p| poller::run_due(p, Instant::now()));
        slot.stats.polls.fetch_add(1, Ordering::Relaxed);
        slot.stats
            .poll_work
            .fetch_add(pass.work as u64, Ordering::Relaxed);
        for (id, err) in pass.failures {
            slot.stats.poll_failures.fetch_add(1, Ordering::Relaxed);
            error!(poller = %id, error = %err, "poller reported a fatal error");
        }
        busy += pass.work;

        if shared.shutdown.load(Ordering::Acquire) && slot.mailbox.is_empty() {
            break;
        }
        if busy == 0 {
            std::thread::park_timeout(shared.config.park_timeout);
        }
    }

    let leftover = POLLERS.with(|p| {
        let mut p = p.borrow_mut();
        let n = p.len();
        p.clear();
        n
    });
    if leftover > 0 {
        warn!(pollers = leftover, "pollers still registered at exit");
    }
    CURRENT.with(|c| c.set(None));
    debug!("event loop stopped");
}

fn pin_to_cpu(index: usize) {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let cpu = index % cpus;

    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            let mut set = CpuSet::new();
            match set.set(cpu).and_then(|_| sched_setaffinity(Pid::from_raw(0), &set)) {
                Ok(()) => debug!(cpu, "pinned"),
                Err(e) => warn!(cpu, error = %e, "failed to pin thread"),
            }
        } else {
            warn!(cpu, "thread pinning unsupported on this platform");
        }
    }
}
