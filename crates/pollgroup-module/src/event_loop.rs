//! `EventLoopPool`, the default `ThreadRuntime` implementation.
//!
//! Spawns N OS threads at start. Each thread owns a lock-free mailbox
//! (`SegQueue`) that any thread may push to; only the owner pops, so
//! messages to one thread run in submission order. Idle threads park and
//! are unparked on every push.
//!
//! No dynamic scaling. Threads live until `shutdown()`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, info};

use pollgroup_core::{BroadcastFn, Msg, PollFn, PollerId, RuntimeError, ThreadId, ThreadRuntime};

use crate::config::RuntimeConfig;
use crate::thread as worker;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Per-thread counters, readable from any thread.
#[derive(Debug, Default)]
pub struct ThreadStats {
    pub(crate) messages: AtomicU64,
    pub(crate) polls: AtomicU64,
    pub(crate) poll_work: AtomicU64,
    pub(crate) poll_failures: AtomicU64,
    pub(crate) os_thread: AtomicU64,
}

impl ThreadStats {
    /// Messages executed so far.
    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    /// Poller passes run so far.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Sum of the work counts reported by pollers.
    pub fn poll_work(&self) -> u64 {
        self.poll_work.load(Ordering::Relaxed)
    }

    /// Poller invocations that returned an error.
    pub fn poll_failures(&self) -> u64 {
        self.poll_failures.load(Ordering::Relaxed)
    }

    /// `pthread_t` of the OS thread, 0 until it has started.
    pub fn os_thread(&self) -> u64 {
        self.os_thread.load(Ordering::Relaxed)
    }
}

pub(crate) struct ThreadSlot {
    pub id: ThreadId,
    pub mailbox: SegQueue<Msg>,
    pub handle: OnceLock<thread::Thread>,
    pub stats: ThreadStats,
}

/// State shared between the pool handle and its threads.
pub(crate) struct PoolShared {
    pub pool_id: u64,
    pub slots: Vec<ThreadSlot>,
    pub shutdown: AtomicBool,
    pub config: RuntimeConfig,
    next_poller: AtomicU64,
}

impl PoolShared {
    fn post(&self, target: ThreadId, msg: Msg) -> Result<(), RuntimeError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RuntimeError::ShutDown);
        }
        let slot = self
            .slots
            .get(target.as_usize())
            .ok_or(RuntimeError::UnknownThread(target))?;
        slot.mailbox.push(msg);
        if let Some(t) = slot.handle.get() {
            t.unpark();
        }
        Ok(())
    }
}

pub struct EventLoopPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EventLoopPool {
    /// Validate `config` and spawn its threads.
    pub fn start(config: RuntimeConfig) -> Result<Arc<Self>, RuntimeError> {
        config.validate()?;

        let n = config.num_threads;
        let slots = (0..n)
            .map(|i| ThreadSlot {
                id: ThreadId::new(i as u32),
                mailbox: SegQueue::new(),
                handle: OnceLock::new(),
                stats: ThreadStats::default(),
            })
            .collect();
        let shared = Arc::new(PoolShared {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots,
            shutdown: AtomicBool::new(false),
            config,
            next_poller: AtomicU64::new(1),
        });

        let pool = Arc::new(Self {
            shared: shared.clone(),
            handles: Mutex::new(Vec::with_capacity(n)),
        });

        for index in 0..n {
            let s = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", shared.config.thread_name_prefix, index))
                .spawn(move || worker::run(s, index));
            match spawned {
                Ok(handle) => {
                    let _ = shared.slots[index].handle.set(handle.thread().clone());
                    pool.handles.lock().push(handle);
                }
                Err(e) => {
                    // Dropping `pool` stops and joins whatever did start.
                    return Err(RuntimeError::Spawn(e.to_string()));
                }
            }
        }

        info!(threads = n, pool = shared.pool_id, "event loop pool started");
        Ok(pool)
    }

    #[inline]
    pub fn num_threads(&self) -> usize {
        self.shared.slots.len()
    }

    pub fn stats(&self, thread: ThreadId) -> Option<&ThreadStats> {
        self.shared.slots.get(thread.as_usize()).map(|s| &s.stats)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Run `f` on `thread` and wait for its result.
    ///
    /// For drivers and tests standing outside the pool; refuses to run
    /// from a pool thread, where waiting could deadlock the loop.
    pub fn call<R, F>(&self, thread: ThreadId, f: F) -> Result<R, RuntimeError>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.current_thread().is_some() {
            return Err(RuntimeError::BlockingInRuntime);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.shared.post(
            thread,
            Box::new(move || {
                let _ = tx.send(f());
            }),
        )?;
        rx.recv().map_err(|_| RuntimeError::ShutDown)
    }

    /// Stop every thread after it drains its mailbox, then join them.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.current_thread().is_some() {
            return Err(RuntimeError::BlockingInRuntime);
        }
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            debug!(pool = self.shared.pool_id, "shutting down event loop pool");
        }
        for slot in &self.shared.slots {
            if let Some(t) = slot.handle.get() {
                t.unpark();
            }
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl Drop for EventLoopPool {
    fn drop(&mut self) {
        // The last Arc may be released on a pool thread (captured by a
        // message); joining there would wait on ourselves.
        if self.current_thread().is_none() {
            let _ = self.shutdown();
        } else {
            self.shared.shutdown.store(true, Ordering::SeqCst);
        }
    }
}

impl ThreadRuntime for EventLoopPool {
    fn current_thread(&self) -> Option<ThreadId> {
        worker::current(self.shared.pool_id)
    }

    fn threads(&self) -> Vec<ThreadId> {
        self.shared.slots.iter().map(|s| s.id).collect()
    }

    fn send_msg(&self, target: ThreadId, msg: Msg) -> Result<(), RuntimeError> {
        self.shared.post(target, msg)
    }

    fn for_each_thread(&self, f: BroadcastFn, on_complete: Msg) -> Result<(), RuntimeError> {
        if self.is_shutdown() {
            return Err(RuntimeError::ShutDown);
        }
        let origin = self.current_thread();
        let remaining = Arc::new(AtomicUsize::new(self.shared.slots.len()));
        let on_complete = Arc::new(Mutex::new(Some(on_complete)));

        for slot in &self.shared.slots {
            let f = f.clone();
            let remaining = remaining.clone();
            let on_complete = on_complete.clone();
            let shared = self.shared.clone();
            self.shared.post(
                slot.id,
                Box::new(move || {
                    f();
                    if remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
                        return;
                    }
                    let Some(cpl) = on_complete.lock().take() else {
                        return;
                    };
                    // Completion runs back on the initiating thread when
                    // there is one; otherwise on the last thread to finish.
                    match origin {
                        Some(o) if worker::current(shared.pool_id) != Some(o) => {
                            let cpl = Arc::new(Mutex::new(Some(cpl)));
                            let fallback = cpl.clone();
                            let posted = shared.post(
                                o,
                                Box::new(move || {
                                    if let Some(cpl) = cpl.lock().take() {
                                        cpl();
                                    }
                                }),
                            );
                            if posted.is_err() {
                                if let Some(cpl) = fallback.lock().take() {
                                    cpl();
                                }
                            }
                        }
                        _ => cpl(),
                    }
                }),
            )?;
        }
        Ok(())
    }

    fn register_poller(&self, poll: PollFn, period: Duration) -> Result<PollerId, RuntimeError> {
        if self.current_thread().is_none() {
            return Err(RuntimeError::NotOnRuntimeThread);
        }
        let id = PollerId::new(self.shared.next_poller.fetch_add(1, Ordering::Relaxed));
        worker::with_pollers(|t| t.register(id, poll, period, std::time::Instant::now()));
        Ok(id)
    }

    fn unregister_poller(&self, id: PollerId) -> Result<(), RuntimeError> {
        if self.current_thread().is_none() {
            return Err(RuntimeError::NotOnRuntimeThread);
        }
        if worker::with_pollers(|t| t.unregister(id)) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownPoller(id))
        }
    }
}
