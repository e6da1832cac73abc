//! Thread runtime abstraction.
//!
//! The poll-group core never creates threads. It asks the runtime who it
//! is running on, posts one-way messages to named threads, broadcasts to
//! every thread of the pool, and registers periodic pollers.
//!
//! # Implementors
//!
//! - `EventLoopPool` (pollgroup-module): N named OS threads, each draining
//!   a lock-free message queue and running its pollers.
//!
//! **Contract:**
//! - Messages sent to one thread run on that thread, in submission order.
//! - No ordering between messages sent to different threads.
//! - `for_each_thread` runs `f` once on every thread, then `on_complete`
//!   exactly once after the last of them has returned.
//! - `register_poller` / `unregister_poller` act on the calling thread.

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PollError, RuntimeError};
use crate::ids::ThreadId;

/// One-way message executed on a target thread.
pub type Msg = Box<dyn FnOnce() + Send + 'static>;

/// Function broadcast to every thread of the pool.
pub type BroadcastFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// Periodic poller; returns the amount of work done.
///
/// Not `Send`: it is registered on, and only ever run by, one thread.
pub type PollFn = Box<dyn FnMut() -> Result<usize, PollError> + 'static>;

/// Handle of a registered poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollerId(u64);

impl PollerId {
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PollerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poller{}", self.0)
    }
}

/// Execution contexts, messaging and pollers.
pub trait ThreadRuntime: Send + Sync {
    /// Runtime thread the caller is running on, if any.
    fn current_thread(&self) -> Option<ThreadId>;

    /// Every thread currently in the pool.
    fn threads(&self) -> Vec<ThreadId>;

    /// Queue `msg` for execution on `thread`. Never blocks.
    fn send_msg(&self, thread: ThreadId, msg: Msg) -> Result<(), RuntimeError>;

    /// Run `f` on every thread, then `on_complete` once.
    fn for_each_thread(&self, f: BroadcastFn, on_complete: Msg) -> Result<(), RuntimeError>;

    /// Register `poll` on the calling thread. A zero `period` means
    /// "every loop iteration".
    fn register_poller(&self, poll: PollFn, period: Duration) -> Result<PollerId, RuntimeError>;

    /// Remove a poller registered on the calling thread.
    fn unregister_poller(&self, id: PollerId) -> Result<(), RuntimeError>;
}
