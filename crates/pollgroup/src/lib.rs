//! # pollgroup: connection admission and poll-group lifecycle
//!
//! A `Target` owns one poll group per event-loop thread. New connections
//! (qpairs) are placed on a poll group by the connection scheduler and then
//! moved, by message, to the thread that owns it. Each poll group polls its
//! transport poll groups from a periodic poller on that thread.
//!
//! ```text
//!   acceptor thread                      pg-thread-N
//!   ───────────────                      ───────────
//!   Target::admit(qpair)
//!     ConnScheduler::select ──► pg
//!     qpair.group = pg
//!     send_msg(pg.thread, bind) ───────► PollGroup::add_qpair
//!                                           TransportPollGroup::add
//!                                           qpair: Uninitialized -> Active
//!                                        poller: PollGroup::poll (fail-fast)
//! ```
//!
//! ## Modules
//!
//! - `config` - `TargetConfig` (scheduling policy, slot counts, poll period)
//! - `affinity` - host address → poll group cache with reference counts
//! - `sched` - round-robin ring and the connection scheduler
//! - `poll_group` - the per-thread poll group (`!Send`)
//! - `target` - lifecycle, admission and the target-wide operations
//! - `error` - `TargetError`, `AdmitError`
//!
//! Collaborator traits come from `pollgroup-core`; default implementations
//! from `pollgroup-module`.

pub mod affinity;
pub mod config;
pub mod error;
mod local;
pub mod poll_group;
pub mod sched;
pub mod target;

// Re-exports
pub use affinity::AffinityCache;
pub use config::{ConnSchedPolicy, TargetConfig};
pub use error::{AdmitError, Result, TargetError};
pub use poll_group::PollGroup;
pub use sched::{ConnScheduler, PollGroupRing};
pub use target::{AdmitFn, Target};
