//! Transport abstraction.
//!
//! A `Transport` is registered once per target. Each poll group asks it
//! for a `TransportPollGroup`, which then lives on that poll group's
//! thread for its whole life.
//!
//! # Implementors
//!
//! - `LoopbackTransport` (pollgroup-module): in-process connections whose
//!   work is injected by the test or benchmark driving them.
//! - TCP / RDMA transports plug in from outside this workspace.

use crate::error::{PollError, TransportError};
use crate::ids::TransportKind;
use crate::qpair::Qpair;

/// A registered transport.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Create the per-thread poll group. Called on the owning thread.
    fn create_poll_group(&self) -> Result<Box<dyn TransportPollGroup>, TransportError>;
}

/// Per-(poll group, transport) state.
///
/// Not `Send`: a transport poll group is created, polled and dropped on a
/// single thread. Dropping it is the destroy operation.
///
/// **Contract:**
/// - `poll()` must never block and must bound the work done per call.
/// - `poll()` returns the number of units of work completed, or a
///   `PollError` when the group can no longer make progress.
/// - `add()` either takes the qpair on or rejects it; on rejection the
///   qpair must be left as it was.
pub trait TransportPollGroup {
    fn kind(&self) -> TransportKind;

    /// Start servicing `qpair` from this group.
    fn add(&mut self, qpair: &mut Qpair) -> Result<(), TransportError>;

    /// Advance every connection in the group once.
    fn poll(&mut self) -> Result<usize, PollError>;
}
