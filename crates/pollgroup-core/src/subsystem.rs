//! Subsystem / namespace abstraction.
//!
//! A poll group keeps one slot per subsystem the target knows about. A
//! slot holds one I/O channel per namespace, opened on the poll group's
//! thread. Channels are thread-bound and are closed explicitly.
//!
//! # Implementors
//!
//! - `MemSubsystem` (pollgroup-module): namespaces backed by counters,
//!   with optional injected open failures.

use std::sync::Arc;

use crate::error::SubsystemError;

/// A subsystem exported by the target.
pub trait Subsystem: Send + Sync {
    /// NVMe qualified name.
    fn nqn(&self) -> &str;

    /// Namespaces currently attached to the subsystem.
    fn namespaces(&self) -> Vec<Arc<dyn Namespace>>;
}

/// A namespace that can hand out per-thread I/O channels.
pub trait Namespace: Send + Sync {
    fn nsid(&self) -> u32;

    /// Open an I/O channel for the calling thread.
    fn open_channel(&self) -> Result<Box<dyn IoChannel>, SubsystemError>;
}

/// Per-thread I/O channel to a namespace.
pub trait IoChannel {
    fn nsid(&self) -> u32;

    /// Release the channel.
    fn close(self: Box<Self>);
}
