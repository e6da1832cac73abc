//! Error types for the collaborator contracts

use thiserror::Error;

use crate::ids::{QpairId, ThreadId, TransportKind};
use crate::runtime::PollerId;

/// A transport address could not be represented.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddrError {
    #[error("transport address is {len} bytes, max {max}")]
    TooLong { len: usize, max: usize },

    #[error("transport address contains a NUL byte")]
    InteriorNul,
}

/// Errors reported by a transport or one of its poll groups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection has no usable peer address (already torn down,
    /// unsupported by the transport, ...).
    #[error("peer address unavailable for {0}")]
    NoPeerAddr(QpairId),

    #[error("invalid transport address: {0}")]
    Addr(#[from] AddrError),

    /// The poll group refused the connection.
    #[error("{kind} transport rejected {qpair}: {reason}")]
    Rejected {
        kind: TransportKind,
        qpair: QpairId,
        reason: String,
    },

    #[error("{kind} transport could not create a poll group: {reason}")]
    PollGroupCreate { kind: TransportKind, reason: String },
}

/// Errors from the subsystem / namespace layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubsystemError {
    #[error("{nqn}: failed to open I/O channel for namespace {nsid}")]
    ChannelOpen { nqn: String, nsid: u32 },
}

/// Errors from the thread runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("unknown runtime thread {0}")]
    UnknownThread(ThreadId),

    #[error("runtime is shut down")]
    ShutDown,

    #[error("not called from a runtime thread")]
    NotOnRuntimeThread,

    #[error("unknown poller {0}")]
    UnknownPoller(PollerId),

    #[error("failed to spawn runtime thread: {0}")]
    Spawn(String),

    #[error("blocking call issued from inside the runtime")]
    BlockingInRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Unrecoverable failure reported by a transport poll group.
///
/// Aborts the poll loop invocation that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} poll failed (code {code}): {reason}")]
pub struct PollError {
    pub kind: TransportKind,
    pub code: i32,
    pub reason: String,
}

impl PollError {
    pub fn new(kind: TransportKind, code: i32, reason: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            reason: reason.into(),
        }
    }
}

/// Configuration rejected by `validate()` or a parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),

    #[error("unknown connection scheduler {0:?} (expected roundrobin or hostip)")]
    UnknownConnSched(String),
}
