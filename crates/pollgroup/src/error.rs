//! Target error types.

use pollgroup_core::{
    ConfigError, PollGroupId, RuntimeError, SubsystemError, SubsystemId, ThreadId, TransportError,
    TransportKind,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// No live poll group to place a qpair on.
    #[error("no poll group available")]
    NoPollGroup,

    /// The operation must run on an event-loop thread.
    #[error("not called from a runtime thread")]
    NotOnRuntimeThread,

    #[error("{0} already has a poll group for this target")]
    AlreadyCreated(ThreadId),

    /// An allocation failed or a configured bound was reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("no subsystem in slot {0}")]
    InvalidSubsystem(SubsystemId),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Subsystem(#[from] SubsystemError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, TargetError>;

/// Why an admitted qpair was not bound to its poll group.
///
/// Reported on the poll group's thread, after `admit_with` has returned.
/// The qpair is dropped without being activated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmitError {
    #[error("qpair rejected: {0}")]
    TransportRejected(TransportError),

    /// The poll group has no transport poll group of the qpair's kind.
    #[error("no {0} transport poll group")]
    NoTransportGroup(TransportKind),

    /// The poll group was destroyed while the qpair was in flight.
    #[error("poll group {0} is gone")]
    PollGroupGone(PollGroupId),
}

impl AdmitError {
    /// Whether admitting a fresh connection from the same host may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportRejected(_) | Self::PollGroupGone(_))
    }
}
