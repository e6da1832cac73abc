//! The connection object ("qpair")
//!
//! A `Qpair` is created by a transport when a peer connects and is then
//! *moved* to the thread of the poll group that will own it. Because the
//! admission message takes the value by move, the accepting thread cannot
//! observe or mutate it after dispatch.
//!
//! State machine:
//!
//! ```text
//! Uninitialized ──activate()──► Active ──disconnect()──► Disconnected
//!       └────────────────────disconnect()───────────────────┘
//! ```

use core::any::Any;
use core::fmt;

use crate::addr::{HostAddr, TransportAddr};
use crate::error::TransportError;
use crate::ids::{PollGroupRef, QpairId, TransportKind};

/// Transport-private half of a connection.
pub trait TransportConn: Send {
    /// Peer address of the connection.
    fn peer_addr(&self) -> Result<TransportAddr, TransportError>;

    /// Begin tearing the connection down. Called at most once.
    fn disconnect(&mut self);

    /// Lets a transport poll group recover its own connection type.
    fn as_any(&self) -> &dyn Any;
}

/// Lifecycle state of a qpair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpairState {
    Uninitialized,
    Active,
    Disconnected,
}

/// One accepted fabric connection.
pub struct Qpair {
    id: QpairId,
    kind: TransportKind,
    state: QpairState,
    group: Option<PollGroupRef>,
    affinity_host: Option<HostAddr>,
    conn: Box<dyn TransportConn>,
}

impl Qpair {
    pub fn new(id: QpairId, kind: TransportKind, conn: Box<dyn TransportConn>) -> Self {
        Self {
            id,
            kind,
            state: QpairState::Uninitialized,
            group: None,
            affinity_host: None,
            conn,
        }
    }

    #[inline]
    pub fn id(&self) -> QpairId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    #[inline]
    pub fn state(&self) -> QpairState {
        self.state
    }

    /// Owning poll group, fixed once assigned.
    #[inline]
    pub fn group(&self) -> Option<PollGroupRef> {
        self.group
    }

    /// Host the qpair was placed by, when placement went through the
    /// affinity cache.
    #[inline]
    pub fn affinity_host(&self) -> Option<HostAddr> {
        self.affinity_host
    }

    pub fn peer_addr(&self) -> Result<TransportAddr, TransportError> {
        self.conn.peer_addr()
    }

    pub fn conn(&self) -> &dyn TransportConn {
        self.conn.as_ref()
    }

    /// Bind the qpair to a poll group.
    ///
    /// Qpairs never migrate: returns `false` and leaves the binding alone
    /// if a different group was already assigned.
    pub fn assign_group(&mut self, group: PollGroupRef) -> bool {
        match self.group {
            Some(existing) => existing == group,
            None => {
                self.group = Some(group);
                true
            }
        }
    }

    pub fn set_affinity_host(&mut self, host: Option<HostAddr>) {
        self.affinity_host = host;
    }

    /// `Uninitialized -> Active`. No effect in any other state.
    pub fn activate(&mut self) -> bool {
        if self.state == QpairState::Uninitialized {
            self.state = QpairState::Active;
            true
        } else {
            false
        }
    }

    /// Move to the terminal state, telling the transport exactly once.
    pub fn disconnect(&mut self) -> bool {
        if self.state == QpairState::Disconnected {
            return false;
        }
        self.state = QpairState::Disconnected;
        self.conn.disconnect();
        true
    }
}

impl fmt::Debug for Qpair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qpair")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{PollGroupId, ThreadId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingConn {
        disconnects: Arc<AtomicUsize>,
    }

    impl TransportConn for CountingConn {
        fn peer_addr(&self) -> Result<TransportAddr, TransportError> {
            Ok(TransportAddr::new(TransportKind::TCP, "10.1.1.1", "4420")?)
        }

        fn disconnect(&mut self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn qpair() -> (Qpair, Arc<AtomicUsize>) {
        let disconnects = Arc::new(AtomicUsize::new(0));
        let conn = CountingConn {
            disconnects: disconnects.clone(),
        };
        (
            Qpair::new(QpairId::new(1), TransportKind::TCP, Box::new(conn)),
            disconnects,
        )
    }

    fn group(id: u32) -> PollGroupRef {
        PollGroupRef {
            id: PollGroupId::new(id),
            thread: ThreadId::new(id),
        }
    }

    #[test]
    fn test_state_machine() {
        let (mut q, disconnects) = qpair();
        assert_eq!(q.state(), QpairState::Uninitialized);
        assert!(q.activate());
        assert!(!q.activate());
        assert_eq!(q.state(), QpairState::Active);

        assert!(q.disconnect());
        assert!(!q.disconnect());
        assert_eq!(q.state(), QpairState::Disconnected);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(!q.activate());
    }

    #[test]
    fn test_group_is_fixed() {
        let (mut q, _) = qpair();
        assert!(q.group().is_none());
        assert!(q.assign_group(group(1)));
        assert!(q.assign_group(group(1)));
        assert!(!q.assign_group(group(2)));
        assert_eq!(q.group(), Some(group(1)));
    }

    #[test]
    fn test_peer_addr_passthrough() {
        let (q, _) = qpair();
        assert_eq!(q.peer_addr().unwrap().traddr.as_str(), "10.1.1.1");
    }
}
