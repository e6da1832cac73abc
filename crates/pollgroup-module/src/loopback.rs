//! In-process loopback transport.
//!
//! `connect()` hands back a `Qpair` for the target side and a
//! `LoopbackPeer` for the driver. The driver submits units of work
//! through the peer; the poll group completes at most `poll_budget` of
//! them per connection on each `poll()`.
//!
//! Faults can be injected per connection (rejected add, failed poll) and
//! per transport (failed poll group creation).

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use pollgroup_core::{
    PollError, Qpair, QpairId, Transport, TransportAddr, TransportConn, TransportError,
    TransportKind, TransportPollGroup,
};
use tracing::trace;

pub const LOOPBACK: TransportKind = TransportKind::new("LOOPBACK");

const DEFAULT_POLL_BUDGET: u64 = 32;

/// `-EIO`, the code reported for injected poll failures.
const EIO: i32 = -5;

/// Transport-wide counters.
#[derive(Debug, Default)]
pub struct LoopbackStats {
    groups_created: AtomicU64,
    groups_destroyed: AtomicU64,
    qpairs_added: AtomicU64,
    qpairs_rejected: AtomicU64,
    polls: AtomicU64,
    disconnects: AtomicU64,
}

impl LoopbackStats {
    pub fn groups_created(&self) -> u64 {
        self.groups_created.load(Ordering::Relaxed)
    }

    pub fn groups_destroyed(&self) -> u64 {
        self.groups_destroyed.load(Ordering::Relaxed)
    }

    /// Poll groups created and not yet dropped.
    pub fn live_groups(&self) -> u64 {
        self.groups_created() - self.groups_destroyed()
    }

    pub fn qpairs_added(&self) -> u64 {
        self.qpairs_added.load(Ordering::Relaxed)
    }

    pub fn qpairs_rejected(&self) -> u64 {
        self.qpairs_rejected.load(Ordering::Relaxed)
    }

    /// `poll()` calls across all poll groups of this transport.
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }
}

/// State shared by both ends of one loopback connection.
#[derive(Debug, Default)]
struct ConnShared {
    pending: AtomicU64,
    completed: AtomicU64,
    reject_on_add: AtomicBool,
    fail_next_poll: AtomicBool,
    disconnected: AtomicBool,
}

pub struct LoopbackTransport {
    kind: TransportKind,
    poll_budget: u64,
    stats: Arc<LoopbackStats>,
    next_qpair: AtomicU64,
    fail_create: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Self::with_kind(LOOPBACK)
    }

    /// Loopback transport registered under another kind, so several can
    /// coexist on one target.
    pub fn with_kind(kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            poll_budget: DEFAULT_POLL_BUDGET,
            stats: Arc::new(LoopbackStats::default()),
            next_qpair: AtomicU64::new(1),
            fail_create: AtomicBool::new(false),
        })
    }

    pub fn stats(&self) -> &LoopbackStats {
        &self.stats
    }

    /// Make every later `create_poll_group()` fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// New connection from `host:port`.
    pub fn connect(&self, host: &str, port: &str) -> (Qpair, LoopbackPeer) {
        self.open(Some((host.to_string(), port.to_string())))
    }

    /// New connection whose peer address cannot be read.
    pub fn connect_anonymous(&self) -> (Qpair, LoopbackPeer) {
        self.open(None)
    }

    fn open(&self, peer: Option<(String, String)>) -> (Qpair, LoopbackPeer) {
        let id = QpairId::new(self.next_qpair.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(ConnShared::default());
        let conn = LoopbackConn {
            id,
            kind: self.kind,
            peer,
            shared: shared.clone(),
            stats: self.stats.clone(),
        };
        (
            Qpair::new(id, self.kind, Box::new(conn)),
            LoopbackPeer { shared },
        )
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn create_poll_group(&self) -> Result<Box<dyn TransportPollGroup>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::PollGroupCreate {
                kind: self.kind,
                reason: "injected failure".into(),
            });
        }
        self.stats.groups_created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(LoopbackPollGroup {
            kind: self.kind,
            budget: self.poll_budget,
            conns: Vec::new(),
            stats: self.stats.clone(),
        }))
    }
}

/// Driver-side handle of a loopback connection.
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    shared: Arc<ConnShared>,
}

impl LoopbackPeer {
    /// Queue `n` units of work for the target side.
    pub fn submit(&self, n: u64) {
        self.shared.pending.fetch_add(n, Ordering::SeqCst);
    }

    pub fn pending(&self) -> u64 {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// The poll group will refuse this connection in `add()`.
    pub fn reject_on_add(&self) {
        self.shared.reject_on_add.store(true, Ordering::SeqCst);
    }

    /// The next poll that reaches this connection fails.
    pub fn fail_next_poll(&self) {
        self.shared.fail_next_poll.store(true, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }
}

struct LoopbackConn {
    id: QpairId,
    kind: TransportKind,
    peer: Option<(String, String)>,
    shared: Arc<ConnShared>,
    stats: Arc<LoopbackStats>,
}

impl TransportConn for LoopbackConn {
    fn peer_addr(&self) -> Result<TransportAddr, TransportError> {
        let (host, port) = self.peer.as_ref().ok_or(TransportError::NoPeerAddr(self.id))?;
        Ok(TransportAddr::new(self.kind, host, port)?)
    }

    fn disconnect(&mut self) {
        if !self.shared.disconnected.swap(true, Ordering::SeqCst) {
            self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct LoopbackPollGroup {
    kind: TransportKind,
    budget: u64,
    conns: Vec<Arc<ConnShared>>,
    stats: Arc<LoopbackStats>,
}

impl TransportPollGroup for LoopbackPollGroup {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn add(&mut self, qpair: &mut Qpair) -> Result<(), TransportError> {
        let reject = |reason: &str| TransportError::Rejected {
            kind: self.kind,
            qpair: qpair.id(),
            reason: reason.to_string(),
        };
        let Some(conn) = qpair.conn().as_any().downcast_ref::<LoopbackConn>() else {
            return Err(reject("not a loopback connection"));
        };
        if conn.kind != self.kind {
            return Err(reject("connection belongs to another transport"));
        }
        if conn.shared.reject_on_add.load(Ordering::SeqCst) {
            self.stats.qpairs_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(reject("injected rejection"));
        }
        self.conns.push(conn.shared.clone());
        self.stats.qpairs_added.fetch_add(1, Ordering::Relaxed);
        trace!(qpair = %qpair.id(), kind = %self.kind, "loopback qpair added");
        Ok(())
    }

    fn poll(&mut self) -> Result<usize, PollError> {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);
        self.conns
            .retain(|c| !c.disconnected.load(Ordering::SeqCst));

        let mut work = 0u64;
        for conn in &self.conns {
            if conn.fail_next_poll.swap(false, Ordering::SeqCst) {
                return Err(PollError::new(self.kind, EIO, "injected poll failure"));
            }
            let budget = self.budget;
            let taken = conn
                .pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |p| {
                    (p > 0).then(|| p - p.min(budget))
                })
                .map(|before| before.min(budget))
                .unwrap_or(0);
            conn.completed.fetch_add(taken, Ordering::SeqCst);
            work += taken;
        }
        Ok(work as usize)
    }
}

impl Drop for LoopbackPollGroup {
    fn drop(&mut self) {
        self.stats.groups_destroyed.fetch_add(1, Ordering::Relaxed);
    }
}
