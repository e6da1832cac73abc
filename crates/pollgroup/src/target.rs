//! Target: poll group lifecycle and qpair admission
//!
//! The target is shared by every thread (`Arc<Target>`). It keeps only
//! what other threads need: the scheduling state behind a mutex, the
//! registered transports and the subsystem slots. The poll groups
//! themselves live in thread-local storage of their own threads and are
//! reached through messages.
//!
//! # Teardown
//!
//! `destroy_poll_groups` broadcasts to every runtime thread. A thread with
//! a poll group for this target:
//!
//! 1. takes it out of the live set (no new qpairs are scheduled to it)
//! 2. unregisters its poller
//! 3. disconnects its first still-connected qpair; draining the others is
//!    left to the transport
//! 4. releases its transport poll groups and subsystem slots
//!
//! Threads without one do nothing. The completion runs once, after the
//! last thread is done.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use pollgroup_core::{
    HostAddr, Msg, PollGroupId, PollGroupRef, Qpair, QpairId, Subsystem, SubsystemId,
    ThreadRuntime, Transport,
};
use tracing::{debug, error, info, warn};

use crate::config::TargetConfig;
use crate::error::{AdmitError, Result, TargetError};
use crate::local;
use crate::poll_group::PollGroup;
use crate::sched::ConnScheduler;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Completion of `admit_with`, run on the poll group's thread.
pub type AdmitFn = Box<dyn FnOnce(std::result::Result<PollGroupRef, AdmitError>) + Send + 'static>;

pub struct Target {
    id: u64,
    config: TargetConfig,
    runtime: Arc<dyn ThreadRuntime>,
    sched: Mutex<ConnScheduler>,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    subsystems: RwLock<Vec<Option<Arc<dyn Subsystem>>>>,
    next_group_id: AtomicU32,
}

impl Target {
    pub fn new(config: TargetConfig, runtime: Arc<dyn ThreadRuntime>) -> Result<Arc<Self>> {
        config.validate()?;
        let mut subsystems = Vec::new();
        subsystems
            .try_reserve_exact(config.max_subsystems as usize)
            .map_err(|_| TargetError::ResourceExhausted("subsystem slot array"))?;
        subsystems.resize_with(config.max_subsystems as usize, || None);

        let target = Arc::new(Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            sched: Mutex::new(ConnScheduler::new(
                config.conn_sched,
                config.max_affinity_entries,
            )),
            transports: RwLock::new(Vec::new()),
            subsystems: RwLock::new(subsystems),
            next_group_id: AtomicU32::new(1),
            runtime,
            config,
        });
        info!(
            name = %target.config.name,
            conn_sched = %target.config.conn_sched,
            max_subsystems = target.config.max_subsystems,
            "target created"
        );
        Ok(target)
    }

    #[inline]
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    // ── Poll group lifecycle ────────────────────────────────────────────

    /// Create this thread's poll group.
    ///
    /// Runs on a runtime thread. Creates a transport poll group for every
    /// registered transport, attaches every subsystem, registers the poll
    /// loop, and only then makes the group schedulable. Any failure
    /// releases what was built so far.
    pub fn create_poll_group(&self) -> Result<PollGroupRef> {
        let thread = self
            .runtime
            .current_thread()
            .ok_or(TargetError::NotOnRuntimeThread)?;
        if local::contains(self.id) {
            return Err(TargetError::AlreadyCreated(thread));
        }

        let id = PollGroupId::new(self.next_group_id.fetch_add(1, Ordering::Relaxed));
        let mut group = PollGroup::new(id, thread, self.config.max_subsystems)?;

        for transport in self.transports.read().iter() {
            group.add_transport(transport.as_ref())?;
        }
        for (idx, slot) in self.subsystems.read().iter().enumerate() {
            if let Some(subsystem) = slot {
                group.attach_subsystem(SubsystemId::new(idx as u32), subsystem.as_ref())?;
            }
        }

        let target_id = self.id;
        let poller = self.runtime.register_poller(
            Box::new(move || local::with(target_id, |pg| pg.poll()).unwrap_or(Ok(0))),
            self.config.poll_period,
        )?;
        group.set_poller(poller);

        let gref = group.group_ref();
        local::insert(self.id, group);
        self.sched.lock().add_group(gref);
        info!(group = %gref, "poll group created");
        Ok(gref)
    }

    /// Destroy this thread's poll group.
    ///
    /// Returns `false` if the thread had none.
    pub fn destroy_poll_group(&self) -> Result<bool> {
        self.runtime
            .current_thread()
            .ok_or(TargetError::NotOnRuntimeThread)?;
        let Some(mut group) = local::remove(self.id) else {
            return Ok(false);
        };
        self.unregister_poller(&mut group);
        group.destroy();
        self.sched.lock().remove_group(group.id());
        info!(group = %group.group_ref(), "poll group destroyed");
        Ok(true)
    }

    /// Create a poll group on every runtime thread.
    pub fn spawn_poll_groups(self: &Arc<Self>, on_complete: Msg) -> Result<()> {
        let target = self.clone();
        self.runtime.for_each_thread(
            Arc::new(move || {
                if let Err(e) = target.create_poll_group() {
                    error!(error = %e, "failed to create poll group");
                }
            }),
            on_complete,
        )?;
        Ok(())
    }

    /// Tear down the poll group of every runtime thread.
    pub fn destroy_poll_groups(self: &Arc<Self>, on_complete: Msg) -> Result<()> {
        let target = self.clone();
        self.runtime
            .for_each_thread(Arc::new(move || target.teardown_local()), on_complete)?;
        Ok(())
    }

    fn teardown_local(&self) {
        let Some(mut group) = local::remove(self.id) else {
            return;
        };
        self.sched.lock().remove_group(group.id());
        self.unregister_poller(&mut group);
        if let Some(qpair) = group.disconnect_first() {
            debug!(group = %group.id(), %qpair, "disconnected qpair");
        }
        group.destroy();
        info!(group = %group.group_ref(), "poll group destroyed");
    }

    fn unregister_poller(&self, group: &mut PollGroup) {
        if let Some(poller) = group.take_poller() {
            if let Err(e) = self.runtime.unregister_poller(poller) {
                warn!(group = %group.id(), %poller, error = %e, "failed to unregister poller");
            }
        }
    }

    // ── Admission ───────────────────────────────────────────────────────

    /// Place `qpair` on a poll group and hand it to that group's thread.
    ///
    /// Returns as soon as the qpair is on its way. A qpair the poll group
    /// then fails to bind is logged and dropped; use `admit_with` to see
    /// the outcome.
    pub fn admit(self: &Arc<Self>, qpair: Qpair) -> Result<PollGroupRef> {
        self.admit_with(
            qpair,
            Box::new(|res: std::result::Result<PollGroupRef, AdmitError>| {
                if let Err(e) = res {
                    warn!(error = %e, "qpair not admitted");
                }
            }),
        )
    }

    /// Like `admit`, reporting the bind outcome to `on_bound` on the poll
    /// group's thread.
    pub fn admit_with(self: &Arc<Self>, mut qpair: Qpair, on_bound: AdmitFn) -> Result<PollGroupRef> {
        let group = self.sched.lock().select(&mut qpair)?;
        qpair.assign_group(group);
        let host = qpair.affinity_host();
        debug!(qpair = %qpair.id(), %group, "qpair scheduled");

        let target = self.clone();
        let sent = self.runtime.send_msg(
            group.thread,
            Box::new(move || {
                let res = target.bind_local(group, qpair);
                on_bound(res);
            }),
        );
        if let Err(e) = sent {
            if let Some(host) = host {
                self.release_host(&host, group.id);
            }
            return Err(e.into());
        }
        Ok(group)
    }

    /// Scheduler decision for `qpair`, without admitting it.
    pub fn select_poll_group(&self, qpair: &mut Qpair) -> Result<PollGroupRef> {
        self.sched.lock().select(qpair)
    }

    fn bind_local(&self, group: PollGroupRef, qpair: Qpair) -> std::result::Result<PollGroupRef, AdmitError> {
        let qid = qpair.id();
        let host = qpair.affinity_host();
        let res = local::with(self.id, |pg| {
            if pg.id() == group.id {
                pg.add_qpair(qpair)
            } else {
                Err(AdmitError::PollGroupGone(group.id))
            }
        })
        .unwrap_or(Err(AdmitError::PollGroupGone(group.id)));

        match res {
            Ok(()) => Ok(group),
            Err(e) => {
                debug!(qpair = %qid, %group, error = %e, "qpair not bound");
                if let Some(host) = host {
                    self.release_host(&host, group.id);
                }
                Err(e)
            }
        }
    }

    /// Disconnect `qpair` on its poll group's thread and drop it.
    pub fn disconnect_qpair(self: &Arc<Self>, group: PollGroupRef, qpair: QpairId) -> Result<()> {
        let target = self.clone();
        self.runtime.send_msg(
            group.thread,
            Box::new(move || {
                let Some(mut q) = local::with(target.id, |pg| pg.remove_qpair(qpair)).flatten() else {
                    debug!(%qpair, %group, "qpair already gone");
                    return;
                };
                q.disconnect();
                if let (Some(host), Some(placed)) = (q.affinity_host(), q.group()) {
                    target.release_host(&host, placed.id);
                }
            }),
        )?;
        Ok(())
    }

    fn release_host(&self, host: &HostAddr, group: PollGroupId) {
        if self.sched.lock().release(host, group) {
            debug!(%host, "affinity entry evicted");
        }
    }

    // ── Transports and subsystems ───────────────────────────────────────

    /// Register `transport` and create its poll group on every live poll
    /// group.
    pub fn add_transport(self: &Arc<Self>, transport: Arc<dyn Transport>, on_complete: Msg) -> Result<()> {
        {
            let mut transports = self.transports.write();
            if !transports.iter().any(|t| t.kind() == transport.kind()) {
                transports.push(transport.clone());
                info!(kind = %transport.kind(), "transport added");
            }
        }
        let target = self.clone();
        self.runtime.for_each_thread(
            Arc::new(move || {
                let added = local::with(target.id, |pg| pg.add_transport(transport.as_ref()));
                if let Some(Err(e)) = added {
                    error!(kind = %transport.kind(), error = %e, "transport poll group not created");
                }
            }),
            on_complete,
        )?;
        Ok(())
    }

    /// Place `subsystem` in the first free slot.
    pub fn add_subsystem(&self, subsystem: Arc<dyn Subsystem>) -> Result<SubsystemId> {
        let mut slots = self.subsystems.write();
        let idx = slots
            .iter()
            .position(Option::is_none)
            .ok_or(TargetError::ResourceExhausted("subsystem slots"))?;
        info!(nqn = subsystem.nqn(), slot = idx, "subsystem added");
        slots[idx] = Some(subsystem);
        Ok(SubsystemId::new(idx as u32))
    }

    /// Free slot `sid`. Detach it from the poll groups first.
    pub fn remove_subsystem(&self, sid: SubsystemId) -> Result<Arc<dyn Subsystem>> {
        self.subsystems
            .write()
            .get_mut(sid.index())
            .and_then(Option::take)
            .ok_or(TargetError::InvalidSubsystem(sid))
    }

    pub fn subsystem(&self, sid: SubsystemId) -> Option<Arc<dyn Subsystem>> {
        self.subsystems.read().get(sid.index()).cloned().flatten()
    }

    /// Open the channels of subsystem `sid` on every poll group.
    pub fn attach_subsystem(self: &Arc<Self>, sid: SubsystemId, on_complete: Msg) -> Result<()> {
        let subsystem = self.subsystem(sid).ok_or(TargetError::InvalidSubsystem(sid))?;
        let target = self.clone();
        self.runtime.for_each_thread(
            Arc::new(move || {
                let res = local::with(target.id, |pg| pg.attach_subsystem(sid, subsystem.as_ref()));
                if let Some(Err(e)) = res {
                    error!(%sid, error = %e, "subsystem attach failed");
                }
            }),
            on_complete,
        )?;
        Ok(())
    }

    /// Close the channels of subsystem `sid` on every poll group.
    pub fn detach_subsystem(self: &Arc<Self>, sid: SubsystemId, on_complete: Msg) -> Result<()> {
        if sid.index() >= self.config.max_subsystems as usize {
            return Err(TargetError::InvalidSubsystem(sid));
        }
        let target = self.clone();
        self.runtime.for_each_thread(
            Arc::new(move || {
                local::with(target.id, |pg| pg.detach_subsystem(sid));
            }),
            on_complete,
        )?;
        Ok(())
    }

    // ── Inspection ──────────────────────────────────────────────────────

    /// Live poll groups in scheduling order.
    pub fn live_poll_groups(&self) -> Vec<PollGroupRef> {
        self.sched.lock().groups()
    }

    /// Qpairs currently placed through the affinity entry of `host`.
    pub fn affinity_refs(&self, host: &str) -> Option<u32> {
        let host = HostAddr::new(host).ok()?;
        self.sched.lock().cache().refs(&host)
    }

    pub fn affinity_entries(&self) -> usize {
        self.sched.lock().cache().len()
    }

    /// Run `f` on the calling thread's poll group for this target.
    ///
    /// The thread's poll group registry stays borrowed while `f` runs:
    /// `f` must not create, destroy or bind poll groups of any target on
    /// this thread, and must not poll the runtime. Doing so panics.
    pub fn with_local_poll_group<R>(&self, f: impl FnOnce(&PollGroup) -> R) -> Option<R> {
        local::with(self.id, |pg| f(pg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnSchedPolicy;
    use pollgroup_core::{QpairState, ThreadId, TransportKind};
    use pollgroup_module::{EventLoopPool, LoopbackTransport, MemSubsystem, RuntimeConfig};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(5);

    type Bound = std::result::Result<PollGroupRef, AdmitError>;

    struct Harness {
        pool: Arc<EventLoopPool>,
        target: Arc<Target>,
        transport: Arc<LoopbackTransport>,
    }

    impl Harness {
        fn new(threads: usize, config: TargetConfig) -> Self {
            let pool = EventLoopPool::start(
                RuntimeConfig::new()
                    .num_threads(threads)
                    .park_timeout(Duration::from_micros(200)),
            )
            .unwrap();
            let target = Target::new(config, pool.clone()).unwrap();
            let transport = LoopbackTransport::new();
            let t = target.clone();
            let tr = transport.clone();
            wait(move |done| t.add_transport(tr, done));
            Self {
                pool,
                target,
                transport,
            }
        }

        fn create_on(&self, thread: u32) -> Result<PollGroupRef> {
            let t = self.target.clone();
            self.pool
                .call(ThreadId::new(thread), move || t.create_poll_group())
                .unwrap()
        }

        /// Inspect the poll group on `thread`; also a barrier for every
        /// message sent to that thread before it.
        fn on_group<R: Send + 'static>(
            &self,
            thread: u32,
            f: impl FnOnce(&PollGroup) -> R + Send + 'static,
        ) -> Option<R> {
            let t = self.target.clone();
            self.pool
                .call(ThreadId::new(thread), move || t.with_local_poll_group(f))
                .unwrap()
        }

        fn admit_and_wait(&self, qpair: Qpair) -> Bound {
            let (tx, rx) = mpsc::channel();
            self.target
                .admit_with(qpair, Box::new(move |res: Bound| tx.send(res).unwrap()))
                .unwrap();
            rx.recv_timeout(TIMEOUT).unwrap()
        }
    }

    fn config() -> TargetConfig {
        TargetConfig::new().max_subsystems(8)
    }

    /// Run `f` with a completion and wait for the completion to fire.
    fn wait(f: impl FnOnce(Msg) -> Result<()>) {
        let (tx, rx) = mpsc::channel();
        f(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_round_robin_end_to_end() {
        let h = Harness::new(3, config());
        let groups: Vec<_> = (0..3).map(|i| h.create_on(i).unwrap()).collect();
        assert_eq!(h.target.live_poll_groups(), groups);

        let placed: Vec<_> = (0..5)
            .map(|i| {
                let (q, _) = h.transport.connect("10.0.0.1", &format!("{}", 4420 + i));
                h.admit_and_wait(q).unwrap()
            })
            .collect();
        let expected: Vec<_> = [0, 1, 2, 0, 1].iter().map(|&i| groups[i]).collect();
        assert_eq!(placed, expected);

        let counts: Vec<_> = (0..3)
            .map(|i| h.on_group(i, |pg| pg.num_qpairs()).unwrap())
            .collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_admit_without_poll_groups() {
        let h = Harness::new(2, config());
        let (q, _) = h.transport.connect("10.0.0.1", "4420");
        assert_eq!(h.target.admit(q).unwrap_err(), TargetError::NoPollGroup);
    }

    #[test]
    fn test_admitted_qpair_is_active_and_polled() {
        let h = Harness::new(1, config());
        let g = h.create_on(0).unwrap();

        let (q, peer) = h.transport.connect("10.0.0.1", "4420");
        let id = q.id();
        assert_eq!(h.target.admit(q).unwrap(), g);
        assert_eq!(
            h.on_group(0, move |pg| pg.qpair_state(id)).unwrap(),
            Some(QpairState::Active)
        );

        peer.submit(100);
        wait_until(|| peer.completed() == 100);
        let stats = h.pool.stats(ThreadId::new(0)).unwrap();
        wait_until(|| stats.poll_work() >= 100);
    }

    #[test]
    fn test_host_affinity_end_to_end() {
        let h = Harness::new(3, config().conn_sched(ConnSchedPolicy::HostIp));
        let groups: Vec<_> = (0..3).map(|i| h.create_on(i).unwrap()).collect();

        let mut ids = Vec::new();
        for port in 0..3 {
            let (q, _) = h.transport.connect("10.0.0.1", &format!("{}", 5000 + port));
            ids.push(q.id());
            assert_eq!(h.admit_and_wait(q).unwrap(), groups[0]);
        }
        assert_eq!(h.target.affinity_refs("10.0.0.1"), Some(3));

        let (q, _) = h.transport.connect("10.0.0.2", "5000");
        assert_eq!(h.admit_and_wait(q).unwrap(), groups[1]);
        assert_eq!(h.target.affinity_entries(), 2);

        h.target.disconnect_qpair(groups[0], ids[0]).unwrap();
        h.on_group(0, |_| ());
        assert_eq!(h.target.affinity_refs("10.0.0.1"), Some(2));

        for id in &ids[1..] {
            h.target.disconnect_qpair(groups[0], *id).unwrap();
        }
        h.on_group(0, |_| ());
        assert_eq!(h.target.affinity_refs("10.0.0.1"), None);
        assert_eq!(h.on_group(0, |pg| pg.num_qpairs()), Some(0));
        assert_eq!(h.transport.stats().disconnects(), 3);
    }

    #[test]
    fn test_host_affinity_bounded_cache() {
        let h = Harness::new(2, config().conn_sched(ConnSchedPolicy::HostIp).max_affinity_entries(1));
        h.create_on(0).unwrap();
        h.create_on(1).unwrap();

        let (q, _) = h.transport.connect("10.0.0.1", "1");
        h.admit_and_wait(q).unwrap();
        let (q, _) = h.transport.connect("10.0.0.2", "1");
        h.admit_and_wait(q).unwrap();

        assert_eq!(h.target.affinity_refs("10.0.0.1"), Some(1));
        assert_eq!(h.target.affinity_refs("10.0.0.2"), None);
    }

    #[test]
    fn test_rejection_is_reported() {
        let h = Harness::new(1, config().conn_sched(ConnSchedPolicy::HostIp));
        h.create_on(0).unwrap();

        let (q, peer) = h.transport.connect("10.0.0.1", "4420");
        peer.reject_on_add();
        let err = h.admit_and_wait(q).unwrap_err();
        assert!(matches!(err, AdmitError::TransportRejected(_)));
        assert!(err.is_retryable());
        assert_eq!(h.on_group(0, |pg| pg.num_qpairs()), Some(0));
        assert_eq!(h.target.affinity_refs("10.0.0.1"), None);

        let tcp = LoopbackTransport::with_kind(TransportKind::TCP);
        let (q, _) = tcp.connect("10.0.0.1", "4420");
        assert_eq!(
            h.admit_and_wait(q),
            Err(AdmitError::NoTransportGroup(TransportKind::TCP))
        );
    }

    #[test]
    fn test_poll_group_gone_while_in_flight() {
        let h = Harness::new(1, config());
        let g = h.create_on(0).unwrap();

        // Hold thread-0 so the bind message queues behind the destroy.
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let t = h.target.clone();
        h.pool
            .send_msg(
                ThreadId::new(0),
                Box::new(move || {
                    go_rx.recv().unwrap();
                    t.destroy_poll_group().unwrap();
                }),
            )
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let (q, _) = h.transport.connect("10.0.0.1", "4420");
        h.target
            .admit_with(q, Box::new(move |res: Bound| tx.send(res).unwrap()))
            .unwrap();
        go_tx.send(()).unwrap();

        assert_eq!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            Err(AdmitError::PollGroupGone(g.id))
        );
        assert!(h.target.live_poll_groups().is_empty());
    }

    #[test]
    fn test_stale_bind_keeps_new_affinity_entry() {
        let h = Harness::new(2, config().conn_sched(ConnSchedPolicy::HostIp));
        let g0 = h.create_on(0).unwrap();
        let g1 = h.create_on(1).unwrap();

        let (q1, _) = h.transport.connect("10.0.0.1", "1");
        assert_eq!(h.admit_and_wait(q1).unwrap(), g0);

        // Hold thread-0: the second bind queues behind a destroy of g0 and
        // a third qpair from the same host that lands on g1.
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let (tx3, rx3) = mpsc::channel();
        let (q3, _) = h.transport.connect("10.0.0.1", "3");
        let t = h.target.clone();
        h.pool
            .send_msg(
                ThreadId::new(0),
                Box::new(move || {
                    go_rx.recv().unwrap();
                    t.destroy_poll_group().unwrap();
                    t.admit_with(q3, Box::new(move |res: Bound| tx3.send(res).unwrap()))
                        .unwrap();
                }),
            )
            .unwrap();

        let (tx2, rx2) = mpsc::channel();
        let (q2, _) = h.transport.connect("10.0.0.1", "2");
        assert_eq!(
            h.target
                .admit_with(q2, Box::new(move |res: Bound| tx2.send(res).unwrap()))
                .unwrap(),
            g0
        );
        go_tx.send(()).unwrap();

        assert_eq!(
            rx2.recv_timeout(TIMEOUT).unwrap(),
            Err(AdmitError::PollGroupGone(g0.id))
        );
        assert_eq!(rx3.recv_timeout(TIMEOUT).unwrap(), Ok(g1));
        assert_eq!(h.on_group(1, |pg| pg.num_qpairs()), Some(1));
        assert_eq!(h.target.affinity_refs("10.0.0.1"), Some(1));

        let (q4, _) = h.transport.connect("10.0.0.1", "4");
        assert_eq!(h.admit_and_wait(q4).unwrap(), g1);
        assert_eq!(h.target.affinity_refs("10.0.0.1"), Some(2));
    }

    #[test]
    fn test_concurrent_admission() {
        let h = Harness::new(4, config());
        for i in 0..4 {
            h.create_on(i).unwrap();
        }
        let bound = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for a in 0..4 {
                let target = h.target.clone();
                let transport = h.transport.clone();
                let bound = bound.clone();
                s.spawn(move || {
                    for i in 0..25 {
                        let (q, _) = transport.connect(&format!("10.0.{}.{}", a, i), "4420");
                        let bound = bound.clone();
                        target
                            .admit_with(
                                q,
                                Box::new(move |res: Bound| {
                                    if res.is_ok() {
                                        bound.fetch_add(1, Ordering::SeqCst);
                                    }
                                }),
                            )
                            .unwrap();
                    }
                });
            }
        });

        wait_until(|| bound.load(Ordering::SeqCst) == 100);
        for i in 0..4 {
            assert_eq!(h.on_group(i, |pg| pg.num_qpairs()), Some(25));
        }
    }

    #[test]
    fn test_create_poll_group_errors() {
        let h = Harness::new(1, config());
        assert_eq!(
            h.target.create_poll_group().unwrap_err(),
            TargetError::NotOnRuntimeThread
        );
        h.create_on(0).unwrap();
        assert_eq!(
            h.create_on(0).unwrap_err(),
            TargetError::AlreadyCreated(ThreadId::new(0))
        );
        assert_eq!(h.target.live_poll_groups().len(), 1);
    }

    #[test]
    fn test_create_poll_group_rolls_back() {
        let h = Harness::new(1, config());
        let subsys = MemSubsystem::new("nqn.test");
        let ns1 = subsys.add_namespace(1);
        let ns2 = subsys.add_namespace(2);
        ns2.set_fail_open(true);
        h.target.add_subsystem(subsys.clone()).unwrap();

        assert!(matches!(
            h.create_on(0),
            Err(TargetError::Subsystem(_))
        ));
        assert!(h.target.live_poll_groups().is_empty());
        assert_eq!(ns1.open_channels(), 0);
        assert_eq!(h.transport.stats().live_groups(), 0);
        assert_eq!(h.on_group(0, |_| ()), None);

        ns2.set_fail_open(false);
        h.create_on(0).unwrap();
        assert_eq!(subsys.open_channels(), 2);
    }

    #[test]
    fn test_transport_creation_failure() {
        let h = Harness::new(1, config());
        h.transport.set_fail_create(true);
        assert!(matches!(h.create_on(0), Err(TargetError::Transport(_))));
        assert!(h.target.live_poll_groups().is_empty());
    }

    #[test]
    fn test_destroy_poll_groups() {
        let h = Harness::new(3, config());
        let subsys = MemSubsystem::new("nqn.test");
        subsys.add_namespace(1);
        subsys.add_namespace(2);
        h.target.add_subsystem(subsys.clone()).unwrap();
        // thread-2 never joins.
        h.create_on(0).unwrap();
        h.create_on(1).unwrap();
        assert_eq!(subsys.open_channels(), 4);

        let peers: Vec<_> = (0..4)
            .map(|i| {
                let (q, peer) = h.transport.connect("10.0.0.1", &format!("{}", i));
                h.admit_and_wait(q).unwrap();
                peer
            })
            .collect();

        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        let t = h.target.clone();
        wait(move |done| {
            t.destroy_poll_groups(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                done();
            }))
        });
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        assert!(h.target.live_poll_groups().is_empty());
        assert_eq!(h.transport.stats().live_groups(), 0);
        assert_eq!(subsys.open_channels(), 0);
        for i in 0..3 {
            assert_eq!(h.on_group(i, |_| ()), None);
        }
        // First qpair of each poll group: peers 0 (thread-0) and 1 (thread-1).
        let disconnected: Vec<_> = peers.iter().map(|p| p.is_disconnected()).collect();
        assert_eq!(disconnected, vec![true, true, false, false]);

        let (q, _) = h.transport.connect("10.0.0.1", "4420");
        assert_eq!(h.target.admit(q).unwrap_err(), TargetError::NoPollGroup);
    }

    #[test]
    fn test_spawn_and_single_destroy() {
        let h = Harness::new(3, config());
        let t = h.target.clone();
        wait(move |done| t.spawn_poll_groups(done));
        assert_eq!(h.target.live_poll_groups().len(), 3);
        assert_eq!(h.transport.stats().live_groups(), 3);

        let t = h.target.clone();
        assert_eq!(h.pool.call(ThreadId::new(1), move || t.destroy_poll_group()).unwrap(), Ok(true));
        let t = h.target.clone();
        assert_eq!(h.pool.call(ThreadId::new(1), move || t.destroy_poll_group()).unwrap(), Ok(false));

        let mut live: Vec<_> = h.target.live_poll_groups().iter().map(|g| g.thread).collect();
        live.sort();
        assert_eq!(live, vec![ThreadId::new(0), ThreadId::new(2)]);
        assert_eq!(h.transport.stats().live_groups(), 2);
    }

    #[test]
    fn test_add_transport_to_live_groups() {
        let h = Harness::new(2, config());
        h.create_on(0).unwrap();
        h.create_on(1).unwrap();

        let tcp = LoopbackTransport::with_kind(TransportKind::TCP);
        let t = h.target.clone();
        let tr = tcp.clone();
        wait(move |done| t.add_transport(tr, done));
        assert_eq!(tcp.stats().live_groups(), 2);

        // Same kind again: nothing new.
        let t = h.target.clone();
        let tr = tcp.clone();
        wait(move |done| t.add_transport(tr, done));
        assert_eq!(tcp.stats().groups_created(), 2);
        assert_eq!(h.on_group(0, |pg| pg.num_transport_groups()), Some(2));

        let (q, _) = tcp.connect("10.0.0.1", "4420");
        assert!(h.admit_and_wait(q).is_ok());
    }

    #[test]
    fn test_subsystem_attach_detach() {
        let h = Harness::new(2, config().max_subsystems(1));
        h.create_on(0).unwrap();
        h.create_on(1).unwrap();

        let subsys = MemSubsystem::new("nqn.test");
        subsys.add_namespace(1);
        let sid = h.target.add_subsystem(subsys.clone()).unwrap();
        assert_eq!(sid, SubsystemId::new(0));
        assert_eq!(
            h.target.add_subsystem(MemSubsystem::new("nqn.other")).unwrap_err(),
            TargetError::ResourceExhausted("subsystem slots")
        );

        let t = h.target.clone();
        wait(move |done| t.attach_subsystem(sid, done));
        assert_eq!(subsys.open_channels(), 2);

        let t = h.target.clone();
        wait(move |done| t.detach_subsystem(sid, done));
        assert_eq!(subsys.open_channels(), 0);

        assert!(h.target.remove_subsystem(sid).is_ok());
        assert!(matches!(
            h.target.remove_subsystem(sid),
            Err(TargetError::InvalidSubsystem(s)) if s == sid
        ));
        let t = h.target.clone();
        assert_eq!(
            t.attach_subsystem(sid, Box::new(|| {})).unwrap_err(),
            TargetError::InvalidSubsystem(sid)
        );
    }

    #[test]
    fn test_poll_failure_counted_by_runtime() {
        let h = Harness::new(1, config());
        h.create_on(0).unwrap();
        let (q, peer) = h.transport.connect("10.0.0.1", "4420");
        h.admit_and_wait(q).unwrap();

        peer.fail_next_poll();
        let stats = h.pool.stats(ThreadId::new(0)).unwrap();
        wait_until(|| stats.poll_failures() == 1);

        peer.submit(10);
        wait_until(|| peer.completed() == 10);
    }
}
