//! Poll-Group End-to-End Smoke Test
//!
//! Exercises the full stack on a live event-loop pool:
//!   Part A (Lifecycle): spawn a poll group on every thread
//!   Part B (Admission): round-robin placement and binding
//!   Part C (Poll loop): injected work is completed by the pollers
//!   Part D (Host affinity): same host, same poll group
//!   Part E (Teardown): all poll groups destroyed, resources released
//!
//! Run: ./target/release/admit-smoke
//! Logging: RUST_LOG=debug, or PG_LOG_LEVEL=debug when RUST_LOG is unset.
//! Pool and target knobs come from the PG_* environment variables.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pollgroup::{AdmitError, ConnSchedPolicy, Target, TargetConfig};
use pollgroup_core::{Msg, PollGroupRef, ThreadId};
use pollgroup_module::{EventLoopPool, LoopbackPeer, LoopbackTransport, MemSubsystem, RuntimeConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_secs(5);

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("PG_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        EnvFilter::new(level)
    });
    tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true).init();
}

/// Run `f` with a completion and wait for it.
fn wait_for(f: impl FnOnce(Msg) -> pollgroup::Result<()>) -> bool {
    let (tx, rx) = mpsc::channel();
    if let Err(e) = f(Box::new(move || {
        let _ = tx.send(());
    })) {
        error!(error = %e, "operation not started");
        return false;
    }
    rx.recv_timeout(TIMEOUT).is_ok()
}

fn admit_and_wait(target: &Arc<Target>, transport: &LoopbackTransport, host: &str, port: u32) -> Option<(PollGroupRef, LoopbackPeer)> {
    let (qpair, peer) = transport.connect(host, &port.to_string());
    let (tx, rx) = mpsc::channel();
    let admitted = target.admit_with(
        qpair,
        Box::new(move |res: Result<PollGroupRef, AdmitError>| {
            let _ = tx.send(res);
        }),
    );
    if let Err(e) = admitted {
        error!(error = %e, "admission failed");
        return None;
    }
    match rx.recv_timeout(TIMEOUT) {
        Ok(Ok(group)) => Some((group, peer)),
        Ok(Err(e)) => {
            error!(error = %e, "qpair not bound");
            None
        }
        Err(_) => None,
    }
}

fn run(t: &mut TestRunner, pool: &Arc<EventLoopPool>, policy: ConnSchedPolicy) {
    let config = TargetConfig::from_env().conn_sched(policy);
    let target = match Target::new(config, pool.clone()) {
        Ok(target) => target,
        Err(e) => {
            t.check("create target", false, &e.to_string());
            return;
        }
    };
    let transport = LoopbackTransport::new();
    let subsys = MemSubsystem::new("nqn.2016-06.io.spdk:smoke");
    subsys.add_namespace(1);
    subsys.add_namespace(2);
    let n = pool.num_threads();

    // Part A
    t.section(&format!("Part A: Lifecycle ({})", policy));
    let tr = transport.clone();
    t.check("add transport", wait_for(|done| target.add_transport(tr, done)), "no completion");
    t.check("add subsystem", target.add_subsystem(subsys.clone()).is_ok(), "no free slot");
    t.check("spawn poll groups", wait_for(|done| target.spawn_poll_groups(done)), "no completion");
    let live = target.live_poll_groups();
    t.check("one poll group per thread", live.len() == n, &format!("{} live", live.len()));
    t.check(
        "namespace channels opened",
        subsys.open_channels() == 2 * n,
        &format!("{} open", subsys.open_channels()),
    );

    // Part B
    t.section("Part B: Admission");
    let mut peers = Vec::new();
    let mut placed = Vec::new();
    for i in 0..(2 * n as u32) {
        let host = match policy {
            ConnSchedPolicy::RoundRobin => "10.0.0.1".to_string(),
            ConnSchedPolicy::HostIp => format!("10.0.1.{}", i),
        };
        if let Some((group, peer)) = admit_and_wait(&target, &transport, &host, 4420 + i) {
            placed.push(group);
            peers.push(peer);
        }
    }
    t.check("all qpairs bound", peers.len() == 2 * n, &format!("{} bound", peers.len()));
    if policy == ConnSchedPolicy::RoundRobin {
        let expected: Vec<_> = live.iter().chain(live.iter()).copied().collect();
        t.check("strict rotation", placed == expected, "placement out of order");
    }

    // Part C
    t.section("Part C: Poll loop");
    for peer in &peers {
        peer.submit(100);
    }
    let deadline = Instant::now() + TIMEOUT;
    while peers.iter().any(|p| p.completed() < 100) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let done = peers.iter().filter(|p| p.completed() == 100).count();
    t.check("work completed by pollers", done == peers.len(), &format!("{}/{} done", done, peers.len()));
    let failures: u64 = (0..n as u32)
        .filter_map(|i| pool.stats(ThreadId::new(i)))
        .map(|s| s.poll_failures())
        .sum();
    t.check("no poll failures", failures == 0, &format!("{} failures", failures));

    // Part D
    if policy == ConnSchedPolicy::HostIp {
        t.section("Part D: Host affinity");
        let first = admit_and_wait(&target, &transport, "10.0.9.9", 5000).map(|(g, _)| g);
        let second = admit_and_wait(&target, &transport, "10.0.9.9", 5001).map(|(g, _)| g);
        t.check("same host, same poll group", first.is_some() && first == second, "placed apart");
        t.check(
            "affinity refcount",
            target.affinity_refs("10.0.9.9") == Some(2),
            &format!("{:?}", target.affinity_refs("10.0.9.9")),
        );
    }

    // Part E
    t.section("Part E: Teardown");
    t.check("destroy poll groups", wait_for(|done| target.destroy_poll_groups(done)), "no completion");
    t.check("live set empty", target.live_poll_groups().is_empty(), "groups remain");
    t.check(
        "transport poll groups released",
        transport.stats().live_groups() == 0,
        &format!("{} live", transport.stats().live_groups()),
    );
    t.check(
        "namespace channels closed",
        subsys.open_channels() == 0,
        &format!("{} open", subsys.open_channels()),
    );
    let (qpair, _) = transport.connect("10.0.0.1", "4420");
    t.check("admission refused after teardown", target.admit(qpair).is_err(), "admitted");
}

fn main() {
    init_logging();
    println!("=== Poll-Group End-to-End Smoke Test ===");

    let pool = match EventLoopPool::start(RuntimeConfig::from_env()) {
        Ok(pool) => pool,
        Err(e) => {
            println!("\nFATAL: event loop pool failed to start: {}", e);
            std::process::exit(1);
        }
    };
    info!(threads = pool.num_threads(), "pool ready");

    let mut t = TestRunner::new();
    run(&mut t, &pool, ConnSchedPolicy::RoundRobin);
    run(&mut t, &pool, ConnSchedPolicy::HostIp);

    if let Err(e) = pool.shutdown() {
        error!(error = %e, "pool shutdown failed");
    }
    t.summary();
    if t.failed > 0 {
        std::process::exit(1);
    }
}
