//! End-to-end lifecycle scenarios driven through the public supervisor
//! surface with a scripted syncer.

mod common;

use common::ScriptedSyncer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use workload_launcher::context::CancelContext;
use workload_launcher::supervisor::backoff::BackoffPolicy;
use workload_launcher::supervisor::metrics::{InMemoryMetrics, MetricsCollector};
use workload_launcher::supervisor::record::ProcessState;
use workload_launcher::supervisor::snapshot::HealthSnapshot;
use workload_launcher::supervisor::update::{
    ProcessCategory, ProcessConfig, ProcessId, ProcessUpdate, TerminateOptions,
};
use workload_launcher::supervisor::{ProcessManager, SupervisorBuilder, SupervisorOptions};
use workload_launcher::syncer::SyncError;

fn id(s: &str) -> ProcessId {
    ProcessId::new(s).unwrap()
}

fn config() -> ProcessConfig {
    ProcessConfig::new(ProcessCategory::Pattern)
}

struct Setup {
    manager: ProcessManager,
    syncer: Arc<ScriptedSyncer>,
    metrics: Arc<InMemoryMetrics>,
}

fn setup(syncer: ScriptedSyncer, options: SupervisorOptions) -> Setup {
    let syncer = Arc::new(syncer);
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager = SupervisorBuilder::new()
        .with_options(options)
        .with_metrics(Arc::clone(&metrics) as Arc<dyn MetricsCollector>)
        .build(Arc::clone(&syncer) as Arc<dyn workload_launcher::syncer::Syncer>);
    Setup {
        manager,
        syncer,
        metrics,
    }
}

fn slow_resync_options() -> SupervisorOptions {
    SupervisorOptions {
        resync_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

fn wait_until(
    manager: &ProcessManager,
    what: &str,
    within: Duration,
    predicate: impl Fn(&HealthSnapshot) -> bool,
) {
    let deadline = Instant::now() + within;
    loop {
        let snapshot = manager.health();
        if predicate(&snapshot) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "{what} not observed within {within:?}: {snapshot:?}"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn shutdown(manager: &ProcessManager) {
    let _ = manager.shutdown(&CancelContext::new().with_timeout(Duration::from_secs(5)));
}

/// Scenario A: a freshly created process reaches `Syncing` healthy and
/// stays there.
#[test]
fn happy_lifecycle_reaches_syncing_and_settles() {
    let Setup {
        manager, metrics, ..
    } = setup(ScriptedSyncer::new(), slow_resync_options());

    manager
        .update_process(ProcessUpdate::create(id("p1"), config()))
        .unwrap();
    wait_until(&manager, "running", Duration::from_secs(2), |s| {
        s.running_processes == 1
    });

    // No further transitions happen once settled.
    std::thread::sleep(Duration::from_millis(300));
    let states: Vec<_> = metrics
        .transitions_for(&id("p1"))
        .into_iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(states, vec![ProcessState::Starting, ProcessState::Syncing]);
    assert_eq!(manager.health().running_processes, 1);

    shutdown(&manager);
}

/// Scenario B: graceful terminate walks the full state chain and leaves
/// clean counters.
#[test]
fn graceful_terminate_walks_the_state_chain() {
    let syncer = ScriptedSyncer::new().with_terminating_delay(Duration::from_millis(500));
    let Setup {
        manager,
        syncer,
        metrics,
    } = setup(syncer, slow_resync_options());

    manager
        .update_process(ProcessUpdate::create(id("p1"), config()))
        .unwrap();
    wait_until(&manager, "running", Duration::from_secs(2), |s| {
        s.running_processes == 1
    });

    let started = Instant::now();
    manager
        .terminate(&id("p1"), TerminateOptions::with_grace(Duration::from_secs(2)))
        .unwrap();
    wait_until(&manager, "finished", Duration::from_secs(3), |s| {
        s.counts_by_state.get(&ProcessState::Finished) == Some(&1)
    });
    assert!(started.elapsed() < Duration::from_secs(3));

    let process = manager.health();
    let process = process.process(&id("p1")).unwrap();
    assert_eq!(process.restart_count, 0);
    assert_eq!(process.error_count, 0);
    assert_eq!(syncer.terminating_call_count(), 1);
    assert_eq!(syncer.terminated_call_count(), 1);

    let states: Vec<_> = metrics
        .transitions_for(&id("p1"))
        .into_iter()
        .map(|t| t.to)
        .collect();
    assert_eq!(
        states,
        vec![
            ProcessState::Starting,
            ProcessState::Syncing,
            ProcessState::Terminating,
            ProcessState::Terminated,
            ProcessState::Finished,
        ]
    );

    // State reachability: once finished, always finished.
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(
        manager.health().process(&id("p1")).unwrap().state,
        ProcessState::Finished
    );

    shutdown(&manager);
}

/// Scenario C: transient failures retry with exponential backoff and the
/// process recovers.
#[test]
fn transient_failures_recover_with_backoff() {
    let failure = || Err(SyncError::Transient("backend offline".to_string()));
    let syncer = ScriptedSyncer::new().with_sync_results(vec![failure(), failure(), failure()]);
    let options = SupervisorOptions {
        resync_interval: Duration::from_secs(60),
        max_errors: 5,
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(80), 0.0),
        ..Default::default()
    };
    let Setup { manager, syncer, .. } = setup(syncer, options);

    manager
        .update_process(ProcessUpdate::create(id("p1"), config()))
        .unwrap();
    wait_until(&manager, "recovery", Duration::from_secs(3), |s| {
        s.running_processes == 1
    });

    let process = manager.health();
    let process = process.process(&id("p1")).unwrap();
    assert_eq!(process.state, ProcessState::Syncing);
    assert_eq!(process.error_count, 0);
    assert_eq!(process.restart_count, 3);

    // Exactly four sync calls: three failures plus the success.
    assert_eq!(syncer.sync_call_count(), 4);

    // Gaps between consecutive calls follow the 10/20/40ms schedule, with
    // scheduling slack on top.
    let times = syncer.sync_call_times();
    for (index, expected) in [10u64, 20, 40].into_iter().enumerate() {
        let gap = times[index + 1] - times[index];
        let expected = Duration::from_millis(expected);
        assert!(gap >= expected, "gap {index} was {gap:?}, expected >= {expected:?}");
        assert!(
            gap < expected + Duration::from_millis(250),
            "gap {index} was {gap:?}, expected close to {expected:?}"
        );
    }

    shutdown(&manager);
}

/// Scenario D: a persistently failing process trips the circuit breaker
/// after exactly `max_errors` attempts.
#[test]
fn circuit_breaker_trips_after_max_errors() {
    let syncer = ScriptedSyncer::new()
        .with_default_result(Err(SyncError::Transient("always down".to_string())));
    let options = SupervisorOptions {
        resync_interval: Duration::from_secs(60),
        max_errors: 5,
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(80), 0.0),
        degenerate_grace: Duration::from_millis(100),
        ..Default::default()
    };
    let Setup { manager, syncer, .. } = setup(syncer, options);

    manager
        .update_process(ProcessUpdate::create(id("p1"), config()))
        .unwrap();
    wait_until(&manager, "breaker trip", Duration::from_secs(3), |s| {
        s.counts_by_state.get(&ProcessState::Finished) == Some(&1)
    });

    assert_eq!(syncer.sync_call_count(), 5);

    shutdown(&manager);
}

/// Scenario E: a syncer that ignores its context cannot hold the state
/// machine past the grace deadline.
#[test]
fn grace_exceeded_forces_terminated_on_time() {
    let syncer = ScriptedSyncer::new()
        .with_terminating_delay(Duration::from_millis(500))
        .with_honor_cancellation(false);
    let Setup {
        manager, metrics, ..
    } = setup(syncer, slow_resync_options());

    manager
        .update_process(ProcessUpdate::create(id("p1"), config()))
        .unwrap();
    wait_until(&manager, "running", Duration::from_secs(2), |s| {
        s.running_processes == 1
    });

    let started = Instant::now();
    manager
        .terminate(&id("p1"), TerminateOptions::with_grace(Duration::from_millis(100)))
        .unwrap();
    wait_until(&manager, "terminated", Duration::from_secs(1), |s| {
        s.processes
            .first()
            .map(|p| matches!(p.state, ProcessState::Terminated | ProcessState::Finished))
            .unwrap_or(false)
    });

    // Terminated at roughly the grace deadline, not after the 500ms sleep.
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    assert_eq!(metrics.grace_exceeded(), 1);

    shutdown(&manager);
}

/// Property 7: shutdown returns within its deadline plus a small slack even
/// when workers are wedged inside the syncer and cannot stop.
#[test]
fn shutdown_deadline_is_honored() {
    let syncer = ScriptedSyncer::new().with_sync_delay(Duration::from_secs(30));
    let Setup { manager, syncer, .. } = setup(syncer, slow_resync_options());

    for key in ["p1", "p2", "p3"] {
        manager
            .update_process(ProcessUpdate::create(id(key), config()))
            .unwrap();
    }
    // All three workers are inside their (wedged) first sync call.
    let deadline = Instant::now() + Duration::from_secs(3);
    while syncer.sync_call_count() < 3 {
        assert!(Instant::now() < deadline, "workers never entered the syncer");
        std::thread::sleep(Duration::from_millis(5));
    }

    let started = Instant::now();
    let result = manager.shutdown(&CancelContext::new().with_timeout(Duration::from_secs(1)));
    let elapsed = started.elapsed();

    assert!(result.is_err(), "wedged workers must be reported");
    assert!(elapsed < Duration::from_millis(1800), "shutdown took {elapsed:?}");
}
