use crate::supervisor::record::{ErrorKind, ProcessState};
use crate::supervisor::update::ProcessId;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

/// Sink for supervisor telemetry.
///
/// Implementations must be thread-safe: workers emit concurrently without
/// coordination. A state transition is emitted before the new state becomes
/// visible to `health()` snapshots, so a scrape never observes a state whose
/// transition sample has not been recorded yet.
pub trait MetricsCollector: Send + Sync + 'static {
    /// Exactly one sample per state transition. `from` is `None` for the
    /// initial transition into `Starting`. `forced` marks the
    /// shutdown-timeout path where the grace machinery was bypassed.
    fn state_transition(
        &self,
        id: &ProcessId,
        from: Option<ProcessState>,
        to: ProcessState,
        forced: bool,
    );

    fn sync_error(&self, id: &ProcessId, kind: ErrorKind);

    fn restart(&self, id: &ProcessId);

    fn grace_exceeded(&self, id: &ProcessId);

    fn cleanup_error(&self, id: &ProcessId);
}

/// Default collector: emits the samples as `tracing` events carrying
/// metric-style fields, ready to be picked up by an OpenTelemetry metrics
/// layer when one is installed, and otherwise visible at TRACE level.
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsCollector for TracingMetrics {
    fn state_transition(
        &self,
        id: &ProcessId,
        from: Option<ProcessState>,
        to: ProcessState,
        forced: bool,
    ) {
        trace!(
            monotonic_counter.process_state_transitions = 1u64,
            id = %id,
            from = from.map(|s| s.as_str()).unwrap_or("none"),
            to = to.as_str(),
            forced,
        );
    }

    fn sync_error(&self, id: &ProcessId, kind: ErrorKind) {
        trace!(
            monotonic_counter.process_sync_errors = 1u64,
            id = %id,
            kind = kind.as_str(),
        );
    }

    fn restart(&self, id: &ProcessId) {
        trace!(monotonic_counter.process_restarts = 1u64, id = %id);
    }

    fn grace_exceeded(&self, id: &ProcessId) {
        trace!(monotonic_counter.process_grace_exceeded = 1u64, id = %id);
    }

    fn cleanup_error(&self, id: &ProcessId) {
        trace!(monotonic_counter.process_cleanup_errors = 1u64, id = %id);
    }
}

/// Transition sample captured by [`InMemoryMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionSample {
    pub id: ProcessId,
    pub from: Option<ProcessState>,
    pub to: ProcessState,
    pub forced: bool,
}

/// Collector that accumulates samples in memory. Useful for embedders that
/// scrape counters themselves and for asserting on supervisor behavior in
/// tests.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    transitions: Vec<TransitionSample>,
    sync_errors: HashMap<ErrorKind, u64>,
    restarts: u64,
    grace_exceeded: u64,
    cleanup_errors: u64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions(&self) -> Vec<TransitionSample> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).transitions.clone()
    }

    /// Transition samples for a single process, in emission order.
    pub fn transitions_for(&self, id: &ProcessId) -> Vec<TransitionSample> {
        self.transitions()
            .into_iter()
            .filter(|sample| &sample.id == id)
            .collect()
    }

    pub fn sync_errors(&self, kind: ErrorKind) -> u64 {
        *self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sync_errors
            .get(&kind)
            .unwrap_or(&0)
    }

    pub fn restarts(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).restarts
    }

    pub fn grace_exceeded(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).grace_exceeded
    }

    pub fn cleanup_errors(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).cleanup_errors
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn state_transition(
        &self,
        id: &ProcessId,
        from: Option<ProcessState>,
        to: ProcessState,
        forced: bool,
    ) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transitions
            .push(TransitionSample {
                id: id.clone(),
                from,
                to,
                forced,
            });
    }

    fn sync_error(&self, id: &ProcessId, kind: ErrorKind) {
        let _ = id;
        *self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sync_errors
            .entry(kind)
            .or_insert(0) += 1;
    }

    fn restart(&self, id: &ProcessId) {
        let _ = id;
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).restarts += 1;
    }

    fn grace_exceeded(&self, id: &ProcessId) {
        let _ = id;
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).grace_exceeded += 1;
    }

    fn cleanup_error(&self, id: &ProcessId) {
        let _ = id;
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).cleanup_errors += 1;
    }
}
