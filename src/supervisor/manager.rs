use crate::context::CancelContext;
use crate::event::channel::{
    bounded_pub_sub, pub_sub, CancellationMessage, EventPublisher, EventPublisherError,
};
use crate::supervisor::backoff::BackoffPolicy;
use crate::supervisor::clock::{Clock, SystemClock};
use crate::supervisor::error::{ShutdownError, UpdateError};
use crate::supervisor::metrics::{MetricsCollector, TracingMetrics};
use crate::supervisor::queue::WorkQueue;
use crate::supervisor::record::{ProcessRecord, ProcessState};
use crate::supervisor::snapshot::{HealthSnapshot, ProcessSnapshot};
use crate::supervisor::update::{ProcessConfig, ProcessId, ProcessUpdate, TerminateOptions};
use crate::supervisor::worker::{ReadySignal, Worker};
use crate::syncer::Syncer;
use crate::utils::thread_context::{spawn_named, NotStartedThreadContext, StartedThreadContext};
use crossbeam::channel::tick;
use crossbeam::select;
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ERRORS: u32 = 5;
const DEFAULT_INBOX_CAPACITY: usize = 16;
const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_DEGENERATE_GRACE: Duration = Duration::from_secs(5);
const DEFAULT_FINISHED_RETENTION: Duration = Duration::from_secs(300);
const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Poll interval while waiting for workers to drain during shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Courtesy window granted to forcibly cancelled workers before shutdown
/// gives up on them.
const FORCED_CANCEL_WAIT: Duration = Duration::from_millis(100);

/// Tunables of the process manager. All fields have defaults and can be
/// deserialized from the launcher configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SupervisorOptions {
    #[serde(deserialize_with = "deserialize_duration")]
    pub resync_interval: Duration,
    pub backoff: BackoffPolicy,
    pub max_errors: u32,
    pub inbox_capacity: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub update_enqueue_timeout: Duration,
    /// Short grace used when the supervisor itself decides to terminate a
    /// process (circuit breaker, terminal sync failure).
    #[serde(deserialize_with = "deserialize_duration")]
    pub degenerate_grace: Duration,
    /// How long finished records stay visible in snapshots before the
    /// resync sweep evicts them.
    #[serde(deserialize_with = "deserialize_duration")]
    pub finished_retention: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub reaper_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            backoff: BackoffPolicy::default(),
            max_errors: DEFAULT_MAX_ERRORS,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            update_enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            degenerate_grace: DEFAULT_DEGENERATE_GRACE,
            finished_retention: DEFAULT_FINISHED_RETENTION,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
        }
    }
}

impl SupervisorOptions {
    /// A record in `Syncing` whose last sync is older than this has missed
    /// resync passes and is treated as a potential orphan.
    fn stale_sync_threshold(&self) -> Duration {
        self.resync_interval * 2
    }
}

/// Builds a [`ProcessManager`], with injection points for the clock and the
/// metrics collector so tests can run deterministically.
pub struct SupervisorBuilder {
    options: SupervisorOptions,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsCollector>,
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self {
            options: SupervisorOptions::default(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(TracingMetrics),
        }
    }
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(self, options: SupervisorOptions) -> Self {
        Self { options, ..self }
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    pub fn with_metrics(self, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics, ..self }
    }

    pub fn build(self, syncer: Arc<dyn Syncer>) -> ProcessManager {
        ProcessManager::start(syncer, self.options, self.clock, self.metrics)
    }
}

/// Send side of one worker plus its shared record.
struct WorkerHandle {
    record: Arc<Mutex<ProcessRecord>>,
    inbox: EventPublisher<ProcessUpdate>,
    ready: EventPublisher<ReadySignal>,
    cancel: CancelContext,
    stop: EventPublisher<CancellationMessage>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    fn state(&self) -> ProcessState {
        self.record.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    fn is_thread_finished(&self) -> bool {
        self.join
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }
}

struct Inner {
    workers: RwLock<HashMap<ProcessId, WorkerHandle>>,
    queue: Arc<WorkQueue>,
    syncer: Arc<dyn Syncer>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsCollector>,
    options: SupervisorOptions,
    shutting_down: AtomicBool,
}

impl Inner {
    fn read_workers(&self) -> RwLockReadGuard<'_, HashMap<ProcessId, WorkerHandle>> {
        self.workers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_workers(&self) -> RwLockWriteGuard<'_, HashMap<ProcessId, WorkerHandle>> {
        self.workers.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// The supervisor: owns every process record and the one worker per record,
/// the shared work queue, the resync ticker and the orphan reaper.
pub struct ProcessManager {
    inner: Arc<Inner>,
    background: Mutex<Vec<StartedThreadContext>>,
}

impl ProcessManager {
    fn start(
        syncer: Arc<dyn Syncer>,
        options: SupervisorOptions,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let queue = Arc::new(WorkQueue::new(Arc::clone(&clock)));
        let inner = Arc::new(Inner {
            workers: RwLock::new(HashMap::new()),
            queue,
            syncer,
            clock,
            metrics,
            options,
            shutting_down: AtomicBool::new(false),
        });

        let background = vec![
            spawn_dispatcher(Arc::clone(&inner)),
            spawn_resync_ticker(Arc::clone(&inner)),
            spawn_orphan_reaper(Arc::clone(&inner)),
        ];

        Self {
            inner,
            background: Mutex::new(background),
        }
    }

    /// Applies one update: creates the record and worker if absent (for
    /// create/update), delivers the update to the worker's inbox and
    /// enqueues the key for reconciliation.
    ///
    /// Returns as soon as the update is enqueued; whatever the syncer does
    /// with it later surfaces through `health()` and metrics, never here.
    pub fn update_process(&self, update: ProcessUpdate) -> Result<(), UpdateError> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(UpdateError::ShuttingDown);
        }
        let id = update.id.clone();

        // Fast path under the read lock: a live worker already exists.
        {
            let workers = self.inner.read_workers();
            match workers.get(&id) {
                Some(handle) if handle.state() != ProcessState::Finished => {
                    self.deliver(handle, update)?;
                    self.inner.queue.add(&id);
                    return Ok(());
                }
                Some(_finished) => {}
                None if update.update_type.is_stop() => {
                    return Err(UpdateError::NotFound(id));
                }
                None => {}
            }
        }

        if update.update_type.is_stop() {
            // Stopping an already-finished process is idempotent.
            return Ok(());
        }

        // Slow path: create (or replace a finished record) under the write
        // lock, which serializes creation and keeps the one-worker-per-key
        // invariant.
        let mut workers = self.inner.write_workers();
        if let Some(handle) = workers.get(&id) {
            if handle.state() != ProcessState::Finished {
                self.deliver(handle, update)?;
                self.inner.queue.add(&id);
                return Ok(());
            }
            debug!(%id, "replacing finished record with a fresh worker");
            workers.remove(&id);
            // Clear any in-flight state the finished worker left behind.
            self.inner.queue.done(&id);
        }

        let handle = self.spawn_worker(id.clone(), update.config.clone());
        let delivery = self.deliver(&handle, update);
        workers.insert(id.clone(), handle);
        drop(workers);
        delivery?;
        self.inner.queue.add(&id);
        Ok(())
    }

    /// Requests graceful shutdown of one process. Unknown keys return
    /// [`UpdateError::NotFound`].
    pub fn terminate(
        &self,
        id: &ProcessId,
        options: TerminateOptions,
    ) -> Result<(), UpdateError> {
        let config = {
            let workers = self.inner.read_workers();
            let handle = workers
                .get(id)
                .ok_or_else(|| UpdateError::NotFound(id.clone()))?;
            let guard = handle.record.lock().unwrap_or_else(|e| e.into_inner());
            guard.config.clone()
        };
        self.update_process(ProcessUpdate::terminate(id.clone(), config, options))
    }

    /// Aggregate snapshot plus per-process details. O(n) over records, each
    /// locked only long enough to copy it out.
    pub fn health(&self) -> HealthSnapshot {
        let now = self.inner.clock.now();
        let workers = self.inner.read_workers();
        let mut processes: Vec<ProcessSnapshot> = workers
            .values()
            .map(|handle| {
                let record = handle.record.lock().unwrap_or_else(|e| e.into_inner());
                ProcessSnapshot::from_record(&record, now)
            })
            .collect();
        drop(workers);
        processes.sort_by(|a, b| a.id.cmp(&b.id));
        HealthSnapshot::from_snapshots(processes)
    }

    /// Drives every non-terminal record to `Terminating` with a grace
    /// period derived from `ctx`'s deadline (default 30s) and waits for all
    /// workers to exit.
    ///
    /// When the deadline elapses first, the remaining workers are forcibly
    /// cancelled and an error is returned; their cleanup is skipped.
    pub fn shutdown(&self, ctx: &CancelContext) -> Result<(), ShutdownError> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
        }
        let deadline = ctx
            .deadline()
            .unwrap_or_else(|| Instant::now() + DEFAULT_SHUTDOWN_GRACE);
        info!(grace = ?deadline.saturating_duration_since(Instant::now()), "supervisor shutting down");

        // No new resync or reaper work while draining.
        let background = std::mem::take(
            &mut *self.background.lock().unwrap_or_else(|e| e.into_inner()),
        );

        self.request_terminations(deadline);
        let stragglers = self.wait_for_workers(deadline);

        if !stragglers.is_empty() {
            warn!(
                count = stragglers.len(),
                "shutdown deadline elapsed, cancelling remaining workers"
            );
            self.force_cancel(&stragglers);
        }

        self.inner.queue.shutdown();
        for thread in background {
            let name = thread.thread_name().to_string();
            if let Err(err) = thread.stop_blocking() {
                warn!(thread = name, error = %err, "background thread did not stop cleanly");
            }
        }

        if stragglers.is_empty() {
            info!("supervisor shutdown complete");
            Ok(())
        } else {
            Err(ShutdownError::DeadlineExceeded {
                stragglers: stragglers.len(),
            })
        }
    }

    fn request_terminations(&self, deadline: Instant) {
        let grace = deadline.saturating_duration_since(Instant::now());
        let workers = self.inner.read_workers();
        for (id, handle) in workers.iter() {
            if handle.state().is_terminal() {
                continue;
            }
            let config = handle
                .record
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .config
                .clone();
            let update = ProcessUpdate::terminate(
                id.clone(),
                config,
                TerminateOptions::with_grace(grace),
            );
            if handle.inbox.try_publish(update).is_err() {
                // Full or closed inbox: skip the graceful path for this one.
                handle.cancel.cancel();
                let _ = handle.stop.publish(());
            }
        }
    }

    /// Polls worker threads until they all exit or the deadline passes;
    /// returns the keys of the stragglers.
    fn wait_for_workers(&self, deadline: Instant) -> Vec<ProcessId> {
        loop {
            let unfinished: Vec<ProcessId> = {
                let workers = self.inner.read_workers();
                workers
                    .iter()
                    .filter(|(_, handle)| !handle.is_thread_finished())
                    .map(|(id, _)| id.clone())
                    .collect()
            };
            if unfinished.is_empty() {
                return Vec::new();
            }
            if Instant::now() >= deadline {
                return unfinished;
            }
            std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
    }

    fn force_cancel(&self, ids: &[ProcessId]) {
        {
            let workers = self.inner.read_workers();
            for id in ids {
                if let Some(handle) = workers.get(id) {
                    handle.cancel.cancel();
                    let _ = handle.stop.publish(());
                }
            }
        }
        // Courtesy wait so cooperative syncers can observe the cancel, then
        // give up; the threads are detached when the handles drop.
        let courtesy = Instant::now() + FORCED_CANCEL_WAIT;
        while Instant::now() < courtesy {
            let workers = self.inner.read_workers();
            if ids
                .iter()
                .all(|id| workers.get(id).map(|h| h.is_thread_finished()).unwrap_or(true))
            {
                break;
            }
            drop(workers);
            std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
    }

    fn deliver(&self, handle: &WorkerHandle, update: ProcessUpdate) -> Result<(), UpdateError> {
        let id = update.id.clone();
        let is_stop = update.update_type.is_stop();
        match handle
            .inbox
            .publish_timeout(update, self.inner.options.update_enqueue_timeout)
        {
            Ok(()) => Ok(()),
            Err(EventPublisherError::Full(timeout)) => Err(UpdateError::Busy(id, timeout)),
            // The worker exited between the state check and the send: for a
            // stop that is success (already stopped); for anything else the
            // caller retries and hits the respawn path.
            Err(EventPublisherError::SendError(_)) if is_stop => Ok(()),
            Err(EventPublisherError::SendError(_)) => {
                Err(UpdateError::Busy(id, self.inner.options.update_enqueue_timeout))
            }
        }
    }

    fn spawn_worker(&self, id: ProcessId, config: ProcessConfig) -> WorkerHandle {
        let now = self.inner.clock.now();
        let record = Arc::new(Mutex::new(ProcessRecord::new(id.clone(), config, now)));
        self.inner
            .metrics
            .state_transition(&id, None, ProcessState::Starting, false);

        let (inbox_tx, inbox_rx) = bounded_pub_sub(self.inner.options.inbox_capacity);
        let (ready_tx, ready_rx) = pub_sub();
        let (stop_tx, stop_rx) = pub_sub();
        let cancel = CancelContext::new();

        let worker = Worker {
            id: id.clone(),
            record: Arc::clone(&record),
            inbox: inbox_rx,
            ready: ready_rx,
            cancel: cancel.clone(),
            syncer: Arc::clone(&self.inner.syncer),
            queue: Arc::clone(&self.inner.queue),
            clock: Arc::clone(&self.inner.clock),
            backoff: self.inner.options.backoff,
            max_errors: self.inner.options.max_errors,
            degenerate_grace: self.inner.options.degenerate_grace,
            metrics: Arc::clone(&self.inner.metrics),
        };
        let join = spawn_named(format!("process-{id}"), move || worker.run(stop_rx));

        WorkerHandle {
            record,
            inbox: inbox_tx,
            ready: ready_tx,
            cancel,
            stop: stop_tx,
            join: Mutex::new(Some(join)),
        }
    }
}

/// Pops ready keys off the queue and forwards them to the owning worker.
/// Exits when the queue shuts down; the stop channel is unused.
fn spawn_dispatcher(inner: Arc<Inner>) -> StartedThreadContext {
    NotStartedThreadContext::new("queue_dispatcher", move |_stop| {
        while let Some((key, attempt)) = inner.queue.get() {
            let delivered = {
                let workers = inner.read_workers();
                workers
                    .get(&key)
                    .map(|handle| handle.ready.publish(ReadySignal { attempt }).is_ok())
                    .unwrap_or(false)
            };
            if !delivered {
                // No live worker for the key: release it so a dirty mark
                // cannot wedge it in flight forever.
                inner.queue.done(&key);
            }
        }
        debug!("queue dispatcher exited");
    })
    .start()
}

/// Every resync interval, enqueues every active record for reconciliation
/// and evicts finished records whose retention has lapsed.
fn spawn_resync_ticker(inner: Arc<Inner>) -> StartedThreadContext {
    let interval = inner.options.resync_interval;
    NotStartedThreadContext::new("resync_ticker", move |stop| {
        let ticker = tick(interval);
        loop {
            select! {
                recv(ticker) -> _ => {
                    resync_pass(&inner);
                    evict_finished(&inner);
                },
                recv(stop.as_ref()) -> _ => break,
            }
        }
        debug!("resync ticker exited");
    })
    .start()
}

fn resync_pass(inner: &Inner) {
    let targets: Vec<ProcessId> = {
        let workers = inner.read_workers();
        workers
            .iter()
            .filter(|(_, handle)| handle.state().is_active())
            .map(|(id, _)| id.clone())
            .collect()
    };
    if !targets.is_empty() {
        debug!(count = targets.len(), "resync pass");
    }
    for id in targets {
        inner.queue.add(&id);
    }
}

fn evict_finished(inner: &Inner) {
    let now = inner.clock.now();
    let retention = inner.options.finished_retention;
    let expired: Vec<ProcessId> = {
        let workers = inner.read_workers();
        workers
            .iter()
            .filter(|(_, handle)| {
                let record = handle.record.lock().unwrap_or_else(|e| e.into_inner());
                record.state == ProcessState::Finished
                    && now.saturating_duration_since(record.state_changed_at) > retention
            })
            .map(|(id, _)| id.clone())
            .collect()
    };
    if expired.is_empty() {
        return;
    }
    let mut workers = inner.write_workers();
    for id in expired {
        debug!(%id, "evicting finished record");
        workers.remove(&id);
        inner.queue.done(&id);
    }
}

/// Every reaper interval, re-enqueues records in `Syncing` whose last sync
/// lags far enough behind that the process may have died without anyone
/// noticing (a crashed child surfaces as an error on the next sync).
fn spawn_orphan_reaper(inner: Arc<Inner>) -> StartedThreadContext {
    let interval = inner.options.reaper_interval;
    NotStartedThreadContext::new("orphan_reaper", move |stop| {
        let ticker = tick(interval);
        loop {
            select! {
                recv(ticker) -> _ => reap_stale(&inner),
                recv(stop.as_ref()) -> _ => break,
            }
        }
        debug!("orphan reaper exited");
    })
    .start()
}

fn reap_stale(inner: &Inner) {
    let now = inner.clock.now();
    let threshold = inner.options.stale_sync_threshold();
    let stale: Vec<ProcessId> = {
        let workers = inner.read_workers();
        workers
            .iter()
            .filter(|(_, handle)| {
                let record = handle.record.lock().unwrap_or_else(|e| e.into_inner());
                record.state == ProcessState::Syncing
                    && record
                        .last_sync_at
                        .map(|at| now.saturating_duration_since(at) > threshold)
                        .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    };
    for id in stale {
        warn!(%id, "process has not synced recently, forcing a resync");
        inner.queue.add(&id);
    }
}
