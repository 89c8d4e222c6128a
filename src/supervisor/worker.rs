use crate::context::CancelContext;
use crate::event::channel::{CancellationMessage, EventConsumer};
use crate::supervisor::backoff::BackoffPolicy;
use crate::supervisor::clock::Clock;
use crate::supervisor::metrics::MetricsCollector;
use crate::supervisor::queue::WorkQueue;
use crate::supervisor::record::{ErrorKind, ProcessRecord, ProcessState};
use crate::supervisor::update::{ProcessConfig, ProcessId, ProcessUpdate, UpdateType};
use crate::syncer::{ProgressSink, SyncError, Syncer};
use crossbeam::channel::{bounded, RecvTimeoutError};
use crossbeam::select;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info_span, warn};

/// Window granted to the syncer's terminating call when the grace period is
/// zero, so a cooperating implementation gets one chance to observe the
/// already-expired context and force-stop.
const ZERO_GRACE_WAIT: Duration = Duration::from_millis(50);

/// Signal that the process key was handed out by the work queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ReadySignal {
    pub attempt: u32,
}

/// Everything a per-process worker needs. One of these is moved into the
/// worker thread; the supervisor keeps only the record, the channels' send
/// sides and the cancellation handle.
pub(crate) struct Worker {
    pub id: ProcessId,
    pub record: Arc<Mutex<ProcessRecord>>,
    pub inbox: EventConsumer<ProcessUpdate>,
    pub ready: EventConsumer<ReadySignal>,
    pub cancel: CancelContext,
    pub syncer: Arc<dyn Syncer>,
    pub queue: Arc<WorkQueue>,
    pub clock: Arc<dyn Clock>,
    pub backoff: BackoffPolicy,
    pub max_errors: u32,
    pub degenerate_grace: Duration,
    pub metrics: Arc<dyn MetricsCollector>,
}

/// Outcome of one sync pass.
enum Step {
    Continue,
    Stop { grace: Duration },
}

/// Most recent intent extracted from a drained inbox batch.
struct Batch {
    stop_grace: Option<Duration>,
    update_type: Option<UpdateType>,
    config: Option<ProcessConfig>,
}

impl Worker {
    /// Drives the process lifecycle until it reaches `Finished`.
    ///
    /// Blocks on the inbox, the queue-ready signal and the stop channel.
    /// Stop updates from the inbox act immediately; create/update content is
    /// adopted into the record and realized on the next ready signal (every
    /// delivered update also enqueued the key, so that signal is coming).
    /// A stop message or a raised cancellation flag takes the kill fast
    /// path, which skips the terminated-state cleanup call.
    pub(crate) fn run(self, stop_consumer: EventConsumer<CancellationMessage>) {
        let span = info_span!("process_worker", id = %self.id);
        let _guard = span.enter();
        debug!("worker started");

        let mut pending_restart = false;
        // Update kind adopted from the inbox and not yet realized by a sync
        // pass; a bare resync is an implicit update.
        let mut pending_type: Option<UpdateType> = None;
        loop {
            if self.cancel.is_flag_cancelled() {
                self.terminate_sequence(Duration::ZERO, true);
                break;
            }

            let mut cancelled = false;
            let mut woken_by_work = false;
            select! {
                recv(self.inbox.as_ref()) -> msg => match msg {
                    Ok(update) => {
                        let batch = self.drain(Some(update));
                        match self.adopt(batch, &mut pending_type) {
                            Some(grace) => {
                                self.terminate_sequence(grace, false);
                                break;
                            }
                            None => continue,
                        }
                    }
                    Err(_) => cancelled = true,
                },
                recv(self.ready.as_ref()) -> msg => match msg {
                    Ok(_signal) => woken_by_work = true,
                    Err(_) => cancelled = true,
                },
                recv(stop_consumer.as_ref()) -> _ => cancelled = true,
            }

            if cancelled || self.cancel.is_flag_cancelled() {
                self.terminate_sequence(Duration::ZERO, true);
                break;
            }
            if woken_by_work {
                let batch = self.drain(None);
                if let Some(grace) = self.adopt(batch, &mut pending_type) {
                    self.terminate_sequence(grace, false);
                    break;
                }
                let update_type = pending_type.take().unwrap_or(UpdateType::Update);
                let config = self.lock_record().config.clone();
                match self.sync_pass(update_type, &config, &mut pending_restart) {
                    Step::Continue => {}
                    Step::Stop { grace } => {
                        self.terminate_sequence(grace, false);
                        break;
                    }
                }
            }
        }
        // Release any in-flight marking a late dispatch may have left, so a
        // future worker for this key is not wedged behind a stale dirty bit.
        self.queue.done(&self.id);
        debug!("worker exited");
    }

    /// Drains the inbox without blocking and coalesces the batch: a stop
    /// request wins regardless of order, and the most recent config wins.
    fn drain(&self, head: Option<ProcessUpdate>) -> Batch {
        let mut batch = Batch {
            stop_grace: None,
            update_type: None,
            config: None,
        };
        let mut fold = |update: ProcessUpdate| {
            if update.update_type.is_stop() {
                // The most aggressive stop in the batch wins.
                let grace = update.grace_period();
                batch.stop_grace = Some(match batch.stop_grace {
                    Some(existing) => existing.min(grace),
                    None => grace,
                });
            } else {
                batch.update_type = Some(update.update_type);
            }
            batch.config = Some(update.config);
        };

        if let Some(update) = head {
            fold(update);
        }
        while let Ok(update) = self.inbox.as_ref().try_recv() {
            fold(update);
        }
        batch
    }

    /// Adopts the batch into the record: the freshest config is stored and
    /// the update kind remembered for the next sync pass. Returns the grace
    /// period when the batch asks the process to stop.
    fn adopt(&self, batch: Batch, pending_type: &mut Option<UpdateType>) -> Option<Duration> {
        if let Some(config) = batch.config {
            self.lock_record().config = config;
        }
        if let Some(update_type) = batch.update_type {
            *pending_type = Some(update_type);
        }
        batch.stop_grace
    }

    fn sync_pass(
        &self,
        update_type: UpdateType,
        config: &ProcessConfig,
        pending_restart: &mut bool,
    ) -> Step {
        {
            let mut record = self.lock_record();
            if record.state == ProcessState::Starting {
                self.transition(&mut record, ProcessState::Syncing, false);
            }
            if *pending_restart {
                record.restart_count += 1;
                *pending_restart = false;
                self.metrics.restart(&self.id);
            }
        }

        let result = self
            .syncer
            .sync_process(&self.cancel, update_type, &self.id, config);

        // Release the key whatever happened; a dirty mark re-queues it.
        let step = match result {
            Ok(()) => {
                let now = self.clock.now();
                self.lock_record().record_sync_success(now);
                Step::Continue
            }
            Err(SyncError::Transient(message)) => {
                let error_count = {
                    let mut record = self.lock_record();
                    record.record_sync_error(ErrorKind::TransientSync, message.clone());
                    record.error_count
                };
                self.metrics.sync_error(&self.id, ErrorKind::TransientSync);
                warn!(error = %message, error_count, "transient sync failure");

                if error_count >= self.max_errors {
                    self.trip_circuit_breaker(error_count)
                } else {
                    *pending_restart = true;
                    let delay = self.backoff.delay(error_count);
                    self.queue.add_after(&self.id, delay, error_count);
                    Step::Continue
                }
            }
            Err(SyncError::Terminal(message)) => {
                {
                    let mut record = self.lock_record();
                    record.record_sync_error(ErrorKind::TerminalSync, message.clone());
                }
                self.metrics.sync_error(&self.id, ErrorKind::TerminalSync);
                warn!(error = %message, "terminal sync failure, escalating to terminate");
                Step::Stop {
                    grace: self.degenerate_grace,
                }
            }
        };
        self.queue.done(&self.id);
        step
    }

    fn trip_circuit_breaker(&self, error_count: u32) -> Step {
        {
            let mut record = self.lock_record();
            record.last_error = Some(crate::supervisor::record::ProcessError {
                kind: ErrorKind::CircuitBreakerTripped,
                message: format!("{error_count} consecutive sync failures"),
            });
        }
        self.metrics
            .sync_error(&self.id, ErrorKind::CircuitBreakerTripped);
        warn!(error_count, "circuit breaker tripped, terminating process");
        Step::Stop {
            grace: self.degenerate_grace,
        }
    }

    /// Walks the process through `Terminating -> Terminated -> Finished`.
    ///
    /// The terminating call runs on a helper thread so an uncooperative
    /// syncer cannot hold the state machine past the grace deadline. On the
    /// cancellation fast path (`skip_cleanup`) the terminated-state cleanup
    /// is skipped and the transitions are tagged as forced.
    fn terminate_sequence(&self, grace: Duration, skip_cleanup: bool) {
        let config = {
            let mut record = self.lock_record();
            if !record.state.is_stopping() {
                self.transition(&mut record, ProcessState::Terminating, skip_cleanup);
            }
            record.healthy = false;
            record.config.clone()
        };
        let ctx = self.cancel.with_timeout(grace);
        let wait_budget = if grace.is_zero() { ZERO_GRACE_WAIT } else { grace };

        let (result_tx, result_rx) = bounded::<Result<(), SyncError>>(1);
        {
            let syncer = Arc::clone(&self.syncer);
            let id = self.id.clone();
            let config = config.clone();
            let ctx = ctx.clone();
            crate::utils::thread_context::spawn_named(format!("terminate-{}", self.id), move || {
                let progress = ProgressSink::new(id.clone());
                let result = syncer.sync_terminating(&ctx, &id, &config, grace, &progress);
                let _ = result_tx.send(result);
            });
        }

        match result_rx.recv_timeout(wait_budget) {
            Ok(Ok(())) => debug!("graceful termination completed"),
            Ok(Err(err)) => {
                warn!(error = %err, "syncer failed during graceful termination");
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                // Force the state forward; the helper thread keeps running
                // until the (now cancelled and expired) context convinces
                // the syncer to give up.
                ctx.cancel();
                self.metrics.grace_exceeded(&self.id);
                let mut record = self.lock_record();
                record.last_error = Some(crate::supervisor::record::ProcessError {
                    kind: ErrorKind::GraceExceeded,
                    message: format!("termination did not complete within {grace:?}"),
                });
                warn!(?grace, "grace period exceeded, forcing terminated state");
            }
        }

        {
            let mut record = self.lock_record();
            self.transition(&mut record, ProcessState::Terminated, skip_cleanup);
        }
        self.queue.done(&self.id);

        if !skip_cleanup {
            if let Err(err) = self.syncer.sync_terminated(&self.cancel, &self.id, &config) {
                self.metrics.cleanup_error(&self.id);
                let mut record = self.lock_record();
                record.last_error = Some(crate::supervisor::record::ProcessError {
                    kind: ErrorKind::Cleanup,
                    message: err.to_string(),
                });
                error!(error = %err, "cleanup after termination failed");
            }
        }

        {
            let mut record = self.lock_record();
            self.transition(&mut record, ProcessState::Finished, skip_cleanup);
        }
    }

    /// Emits the transition metric and then moves the record, in that order,
    /// under the record lock: a snapshot can never observe a state whose
    /// metric sample has not been recorded.
    fn transition(&self, record: &mut MutexGuard<'_, ProcessRecord>, to: ProcessState, forced: bool) {
        let from = record.state;
        if from == to {
            return;
        }
        self.metrics.state_transition(&self.id, Some(from), to, forced);
        record.transition(to, self.clock.now());
    }

    fn lock_record(&self) -> MutexGuard<'_, ProcessRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::channel::{bounded_pub_sub, pub_sub, EventPublisher};
    use crate::supervisor::clock::SystemClock;
    use crate::supervisor::metrics::InMemoryMetrics;
    use crate::supervisor::update::{ProcessCategory, TerminateOptions};
    use crate::syncer::tests::MockSyncer;
    use crate::utils::thread_context::spawn_named;
    use std::thread::JoinHandle;
    use std::time::Instant;

    struct Harness {
        record: Arc<Mutex<ProcessRecord>>,
        inbox_tx: EventPublisher<ProcessUpdate>,
        ready_tx: EventPublisher<ReadySignal>,
        stop_tx: EventPublisher<CancellationMessage>,
        cancel: CancelContext,
        queue: Arc<WorkQueue>,
        metrics: Arc<InMemoryMetrics>,
        worker: Option<(Worker, EventConsumer<CancellationMessage>)>,
        join: Option<JoinHandle<()>>,
    }

    fn id() -> ProcessId {
        ProcessId::new("p1").unwrap()
    }

    fn config() -> ProcessConfig {
        ProcessConfig::new(ProcessCategory::Pattern)
    }

    /// Builds the worker without spawning it, so tests can preload the inbox
    /// and observe the drain-and-coalesce behavior deterministically.
    fn harness(syncer: MockSyncer, max_errors: u32) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let queue = Arc::new(WorkQueue::new(Arc::clone(&clock)));
        let record = Arc::new(Mutex::new(ProcessRecord::new(id(), config(), clock.now())));
        let metrics = Arc::new(InMemoryMetrics::new());
        let (inbox_tx, inbox_rx) = bounded_pub_sub(16);
        let (ready_tx, ready_rx) = pub_sub();
        let (stop_tx, stop_rx) = pub_sub();
        let cancel = CancelContext::new();

        let worker = Worker {
            id: id(),
            record: Arc::clone(&record),
            inbox: inbox_rx,
            ready: ready_rx,
            cancel: cancel.clone(),
            syncer: Arc::new(syncer),
            queue: Arc::clone(&queue),
            clock,
            backoff: BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 0.0),
            max_errors,
            degenerate_grace: Duration::from_millis(100),
            metrics: Arc::clone(&metrics) as Arc<dyn MetricsCollector>,
        };

        Harness {
            record,
            inbox_tx,
            ready_tx,
            stop_tx,
            cancel,
            queue,
            metrics,
            worker: Some((worker, stop_rx)),
            join: None,
        }
    }

    impl Harness {
        fn spawn(&mut self) {
            let (worker, stop_rx) = self.worker.take().expect("worker already spawned");
            self.join = Some(spawn_named("worker-under-test", move || {
                worker.run(stop_rx)
            }));
        }

        fn join(mut self) {
            self.join
                .take()
                .expect("worker not spawned")
                .join()
                .expect("worker panicked");
        }

        fn wait_until(&self, what: &str, within: Duration, predicate: impl Fn(&ProcessRecord) -> bool) {
            let deadline = Instant::now() + within;
            loop {
                {
                    let record = self.record.lock().unwrap();
                    if predicate(&record) {
                        return;
                    }
                    assert!(
                        Instant::now() < deadline,
                        "{what} not observed within {within:?}; state={} errors={} restarts={}",
                        record.state,
                        record.error_count,
                        record.restart_count,
                    );
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    #[test]
    fn create_then_terminate_walks_the_full_lifecycle() {
        let mut syncer = MockSyncer::new();
        syncer.expect_sync_process().returning(|_, _, _, _| Ok(()));
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 5);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();
        harness.wait_until("syncing and healthy", Duration::from_secs(2), |r| {
            r.state == ProcessState::Syncing && r.healthy
        });

        harness
            .inbox_tx
            .publish(ProcessUpdate::terminate(
                id(),
                config(),
                TerminateOptions::with_grace(Duration::from_secs(2)),
            ))
            .unwrap();

        let record = Arc::clone(&harness.record);
        let metrics = Arc::clone(&harness.metrics);
        harness.join();

        let record = record.lock().unwrap();
        assert_eq!(record.state, ProcessState::Finished);
        assert_eq!(record.error_count, 0);
        assert_eq!(record.restart_count, 0);

        let states: Vec<_> = metrics
            .transitions_for(&id())
            .into_iter()
            .map(|t| t.to)
            .collect();
        assert_eq!(
            states,
            vec![
                ProcessState::Syncing,
                ProcessState::Terminating,
                ProcessState::Terminated,
                ProcessState::Finished,
            ]
        );
    }

    #[test]
    fn transient_errors_reenqueue_with_backoff_then_recover() {
        let mut syncer = MockSyncer::new();
        let mut calls = 0;
        syncer.expect_sync_process().returning(move |_, _, _, _| {
            calls += 1;
            if calls <= 3 {
                Err(SyncError::Transient("backend offline".to_string()))
            } else {
                Ok(())
            }
        });
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 5);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();

        // Act as the dispatcher: each failed pass re-enqueues the key with
        // backoff; hand it back to the worker until it recovers.
        for attempt in 1..=3u32 {
            let (key, queued_attempt) = harness.queue.get().expect("queue open");
            assert_eq!(key, id());
            assert_eq!(queued_attempt, attempt);
            harness.queue.done(&key);
            harness
                .ready_tx
                .publish(ReadySignal {
                    attempt: queued_attempt,
                })
                .unwrap();
        }

        harness.wait_until("recovery", Duration::from_secs(2), |r| {
            r.healthy && r.error_count == 0 && r.restart_count == 3
        });
        assert_eq!(harness.metrics.restarts(), 3);

        harness.cancel.cancel();
        let _ = harness.stop_tx.publish(());
        harness.join();
    }

    #[test]
    fn circuit_breaker_trips_after_max_errors() {
        let calls_seen = Arc::new(Mutex::new(0u32));
        let calls_clone = Arc::clone(&calls_seen);
        let mut syncer = MockSyncer::new();
        syncer.expect_sync_process().returning(move |_, _, _, _| {
            *calls_clone.lock().unwrap() += 1;
            Err(SyncError::Transient("still broken".to_string()))
        });
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 3);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();

        // Feed back the two re-enqueues that precede the breaker trip.
        for _ in 0..2 {
            let (key, attempt) = harness.queue.get().expect("queue open");
            harness.queue.done(&key);
            harness.ready_tx.publish(ReadySignal { attempt }).unwrap();
        }

        let record = Arc::clone(&harness.record);
        harness.join();
        assert_eq!(*calls_seen.lock().unwrap(), 3);

        let record = record.lock().unwrap();
        assert_eq!(record.state, ProcessState::Finished);
        assert_eq!(
            record.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::CircuitBreakerTripped)
        );
    }

    #[test]
    fn terminal_sync_error_escalates_to_terminating() {
        let mut syncer = MockSyncer::new();
        syncer
            .expect_sync_process()
            .times(1)
            .returning(|_, _, _, _| Err(SyncError::Terminal("policy violation".to_string())));
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 5);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();

        let record = Arc::clone(&harness.record);
        let metrics = Arc::clone(&harness.metrics);
        harness.join();
        assert_eq!(record.lock().unwrap().state, ProcessState::Finished);
        assert_eq!(metrics.sync_errors(ErrorKind::TerminalSync), 1);
    }

    #[test]
    fn grace_exceeded_forces_terminated_at_the_deadline() {
        let mut syncer = MockSyncer::new();
        syncer.expect_sync_process().returning(|_, _, _, _| Ok(()));
        syncer.expect_sync_terminating().returning(|_, _, _, _, _| {
            // Ignores the context on purpose.
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        });
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 5);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();
        harness.wait_until("syncing", Duration::from_secs(2), |r| {
            r.state == ProcessState::Syncing
        });

        let started = Instant::now();
        harness
            .inbox_tx
            .publish(ProcessUpdate::terminate(
                id(),
                config(),
                TerminateOptions::with_grace(Duration::from_millis(100)),
            ))
            .unwrap();

        let metrics = Arc::clone(&harness.metrics);
        let record = Arc::clone(&harness.record);
        harness.join();
        let elapsed = started.elapsed();

        // The worker reached Finished without waiting out the 500ms sleep.
        assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
        assert_eq!(record.lock().unwrap().state, ProcessState::Finished);
        assert_eq!(metrics.grace_exceeded(), 1);
        assert!(metrics
            .transitions_for(&id())
            .iter()
            .any(|t| t.to == ProcessState::Terminated));
    }

    #[test]
    fn stop_message_takes_the_kill_fast_path() {
        let mut syncer = MockSyncer::new();
        syncer.expect_sync_process().returning(|_, _, _, _| Ok(()));
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        // Cleanup must be skipped on the fast path.
        syncer.expect_sync_terminated().times(0);

        let mut harness = harness(syncer, 5);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();
        harness.wait_until("syncing", Duration::from_secs(2), |r| {
            r.state == ProcessState::Syncing
        });

        harness.cancel.cancel();
        harness.stop_tx.publish(()).unwrap();

        let record = Arc::clone(&harness.record);
        let metrics = Arc::clone(&harness.metrics);
        harness.join();

        assert_eq!(record.lock().unwrap().state, ProcessState::Finished);
        let forced: Vec<_> = metrics
            .transitions_for(&id())
            .into_iter()
            .filter(|t| t.forced)
            .map(|t| t.to)
            .collect();
        assert_eq!(
            forced,
            vec![
                ProcessState::Terminating,
                ProcessState::Terminated,
                ProcessState::Finished,
            ]
        );
    }

    #[test]
    fn batched_updates_coalesce_and_stop_wins() {
        let mut syncer = MockSyncer::new();
        // The stop wins over the creates batched alongside it, so no
        // sync_process call may happen at all.
        syncer.expect_sync_process().times(0);
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 5);
        // Preload the inbox before the worker thread exists: the first recv
        // drains the whole batch.
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(id(), config()))
            .unwrap();
        harness
            .inbox_tx
            .publish(ProcessUpdate::update(
                id(),
                config().with_address("10.0.0.1:7000"),
            ))
            .unwrap();
        harness
            .inbox_tx
            .publish(ProcessUpdate::terminate(
                id(),
                config(),
                TerminateOptions::default(),
            ))
            .unwrap();

        harness.spawn();
        let record = Arc::clone(&harness.record);
        harness.join();
        assert_eq!(record.lock().unwrap().state, ProcessState::Finished);
    }

    #[test]
    fn ready_signal_alone_triggers_a_resync_with_last_config() {
        let mut syncer = MockSyncer::new();
        let seen_addresses = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&seen_addresses);
        syncer
            .expect_sync_process()
            .returning(move |_, _, _, config| {
                seen.lock().unwrap().push(config.address.clone());
                Ok(())
            });
        syncer
            .expect_sync_terminating()
            .returning(|_, _, _, _, _| Ok(()));
        syncer.expect_sync_terminated().returning(|_, _, _| Ok(()));

        let mut harness = harness(syncer, 5);
        harness.spawn();
        harness
            .inbox_tx
            .publish(ProcessUpdate::create(
                id(),
                config().with_address("10.0.0.2:7000"),
            ))
            .unwrap();
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();
        harness.wait_until("first sync", Duration::from_secs(2), |r| r.healthy);

        // A bare ready signal, as delivered by the resync ticker path; the
        // worker re-syncs with the last adopted config.
        harness.ready_tx.publish(ReadySignal { attempt: 1 }).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen_addresses.lock().unwrap().len() < 2 {
            assert!(Instant::now() < deadline, "resync not observed");
            std::thread::sleep(Duration::from_millis(5));
        }

        let seen = seen_addresses.lock().unwrap();
        assert_eq!(seen[0], Some("10.0.0.2:7000".to_string()));
        assert_eq!(seen[1], Some("10.0.0.2:7000".to_string()));

        drop(seen);
        harness.cancel.cancel();
        let _ = harness.stop_tx.publish(());
        harness.join();
    }
}
