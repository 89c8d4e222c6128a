// Not every test binary exercises every scripting knob.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use workload_launcher::context::CancelContext;
use workload_launcher::supervisor::update::{ProcessConfig, ProcessId, UpdateType};
use workload_launcher::syncer::{ProgressSink, SyncError, Syncer};

/// Syncer whose behavior is scripted by the test: a queue of outcomes for
/// `sync_process` (falling back to a default once drained) and a fixed
/// delay inside `sync_terminating`.
pub struct ScriptedSyncer {
    plan: Mutex<VecDeque<Result<(), SyncError>>>,
    default_result: Result<(), SyncError>,
    sync_delay: Duration,
    terminating_delay: Duration,
    honor_cancellation: bool,
    sync_calls: Mutex<Vec<Instant>>,
    terminating_calls: Mutex<u32>,
    terminated_calls: Mutex<u32>,
}

impl Default for ScriptedSyncer {
    fn default() -> Self {
        Self {
            plan: Mutex::new(VecDeque::new()),
            default_result: Ok(()),
            sync_delay: Duration::ZERO,
            terminating_delay: Duration::ZERO,
            honor_cancellation: true,
            sync_calls: Mutex::new(Vec::new()),
            terminating_calls: Mutex::new(0),
            terminated_calls: Mutex::new(0),
        }
    }
}

impl ScriptedSyncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for successive `sync_process` calls.
    pub fn with_sync_results(self, results: Vec<Result<(), SyncError>>) -> Self {
        Self {
            plan: Mutex::new(results.into()),
            ..self
        }
    }

    /// Outcome used once the scripted queue is drained.
    pub fn with_default_result(self, default_result: Result<(), SyncError>) -> Self {
        Self {
            default_result,
            ..self
        }
    }

    /// Sleep inside every `sync_process` call before returning; models a
    /// syncer wedged on slow I/O.
    pub fn with_sync_delay(self, sync_delay: Duration) -> Self {
        Self { sync_delay, ..self }
    }

    /// Sleep inside `sync_terminating` before returning.
    pub fn with_terminating_delay(self, terminating_delay: Duration) -> Self {
        Self {
            terminating_delay,
            ..self
        }
    }

    /// When false, `sync_terminating` sleeps the full delay no matter what
    /// the context says, like an uncooperative implementation would.
    pub fn with_honor_cancellation(self, honor_cancellation: bool) -> Self {
        Self {
            honor_cancellation,
            ..self
        }
    }

    pub fn sync_call_times(&self) -> Vec<Instant> {
        self.sync_calls.lock().unwrap().clone()
    }

    pub fn sync_call_count(&self) -> usize {
        self.sync_calls.lock().unwrap().len()
    }

    pub fn terminating_call_count(&self) -> u32 {
        *self.terminating_calls.lock().unwrap()
    }

    pub fn terminated_call_count(&self) -> u32 {
        *self.terminated_calls.lock().unwrap()
    }
}

impl Syncer for ScriptedSyncer {
    fn sync_process(
        &self,
        _ctx: &CancelContext,
        _update_type: UpdateType,
        _id: &ProcessId,
        _config: &ProcessConfig,
    ) -> Result<(), SyncError> {
        self.sync_calls.lock().unwrap().push(Instant::now());
        if self.sync_delay > Duration::ZERO {
            std::thread::sleep(self.sync_delay);
        }
        self.plan
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_result.clone())
    }

    fn sync_terminating(
        &self,
        ctx: &CancelContext,
        _id: &ProcessId,
        _config: &ProcessConfig,
        _grace_period: Duration,
        progress: &ProgressSink,
    ) -> Result<(), SyncError> {
        *self.terminating_calls.lock().unwrap() += 1;
        progress.report("stopping");
        if self.terminating_delay > Duration::ZERO {
            if self.honor_cancellation {
                let _ = ctx.wait_cancelled(self.terminating_delay);
            } else {
                std::thread::sleep(self.terminating_delay);
            }
        }
        Ok(())
    }

    fn sync_terminated(
        &self,
        _ctx: &CancelContext,
        _id: &ProcessId,
        _config: &ProcessConfig,
    ) -> Result<(), SyncError> {
        *self.terminated_calls.lock().unwrap() += 1;
        Ok(())
    }
}
