use crate::supervisor::clock::Clock;
use crate::supervisor::update::ProcessId;
use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Deduplicated, delay-capable queue of process keys awaiting reconciliation.
///
/// A key holds at most one pending item (waiting for its ready time) and at
/// most one in-flight token (handed out via [`WorkQueue::get`] and released
/// with [`WorkQueue::done`]); an immediate re-add while in flight marks the
/// key dirty instead, re-queueing it the moment the in-flight work
/// completes. Coalescing bounds the queue by the number of distinct managed
/// processes.
pub struct WorkQueue {
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    ready: Condvar,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingItem>,
    in_flight: HashSet<ProcessId>,
    dirty: HashSet<ProcessId>,
    closed: bool,
    seq: u64,
}

struct PendingItem {
    key: ProcessId,
    ready_at: std::time::Instant,
    attempt: u32,
    seq: u64,
}

impl WorkQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    /// Enqueues `key` ready immediately with attempt 1.
    ///
    /// If the key is in flight it is marked dirty instead, so the worker
    /// re-syncs once more after the current pass; if it is already pending
    /// no duplicate is created.
    pub fn add(&self, key: &ProcessId) {
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        if state.in_flight.contains(key) {
            state.dirty.insert(key.clone());
            return;
        }
        Self::coalesce(&mut state, key, self.clock.now(), 1);
        // The new or moved item may now be the earliest; wake a waiter.
        self.ready.notify_one();
    }

    /// Enqueues `key` ready after `delay` with the given attempt number.
    ///
    /// When a pending item for the same key already exists, the earlier
    /// ready time and the higher attempt win. Unlike [`WorkQueue::add`],
    /// this schedules even while the key is in flight: it is how a worker
    /// books its own delayed retry before releasing the key.
    pub fn add_after(&self, key: &ProcessId, delay: Duration, attempt: u32) {
        let ready_at = self.clock.now() + delay;
        let mut state = self.lock_state();
        if state.closed {
            return;
        }
        Self::coalesce(&mut state, key, ready_at, attempt);
        self.ready.notify_one();
    }

    fn coalesce(
        state: &mut QueueState,
        key: &ProcessId,
        ready_at: std::time::Instant,
        attempt: u32,
    ) {
        if let Some(item) = state.pending.iter_mut().find(|item| &item.key == key) {
            item.ready_at = item.ready_at.min(ready_at);
            item.attempt = item.attempt.max(attempt);
        } else {
            let seq = state.seq;
            state.seq += 1;
            state.pending.push(PendingItem {
                key: key.clone(),
                ready_at,
                attempt,
                seq,
            });
        }
    }

    /// Blocks until some key's ready time has arrived, marks it in flight
    /// and returns it with its attempt number. Returns `None` once the
    /// queue has been shut down.
    pub fn get(&self) -> Option<(ProcessId, u32)> {
        let mut state = self.lock_state();
        loop {
            if state.closed {
                return None;
            }
            let now = self.clock.now();

            // Earliest ready item wins; insertion order breaks ties. Items
            // whose key is currently in flight stay put until `done`
            // releases them.
            let best = state
                .pending
                .iter()
                .enumerate()
                .filter(|(_, item)| item.ready_at <= now && !state.in_flight.contains(&item.key))
                .min_by_key(|(_, item)| (item.ready_at, item.seq))
                .map(|(idx, _)| idx);

            if let Some(idx) = best {
                let item = state.pending.swap_remove(idx);
                state.in_flight.insert(item.key.clone());
                return Some((item.key, item.attempt));
            }

            let next_ready = state
                .pending
                .iter()
                .filter(|item| !state.in_flight.contains(&item.key))
                .map(|item| item.ready_at)
                .min();
            state = match next_ready {
                Some(ready_at) => {
                    let wait = ready_at.saturating_duration_since(now);
                    self.ready
                        .wait_timeout(state, wait)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => self.ready.wait(state).unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    /// Declares the in-flight work for `key` complete. A no-op for keys that
    /// are not in flight. If the key went dirty while in flight it is
    /// re-enqueued ready immediately with attempt 1.
    pub fn done(&self, key: &ProcessId) {
        let mut state = self.lock_state();
        if !state.in_flight.remove(key) {
            return;
        }
        if state.dirty.remove(key) && !state.closed {
            Self::coalesce(&mut state, key, self.clock.now(), 1);
            self.ready.notify_one();
        } else if state.pending.iter().any(|item| &item.key == key) {
            // A delayed retry for this key was parked behind the in-flight
            // marker; a waiter may now hand it out.
            self.ready.notify_one();
        }
    }

    /// Drains pending work and unblocks every waiter; subsequent `get` calls
    /// return `None` and subsequent adds are ignored.
    pub fn shutdown(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        state.pending.clear();
        state.dirty.clear();
        self.ready.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
