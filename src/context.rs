use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative cancellation handle with an optional deadline.
///
/// Clones share the underlying cancellation flag: cancelling any clone
/// cancels them all. Deriving a context with [`CancelContext::with_deadline`]
/// also shares the flag, so cancelling a parent unblocks work running under
/// any derived context. Syncer implementations receive one of these for
/// every call and are expected to poll it (or block on it) between steps;
/// the supervisor has no other way to stop work inside user-provided code.
#[derive(Debug, Clone, Default)]
pub struct CancelContext {
    flag: Arc<(Mutex<bool>, Condvar)>,
    deadline: Option<Instant>,
}

impl CancelContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a context sharing this one's cancellation flag whose deadline
    /// is `deadline`, or the parent's if that one is sooner.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let effective = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline: Some(effective),
        }
    }

    /// Returns a context sharing this one's cancellation flag that expires
    /// `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets the cancellation flag and wakes every waiter.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.flag;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    /// True once the context has been cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        if self.deadline_expired() {
            return true;
        }
        let (lock, _) = &*self.flag;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True only if [`CancelContext::cancel`] was called, regardless of the
    /// deadline. Lets callers tell a grace expiry apart from a hard cancel.
    pub fn is_flag_cancelled(&self) -> bool {
        let (lock, _) = &*self.flag;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Blocks until the context is cancelled, its deadline passes, or
    /// `timeout` elapses. Returns true if the context is cancelled/expired.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        let wait_for = match self.remaining() {
            Some(remaining) => remaining.min(timeout),
            None => timeout,
        };

        let (lock, cvar) = &*self.flag;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if *guard {
            return true;
        }
        let (guard, _timeout_result) = cvar
            .wait_timeout_while(guard, wait_for, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        *guard || self.deadline_expired()
    }

    fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}
