use crate::supervisor::update::ProcessId;
use std::time::Duration;
use thiserror::Error;

/// Failure of an [`update_process`](crate::supervisor::ProcessManager::update_process) call.
///
/// Worker-side failures are never surfaced here: the call returns as soon as
/// the update is enqueued, and errors show up through snapshots, metrics and
/// the state machine instead.
#[derive(Debug, Error, PartialEq)]
pub enum UpdateError {
    /// The worker inbox stayed full for the whole enqueue timeout; the
    /// caller may retry.
    #[error("inbox for process '{0}' stayed full for {1:?}")]
    Busy(ProcessId, Duration),

    /// A stop update referenced a process this supervisor does not know.
    #[error("process '{0}' not found")]
    NotFound(ProcessId),

    /// The supervisor is shutting down and accepts no further updates.
    #[error("supervisor is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Error, PartialEq)]
pub enum ShutdownError {
    #[error("{stragglers} worker(s) still running when the shutdown deadline elapsed")]
    DeadlineExceeded { stragglers: usize },
}
