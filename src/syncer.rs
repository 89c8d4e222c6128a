use crate::context::CancelContext;
use crate::event::channel::EventPublisher;
use crate::supervisor::update::{ProcessConfig, ProcessId, UpdateType};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub mod inert;

/// Failure reported by a syncer call.
///
/// Transient failures are retried with backoff; terminal ones make the
/// supervisor walk the process to `Terminating` without further retries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error("transient sync failure: {0}")]
    Transient(String),

    #[error("terminal sync failure: {0}")]
    Terminal(String),
}

impl SyncError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncError::Terminal(_))
    }
}

/// Receives periodic progress text while a process shuts down.
///
/// Every report is logged; a publisher can be attached so an interested
/// observer (tests, the status endpoint) sees the raw messages too.
pub struct ProgressSink {
    id: ProcessId,
    publisher: Option<EventPublisher<String>>,
}

impl ProgressSink {
    pub fn new(id: ProcessId) -> Self {
        Self {
            id,
            publisher: None,
        }
    }

    pub fn with_publisher(self, publisher: EventPublisher<String>) -> Self {
        Self {
            publisher: Some(publisher),
            ..self
        }
    }

    pub fn report(&self, message: &str) {
        debug!(id = %self.id, message, "termination progress");
        if let Some(publisher) = &self.publisher {
            let _ = publisher.publish(message.to_string());
        }
    }
}

/// The contract the supervisor invokes to realize desired state for one
/// managed process. Implementations start OS children, initialize in-process
/// backends, or bind logical roles; the supervisor does not care which.
///
/// All three methods block; concurrency comes from the supervisor running
/// one worker per process. Every call receives a [`CancelContext`] carrying
/// the relevant deadline, and implementations must check it between steps:
/// cooperative cancellation is the only way the supervisor can stop them.
pub trait Syncer: Send + Sync + 'static {
    /// Brings the running state of the process in line with `config`.
    /// Called for creates, updates and periodic resyncs alike.
    fn sync_process(
        &self,
        ctx: &CancelContext,
        update_type: UpdateType,
        id: &ProcessId,
        config: &ProcessConfig,
    ) -> Result<(), SyncError>;

    /// Gracefully stops the process within `grace_period`; `ctx` carries the
    /// matching deadline. Implementations report progress through `progress`
    /// for observability.
    fn sync_terminating(
        &self,
        ctx: &CancelContext,
        id: &ProcessId,
        config: &ProcessConfig,
        grace_period: Duration,
        progress: &ProgressSink,
    ) -> Result<(), SyncError>;

    /// Releases whatever the process held (handles, temp files, child
    /// descriptors) once it has stopped.
    fn sync_terminated(
        &self,
        ctx: &CancelContext,
        id: &ProcessId,
        config: &ProcessConfig,
    ) -> Result<(), SyncError>;
}
