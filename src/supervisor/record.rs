use crate::supervisor::update::{ProcessConfig, ProcessId};
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};
use tracing::warn;

/// Lifecycle state of a managed process.
///
/// Legal transitions:
/// `Starting -> Syncing`, `Syncing -> Syncing` (resync, not a transition),
/// any non-terminal state `-> Terminating`, `Terminating -> Terminated`,
/// `Terminated -> Finished`. `Finished` is terminal; nothing leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Syncing,
    Terminating,
    Terminated,
    Finished,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Finished)
    }

    /// True while the process is still meant to be running (resync targets).
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Syncing)
    }

    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            ProcessState::Terminating | ProcessState::Terminated | ProcessState::Finished
        )
    }

    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        use ProcessState::*;
        match (self, next) {
            (Starting, Syncing) => true,
            (Starting | Syncing, Terminating) => true,
            (Terminating, Terminated) => true,
            (Terminated, Finished) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Syncing => "syncing",
            ProcessState::Terminating => "terminating",
            ProcessState::Terminated => "terminated",
            ProcessState::Finished => "finished",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classification of the most recent failure observed for a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientSync,
    TerminalSync,
    CircuitBreakerTripped,
    GraceExceeded,
    Cleanup,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientSync => "transient_sync",
            ErrorKind::TerminalSync => "terminal_sync",
            ErrorKind::CircuitBreakerTripped => "circuit_breaker_tripped",
            ErrorKind::GraceExceeded => "grace_exceeded",
            ErrorKind::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessError {
    pub kind: ErrorKind,
    pub message: String,
}

/// The supervisor-owned record for one managed process.
///
/// All mutation is funneled through the owning worker; every other component
/// observes the record via short-lived locked reads taken by the snapshot
/// API.
#[derive(Debug)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub state: ProcessState,
    pub config: ProcessConfig,
    pub created_at: Instant,
    pub created_wall: SystemTime,
    pub last_sync_at: Option<Instant>,
    pub last_sync_wall: Option<SystemTime>,
    pub state_changed_at: Instant,
    pub error_count: u32,
    pub restart_count: u32,
    pub last_error: Option<ProcessError>,
    pub healthy: bool,
}

impl ProcessRecord {
    pub fn new(id: ProcessId, config: ProcessConfig, now: Instant) -> Self {
        Self {
            id,
            state: ProcessState::Starting,
            config,
            created_at: now,
            created_wall: SystemTime::now(),
            last_sync_at: None,
            last_sync_wall: None,
            state_changed_at: now,
            error_count: 0,
            restart_count: 0,
            last_error: None,
            healthy: false,
        }
    }

    /// Moves the record to `next`, enforcing the transition table.
    ///
    /// An illegal transition is a supervisor bug: it trips a debug assertion
    /// under test and is logged (but honored) in release so that an external
    /// stop request can never wedge a process in a dead state.
    pub fn transition(&mut self, next: ProcessState, now: Instant) -> ProcessState {
        let from = self.state;
        if !from.can_transition_to(next) {
            debug_assert!(
                false,
                "illegal process state transition {from} -> {next} for '{}'",
                self.id
            );
            warn!(id = %self.id, %from, to = %next, "illegal process state transition");
        }
        self.state = next;
        self.state_changed_at = now;
        from
    }

    pub fn record_sync_success(&mut self, now: Instant) {
        self.healthy = true;
        self.error_count = 0;
        self.last_error = None;
        self.last_sync_at = Some(now);
        self.last_sync_wall = Some(SystemTime::now());
    }

    pub fn record_sync_error(&mut self, kind: ErrorKind, message: String) {
        self.healthy = false;
        self.error_count += 1;
        self.last_error = Some(ProcessError { kind, message });
    }
}
