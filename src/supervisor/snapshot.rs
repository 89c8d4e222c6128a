use crate::supervisor::record::{ProcessError, ProcessRecord, ProcessState};
use crate::supervisor::update::{ProcessCategory, ProcessId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Point-in-time view of one managed process, detached from the live record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub id: ProcessId,
    pub state: ProcessState,
    pub healthy: bool,
    pub category: ProcessCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Seconds since the record was created.
    pub uptime_secs: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ProcessError>,
}

impl ProcessSnapshot {
    pub(crate) fn from_record(record: &ProcessRecord, now: Instant) -> Self {
        Self {
            id: record.id.clone(),
            state: record.state,
            healthy: record.healthy,
            category: record.config.category,
            address: record.config.address.clone(),
            uptime_secs: now.saturating_duration_since(record.created_at).as_secs(),
            created_at: record.created_wall.into(),
            last_sync_at: record.last_sync_wall.map(Into::into),
            error_count: record.error_count,
            restart_count: record.restart_count,
            last_error: record.last_error.clone(),
        }
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_secs(self.uptime_secs)
    }
}

/// Aggregate view over every known process plus per-process details.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub total_processes: usize,
    /// Processes in `Syncing` whose last observed health was good.
    pub running_processes: usize,
    /// Processes carrying an error and currently unhealthy.
    pub failed_processes: usize,
    pub counts_by_state: HashMap<ProcessState, usize>,
    pub processes: Vec<ProcessSnapshot>,
}

impl HealthSnapshot {
    pub(crate) fn from_snapshots(processes: Vec<ProcessSnapshot>) -> Self {
        let mut counts_by_state: HashMap<ProcessState, usize> = HashMap::new();
        let mut running = 0;
        let mut failed = 0;
        for process in &processes {
            *counts_by_state.entry(process.state).or_insert(0) += 1;
            if process.state == ProcessState::Syncing && process.healthy {
                running += 1;
            }
            if !process.healthy && process.last_error.is_some() {
                failed += 1;
            }
        }
        Self {
            total_processes: processes.len(),
            running_processes: running,
            failed_processes: failed,
            counts_by_state,
            processes,
        }
    }

    pub fn process(&self, id: &ProcessId) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| &p.id == id)
    }
}
