//! Wire shapes exchanged with the controller.
//!
//! Only the message shapes and their semantics are pinned; unknown fields
//! coming from newer controllers are ignored on deserialization.

use crate::supervisor::record::ProcessState;
use crate::supervisor::snapshot::{HealthSnapshot, ProcessSnapshot};
use crate::supervisor::update::{ProcessCategory, ProcessConfig, ProcessId};
use serde::{Deserialize, Serialize};

/// Empty acknowledgement; tolerates any body the controller sends back.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub launcher_id: String,
    /// Maximum number of processes this launcher is willing to manage.
    pub capacity: u32,
    /// Process categories this launcher can realize.
    pub capabilities: Vec<ProcessCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub launcher_id: String,
    pub processes: Vec<HeartbeatProcess>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatProcess {
    pub id: ProcessId,
    pub state: ProcessState,
    pub healthy: bool,
    pub uptime_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    pub restarts: u32,
    pub errors: u32,
}

impl From<&ProcessSnapshot> for HeartbeatProcess {
    fn from(snapshot: &ProcessSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            state: snapshot.state,
            healthy: snapshot.healthy,
            uptime_secs: snapshot.uptime_secs,
            // Resource details belong to the syncer; the supervisor does
            // not observe them.
            pid: None,
            memory_bytes: None,
            restarts: snapshot.restart_count,
            errors: snapshot.error_count,
        }
    }
}

impl HeartbeatRequest {
    pub fn from_snapshot(launcher_id: &str, snapshot: &HealthSnapshot) -> Self {
        Self {
            launcher_id: launcher_id.to_string(),
            processes: snapshot.processes.iter().map(Into::into).collect(),
        }
    }
}

/// An assignment pushed down by the controller: create or update the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub process_id: ProcessId,
    #[serde(rename = "type")]
    pub process_type: ProcessCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

impl Assignment {
    /// Folds the assignment fields into the supervisor's config shape.
    pub fn into_process_config(self) -> ProcessConfig {
        let mut config = ProcessConfig::new(self.process_type).with_payload(self.config);
        config.address = self.address;
        config
    }
}

/// A revocation pushed down by the controller: gracefully stop the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revocation {
    pub process_id: ProcessId,
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

fn default_grace_seconds() -> u64 {
    30
}

/// One page of pending work fetched from the controller.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentBatch {
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub revocations: Vec<Revocation>,
    /// Opaque resume position to pass on the next poll.
    #[serde(default)]
    pub cursor: u64,
}
