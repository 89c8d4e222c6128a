use crate::controller::status::{ControllerStatus, ControllerStatusCell};
use crate::isolation::{IsolationLevel, IsolationManager, LaunchError, LaunchSpec, LaunchedProcess};
use crate::launcher::defaults::LAUNCHER_VERSION;
use crate::launcher::manifest::Manifest;
use crate::supervisor::error::UpdateError;
use crate::supervisor::record::ProcessState;
use crate::supervisor::snapshot::ProcessSnapshot;
use crate::supervisor::update::{ProcessCategory, ProcessConfig, ProcessId, TerminateOptions};
use crate::supervisor::ProcessManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Client-facing launch request, as carried by the network surface.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LaunchPatternRequest {
    pub pattern: String,
    #[serde(default)]
    pub isolation_level: Option<IsolationLevel>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub category: Option<ProcessCategory>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub config: Option<serde_yaml::Value>,
}

#[derive(Debug, Error)]
pub enum LaunchPatternError {
    #[error("pattern must not be empty")]
    EmptyPattern,

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Filter for process listings; absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessFilter {
    #[serde(default)]
    pub state: Option<ProcessState>,
    #[serde(default)]
    pub category: Option<ProcessCategory>,
}

impl ProcessFilter {
    fn matches(&self, process: &ProcessSnapshot) -> bool {
        self.state.map(|s| process.state == s).unwrap_or(true)
            && self.category.map(|c| process.category == c).unwrap_or(true)
    }
}

/// Count of processes per isolation level, derived from the key prefixes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IsolationDistribution {
    pub none: usize,
    pub namespace: usize,
    pub session: usize,
    /// Keys assigned directly by the controller, not derived by isolation.
    pub other: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LauncherHealth {
    pub total_processes: usize,
    pub running_processes: usize,
    pub failed_processes: usize,
    pub isolation_distribution: IsolationDistribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessSnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LauncherInfo {
    pub id: String,
    pub version: &'static str,
    pub uptime_secs: u64,
}

/// Everything the status endpoint shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub launcher: LauncherInfo,
    pub controller: ControllerStatus,
    pub processes: Vec<ProcessSnapshot>,
}

/// The in-process surface behind the network facade: every RPC handler and
/// embedding caller goes through here.
pub struct LauncherFacade {
    launcher_id: String,
    supervisor: Arc<ProcessManager>,
    isolation: IsolationManager,
    manifest: Manifest,
    controller_status: Arc<ControllerStatusCell>,
    started_at: SystemTime,
}

impl LauncherFacade {
    pub fn new(
        launcher_id: String,
        supervisor: Arc<ProcessManager>,
        isolation: IsolationManager,
        manifest: Manifest,
        controller_status: Arc<ControllerStatusCell>,
    ) -> Self {
        Self {
            launcher_id,
            supervisor,
            isolation,
            manifest,
            controller_status,
            started_at: SystemTime::now(),
        }
    }

    /// Launches a pattern (or reuses the process already running under its
    /// canonical key). The manifest template for the pattern, when present,
    /// supplies defaults that the request can override.
    pub fn launch_pattern(
        &self,
        request: LaunchPatternRequest,
    ) -> Result<LaunchedProcess, LaunchPatternError> {
        if request.pattern.is_empty() {
            return Err(LaunchPatternError::EmptyPattern);
        }

        let template = self.manifest.template(&request.pattern);
        let isolation = request
            .isolation_level
            .or_else(|| template.map(|t| t.isolation_level))
            .unwrap_or_default();

        let mut config = template
            .map(|t| t.process_config())
            .unwrap_or_else(|| {
                ProcessConfig::new(request.category.unwrap_or(ProcessCategory::Pattern))
            });
        if let Some(category) = request.category {
            config.category = category;
        }
        if let Some(address) = request.address.clone() {
            config.address = Some(address);
        }
        if let Some(payload) = request.config.clone() {
            config.payload = payload;
        }

        let spec = LaunchSpec {
            pattern: request.pattern,
            isolation,
            namespace: request.namespace,
            session: request.session,
            config,
        };
        Ok(self.isolation.launch(spec)?)
    }

    /// Gracefully terminates one process; unknown keys surface `NotFound`.
    pub fn terminate_pattern(
        &self,
        id: &ProcessId,
        grace: Duration,
    ) -> Result<(), UpdateError> {
        self.supervisor
            .terminate(id, TerminateOptions::with_grace(grace))
    }

    pub fn list_processes(&self, filter: &ProcessFilter) -> Vec<ProcessSnapshot> {
        self.supervisor
            .health()
            .processes
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect()
    }

    pub fn health(&self, include_processes: bool) -> LauncherHealth {
        let snapshot = self.supervisor.health();
        let mut distribution = IsolationDistribution::default();
        for process in &snapshot.processes {
            match IsolationLevel::classify(&process.id) {
                Some(IsolationLevel::None) => distribution.none += 1,
                Some(IsolationLevel::Namespace) => distribution.namespace += 1,
                Some(IsolationLevel::Session) => distribution.session += 1,
                None => distribution.other += 1,
            }
        }
        LauncherHealth {
            total_processes: snapshot.total_processes,
            running_processes: snapshot.running_processes,
            failed_processes: snapshot.failed_processes,
            isolation_distribution: distribution,
            processes: include_processes.then_some(snapshot.processes),
        }
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            launcher: LauncherInfo {
                id: self.launcher_id.clone(),
                version: LAUNCHER_VERSION,
                uptime_secs: self
                    .started_at
                    .elapsed()
                    .unwrap_or_default()
                    .as_secs(),
            },
            controller: self.controller_status.snapshot(),
            processes: self.supervisor.health().processes,
        }
    }
}
