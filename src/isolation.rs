use crate::supervisor::error::UpdateError;
use crate::supervisor::record::ProcessState;
use crate::supervisor::snapshot::ProcessSnapshot;
use crate::supervisor::update::{ProcessConfig, ProcessId, ProcessIdError, ProcessUpdate};
use crate::supervisor::ProcessManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Policy mapping request metadata to the process key work runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// All callers share one process per pattern.
    #[default]
    None,
    /// One process per tenant namespace.
    Namespace,
    /// One process per user session.
    Session,
}

#[derive(Debug, Error, PartialEq)]
pub enum IsolationKeyError {
    #[error("isolation level '{0:?}' requires a namespace")]
    MissingNamespace(IsolationLevel),

    #[error("isolation level 'session' requires a session")]
    MissingSession,

    #[error("derived process key is invalid: {0}")]
    InvalidKey(#[from] ProcessIdError),
}

impl IsolationLevel {
    /// Derives the canonical process key for a request.
    pub fn process_key(
        &self,
        pattern: &str,
        namespace: Option<&str>,
        session: Option<&str>,
    ) -> Result<ProcessId, IsolationKeyError> {
        let key = match self {
            IsolationLevel::None => format!("shared:{pattern}"),
            IsolationLevel::Namespace => {
                let namespace = namespace
                    .filter(|s| !s.is_empty())
                    .ok_or(IsolationKeyError::MissingNamespace(*self))?;
                format!("ns:{namespace}:{pattern}")
            }
            IsolationLevel::Session => {
                let namespace = namespace
                    .filter(|s| !s.is_empty())
                    .ok_or(IsolationKeyError::MissingNamespace(*self))?;
                let session = session
                    .filter(|s| !s.is_empty())
                    .ok_or(IsolationKeyError::MissingSession)?;
                format!("session:{namespace}:{session}:{pattern}")
            }
        };
        Ok(ProcessId::new(&key)?)
    }

    /// Classifies an existing key by its prefix; `None` for keys that were
    /// not derived by this layer.
    pub fn classify(key: &ProcessId) -> Option<IsolationLevel> {
        if key.starts_with("shared:") {
            Some(IsolationLevel::None)
        } else if key.starts_with("ns:") {
            Some(IsolationLevel::Namespace)
        } else if key.starts_with("session:") {
            Some(IsolationLevel::Session)
        } else {
            None
        }
    }
}

/// A launch request after the launcher resolved pattern template and config.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub pattern: String,
    pub isolation: IsolationLevel,
    pub namespace: Option<String>,
    pub session: Option<String>,
    pub config: ProcessConfig,
}

/// Contact information returned to a launch caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchedProcess {
    pub process_id: ProcessId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub state: ProcessState,
    pub healthy: bool,
}

impl From<&ProcessSnapshot> for LaunchedProcess {
    fn from(snapshot: &ProcessSnapshot) -> Self {
        Self {
            process_id: snapshot.id.clone(),
            address: snapshot.address.clone(),
            state: snapshot.state,
            healthy: snapshot.healthy,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LaunchError {
    #[error(transparent)]
    Key(#[from] IsolationKeyError),

    #[error(transparent)]
    Supervisor(#[from] UpdateError),

    /// Transient: the process did not become healthy within the timeout.
    /// The worker keeps trying in the background; callers may retry.
    #[error("process '{id}' was not ready within {timeout:?}")]
    Timeout { id: ProcessId, timeout: Duration },
}

/// Multiplexes one supervisor across tenants and sessions: derives stable
/// process keys from request metadata and delegates to the process manager,
/// reusing a live process when one exists.
pub struct IsolationManager {
    supervisor: Arc<ProcessManager>,
    launch_timeout: Duration,
}

impl IsolationManager {
    pub fn new(supervisor: Arc<ProcessManager>) -> Self {
        Self {
            supervisor,
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }

    pub fn with_launch_timeout(self, launch_timeout: Duration) -> Self {
        Self {
            launch_timeout,
            ..self
        }
    }

    /// Launches the pattern under its canonical key, or reuses the running
    /// process for that key.
    ///
    /// Waits until the worker reaches `Syncing` with a good health report
    /// (the first successful sync), bounded by the launch timeout; on
    /// timeout a transient error is returned while the worker keeps
    /// converging in the background.
    pub fn launch(&self, spec: LaunchSpec) -> Result<LaunchedProcess, LaunchError> {
        let key = spec.isolation.process_key(
            &spec.pattern,
            spec.namespace.as_deref(),
            spec.session.as_deref(),
        )?;

        let deadline = Instant::now() + self.launch_timeout;
        let mut requested = false;
        loop {
            let snapshot = self.supervisor.health();
            match snapshot.process(&key) {
                Some(process)
                    if process.state == ProcessState::Syncing && process.healthy =>
                {
                    debug!(id = %key, created = requested, "pattern process ready");
                    return Ok(process.into());
                }
                Some(process) if process.state == ProcessState::Finished && !requested => {
                    self.request(&key, &spec, &mut requested, deadline)?;
                }
                Some(_converging) => {}
                None => self.request(&key, &spec, &mut requested, deadline)?,
            }

            if Instant::now() >= deadline {
                return Err(LaunchError::Timeout {
                    id: key,
                    timeout: self.launch_timeout,
                });
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }

    fn request(
        &self,
        key: &ProcessId,
        spec: &LaunchSpec,
        requested: &mut bool,
        deadline: Instant,
    ) -> Result<(), LaunchError> {
        let update = ProcessUpdate::create(key.clone(), spec.config.clone());
        match self.supervisor.update_process(update) {
            Ok(()) => {
                *requested = true;
                Ok(())
            }
            // Busy is transient: keep polling until the launch deadline.
            Err(UpdateError::Busy(_, _)) if Instant::now() < deadline => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
