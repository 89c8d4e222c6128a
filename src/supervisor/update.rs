use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;
use std::time::Duration;
use thiserror::Error;

const PROCESS_ID_MAX_LENGTH: usize = 200;

/// Default grace period granted to a terminating process.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Hash, Eq, PartialOrd, Ord)]
#[serde(try_from = "String")]
/// ProcessID is the unique identifier of a managed process within one
/// supervisor instance. Identity is the key alone; no numeric ids exist and
/// keys are never reused while a record for them is live.
///
/// Keys either come straight from the controller or are derived by the
/// isolation layer (`shared:...`, `ns:...`, `session:...`), so colons and
/// dots are allowed on top of the usual label characters.
pub struct ProcessId(String);

#[derive(Error, Debug, PartialEq)]
pub enum ProcessIdError {
    #[error(
        "process id must be non-empty, contain at most {PROCESS_ID_MAX_LENGTH} characters and \
         consist of alphanumerics, '-', '_', '.' or ':'"
    )]
    InvalidFormat,
}

impl ProcessId {
    pub fn new(s: &str) -> Result<Self, ProcessIdError> {
        Self::try_from(s.to_string())
    }

    pub fn get(&self) -> String {
        String::from(&self.0)
    }

    fn is_valid_format(s: &str) -> bool {
        !s.is_empty()
            && s.len() <= PROCESS_ID_MAX_LENGTH
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    }
}

impl TryFrom<String> for ProcessId {
    type Error = ProcessIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if ProcessId::is_valid_format(&s) {
            Ok(ProcessId(s))
        } else {
            Err(ProcessIdError::InvalidFormat)
        }
    }
}

impl Deref for ProcessId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

/// Category of a managed process. One variant per process kind the launcher
/// advertises as a capability; the supervisor itself never branches on it.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessCategory {
    Pattern,
    Proxy,
    Backend,
    Utility,
}

impl Display for ProcessCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessCategory::Pattern => "pattern",
            ProcessCategory::Proxy => "proxy",
            ProcessCategory::Backend => "backend",
            ProcessCategory::Utility => "utility",
        };
        write!(f, "{s}")
    }
}

/// Configuration handed to the syncer verbatim.
///
/// The payload is deliberately opaque to the supervisor: it is carried, never
/// introspected. The launcher reads `category` (capability checks) and
/// `address` (launch replies); everything else is the syncer's business.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ProcessConfig {
    pub category: ProcessCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub payload: serde_yaml::Value,
}

impl ProcessConfig {
    pub fn new(category: ProcessCategory) -> Self {
        Self {
            category,
            address: None,
            payload: serde_yaml::Value::Null,
        }
    }

    pub fn with_address(self, address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..self
        }
    }

    pub fn with_payload(self, payload: serde_yaml::Value) -> Self {
        Self { payload, ..self }
    }
}

/// Kind of change requested for a managed process.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Create,
    Update,
    Terminate,
    Kill,
}

impl UpdateType {
    /// True for the update kinds that ask the process to stop.
    pub fn is_stop(&self) -> bool {
        matches!(self, UpdateType::Terminate | UpdateType::Kill)
    }
}

/// Options accompanying a terminate request.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct TerminateOptions {
    pub grace_period: Duration,
}

impl TerminateOptions {
    pub fn with_grace(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Zero grace: stop immediately.
    pub fn kill() -> Self {
        Self {
            grace_period: Duration::ZERO,
        }
    }
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// A single change request for one managed process, as delivered to the
/// supervisor and forwarded to the owning worker's inbox.
#[derive(Debug, PartialEq, Clone)]
pub struct ProcessUpdate {
    pub id: ProcessId,
    pub update_type: UpdateType,
    pub config: ProcessConfig,
    pub terminate_options: Option<TerminateOptions>,
}

impl ProcessUpdate {
    pub fn create(id: ProcessId, config: ProcessConfig) -> Self {
        Self {
            id,
            update_type: UpdateType::Create,
            config,
            terminate_options: None,
        }
    }

    pub fn update(id: ProcessId, config: ProcessConfig) -> Self {
        Self {
            id,
            update_type: UpdateType::Update,
            config,
            terminate_options: None,
        }
    }

    pub fn terminate(id: ProcessId, config: ProcessConfig, options: TerminateOptions) -> Self {
        let update_type = if options.grace_period.is_zero() {
            UpdateType::Kill
        } else {
            UpdateType::Terminate
        };
        Self {
            id,
            update_type,
            config,
            terminate_options: Some(options),
        }
    }

    /// Grace period for stop updates, falling back to the default.
    pub fn grace_period(&self) -> Duration {
        match self.update_type {
            UpdateType::Kill => Duration::ZERO,
            _ => self
                .terminate_options
                .map(|opts| opts.grace_period)
                .unwrap_or(DEFAULT_GRACE_PERIOD),
        }
    }
}
