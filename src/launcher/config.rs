use crate::launcher::defaults::{
    CONFIG_ENV_VAR_PREFIX, CONFIG_ENV_VAR_SEPARATOR, DEFAULT_ASSIGNMENT_POLL_INTERVAL,
    DEFAULT_CAPACITY, DEFAULT_CONTROLLER_REQUEST_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_LAUNCHER_ID, DEFAULT_LAUNCH_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
};
use crate::launcher::http_server::config::ServerConfig;
use crate::launcher::uptime::UptimeReportConfig;
use crate::supervisor::backoff::BackoffPolicy;
use crate::supervisor::SupervisorOptions;
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Top-level launcher configuration.
///
/// Loaded from an optional YAML file, with every key overridable through
/// `WL_`-prefixed environment variables (nested keys separated by `__`,
/// e.g. `WL_SERVER__PORT=9000`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub launcher_id: String,
    /// Soft cap on managed processes, advertised to the controller.
    pub capacity: u32,
    /// Remote controller connection; absent means standalone operation.
    pub controller: Option<ControllerConfig>,
    pub server: ServerConfig,
    pub supervisor: SupervisorOptions,
    #[serde(deserialize_with = "deserialize_duration")]
    pub launch_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_grace: Duration,
    pub manifest_path: Option<PathBuf>,
    pub uptime_report: UptimeReportConfig,
    pub log: LogConfig,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            launcher_id: DEFAULT_LAUNCHER_ID.to_string(),
            capacity: DEFAULT_CAPACITY,
            controller: None,
            server: ServerConfig::default(),
            supervisor: SupervisorOptions::default(),
            launch_timeout: DEFAULT_LAUNCH_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            manifest_path: None,
            uptime_report: UptimeReportConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ControllerConfig {
    pub endpoint: Url,
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    #[serde(
        default = "default_heartbeat_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub heartbeat_interval: Duration,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    #[serde(default)]
    pub registration_backoff: BackoffPolicy,
}

fn default_poll_interval() -> Duration {
    DEFAULT_ASSIGNMENT_POLL_INTERVAL
}
fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}
fn default_request_timeout() -> Duration {
    DEFAULT_CONTROLLER_REQUEST_TIMEOUT
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Suppress ANSI colors and target decoration; meant for test harnesses
    /// and log collectors that dislike interleaved escapes.
    pub plain: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loading configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Loads the configuration from `path` (when given) layered under `WL_*`
/// environment overrides. With neither file nor overrides, defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<LauncherConfig, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(CONFIG_ENV_VAR_PREFIX)
            .separator(CONFIG_ENV_VAR_SEPARATOR),
    );
    Ok(builder.build()?.try_deserialize()?)
}
