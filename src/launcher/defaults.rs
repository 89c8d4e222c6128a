use crate::supervisor::update::ProcessCategory;
use std::time::Duration;

pub const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix for environment-variable overrides of the configuration file
/// (e.g. `WL_CAPACITY`, `WL_SERVER__PORT`).
pub const CONFIG_ENV_VAR_PREFIX: &str = "WL";
/// Separator between nested keys in environment overrides.
pub const CONFIG_ENV_VAR_SEPARATOR: &str = "__";

pub const DEFAULT_LAUNCHER_ID: &str = "workload-launcher";
pub const DEFAULT_CAPACITY: u32 = 64;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_ASSIGNMENT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CONTROLLER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Process categories this launcher can realize, advertised at registration.
pub fn default_capabilities() -> Vec<ProcessCategory> {
    vec![
        ProcessCategory::Pattern,
        ProcessCategory::Proxy,
        ProcessCategory::Backend,
        ProcessCategory::Utility,
    ]
}

// Exit codes of the launcher binary.
pub const EXIT_OK: i32 = 0;
pub const EXIT_MISCONFIGURED: i32 = 1;
pub const EXIT_SHUTDOWN_TIMEOUT: i32 = 2;
