use crate::controller::client::ControllerError;
use crate::launcher::config::ConfigError;
use crate::launcher::defaults::{EXIT_MISCONFIGURED, EXIT_OK, EXIT_SHUTDOWN_TIMEOUT};
use crate::launcher::http_server::StatusServerError;
use crate::launcher::manifest::ManifestError;
use crate::supervisor::error::ShutdownError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error(transparent)]
    Server(#[from] StatusServerError),

    #[error("installing the termination signal handler: {0}")]
    SignalHandler(String),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

impl LauncherError {
    /// Exit code contract of the launcher binary: 0 clean shutdown, 1 fatal
    /// misconfiguration, 2 shutdown deadline exceeded.
    pub fn exit_code(&self) -> i32 {
        match self {
            LauncherError::Shutdown(_) => EXIT_SHUTDOWN_TIMEOUT,
            _ => EXIT_MISCONFIGURED,
        }
    }
}

/// Exit code for a launcher run result.
pub fn exit_code(result: &Result<(), LauncherError>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(err) => err.exit_code(),
    }
}
