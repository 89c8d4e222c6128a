use std::sync::mpsc::RecvError;
use thiserror::Error;

pub mod config;
pub mod runner;
pub mod server;

#[derive(Error, Debug)]
pub enum StatusServerError {
    #[error("error receiving server handle: {0}")]
    ServerConsumerError(#[from] RecvError),

    #[error("failed to bind HTTP server: {0}")]
    BindError(String),

    #[error("HTTP server startup timed out after {0:?}")]
    StartupTimeout(std::time::Duration),

    #[error("HTTP server thread failed during startup")]
    StartupChannelClosed,
}
