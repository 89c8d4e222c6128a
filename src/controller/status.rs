use serde::Serialize;
use std::sync::Mutex;
use url::Url;

/// Controller-connection health, shown on the status endpoint.
///
/// Written by the registration/poller and heartbeat threads, read by the
/// HTTP server.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
    pub registered: bool,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct ControllerStatusCell(Mutex<ControllerStatus>);

impl ControllerStatusCell {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled(endpoint: Url) -> Self {
        Self(Mutex::new(ControllerStatus {
            enabled: true,
            endpoint: Some(endpoint),
            ..Default::default()
        }))
    }

    pub fn registered(&self) {
        let mut status = self.lock();
        status.registered = true;
        status.reachable = true;
        status.last_error = None;
    }

    pub fn reachable(&self) {
        let mut status = self.lock();
        status.reachable = true;
        status.last_error = None;
    }

    pub fn unreachable(&self, error: String) {
        let mut status = self.lock();
        status.reachable = false;
        status.registered = false;
        status.last_error = Some(error);
    }

    pub fn snapshot(&self) -> ControllerStatus {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerStatus> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}
