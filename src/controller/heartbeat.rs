use crate::controller::client::ControllerClient;
use crate::controller::messages::HeartbeatRequest;
use crate::controller::status::ControllerStatusCell;
use crate::supervisor::ProcessManager;
use crate::utils::thread_context::{NotStartedThreadContext, StartedThreadContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const HEARTBEAT_THREAD_NAME: &str = "controller_heartbeat";

/// Periodically reports a snapshot of every managed process to the
/// controller. Fire-and-forget: a missed heartbeat is logged, marks the
/// controller unreachable on the status surface, and changes nothing else.
pub fn spawn_heartbeat(
    client: Arc<ControllerClient>,
    supervisor: Arc<ProcessManager>,
    status: Arc<ControllerStatusCell>,
    interval: Duration,
) -> StartedThreadContext {
    NotStartedThreadContext::new(HEARTBEAT_THREAD_NAME, move |stop_consumer| loop {
        if stop_consumer.is_cancelled(interval) {
            break;
        }
        let snapshot = supervisor.health();
        let request = HeartbeatRequest::from_snapshot(client.launcher_id(), &snapshot);
        match client.heartbeat(&request) {
            Ok(()) => {
                status.reachable();
                debug!(processes = request.processes.len(), "heartbeat sent");
            }
            Err(err) => {
                if err.is_unreachable() {
                    status.unreachable(err.to_string());
                }
                warn!(error = %err, "heartbeat failed");
            }
        }
    })
    .start()
}
