use crate::controller::client::ControllerClient;
use crate::controller::status::ControllerStatusCell;
use crate::event::channel::EventPublisher;
use crate::event::ControllerEvent;
use crate::supervisor::backoff::BackoffPolicy;
use crate::supervisor::update::ProcessCategory;
use crate::utils::thread_context::{NotStartedThreadContext, StartedThreadContext};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const POLLER_THREAD_NAME: &str = "controller_poller";

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub capacity: u32,
    pub capabilities: Vec<ProcessCategory>,
    pub poll_interval: Duration,
    pub registration_backoff: BackoffPolicy,
}

/// Registers with the controller and then polls it for assignments and
/// revocations, forwarding them to the launcher run loop as events.
///
/// Connection loss flips back to the registration phase, retried with
/// exponential backoff; already-assigned processes keep running locally the
/// whole time.
pub fn spawn_controller_poller(
    client: Arc<ControllerClient>,
    publisher: EventPublisher<ControllerEvent>,
    status: Arc<ControllerStatusCell>,
    settings: PollerSettings,
) -> StartedThreadContext {
    NotStartedThreadContext::new(POLLER_THREAD_NAME, move |stop_consumer| {
        let mut registered = false;
        let mut attempt: u32 = 0;
        let mut cursor: u64 = 0;
        loop {
            if !registered {
                match client.register(settings.capacity, &settings.capabilities) {
                    Ok(()) => {
                        info!(launcher_id = client.launcher_id(), "registered with controller");
                        registered = true;
                        attempt = 0;
                        status.registered();
                        let _ = publisher.publish(ControllerEvent::Registered);
                    }
                    Err(err) => {
                        attempt += 1;
                        if err.is_unreachable() {
                            status.unreachable(err.to_string());
                        }
                        let delay = settings.registration_backoff.delay(attempt);
                        warn!(error = %err, attempt, retry_in = ?delay, "registration failed");
                        let _ = publisher.publish(ControllerEvent::ConnectFailed(err.to_string()));
                        if stop_consumer.is_cancelled(delay) {
                            break;
                        }
                        continue;
                    }
                }
            }

            if stop_consumer.is_cancelled(settings.poll_interval) {
                break;
            }

            match client.poll_assignments(cursor) {
                Ok(batch) => {
                    status.reachable();
                    cursor = cursor.max(batch.cursor);
                    for assignment in batch.assignments {
                        debug!(process_id = %assignment.process_id, "assignment received");
                        let _ = publisher
                            .publish(ControllerEvent::AssignmentReceived(assignment));
                    }
                    for revocation in batch.revocations {
                        debug!(process_id = %revocation.process_id, "revocation received");
                        let _ = publisher
                            .publish(ControllerEvent::RevocationReceived(revocation));
                    }
                }
                Err(err) if err.is_unreachable() => {
                    warn!(error = %err, "controller unreachable, will re-register");
                    registered = false;
                    status.unreachable(err.to_string());
                    let _ = publisher.publish(ControllerEvent::ConnectFailed(err.to_string()));
                }
                Err(err) => {
                    warn!(error = %err, "assignment poll failed");
                }
            }
        }
        debug!("controller poller exited");
    })
    .start()
}
