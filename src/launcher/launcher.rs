use crate::context::CancelContext;
use crate::event::channel::EventConsumer;
use crate::event::{ApplicationEvent, ControllerEvent};
use crate::launcher::error::LauncherError;
use crate::launcher::uptime::{UptimeReportConfig, UptimeReporter};
use crate::supervisor::update::{ProcessUpdate, TerminateOptions};
use crate::supervisor::ProcessManager;
use crossbeam::channel::never;
use crossbeam::select;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The launcher run loop: translates controller events into supervisor
/// calls and drives the supervisor through shutdown when the application
/// asks to stop.
pub struct Launcher {
    supervisor: Arc<ProcessManager>,
    controller_consumer: Option<EventConsumer<ControllerEvent>>,
    application_consumer: EventConsumer<ApplicationEvent>,
    uptime_report: UptimeReportConfig,
    shutdown_grace: Duration,
}

impl Launcher {
    pub fn new(
        supervisor: Arc<ProcessManager>,
        controller_consumer: Option<EventConsumer<ControllerEvent>>,
        application_consumer: EventConsumer<ApplicationEvent>,
        uptime_report: UptimeReportConfig,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            supervisor,
            controller_consumer,
            application_consumer,
            uptime_report,
            shutdown_grace,
        }
    }

    /// Blocks until a stop is requested, then shuts the supervisor down
    /// within the configured grace.
    pub fn run(self) -> Result<(), LauncherError> {
        info!("launcher runtime started");

        // A channel that never delivers stands in when the controller is
        // disabled or its threads have gone away, so the select below needs
        // no special cases.
        let never_receive = EventConsumer::from(never());
        let mut controller_receiver = self.controller_consumer.as_ref().unwrap_or(&never_receive);

        let (uptime_reporter, uptime_ticker) =
            UptimeReporter::new_with_ticker(&self.uptime_report, None);

        loop {
            select! {
                recv(controller_receiver.as_ref()) -> event => match event {
                    Ok(event) => self.handle_controller_event(event),
                    Err(_) => {
                        // Controller threads are gone; keep serving local
                        // callers and stop polling this arm.
                        debug!("controller event channel closed");
                        controller_receiver = &never_receive;
                    }
                },
                recv(self.application_consumer.as_ref()) -> event => {
                    match event {
                        Ok(ApplicationEvent::StopRequested) => info!("stop requested"),
                        Err(_) => debug!("application event channel closed"),
                    }
                    break;
                },
                recv(uptime_ticker) -> _ => { let _ = uptime_reporter.report(); },
            }
        }

        let ctx = CancelContext::new().with_timeout(self.shutdown_grace);
        self.supervisor.shutdown(&ctx)?;
        info!("launcher runtime finished");
        Ok(())
    }

    fn handle_controller_event(&self, event: ControllerEvent) {
        match event {
            ControllerEvent::Registered => debug!("controller registration confirmed"),
            ControllerEvent::ConnectFailed(error) => {
                debug!(error = %error, "controller connection failed")
            }
            ControllerEvent::AssignmentReceived(assignment) => {
                let id = assignment.process_id.clone();
                let update = ProcessUpdate::create(id.clone(), assignment.into_process_config());
                let _ = self
                    .supervisor
                    .update_process(update)
                    .inspect_err(|err| warn!(%id, error = %err, "applying assignment failed"));
            }
            ControllerEvent::RevocationReceived(revocation) => {
                let grace = Duration::from_secs(revocation.grace_seconds);
                let _ = self
                    .supervisor
                    .terminate(&revocation.process_id, TerminateOptions::with_grace(grace))
                    .inspect_err(|err| {
                        // Revocations are idempotent at the key level; an
                        // unknown key just means there is nothing to stop.
                        warn!(id = %revocation.process_id, error = %err, "revocation had no effect")
                    });
            }
        }
    }
}
