use crate::controller::messages::{Assignment, Revocation};

pub mod channel;

/// Events delivered to the launcher run loop by the controller-facing threads.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Registration with the controller succeeded.
    Registered,
    /// The controller could not be reached; carries the transport error text.
    ConnectFailed(String),
    /// The controller assigned (or re-assigned) a process to this launcher.
    AssignmentReceived(Assignment),
    /// The controller revoked a process from this launcher.
    RevocationReceived(Revocation),
}

/// Events produced by the embedding application (signal handlers, service
/// wrappers) to drive the launcher lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationEvent {
    StopRequested,
}
