//! Defines the communication channel messages between the web server and the control loop.

use super::models::{ActionResponse, StatusResponse};
use crate::gateway::Command;
use tokio::sync::oneshot;

/// Represents a request sent from a web handler to the control loop.
#[derive(Debug)]
pub enum ControllerRequest {
    /// A request for the current job status.
    GetStatus {
        /// The channel to send the response back on.
        respond_to: oneshot::Sender<StatusResponse>,
    },
    /// A start, stop or emergency command.
    Action {
        command: Command,
        respond_to: oneshot::Sender<ActionResponse>,
    },
}
