//! Translates operator commands and status queries into controller calls.
//!
//! Protocol errors are caught here and never reach the controller. Commands that would
//! start motion while the blade is mid-stroke are held back and applied, in arrival order,
//! once the stroke has finished.

use std::collections::VecDeque;
use std::time::Instant;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::hardware::{CutterActuator, MotionDriver};
use crate::job::{BatchRequest, JobController};
use crate::web::controller_channel::ControllerRequest;
use crate::web::models::{ActionResponse, StatusResponse};

const DEFAULT_LENGTH: f64 = 100.0;
const DEFAULT_QUANTITY: i64 = 1;
const DEFAULT_SPEED_PERCENT: i64 = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing or malformed cmd field")]
    NoCmd,
    #[error("unknown command '{0}'")]
    UnknownCmd(String),
}

impl ProtocolError {
    /// Machine-readable tag returned to the caller.
    pub fn tag(&self) -> &'static str {
        match self {
            ProtocolError::NoCmd => "no cmd",
            ProtocolError::UnknownCmd(_) => "unknown_cmd",
        }
    }
}

/// A validated operator command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start(BatchRequest),
    Stop,
    Emergency,
}

fn number_field(body: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    names
        .iter()
        .find_map(|name| body.get(*name))
        .and_then(Value::as_f64)
}

/// Parse an action body such as `{"cmd":"start","length":200,"quantity":3,"speedPercent":50}`.
///
/// The firmware-era field names `cm`, `qty` and `speed_pct` are accepted as well. Missing
/// or non-numeric start parameters take their defaults; out-of-range ones are clamped.
pub fn parse_command(body: &str) -> Result<Command, ProtocolError> {
    let value: Value = serde_json::from_str(body.trim()).map_err(|_| ProtocolError::NoCmd)?;
    let object = value.as_object().ok_or(ProtocolError::NoCmd)?;
    let cmd = object
        .get("cmd")
        .and_then(Value::as_str)
        .filter(|cmd| !cmd.is_empty())
        .ok_or(ProtocolError::NoCmd)?;

    match cmd {
        "start" => {
            let length = number_field(object, &["length", "cm"]).unwrap_or(DEFAULT_LENGTH);
            let quantity = number_field(object, &["quantity", "qty"])
                .map(|q| q.trunc() as i64)
                .unwrap_or(DEFAULT_QUANTITY);
            let speed = number_field(object, &["speedPercent", "speed_pct"])
                .map(|s| s.trunc() as i64)
                .unwrap_or(DEFAULT_SPEED_PERCENT);
            Ok(Command::Start(BatchRequest::clamped(length, quantity, speed)))
        }
        "stop" => Ok(Command::Stop),
        "emergency" => Ok(Command::Emergency),
        other => Err(ProtocolError::UnknownCmd(other.to_string())),
    }
}

/// Apply one command to the controller and build its reply.
pub fn apply<M: MotionDriver, C: CutterActuator>(
    controller: &mut JobController<M, C>,
    command: Command,
    now: Instant,
) -> ActionResponse {
    match command {
        Command::Start(request) => match controller.start(request, now) {
            Ok(()) => ActionResponse::started(request.length, request.quantity),
            Err(e) => {
                tracing::error!("Start not applied: {}", e);
                ActionResponse::error("cut_in_progress")
            }
        },
        Command::Stop => {
            controller.stop();
            ActionResponse::stop_requested()
        }
        Command::Emergency => {
            controller.emergency();
            ActionResponse::emergency_on()
        }
    }
}

struct Deferred {
    command: Command,
    respond_to: Option<oneshot::Sender<ActionResponse>>,
}

/// Per-loop command state: the queue of commands waiting for a stroke to finish.
#[derive(Default)]
pub struct CommandGateway {
    deferred: VecDeque<Deferred>,
}

impl CommandGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands waiting for the current stroke to finish.
    pub fn pending(&self) -> usize {
        self.deferred.len()
    }

    /// Handle one request from the transport.
    pub fn service<M: MotionDriver, C: CutterActuator>(
        &mut self,
        controller: &mut JobController<M, C>,
        request: ControllerRequest,
        now: Instant,
    ) {
        match request {
            ControllerRequest::GetStatus { respond_to } => {
                let _ = respond_to.send(StatusResponse::from(&controller.status()));
            }
            ControllerRequest::Action {
                command,
                respond_to,
            } => self.submit(controller, command, Some(respond_to), now),
        }
    }

    /// Apply `command` now, or queue it behind the current stroke.
    pub fn submit<M: MotionDriver, C: CutterActuator>(
        &mut self,
        controller: &mut JobController<M, C>,
        command: Command,
        respond_to: Option<oneshot::Sender<ActionResponse>>,
        now: Instant,
    ) {
        if command == Command::Emergency {
            let reply = apply(controller, command, now);
            if let Some(tx) = respond_to {
                let _ = tx.send(reply);
            }
            // Replayed in order so it still supersedes any start queued before it.
            if !self.deferred.is_empty() {
                self.deferred.push_back(Deferred {
                    command,
                    respond_to: None,
                });
            }
            return;
        }

        let blocked = matches!(command, Command::Start(_)) && controller.stroke_in_progress();
        if blocked || !self.deferred.is_empty() {
            tracing::debug!("Deferring {:?} until the cut stroke completes", command);
            self.deferred.push_back(Deferred {
                command,
                respond_to,
            });
            return;
        }

        let reply = apply(controller, command, now);
        if let Some(tx) = respond_to {
            let _ = tx.send(reply);
        }
    }

    /// Apply queued commands once no stroke is in progress.
    pub fn flush<M: MotionDriver, C: CutterActuator>(
        &mut self,
        controller: &mut JobController<M, C>,
        now: Instant,
    ) {
        while !controller.stroke_in_progress() {
            let Some(deferred) = self.deferred.pop_front() else {
                break;
            };
            let reply = apply(controller, deferred.command, now);
            if let Some(tx) = deferred.respond_to {
                let _ = tx.send(reply);
            }
        }
    }
}
