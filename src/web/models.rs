//! JSON bodies returned by `/status` and `/action`.

use serde::Serialize;

use crate::job::JobStatus;

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Represents the response for the /status endpoint.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_running: bool,
    pub current_piece: u32,
    pub remaining: u32,
    pub steps_to_go: i64,
    /// Feed progress of the current piece, two decimals.
    pub pct: f64,
    /// Calibration factor, four decimals.
    pub steps_per_cm: f64,
}

impl From<&JobStatus> for StatusResponse {
    fn from(status: &JobStatus) -> Self {
        Self {
            job_running: status.running,
            current_piece: status.current_piece,
            remaining: status.pieces_remaining,
            steps_to_go: status.steps_to_go,
            pct: round_to(status.percent_complete, 2),
            steps_per_cm: round_to(status.steps_per_cm, 4),
        }
    }
}

/// Represents the reply to an /action request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ActionResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

impl ActionResponse {
    fn ok(status: &str) -> Self {
        Self {
            ok: true,
            status: Some(status.to_string()),
            error: None,
            length: None,
            quantity: None,
        }
    }

    pub fn started(length: f64, quantity: u32) -> Self {
        Self {
            length: Some(length),
            quantity: Some(quantity),
            ..Self::ok("started")
        }
    }

    pub fn stop_requested() -> Self {
        Self::ok("stop_requested")
    }

    pub fn emergency_on() -> Self {
        Self::ok("emergency_on")
    }

    pub fn error(tag: &str) -> Self {
        Self {
            ok: false,
            status: None,
            error: Some(tag.to_string()),
            length: None,
            quantity: None,
        }
    }
}
