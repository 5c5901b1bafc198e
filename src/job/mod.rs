// src/job/mod.rs - Batch state shared by the controller and the command gateway
pub mod controller;
pub mod cut;

pub use controller::{FeedSettings, JobController};
pub use cut::CutProfile;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("A cut stroke is in progress")]
    StrokeInProgress,
}

/// Where the controller is in its batch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Feeding,
    Cutting,
    /// Pause between a finished cut and the next piece's feed.
    Settling,
    EmergencyHalted,
}

/// Batch bookkeeping. Zeroed at startup and overwritten by every start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobState {
    pub running: bool,
    pub emergency_active: bool,
    pub requested_length: f64,
    pub requested_quantity: u32,
    pub pieces_remaining: u32,
    pub current_piece: u32,
    pub feeding: bool,
    pub piece_target_steps: i64,
    pub piece_start_position: i64,
}

/// Start parameters after clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchRequest {
    pub length: f64,
    pub quantity: u32,
    pub speed_percent: u8,
}

/// Longest piece the operator panel offers, in cm.
pub const MAX_PIECE_LENGTH: f64 = 2000.0;

impl BatchRequest {
    /// Clamp raw operator input into the accepted ranges.
    pub fn clamped(length: f64, quantity: i64, speed_percent: i64) -> Self {
        let length = if length.is_nan() {
            1.0
        } else {
            length.clamp(1.0, MAX_PIECE_LENGTH)
        };
        Self {
            length,
            quantity: quantity.clamp(1, i64::from(u32::MAX)) as u32,
            speed_percent: speed_percent.clamp(1, 100) as u8,
        }
    }
}

/// Read-only projection of the controller for the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub running: bool,
    pub current_piece: u32,
    pub pieces_remaining: u32,
    pub steps_to_go: i64,
    pub percent_complete: f64,
    pub steps_per_cm: f64,
    pub phase: JobPhase,
}
