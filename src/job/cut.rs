//! Blade stroke as a tick-driven sequence.
//!
//! A stroke ramps the servo from the open angle to the close angle, holds, then ramps back.
//! Each angle write is followed by a minimum dwell before the next one, so a late tick
//! stretches the stroke instead of skipping angles. Once begun, a stroke always runs to the
//! open angle; callers decide what happens after it finishes.

use std::time::{Duration, Instant};

use crate::hardware::CutterActuator;

/// Geometry and timing of one blade stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct CutProfile {
    pub open_angle: u8,
    pub close_angle: u8,
    pub close_step: u8,
    pub close_step_delay: Duration,
    pub hold: Duration,
    pub open_step: u8,
    pub open_step_delay: Duration,
}

impl Default for CutProfile {
    fn default() -> Self {
        Self {
            open_angle: 0,
            close_angle: 130,
            close_step: 5,
            close_step_delay: Duration::from_millis(15),
            hold: Duration::from_millis(400),
            open_step: 5,
            open_step_delay: Duration::from_millis(12),
        }
    }
}

impl CutProfile {
    fn ramp_writes(&self, step: u8) -> u32 {
        let span = u32::from(self.open_angle.abs_diff(self.close_angle));
        let step = u32::from(step.max(1));
        // The starting angle plus every increment, the last one clamped onto the endpoint.
        1 + span.div_ceil(step)
    }

    /// Minimum wall time of a full stroke when every tick lands on its deadline.
    pub fn nominal_duration(&self) -> Duration {
        self.close_step_delay * self.ramp_writes(self.close_step)
            + self.hold
            + self.open_step_delay * self.ramp_writes(self.open_step)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CutStage {
    Closing,
    Holding,
    Opening,
    Done,
}

/// Cursor into an in-progress stroke.
#[derive(Debug, Clone)]
pub struct CutSequence {
    profile: CutProfile,
    stage: CutStage,
    angle: u8,
    next_at: Instant,
}

fn step_toward(from: u8, to: u8, step: u8) -> u8 {
    let step = step.max(1);
    if from < to {
        from.saturating_add(step).min(to)
    } else {
        from.saturating_sub(step).max(to)
    }
}

impl CutSequence {
    /// Start a stroke, commanding the open angle immediately.
    pub fn begin<C: CutterActuator>(profile: CutProfile, cutter: &mut C, now: Instant) -> Self {
        tracing::debug!(
            "Cut: ramping servo {} -> {}",
            profile.open_angle,
            profile.close_angle
        );
        cutter.write_angle(profile.open_angle);
        Self {
            stage: CutStage::Closing,
            angle: profile.open_angle,
            next_at: now + profile.close_step_delay,
            profile,
        }
    }

    /// Perform at most one due action. Returns true once the blade is back at the open angle.
    pub fn advance<C: CutterActuator>(&mut self, cutter: &mut C, now: Instant) -> bool {
        if self.stage == CutStage::Done {
            return true;
        }
        if now < self.next_at {
            return false;
        }
        let p = &self.profile;
        match self.stage {
            CutStage::Closing if self.angle == p.close_angle => {
                self.stage = CutStage::Holding;
                self.next_at = now + p.hold;
            }
            CutStage::Closing => {
                self.angle = step_toward(self.angle, p.close_angle, p.close_step);
                cutter.write_angle(self.angle);
                self.next_at = now + p.close_step_delay;
            }
            CutStage::Holding => {
                self.stage = CutStage::Opening;
                cutter.write_angle(self.angle);
                self.next_at = now + p.open_step_delay;
            }
            CutStage::Opening if self.angle == p.open_angle => {
                self.stage = CutStage::Done;
                tracing::debug!("Cut done, servo returned to open");
            }
            CutStage::Opening => {
                self.angle = step_toward(self.angle, p.open_angle, p.open_step);
                cutter.write_angle(self.angle);
                self.next_at = now + p.open_step_delay;
            }
            CutStage::Done => {}
        }
        self.stage == CutStage::Done
    }
}
