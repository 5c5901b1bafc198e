// src/hardware/mod.rs - Driver interfaces for the feed axis and the blade servo
pub mod servo;
pub mod stepper;

pub use servo::SimServo;
pub use stepper::SimStepper;

use std::time::Instant;

/// Feed axis primitives. Positions and distances are in driver-native steps.
///
/// `run` must be called at least as often as the driver's step rate requires; the
/// controller only observes `distance_to_go` and never generates steps itself.
pub trait MotionDriver {
    /// Set the target `steps` away from the current position, replacing any outstanding move.
    fn move_relative(&mut self, steps: i64);
    /// Advance toward the target. Returns true while motion is still outstanding.
    fn run(&mut self, now: Instant) -> bool;
    fn distance_to_go(&self) -> i64;
    fn current_position(&self) -> i64;
    fn enable_outputs(&mut self);
    fn disable_outputs(&mut self);
    fn outputs_enabled(&self) -> bool;
    /// Halt immediately and drop any outstanding displacement.
    fn stop(&mut self);
    /// Upper speed bound in steps/s for subsequent motion.
    fn set_max_speed(&mut self, steps_per_sec: f64);
}

/// Blade servo primitives.
pub trait CutterActuator {
    fn write_angle(&mut self, degrees: u8);
    fn angle(&self) -> u8;
}

impl<T: MotionDriver + ?Sized> MotionDriver for Box<T> {
    fn move_relative(&mut self, steps: i64) {
        (**self).move_relative(steps)
    }
    fn run(&mut self, now: Instant) -> bool {
        (**self).run(now)
    }
    fn distance_to_go(&self) -> i64 {
        (**self).distance_to_go()
    }
    fn current_position(&self) -> i64 {
        (**self).current_position()
    }
    fn enable_outputs(&mut self) {
        (**self).enable_outputs()
    }
    fn disable_outputs(&mut self) {
        (**self).disable_outputs()
    }
    fn outputs_enabled(&self) -> bool {
        (**self).outputs_enabled()
    }
    fn stop(&mut self) {
        (**self).stop()
    }
    fn set_max_speed(&mut self, steps_per_sec: f64) {
        (**self).set_max_speed(steps_per_sec)
    }
}

impl<T: CutterActuator + ?Sized> CutterActuator for Box<T> {
    fn write_angle(&mut self, degrees: u8) {
        (**self).write_angle(degrees)
    }
    fn angle(&self) -> u8 {
        (**self).angle()
    }
}
