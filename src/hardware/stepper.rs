// src/hardware/stepper.rs - Simulated feed stepper with a trapezoidal velocity profile
use std::time::Instant;

use super::MotionDriver;

/// Simulated feed axis.
///
/// Speed ramps up at `acceleration` until `max_speed`, and ramps down once the stopping
/// distance `v² / 2a` reaches the remaining distance. Steps are accumulated from elapsed
/// time so the profile is independent of how often `run` is polled, as long as it is
/// polled at least once per step interval.
#[derive(Debug, Clone)]
pub struct SimStepper {
    position: i64,
    target: i64,
    speed: f64,
    max_speed: f64,
    acceleration: f64,
    step_phase: f64,
    last_update: Option<Instant>,
    enabled: bool,
}

impl SimStepper {
    pub fn new(max_speed: f64, acceleration: f64) -> Self {
        Self {
            position: 0,
            target: 0,
            speed: 0.0,
            max_speed: max_speed.max(f64::MIN_POSITIVE),
            acceleration: acceleration.max(f64::MIN_POSITIVE),
            step_phase: 0.0,
            last_update: None,
            enabled: false,
        }
    }

    /// Current speed magnitude in steps/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Speed reached after a single step from rest; the floor while a move is outstanding.
    fn min_speed(&self) -> f64 {
        (2.0 * self.acceleration).sqrt().min(self.max_speed)
    }

    fn settle(&mut self) {
        self.speed = 0.0;
        self.step_phase = 0.0;
    }
}

impl MotionDriver for SimStepper {
    fn move_relative(&mut self, steps: i64) {
        if self.position == self.target {
            self.settle();
            self.last_update = None;
        }
        self.target = self.position.saturating_add(steps);
        tracing::debug!(
            "Stepper target {} ({} from position {})",
            self.target,
            self.target.saturating_sub(self.position),
            self.position
        );
    }

    fn run(&mut self, now: Instant) -> bool {
        let distance = self.target.saturating_sub(self.position);
        if distance == 0 {
            self.settle();
            self.last_update = Some(now);
            return false;
        }
        // An unpowered motor holds no torque and produces no motion.
        if !self.enabled {
            self.last_update = Some(now);
            return true;
        }
        let Some(last) = self.last_update.replace(now) else {
            return true;
        };
        let dt = now.saturating_duration_since(last).as_secs_f64();
        if dt == 0.0 {
            return true;
        }

        let remaining = distance.unsigned_abs() as f64;
        let stopping_distance = self.speed * self.speed / (2.0 * self.acceleration);
        if stopping_distance >= remaining {
            self.speed -= self.acceleration * dt;
        } else {
            self.speed += self.acceleration * dt;
        }
        self.speed = self.speed.clamp(self.min_speed(), self.max_speed);

        self.step_phase += self.speed * dt;
        let due = self.step_phase.floor();
        if due >= 1.0 {
            self.step_phase -= due;
            let steps = (due as u64).min(distance.unsigned_abs()) as i64;
            self.position += steps * distance.signum();
        }

        if self.position == self.target {
            self.settle();
            false
        } else {
            true
        }
    }

    fn distance_to_go(&self) -> i64 {
        self.target.saturating_sub(self.position)
    }

    fn current_position(&self) -> i64 {
        self.position
    }

    fn enable_outputs(&mut self) {
        if !self.enabled {
            tracing::debug!("Stepper outputs enabled");
        }
        self.enabled = true;
    }

    fn disable_outputs(&mut self) {
        if self.enabled {
            tracing::debug!("Stepper outputs disabled");
        }
        self.enabled = false;
    }

    fn outputs_enabled(&self) -> bool {
        self.enabled
    }

    fn stop(&mut self) {
        if self.target != self.position {
            tracing::debug!(
                "Stepper stopped with {} steps outstanding",
                self.target.saturating_sub(self.position)
            );
        }
        self.target = self.position;
        self.settle();
    }

    fn set_max_speed(&mut self, steps_per_sec: f64) {
        if !(steps_per_sec.is_finite() && steps_per_sec > 0.0) {
            tracing::warn!("Ignoring invalid stepper max speed {}", steps_per_sec);
            return;
        }
        self.max_speed = steps_per_sec;
        if self.speed > self.max_speed {
            self.speed = self.max_speed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn run_until_idle(stepper: &mut SimStepper, start: Instant, tick: Duration) -> (Instant, usize) {
        let mut now = start;
        let mut ticks = 0;
        while stepper.run(now) {
            now += tick;
            ticks += 1;
            assert!(ticks < 1_000_000, "stepper never reached its target");
        }
        (now, ticks)
    }

    #[test]
    fn test_reaches_target_exactly() {
        let mut stepper = SimStepper::new(800.0, 400.0);
        stepper.enable_outputs();
        stepper.move_relative(500);
        run_until_idle(&mut stepper, Instant::now(), Duration::from_micros(500));
        assert_eq!(stepper.current_position(), 500);
        assert_eq!(stepper.distance_to_go(), 0);
        assert_eq!(stepper.speed(), 0.0);
    }

    #[test]
    fn test_speed_never_exceeds_max() {
        let mut stepper = SimStepper::new(200.0, 10_000.0);
        stepper.enable_outputs();
        stepper.move_relative(1_000);
        let mut now = Instant::now();
        while stepper.run(now) {
            assert!(stepper.speed() <= 200.0 + f64::EPSILON);
            now += Duration::from_millis(1);
        }
        assert_eq!(stepper.current_position(), 1_000);
    }

    #[test]
    fn test_trapezoid_takes_longer_than_cruise_alone() {
        let mut stepper = SimStepper::new(800.0, 400.0);
        stepper.enable_outputs();
        stepper.move_relative(2_000);
        let start = Instant::now();
        let (end, _) = run_until_idle(&mut stepper, start, Duration::from_micros(500));
        let elapsed = end.duration_since(start).as_secs_f64();
        // 2000 steps at a flat 800 steps/s would take 2.5 s.
        assert!(elapsed > 2.5, "elapsed {elapsed}");
        assert!(elapsed < 6.0, "elapsed {elapsed}");
    }

    #[test]
    fn test_disabled_outputs_hold_position() {
        let mut stepper = SimStepper::new(800.0, 400.0);
        stepper.move_relative(100);
        let mut now = Instant::now();
        for _ in 0..1_000 {
            assert!(stepper.run(now));
            now += Duration::from_millis(1);
        }
        assert_eq!(stepper.current_position(), 0);
        assert_eq!(stepper.distance_to_go(), 100);
    }

    #[test]
    fn test_stop_drops_outstanding_distance() {
        let mut stepper = SimStepper::new(800.0, 400.0);
        stepper.enable_outputs();
        stepper.move_relative(10_000);
        let mut now = Instant::now();
        for _ in 0..2_000 {
            stepper.run(now);
            now += Duration::from_micros(500);
        }
        let reached = stepper.current_position();
        assert!(reached > 0);
        stepper.stop();
        assert_eq!(stepper.distance_to_go(), 0);
        assert!(!stepper.run(now + Duration::from_secs(1)));
        assert_eq!(stepper.current_position(), reached);
    }

    #[test]
    fn test_negative_move() {
        let mut stepper = SimStepper::new(1_000.0, 5_000.0);
        stepper.enable_outputs();
        stepper.move_relative(-300);
        run_until_idle(&mut stepper, Instant::now(), Duration::from_micros(250));
        assert_eq!(stepper.current_position(), -300);
    }

    #[test]
    fn test_invalid_max_speed_is_ignored() {
        let mut stepper = SimStepper::new(800.0, 400.0);
        stepper.set_max_speed(0.0);
        assert_eq!(stepper.max_speed(), 800.0);
        stepper.set_max_speed(400.0);
        assert_eq!(stepper.max_speed(), 400.0);
    }

    #[test]
    fn test_retarget_from_moved_position_saturates() {
        let mut stepper = SimStepper::new(1_000.0, 5_000.0);
        stepper.enable_outputs();
        stepper.move_relative(10);
        run_until_idle(&mut stepper, Instant::now(), Duration::from_micros(250));
        stepper.move_relative(i64::MAX);
        assert_eq!(stepper.distance_to_go(), i64::MAX - 10);
    }
}
