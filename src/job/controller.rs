// src/job/controller.rs - Feed/cut sequencing for a batch of pieces
use std::time::{Duration, Instant};

use super::cut::{CutProfile, CutSequence};
use super::{BatchRequest, JobError, JobPhase, JobState, JobStatus};
use crate::hardware::{CutterActuator, MotionDriver};

/// Feed axis limits and the pause between pieces.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Speed at 100%, in steps/s.
    pub max_speed: f64,
    pub settle: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            max_speed: 800.0,
            settle: Duration::from_millis(120),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Idle,
    Feeding { started_at: Instant },
    Cutting(CutSequence),
    Settling { until: Instant },
    EmergencyHalted,
}

/// Owns the feed axis, the blade and the batch state.
///
/// Nothing else may command the drivers. All entry points take `&mut self` and apply
/// completely before returning, so a command is never observed half-applied by a tick.
pub struct JobController<M, C> {
    motion: M,
    cutter: C,
    state: JobState,
    phase: Phase,
    steps_per_cm: f64,
    feed: FeedSettings,
    cut: CutProfile,
    batch_id: Option<uuid::Uuid>,
}

impl<M: MotionDriver, C: CutterActuator> JobController<M, C> {
    /// Park the hardware in its safe state: outputs off, blade open.
    pub fn new(
        mut motion: M,
        mut cutter: C,
        steps_per_cm: f64,
        feed: FeedSettings,
        cut: CutProfile,
    ) -> Self {
        motion.set_max_speed(feed.max_speed);
        motion.disable_outputs();
        cutter.write_angle(cut.open_angle);
        Self {
            motion,
            cutter,
            state: JobState::default(),
            phase: Phase::Idle,
            steps_per_cm,
            feed,
            cut,
            batch_id: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn motion(&self) -> &M {
        &self.motion
    }

    pub fn cutter(&self) -> &C {
        &self.cutter
    }

    pub fn steps_per_cm(&self) -> f64 {
        self.steps_per_cm
    }

    pub fn phase(&self) -> JobPhase {
        match self.phase {
            Phase::Idle => JobPhase::Idle,
            Phase::Feeding { .. } => JobPhase::Feeding,
            Phase::Cutting(_) => JobPhase::Cutting,
            Phase::Settling { .. } => JobPhase::Settling,
            Phase::EmergencyHalted => JobPhase::EmergencyHalted,
        }
    }

    /// True while the blade is mid-stroke.
    pub fn stroke_in_progress(&self) -> bool {
        matches!(self.phase, Phase::Cutting(_))
    }

    /// Replace any batch with a new one and begin its first piece.
    ///
    /// The batch is recorded before the emergency latch is cleared, and the latch is cleared
    /// before the first piece begins, so piece 1 is never suppressed by a stale latch.
    pub fn start(&mut self, request: BatchRequest, now: Instant) -> Result<(), JobError> {
        if self.stroke_in_progress() {
            return Err(JobError::StrokeInProgress);
        }
        if self.state.running {
            tracing::info!(
                "Replacing running batch at piece {}/{}",
                self.state.current_piece,
                self.state.requested_quantity
            );
        }
        let batch_id = uuid::Uuid::new_v4();
        self.batch_id = Some(batch_id);
        self.state.requested_length = request.length;
        self.state.requested_quantity = request.quantity;
        self.state.pieces_remaining = request.quantity;
        self.state.current_piece = 1;
        self.state.running = true;
        self.state.emergency_active = false;

        let speed = f64::from(request.speed_percent) / 100.0 * self.feed.max_speed;
        self.motion.set_max_speed(speed);
        tracing::info!(
            "Batch {} started: {} x {} cm at {}% ({:.0} steps/s)",
            batch_id,
            request.quantity,
            request.length,
            request.speed_percent,
            speed
        );
        self.begin_piece(now);
        Ok(())
    }

    /// Finish the piece in flight, cut it, then go idle.
    pub fn stop(&mut self) {
        if self.state.running {
            tracing::info!(
                "Stop requested during piece {}/{}",
                self.state.current_piece,
                self.state.requested_quantity
            );
        }
        self.state.pieces_remaining = 0;
    }

    /// Latch the emergency state and cut power to the feed axis.
    ///
    /// A blade already mid-stroke completes its stroke; the open angle is forced on the
    /// first tick after it ends.
    pub fn emergency(&mut self) {
        tracing::warn!(
            "Emergency stop at piece {}/{} ({} steps to go)",
            self.state.current_piece,
            self.state.requested_quantity,
            self.motion.distance_to_go()
        );
        self.state.emergency_active = true;
        self.state.running = false;
        self.state.feeding = false;
        self.motion.stop();
        self.motion.disable_outputs();
        if !self.stroke_in_progress() {
            self.cutter.write_angle(self.cut.open_angle);
            self.phase = Phase::EmergencyHalted;
        }
    }

    /// Power down for process exit. The latch is untouched.
    pub fn park(&mut self) {
        self.motion.stop();
        self.motion.disable_outputs();
        self.state.feeding = false;
        self.state.running = false;
        if !self.stroke_in_progress() {
            self.cutter.write_angle(self.cut.open_angle);
        }
        tracing::info!("Hardware parked");
    }

    /// One scheduling tick: advance whatever is in flight and take at most one transition.
    pub fn tick(&mut self, now: Instant) {
        // A begun stroke always completes, latch or not.
        if let Phase::Cutting(seq) = &mut self.phase {
            if self.state.emergency_active {
                self.motion.disable_outputs();
            }
            if seq.advance(&mut self.cutter, now) {
                self.finish_cut(now);
            }
            return;
        }
        if self.state.emergency_active {
            self.hold_safe_state();
            return;
        }
        match self.phase {
            Phase::Feeding { started_at } => {
                self.motion.run(now);
                if self.motion.distance_to_go() == 0 {
                    self.finish_feed(started_at, now);
                }
            }
            // A stop during the pause ends the batch without waiting it out.
            Phase::Settling { .. } if self.state.pieces_remaining == 0 => self.finish_batch(),
            Phase::Settling { until } if now >= until => {
                self.state.current_piece += 1;
                self.begin_piece(now);
            }
            _ => {}
        }
    }

    /// Status projection. Never mutates.
    pub fn status(&self) -> JobStatus {
        let steps_to_go = if self.state.feeding {
            self.motion.distance_to_go()
        } else {
            0
        };
        let percent_complete = match self.phase {
            Phase::Feeding { .. } if self.state.piece_target_steps != 0 => {
                let target = self.state.piece_target_steps as f64;
                let done = (target - steps_to_go as f64).max(0.0);
                (done * 100.0 / target).clamp(0.0, 100.0)
            }
            // The feed of the current piece is complete once it is being cut.
            Phase::Cutting(_) | Phase::Settling { .. } if !self.state.emergency_active => 100.0,
            _ => 0.0,
        };
        JobStatus {
            running: self.state.running,
            current_piece: self.state.current_piece,
            pieces_remaining: self.state.pieces_remaining,
            steps_to_go,
            percent_complete,
            steps_per_cm: self.steps_per_cm,
            phase: self.phase(),
        }
    }

    fn begin_piece(&mut self, now: Instant) {
        if self.state.emergency_active {
            return;
        }
        self.state.piece_target_steps = (self.state.requested_length * self.steps_per_cm).round() as i64;
        self.state.piece_start_position = self.motion.current_position();
        self.motion.move_relative(self.state.piece_target_steps);
        self.motion.enable_outputs();
        self.state.feeding = true;
        self.phase = Phase::Feeding { started_at: now };
        tracing::info!(
            "Begin piece {}/{}: {} cm -> {} steps",
            self.state.current_piece,
            self.state.requested_quantity,
            self.state.requested_length,
            self.state.piece_target_steps
        );
    }

    fn finish_feed(&mut self, started_at: Instant, now: Instant) {
        let moved = self.motion.current_position() - self.state.piece_start_position;
        tracing::info!(
            "Piece {} fed (actual steps {}) in {:.2}s",
            self.state.current_piece,
            moved,
            now.saturating_duration_since(started_at).as_secs_f64()
        );
        self.state.feeding = false;
        self.phase = Phase::Cutting(CutSequence::begin(self.cut.clone(), &mut self.cutter, now));
    }

    fn finish_cut(&mut self, now: Instant) {
        self.state.pieces_remaining = self.state.pieces_remaining.saturating_sub(1);
        tracing::info!("Piece {} cut", self.state.current_piece);
        if self.state.emergency_active {
            self.phase = Phase::EmergencyHalted;
            self.hold_safe_state();
        } else if self.state.pieces_remaining > 0 {
            self.phase = Phase::Settling {
                until: now + self.feed.settle,
            };
        } else {
            self.finish_batch();
        }
    }

    fn finish_batch(&mut self) {
        self.state.running = false;
        self.motion.disable_outputs();
        self.phase = Phase::Idle;
        match self.batch_id {
            Some(id) => tracing::info!("Batch {} complete after piece {}", id, self.state.current_piece),
            None => tracing::info!("Batch complete"),
        }
    }

    /// Idempotent; re-asserted on every tick while the latch holds.
    fn hold_safe_state(&mut self) {
        self.state.running = false;
        self.state.feeding = false;
        self.motion.disable_outputs();
        if self.cutter.angle() != self.cut.open_angle {
            tracing::warn!("Forcing cutter open");
        }
        self.cutter.write_angle(self.cut.open_angle);
        self.phase = Phase::EmergencyHalted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{SimServo, SimStepper};

    fn controller() -> JobController<SimStepper, SimServo> {
        JobController::new(
            SimStepper::new(100_000.0, 1_000_000.0),
            SimServo::new(90),
            10.0,
            FeedSettings {
                max_speed: 100_000.0,
                settle: Duration::from_millis(5),
            },
            CutProfile {
                close_step_delay: Duration::from_millis(1),
                hold: Duration::from_millis(2),
                open_step_delay: Duration::from_millis(1),
                ..CutProfile::default()
            },
        )
    }

    #[test]
    fn test_new_parks_hardware() {
        let c = controller();
        assert_eq!(c.cutter().angle(), 0);
        assert!(!c.motion().outputs_enabled());
        assert_eq!(c.phase(), JobPhase::Idle);
        assert_eq!(c.state(), &JobState::default());
    }

    #[test]
    fn test_start_begins_first_piece_synchronously() {
        let mut c = controller();
        c.start(BatchRequest::clamped(12.34, 2, 50), Instant::now()).unwrap();
        assert_eq!(c.phase(), JobPhase::Feeding);
        assert!(c.state().feeding);
        assert!(c.state().running);
        assert_eq!(c.state().piece_target_steps, 123);
        assert_eq!(c.motion().distance_to_go(), 123);
        assert!(c.motion().outputs_enabled());
        assert_eq!(c.motion().max_speed(), 50_000.0);
    }

    #[test]
    fn test_start_clears_emergency_latch() {
        let mut c = controller();
        c.emergency();
        assert!(c.state().emergency_active);
        c.start(BatchRequest::clamped(5.0, 1, 100), Instant::now()).unwrap();
        assert!(!c.state().emergency_active);
        assert_eq!(c.phase(), JobPhase::Feeding);
    }

    #[test]
    fn test_start_rejected_mid_stroke() {
        let mut c = controller();
        let mut now = Instant::now();
        c.start(BatchRequest::clamped(1.0, 1, 100), now).unwrap();
        while c.phase() != JobPhase::Cutting {
            now += Duration::from_micros(100);
            c.tick(now);
        }
        assert_eq!(
            c.start(BatchRequest::clamped(1.0, 1, 100), now),
            Err(JobError::StrokeInProgress)
        );
    }

    #[test]
    fn test_status_when_idle() {
        let c = controller();
        let status = c.status();
        assert!(!status.running);
        assert_eq!(status.steps_to_go, 0);
        assert_eq!(status.percent_complete, 0.0);
        assert_eq!(status.steps_per_cm, 10.0);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut c = controller();
        c.stop();
        assert_eq!(c.state(), &JobState::default());
        assert_eq!(c.phase(), JobPhase::Idle);
    }

    #[test]
    fn test_stop_while_settling_finishes_on_next_tick() {
        let mut c = controller();
        let mut now = Instant::now();
        c.start(BatchRequest::clamped(1.0, 3, 100), now).unwrap();
        while c.phase() != JobPhase::Settling {
            now += Duration::from_micros(100);
            c.tick(now);
        }
        c.stop();
        // Well inside the 5 ms settle delay.
        c.tick(now + Duration::from_micros(100));
        assert_eq!(c.phase(), JobPhase::Idle);
        assert!(!c.state().running);
        assert_eq!(c.state().current_piece, 1);
    }

    /// Stepper that counts power-off requests.
    struct CountingStepper {
        inner: SimStepper,
        disables: usize,
    }

    impl MotionDriver for CountingStepper {
        fn move_relative(&mut self, steps: i64) {
            self.inner.move_relative(steps)
        }
        fn run(&mut self, now: Instant) -> bool {
            self.inner.run(now)
        }
        fn distance_to_go(&self) -> i64 {
            self.inner.distance_to_go()
        }
        fn current_position(&self) -> i64 {
            self.inner.current_position()
        }
        fn enable_outputs(&mut self) {
            self.inner.enable_outputs()
        }
        fn disable_outputs(&mut self) {
            self.disables += 1;
            self.inner.disable_outputs()
        }
        fn outputs_enabled(&self) -> bool {
            self.inner.outputs_enabled()
        }
        fn stop(&mut self) {
            self.inner.stop()
        }
        fn set_max_speed(&mut self, steps_per_sec: f64) {
            self.inner.set_max_speed(steps_per_sec)
        }
    }

    #[test]
    fn test_latched_stroke_keeps_power_off_every_tick() {
        let mut c = JobController::new(
            CountingStepper {
                inner: SimStepper::new(100_000.0, 1_000_000.0),
                disables: 0,
            },
            SimServo::new(0),
            10.0,
            FeedSettings::default(),
            CutProfile::default(),
        );
        let mut now = Instant::now();
        c.start(BatchRequest::clamped(1.0, 2, 100), now).unwrap();
        while c.phase() != JobPhase::Cutting {
            now += Duration::from_micros(100);
            c.tick(now);
        }
        c.emergency();
        let before = c.motion().disables;
        for _ in 0..10 {
            now += Duration::from_micros(100);
            c.tick(now);
            assert_eq!(c.phase(), JobPhase::Cutting);
        }
        assert_eq!(c.motion().disables, before + 10);
        assert!(!c.motion().outputs_enabled());
    }
}
