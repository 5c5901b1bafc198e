// src/hardware/servo.rs - Hobby servo holding the cutter blade
use super::CutterActuator;

/// Highest angle a standard hobby servo accepts.
pub const MAX_SERVO_ANGLE: u8 = 180;

/// Simulated blade servo. Writes are clamped to the servo's travel.
#[derive(Debug, Clone, Default)]
pub struct SimServo {
    angle: u8,
}

impl SimServo {
    pub fn new(initial_angle: u8) -> Self {
        Self {
            angle: initial_angle.min(MAX_SERVO_ANGLE),
        }
    }
}

impl CutterActuator for SimServo {
    fn write_angle(&mut self, degrees: u8) {
        let clamped = degrees.min(MAX_SERVO_ANGLE);
        if clamped != degrees {
            tracing::warn!("Servo angle {} clamped to {}", degrees, clamped);
        }
        tracing::trace!("servo <- {}", clamped);
        self.angle = clamped;
    }

    fn angle(&self) -> u8 {
        self.angle
    }
}
