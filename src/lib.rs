// cable-feeder: feed-and-cut job control for a stepper-driven cable feeder

pub mod calibration;
pub mod config;
pub mod gateway;
pub mod hardware;
pub mod job;
pub mod scheduler;
pub mod web;

pub use calibration::{CalibrationStore, FileCalibrationStore, MemoryCalibrationStore};
pub use config::{Config, ConfigError};
pub use gateway::{Command, CommandGateway, ProtocolError};
pub use hardware::{CutterActuator, MotionDriver, SimServo, SimStepper};
pub use job::{BatchRequest, CutProfile, FeedSettings, JobController, JobPhase, JobState, JobStatus};
