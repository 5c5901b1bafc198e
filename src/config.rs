//! # Machine Configuration
//!
//! All tunables of the feeder live in one TOML file. Every section and field is optional;
//! anything left out falls back to the values the machine was built around.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [machine]
//! name = "CableFeeder"
//!
//! [web]
//! bind = "0.0.0.0:3000"
//!
//! [feed]
//! max_speed = 800.0
//! acceleration = 400.0
//! default_steps_per_cm = 66.6667
//! settle_ms = 120
//!
//! [cutter]
//! open_angle = 0
//! close_angle = 130
//! hold_ms = 400
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::job::cut::CutProfile;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the feeder.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub cutter: CutterConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default = "default_machine_name")]
    pub name: String,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Depth of the request channel between HTTP handlers and the control loop.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Feed axis configuration. Speeds are in steps/s, acceleration in steps/s².
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    /// Used when the calibration store holds no factor yet.
    #[serde(default = "default_steps_per_cm")]
    pub default_steps_per_cm: f64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            acceleration: default_acceleration(),
            default_steps_per_cm: default_steps_per_cm(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl FeedConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Blade servo configuration. Angles in degrees, delays in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CutterConfig {
    #[serde(default = "default_open_angle")]
    pub open_angle: u8,
    #[serde(default = "default_close_angle")]
    pub close_angle: u8,
    #[serde(default = "default_ramp_step")]
    pub close_step: u8,
    #[serde(default = "default_close_step_delay_ms")]
    pub close_step_delay_ms: u64,
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    #[serde(default = "default_ramp_step")]
    pub open_step: u8,
    #[serde(default = "default_open_step_delay_ms")]
    pub open_step_delay_ms: u64,
}

impl Default for CutterConfig {
    fn default() -> Self {
        Self {
            open_angle: default_open_angle(),
            close_angle: default_close_angle(),
            close_step: default_ramp_step(),
            close_step_delay_ms: default_close_step_delay_ms(),
            hold_ms: default_hold_ms(),
            open_step: default_ramp_step(),
            open_step_delay_ms: default_open_step_delay_ms(),
        }
    }
}

impl CutterConfig {
    pub fn profile(&self) -> CutProfile {
        CutProfile {
            open_angle: self.open_angle,
            close_angle: self.close_angle,
            close_step: self.close_step,
            close_step_delay: Duration::from_millis(self.close_step_delay_ms),
            hold: Duration::from_millis(self.hold_ms),
            open_step: self.open_step,
            open_step_delay: Duration::from_millis(self.open_step_delay_ms),
        }
    }
}

/// Where the steps-per-cm factor is persisted.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_path")]
    pub path: String,
    #[serde(default = "default_calibration_namespace")]
    pub namespace: String,
    #[serde(default = "default_calibration_key")]
    pub key: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: default_calibration_path(),
            namespace: default_calibration_namespace(),
            key: default_calibration_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Control loop period. Must stay below the feed axis step interval at max speed.
    #[serde(default = "default_tick_us")]
    pub tick_us: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_us: default_tick_us(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(self.tick_us)
    }
}

impl Config {
    /// Validate ranges the controller relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let feed = &self.feed;
        if !(feed.max_speed.is_finite() && feed.max_speed > 0.0) {
            return Err(ConfigError::Invalid("feed.max_speed must be > 0".to_string()));
        }
        if !(feed.acceleration.is_finite() && feed.acceleration > 0.0) {
            return Err(ConfigError::Invalid("feed.acceleration must be > 0".to_string()));
        }
        if !(feed.default_steps_per_cm.is_finite() && feed.default_steps_per_cm > 0.0) {
            return Err(ConfigError::Invalid(
                "feed.default_steps_per_cm must be > 0".to_string(),
            ));
        }
        let cutter = &self.cutter;
        if cutter.open_angle > 180 || cutter.close_angle > 180 {
            return Err(ConfigError::Invalid(
                "cutter angles must be within 0..=180".to_string(),
            ));
        }
        if cutter.open_angle == cutter.close_angle {
            return Err(ConfigError::Invalid(
                "cutter.open_angle and cutter.close_angle must differ".to_string(),
            ));
        }
        if cutter.close_step == 0 || cutter.open_step == 0 {
            return Err(ConfigError::Invalid("cutter ramp steps must be >= 1".to_string()));
        }
        if self.scheduler.tick_us == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_us must be >= 1".to_string()));
        }
        // One step per tick is the most the loop can emit at steady state.
        let step_interval_us = 1_000_000.0 / feed.max_speed;
        if (self.scheduler.tick_us as f64) > step_interval_us {
            tracing::warn!(
                "scheduler.tick_us={} is slower than the {:.0}us step interval at max speed",
                self.scheduler.tick_us,
                step_interval_us
            );
        }
        if self.web.channel_capacity == 0 {
            return Err(ConfigError::Invalid("web.channel_capacity must be >= 1".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_machine_name() -> String { "CableFeeder".to_string() }
fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_channel_capacity() -> usize { 16 }
fn default_max_speed() -> f64 { 800.0 }
fn default_acceleration() -> f64 { 400.0 }
fn default_steps_per_cm() -> f64 { 200.0 / 3.0 }
fn default_settle_ms() -> u64 { 120 }
fn default_open_angle() -> u8 { 0 }
fn default_close_angle() -> u8 { 130 }
fn default_ramp_step() -> u8 { 5 }
fn default_close_step_delay_ms() -> u64 { 15 }
fn default_hold_ms() -> u64 { 400 }
fn default_open_step_delay_ms() -> u64 { 12 }
fn default_calibration_path() -> String { "calibration.toml".to_string() }
fn default_calibration_namespace() -> String { "cutter".to_string() }
fn default_calibration_key() -> String { "steps_cm".to_string() }
fn default_tick_us() -> u64 { 500 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
