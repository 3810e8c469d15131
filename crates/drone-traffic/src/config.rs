//! # Simulation Configuration
//!
//! Built-in defaults reproduce the reference scenario: the clock starts at
//! 07:45:00, stops at 08:10:00 and gains one simulated second per 10 ms of
//! real time. Every field can be overridden from the environment.

use crate::error::ConfigError;
use chrono::NaiveTime;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Time-of-day format accepted for `SIM_START` / `SIM_END`.
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Simulation settings
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Simulated time-of-day when the dispatcher starts
    pub start_time: NaiveTime,

    /// Simulated time-of-day at which the dispatcher shuts the fleet down
    pub end_time: NaiveTime,

    /// Real time per simulated second
    pub sample_interval: Duration,

    /// Real-time period of each drone control loop
    pub agent_tick: Duration,

    /// Distance at which a point of interest triggers a report, in meters
    pub report_radius_m: f64,

    /// Per-tick crash probability
    pub crash_rate: f64,

    /// Fixed RNG seed; `None` seeds every drone from entropy
    pub seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_time: NaiveTime::from_hms_opt(7, 45, 0).unwrap_or_default(),
            end_time: NaiveTime::from_hms_opt(8, 10, 0).unwrap_or_default(),
            sample_interval: Duration::from_millis(10),
            agent_tick: Duration::from_millis(5),
            report_radius_m: 350.0,
            crash_rate: 1.0 / 1_000_000.0,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            start_time: env_time("SIM_START")?.unwrap_or(defaults.start_time),
            end_time: env_time("SIM_END")?.unwrap_or(defaults.end_time),
            sample_interval: env_parse::<u64>("SAMPLE_INTERVAL_MS")?
                .map_or(defaults.sample_interval, Duration::from_millis),
            agent_tick: env_parse::<u64>("AGENT_TICK_MS")?
                .map_or(defaults.agent_tick, Duration::from_millis),
            report_radius_m: env_parse("REPORT_RADIUS_M")?.unwrap_or(defaults.report_radius_m),
            crash_rate: env_parse("CRASH_RATE")?.unwrap_or(defaults.crash_rate),
            seed: env_parse("SIM_SEED")?.or(defaults.seed),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the simulation cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.end_time <= self.start_time {
            return Err(ConfigError::EndBeforeStart {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("sample interval"));
        }
        if self.agent_tick.is_zero() {
            return Err(ConfigError::ZeroInterval("agent tick"));
        }
        if !(0.0..=1.0).contains(&self.crash_rate) {
            return Err(ConfigError::CrashRate(self.crash_rate));
        }
        if !self.report_radius_m.is_finite() || self.report_radius_m < 0.0 {
            return Err(ConfigError::ReportRadius(self.report_radius_m));
        }
        Ok(())
    }
}

/// Parse a time-of-day in [`TIME_FORMAT`].
pub fn parse_time(key: &'static str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn env_time(key: &'static str) -> Result<Option<NaiveTime>, ConfigError> {
    env::var(key).ok().map(|v| parse_time(key, &v)).transpose()
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    env::var(key)
        .ok()
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value: v.clone() })
        })
        .transpose()
}
