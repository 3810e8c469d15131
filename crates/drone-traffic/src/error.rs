//! Simulator error types

use chrono::NaiveTime;
use drone_domain::{DomainError, DroneId};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level simulator errors
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Input error: {0}")]
    Load(#[from] LoadError),

    #[error("Route for drone {key} contains a waypoint addressed to drone {found}")]
    RouteMismatch { key: DroneId, found: DroneId },

    #[error("Simulation task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Invalid simulation settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("End time {end} is not after start time {start}")]
    EndBeforeStart { start: NaiveTime, end: NaiveTime },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Crash rate must lie within [0, 1], got {0}")]
    CrashRate(f64),

    #[error("Report radius must be a non-negative finite distance, got {0}")]
    ReportRadius(f64),
}

/// Failures while reading waypoint or point-of-interest files
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {source_name} line {line}: {source}")]
    Csv {
        source_name: String,
        line: usize,
        #[source]
        source: csv::Error,
    },

    #[error("Bad timestamp '{value}' in {source_name} line {line}: {source}")]
    Timestamp {
        source_name: String,
        line: usize,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Bad coordinates in {source_name} line {line}: {source}")]
    Coordinates {
        source_name: String,
        line: usize,
        #[source]
        source: DomainError,
    },

    #[error("{source_name} line {line} belongs to drone {found}, expected drone {expected}")]
    DroneMismatch {
        source_name: String,
        line: usize,
        expected: DroneId,
        found: DroneId,
    },

    #[error("{source_name} line {line} is scheduled before the previous waypoint")]
    Unordered { source_name: String, line: usize },

    #[error("{0} contains no records")]
    Empty(String),
}

pub type Result<T> = std::result::Result<T, SimError>;
