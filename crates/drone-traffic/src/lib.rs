//! # Drone Traffic
//!
//! Simulates a fleet of drones flying timed waypoint schedules under a shared
//! simulated clock, reporting traffic conditions whenever they pass close to
//! a point of interest.
//!
//! ## Features
//!
//! - Single-writer simulated clock read by every drone task
//! - Bounded per-drone waypoint queues fed by the dispatcher
//! - Schedule-driven speed and heading, dead-reckoned once per simulated second
//! - Proximity-triggered traffic reports with configurable crash injection

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod agent;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod link;
pub mod loader;
pub mod queue;

pub use agent::{Agent, AgentHandle, AgentPhase, AgentReport, AgentSettings, Termination};
pub use clock::SimClock;
pub use config::SimConfig;
pub use dispatcher::{ControlCenter, Dispatcher, Simulation, SimulationSummary, StopReason};
pub use error::{ConfigError, LoadError, SimError};
pub use link::{DispatchLink, TrafficReport};
pub use queue::{WAYPOINT_QUEUE_CAPACITY, WaypointQueue};
