//! The narrow view of the dispatcher that drones are given.

use chrono::NaiveTime;
use drone_domain::{DroneId, TrafficCondition};
use serde::{Deserialize, Serialize};

/// Capabilities a drone needs from its dispatcher: read the shared clock and
/// file traffic reports. Implementations must tolerate concurrent calls from
/// every drone task.
pub trait DispatchLink: Send + Sync {
    /// Current simulated time-of-day.
    fn time(&self) -> NaiveTime;

    /// Record a traffic observation made by `drone_id` near `station`.
    fn report_traffic(&self, drone_id: DroneId, station: &str, condition: TrafficCondition);
}

/// A traffic observation as recorded by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficReport {
    pub drone_id: DroneId,
    pub station: String,
    pub condition: TrafficCondition,
    pub speed_mps: f64,
    pub time: NaiveTime,
}
