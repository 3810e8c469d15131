//! # Drone Traffic Simulation - Domain Model
//!
//! Value objects shared by the simulator: drone identifiers, positions,
//! scheduled waypoints, points of interest and traffic observations, plus the
//! geodesic helpers that every distance and heading computation goes through.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod geo;

pub use geo::{bearing, distance};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Numeric drone identifier, as used in the input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DroneId(pub u32);

impl fmt::Display for DroneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for DroneId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Build a position, rejecting non-finite or out-of-range coordinates.
    pub fn try_new(latitude: f64, longitude: f64) -> Result<Self, DomainError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        if valid {
            Ok(Self::new(latitude, longitude))
        } else {
            Err(DomainError::InvalidCoordinates {
                lat: latitude,
                lon: longitude,
            })
        }
    }

    /// Great-circle distance to another position, in meters.
    #[must_use]
    pub fn distance_to_m(&self, other: &Self) -> f64 {
        geo::distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }

    /// Initial bearing towards another position, in degrees `[0, 360)`.
    #[must_use]
    pub fn bearing_to_deg(&self, other: &Self) -> f64 {
        geo::bearing(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// A scheduled destination: where a drone must be, and by what time of day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub drone_id: DroneId,
    pub position: Position,
    pub arrival: NaiveTime,
}

impl Waypoint {
    #[must_use]
    pub const fn new(drone_id: DroneId, latitude: f64, longitude: f64, arrival: NaiveTime) -> Self {
        Self {
            drone_id,
            position: Position::new(latitude, longitude),
            arrival,
        }
    }
}

/// A fixed location that triggers a traffic report when a drone flies close by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub name: String,
    pub position: Position,
}

impl PointOfInterest {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            position: Position::new(latitude, longitude),
        }
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Observed traffic condition around a point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficCondition {
    Heavy,
    Light,
    Moderate,
}

impl TrafficCondition {
    /// Every condition, in draw order.
    pub const ALL: [Self; 3] = [Self::Heavy, Self::Light, Self::Moderate];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Heavy => "HEAVY",
            Self::Light => "LIGHT",
            Self::Moderate => "MODERATE",
        }
    }
}

impl fmt::Display for TrafficCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },
}
