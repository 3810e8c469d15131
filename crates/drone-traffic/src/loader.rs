//! CSV input loader.
//!
//! # Formats
//!
//! Points of interest, one per line, no header:
//!
//! ```csv
//! Acton Town,51.5028,-0.2801
//! ```
//!
//! Waypoints for one drone, stored as `<drone id>.csv`, no header, arrival as
//! a full timestamp of which only the time of day is kept:
//!
//! ```csv
//! 5937,"51.476105","-0.100224","2011-03-22 07:55:26"
//! ```
//!
//! Any malformed line aborts the load.

use crate::error::LoadError;
use chrono::NaiveDateTime;
use drone_domain::{DroneId, PointOfInterest, Position, Waypoint};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Timestamp format of the waypoint files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `name, latitude, longitude`
type PointRecord = (String, f64, f64);

/// `drone id, latitude, longitude, arrival timestamp`
type WaypointRecord = (u32, f64, f64, String);

/// Load points of interest from a file.
pub fn load_points_of_interest(path: &Path) -> Result<Vec<PointOfInterest>, LoadError> {
    let file = open(path)?;
    load_points_reader(file, &path.display().to_string())
}

/// Like [`load_points_of_interest`] but from any `Read` source.
pub fn load_points_reader<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<Vec<PointOfInterest>, LoadError> {
    let mut points = Vec::new();

    for (idx, record) in csv_reader(reader).deserialize::<PointRecord>().enumerate() {
        let line = idx + 1;
        let (name, lat, lon) = record.map_err(|source| LoadError::Csv {
            source_name: source_name.to_string(),
            line,
            source,
        })?;
        let position = Position::try_new(lat, lon).map_err(|source| LoadError::Coordinates {
            source_name: source_name.to_string(),
            line,
            source,
        })?;
        points.push(PointOfInterest { name, position });
    }

    Ok(points)
}

/// Load the waypoint file `<dir>/<drone id>.csv`.
pub fn load_route(dir: &Path, drone_id: DroneId) -> Result<Vec<Waypoint>, LoadError> {
    let path = dir.join(format!("{drone_id}.csv"));
    let file = open(&path)?;
    load_route_reader(file, drone_id, &path.display().to_string())
}

/// Parse one drone's waypoints, checking ownership and arrival order.
pub fn load_route_reader<R: Read>(
    reader: R,
    drone_id: DroneId,
    source_name: &str,
) -> Result<Vec<Waypoint>, LoadError> {
    let mut route: Vec<Waypoint> = Vec::new();

    for (idx, record) in csv_reader(reader).deserialize::<WaypointRecord>().enumerate() {
        let line = idx + 1;
        let (id, lat, lon, stamp) = record.map_err(|source| LoadError::Csv {
            source_name: source_name.to_string(),
            line,
            source,
        })?;

        let found = DroneId(id);
        if found != drone_id {
            return Err(LoadError::DroneMismatch {
                source_name: source_name.to_string(),
                line,
                expected: drone_id,
                found,
            });
        }

        let position = Position::try_new(lat, lon).map_err(|source| LoadError::Coordinates {
            source_name: source_name.to_string(),
            line,
            source,
        })?;

        let arrival = NaiveDateTime::parse_from_str(stamp.trim(), TIMESTAMP_FORMAT)
            .map_err(|source| LoadError::Timestamp {
                source_name: source_name.to_string(),
                line,
                value: stamp.clone(),
                source,
            })?
            .time();

        if route.last().is_some_and(|prev| arrival < prev.arrival) {
            return Err(LoadError::Unordered {
                source_name: source_name.to_string(),
                line,
            });
        }

        route.push(Waypoint {
            drone_id,
            position,
            arrival,
        });
    }

    if route.is_empty() {
        return Err(LoadError::Empty(source_name.to_string()));
    }
    Ok(route)
}

/// Load the routes of several drones from one directory.
pub fn load_routes(
    dir: &Path,
    drone_ids: &[DroneId],
) -> Result<BTreeMap<DroneId, Vec<Waypoint>>, LoadError> {
    drone_ids
        .iter()
        .map(|&id| load_route(dir, id).map(|route| (id, route)))
        .collect()
}

fn open(path: &Path) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(reader)
}
