//! Geodesic helpers on a spherical Earth.
//!
//! Both functions take coordinates in decimal degrees. Callers are expected to
//! pass in-range values; out-of-range input yields unspecified (possibly NaN)
//! results rather than an error.

/// Mean Earth radius used by every distance computation, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (Haversine formula).
#[must_use]
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from point 1 to point 2, in degrees within `[0, 360)`.
///
/// Identical points give `0.0`.
#[must_use]
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let y = delta_lon.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lon.cos();

    let deg = (y.atan2(x).to_degrees() + 360.0) % 360.0;
    // atan2 of a vanishing negative y can round up to exactly 360.0
    if deg >= 360.0 { 0.0 } else { deg }
}
