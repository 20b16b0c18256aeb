//! Local-plane geodesy and heading extraction.
//!
//! Positions reported in a robot's local east/north frame are projected onto
//! WGS-84 latitude/longitude with a flat-earth approximation around a fixed
//! origin.  Accurate to well under a metre over the few kilometres a ground
//! robot covers in one session.

use std::f64::consts::FRAC_PI_2;

use rimco_types::{LatLon, Quaternion};

/// WGS-84 equatorial radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Project a local `(east, north)` offset in metres from `origin` onto
/// latitude/longitude in degrees.
///
/// ```text
/// lat = lat0 + (north / R)                  · 180/π
/// lon = lon0 + (east  / (R · cos lat0))     · 180/π
/// ```
pub fn enu_to_latlon(east: f64, north: f64, origin: LatLon) -> LatLon {
    let lat = origin.lat + (north / EARTH_RADIUS_M).to_degrees();
    let lon = origin.lon + (east / (EARTH_RADIUS_M * origin.lat.to_radians().cos())).to_degrees();
    LatLon::new(lat, lon)
}

/// Map heading in radians from an orientation quaternion.
///
/// The rotation's yaw is measured counter-clockwise from east; map widgets
/// rotate clockwise from north, so the angle is negated and shifted by π/2.
/// The identity quaternion (facing east) yields π/2.
pub fn yaw_from_quaternion(q: &Quaternion) -> f64 {
    let siny_cosp = 2.0 * (q.w * q.z + q.x * q.y);
    let cosy_cosp = 1.0 - 2.0 * (q.y * q.y + q.z * q.z);
    -siny_cosp.atan2(cosy_cosp) + FRAC_PI_2
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
