//! Geodesy: great-circle distance on a spherical Earth.

use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, Result};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    fn ensure_finite(&self) -> Result<()> {
        if self.latitude.is_finite() && self.longitude.is_finite() {
            Ok(())
        } else {
            Err(AttendanceError::InvalidCoordinates(format!(
                "({}, {})",
                self.latitude, self.longitude
            )))
        }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

/// Haversine distance between two points, in meters.
///
/// # Errors
///
/// Returns `AttendanceError::InvalidCoordinates` if any component is NaN
/// or infinite.
pub fn distance_meters(a: Coordinates, b: Coordinates) -> Result<f64> {
    a.ensure_finite()?;
    b.ensure_finite()?;

    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    Ok(EARTH_RADIUS_M * c)
}
