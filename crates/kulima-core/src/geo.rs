//! Great-circle distance helpers for chief assignment.

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Kilometres per degree of arc on the sphere above, rounded down.
const KM_PER_DEGREE: f64 = 111.19;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Haversine distance to `other` in kilometres.
    pub fn distance_km(self, other: Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Degree box guaranteed to contain every point within `radius_km`.
    pub fn bounding_box(self, radius_km: f64) -> BoundingBox {
        let d_lat = radius_km / KM_PER_DEGREE;
        let cos_lat = self.latitude.to_radians().cos();
        // Near the poles the longitude span degenerates; cover every meridian.
        let d_lon = if cos_lat.abs() < 1e-6 {
            180.0
        } else {
            (radius_km / (KM_PER_DEGREE * cos_lat.abs())).min(180.0)
        };

        BoundingBox {
            min_latitude: self.latitude - d_lat,
            max_latitude: self.latitude + d_lat,
            min_longitude: self.longitude - d_lon,
            max_longitude: self.longitude + d_lon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}
