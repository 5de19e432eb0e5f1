//! Great-circle geometry.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Mean Earth radius in kilometers used when the configuration does not override it.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinates {
    /// Latitude in degrees, -90 to 90.
    #[schema(example = 47.6062)]
    pub latitude: f64,

    /// Longitude in degrees, -180 to 180.
    #[schema(example = -122.3321)]
    pub longitude: f64,
}

impl Coordinates {
    /// Create a coordinate pair without validating it.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both components are finite and inside the WGS84 degree ranges.
    #[must_use]
    pub fn in_range(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Whether this is the `(0, 0)` placeholder radios report before they have a fix.
    #[must_use]
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Haversine distance to `other` in kilometers.
    #[must_use]
    pub fn distance_km(&self, other: &Self, earth_radius_km: f64) -> f64 {
        haversine_km(*self, *other, earth_radius_km)
    }
}

/// Great-circle distance between two points using the haversine formula.
///
/// Symmetric and non-negative; returns exactly `0.0` for identical points.
#[must_use]
pub fn haversine_km(a: Coordinates, b: Coordinates, earth_radius_km: f64) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    earth_radius_km * c
}

/// Largest distance between any two points of `points`, in kilometers.
///
/// Returns `0.0` for fewer than two points.
#[must_use]
pub fn max_pairwise_km(points: &[Coordinates], earth_radius_km: f64) -> f64 {
    let mut max = 0.0_f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            max = max.max(haversine_km(*a, *b, earth_radius_km));
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    #[test]
    fn test_distance_is_symmetric() {
        let seattle = Coordinates::new(47.6062, -122.3321);
        let portland = Coordinates::new(45.5152, -122.6784);

        let ab = haversine_km(seattle, portland, EARTH_RADIUS_KM);
        let ba = haversine_km(portland, seattle, EARTH_RADIUS_KM);

        assert!((ab - ba).abs() < TOLERANCE);
        // Roughly 234 km apart.
        assert!((ab - 234.0).abs() < 0.5, "got {ab}");
    }

    #[test]
    fn test_distance_zero_iff_coincident() {
        let p = Coordinates::new(10.0, 10.0);
        assert_eq!(haversine_km(p, p, EARTH_RADIUS_KM), 0.0);

        let q = Coordinates::new(10.0, 10.000_001);
        assert!(haversine_km(p, q, EARTH_RADIUS_KM) > 0.0);
    }

    #[test]
    fn test_reference_distances() {
        let origin = Coordinates::new(0.0, 0.0);
        let inside = haversine_km(origin, Coordinates::new(0.0, 0.04), EARTH_RADIUS_KM);
        let outside = haversine_km(origin, Coordinates::new(0.0, 0.05), EARTH_RADIUS_KM);

        assert!((inside - 4.448).abs() < 0.01, "got {inside}");
        assert!((outside - 5.560).abs() < 0.01, "got {outside}");
    }

    #[test]
    fn test_antipodal_points_do_not_nan() {
        let a = Coordinates::new(0.0, 0.0);
        let b = Coordinates::new(0.0, 180.0);
        let d = haversine_km(a, b, EARTH_RADIUS_KM);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 1e-6);
    }

    #[test]
    fn test_in_range() {
        assert!(Coordinates::new(90.0, -180.0).in_range());
        assert!(!Coordinates::new(90.5, 0.0).in_range());
        assert!(!Coordinates::new(0.0, 181.0).in_range());
        assert!(!Coordinates::new(f64::NAN, 0.0).in_range());
        assert!(Coordinates::new(0.0, 0.0).is_null_island());
    }

    #[test]
    fn test_max_pairwise() {
        let points = [
            Coordinates::new(10.0, 10.0),
            Coordinates::new(10.0, 10.01),
            Coordinates::new(10.0, 10.005),
        ];
        let max = max_pairwise_km(&points, EARTH_RADIUS_KM);
        let ends = haversine_km(points[0], points[1], EARTH_RADIUS_KM);
        assert!((max - ends).abs() < TOLERANCE);

        assert_eq!(max_pairwise_km(&points[..1], EARTH_RADIUS_KM), 0.0);
    }
}
