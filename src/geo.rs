// SPDX-License-Identifier: MIT

//! Great-circle distance math for the ping stream.
//!
//! The persister integrates per-session distance with the haversine formula
//! on a spherical Earth. Redis performs its own haversine for the live geo
//! index; this module exists for the durable aggregates, where the math must
//! be reproducible independent of the cache.

/// Mean Earth radius in meters (spherical model).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two WGS84 points.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Sum of great-circle distances between successive (lat, lon) points.
/// Fewer than two points integrate to zero.
pub fn path_distance_m(points: &[(f64, f64)]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance_m(w[0].0, w[0].1, w[1].0, w[1].1))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance_for_same_point() {
        assert_eq!(haversine_distance_m(39.6042, -105.9538, 39.6042, -105.9538), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // One degree of latitude is R * pi / 180 on a sphere.
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        let d = haversine_distance_m(39.0, -105.0, 40.0, -105.0);
        assert!((d - expected).abs() < 1.0, "got {} expected {}", d, expected);
    }

    #[test]
    fn test_short_distance_near_ski_resort() {
        // The two points from the proximity scenario: ~6 m apart at Keystone.
        let d = haversine_distance_m(39.6042, -105.9538, 39.60425, -105.95385);
        assert!(d > 3.0 && d < 10.0, "expected a handful of meters, got {}", d);
    }

    #[test]
    fn test_known_distance_within_one_meter() {
        // 0.001 degrees of latitude at constant longitude: 111.19 m on the
        // spherical model. The implementation must agree to within 1 m for
        // inputs up to 10 km.
        let expected = EARTH_RADIUS_M * (0.001f64).to_radians();
        let d = haversine_distance_m(46.0, 7.0, 46.001, 7.0);
        assert!((d - expected).abs() < 1.0);
    }

    #[test]
    fn test_path_distance_sums_segments() {
        // Three points, each ~111.19 m apart along a meridian.
        let points = [(46.0, 7.0), (46.001, 7.0), (46.002, 7.0)];
        let total = path_distance_m(&points);
        let segment = haversine_distance_m(46.0, 7.0, 46.001, 7.0);
        assert!((total - 2.0 * segment).abs() < 0.01);
    }

    #[test]
    fn test_path_distance_degenerate_inputs() {
        assert_eq!(path_distance_m(&[]), 0.0);
        assert_eq!(path_distance_m(&[(46.0, 7.0)]), 0.0);
    }
}
