use crate::bounds::LatLng;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres.
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Proximity bonus: <5 km → 20, <10 km → 10, <20 km → 5, otherwise 0.
pub fn distance_boost(distance_km: f64) -> f64 {
    if distance_km < 5.0 {
        20.0
    } else if distance_km < 10.0 {
        10.0
    } else if distance_km < 20.0 {
        5.0
    } else {
        0.0
    }
}

pub fn priority_score(base_priority: f64, distance_km: f64) -> f64 {
    base_priority + distance_boost(distance_km)
}

#[cfg(test)]
mod tests {
    use super::{distance_boost, haversine_km, priority_score};
    use crate::bounds::LatLng;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        let diff = (actual - expected).abs();
        assert!(
            diff < tolerance,
            "expected {expected}, got {actual} (diff: {diff})"
        );
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = LatLng::new(44.05, 12.55);
        assert_close(haversine_km(p, p), 0.0, 1e-12);
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let a = LatLng::new(44.0, 12.5);
        let b = LatLng::new(45.0, 12.5);
        assert_close(haversine_km(a, b), 111.19, 0.01);
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = LatLng::new(44.0622, 12.5683);
        let b = LatLng::new(43.9, 12.9);
        assert_close(haversine_km(a, b), haversine_km(b, a), 1e-9);
    }

    #[test]
    fn boost_steps_at_thresholds() {
        assert_eq!(distance_boost(0.0), 20.0);
        assert_eq!(distance_boost(4.999), 20.0);
        assert_eq!(distance_boost(5.0), 10.0);
        assert_eq!(distance_boost(9.9), 10.0);
        assert_eq!(distance_boost(10.0), 5.0);
        assert_eq!(distance_boost(19.9), 5.0);
        assert_eq!(distance_boost(20.0), 0.0);
        assert_eq!(priority_score(7.0, 3.0), 27.0);
    }
}
