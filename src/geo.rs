use crate::meshtastic::Position;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two lat/lon pairs in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Distance between two positions, `None` unless both have coordinates.
pub fn distance_km(a: &Position, b: &Position) -> Option<f64> {
    let (lat1, lon1) = a.coordinates()?;
    let (lat2, lon2) = b.coordinates()?;
    Some(haversine_km(lat1, lon1, lat2, lon2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lon: f64) -> Position {
        Position {
            latitude_i: Some((lat * 1e7) as i32),
            longitude_i: Some((lon * 1e7) as i32),
            ..Default::default()
        }
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.05, "{d}");
    }

    #[test]
    fn missing_coordinates_yield_none() {
        let a = pos(37.0, -122.0);
        assert!(distance_km(&a, &Position::default()).is_none());
        assert!(distance_km(&a, &a).unwrap() < 1e-9);
    }
}
