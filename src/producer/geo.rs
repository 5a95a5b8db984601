//! Random coordinates around a center point

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// WGS84 coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
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

    /// Great-circle distance in kilometres (haversine)
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Pick a point uniformly by bearing and distance within `radius_km` of
/// `center`, following the great circle from the center.
pub fn random_coordinate<R: Rng + ?Sized>(center: GeoPoint, radius_km: f64, rng: &mut R) -> GeoPoint {
    let bearing = rng.gen::<f64>() * std::f64::consts::TAU;
    let distance = rng.gen::<f64>() * (radius_km / EARTH_RADIUS_KM);

    let lat1 = center.latitude.to_radians();
    let lon1 = center.longitude.to_radians();

    let lat2 = (lat1.sin() * distance.cos() + lat1.cos() * distance.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * distance.sin() * lat1.cos())
            .atan2(distance.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), lon2.to_degrees())
}
