use crate::error::AppError;
use crate::models::user::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.min(1.0).sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn displacement_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * 1_000.0
}

/// Range check shared by every coordinate the service accepts.
pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !point.lat.is_finite() || !point.lng.is_finite() {
        return Err(AppError::BadRequest(
            "coordinates must be finite numbers".to_string(),
        ));
    }
    if point.lat.abs() > 90.0 {
        return Err(AppError::BadRequest(format!(
            "latitude {} out of range [-90, 90]",
            point.lat
        )));
    }
    if point.lng.abs() > 180.0 {
        return Err(AppError::BadRequest(format!(
            "longitude {} out of range [-180, 180]",
            point.lng
        )));
    }
    Ok(())
}

/// Delivery addresses additionally reject the (0, 0) placeholder a client
/// sends when geolocation failed.
pub fn validate_delivery_point(point: &GeoPoint) -> Result<(), AppError> {
    validate_point(point)?;
    if point.lat == 0.0 && point.lng == 0.0 {
        return Err(AppError::BadRequest(
            "invalid delivery location: (0, 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{displacement_m, haversine_km, validate_delivery_point, validate_point};
    use crate::models::user::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 28.6139,
            lng: 77.2090,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn hundredth_of_a_degree_latitude_is_about_1_1_km() {
        let a = GeoPoint { lat: 10.0, lng: 20.0 };
        let b = GeoPoint { lat: 10.01, lng: 20.0 };
        assert!((displacement_m(&a, &b) - 1_112.0).abs() < 5.0);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(validate_point(&GeoPoint { lat: 90.5, lng: 0.0 }).is_err());
        assert!(validate_point(&GeoPoint { lat: 0.0, lng: -180.1 }).is_err());
        assert!(validate_point(&GeoPoint { lat: f64::NAN, lng: 1.0 }).is_err());
        assert!(validate_point(&GeoPoint { lat: -90.0, lng: 180.0 }).is_ok());
    }

    #[test]
    fn delivery_point_rejects_null_island() {
        assert!(validate_delivery_point(&GeoPoint { lat: 0.0, lng: 0.0 }).is_err());
        assert!(validate_point(&GeoPoint { lat: 0.0, lng: 0.0 }).is_ok());
        assert!(validate_delivery_point(&GeoPoint { lat: 0.0, lng: 12.5 }).is_ok());
    }
}
