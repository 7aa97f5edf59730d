//! Spherical-earth distance helpers shared by every stage

/// Mean Earth radius used for great-circle distances (km)
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude (and of longitude at the equator)
pub const KM_PER_DEGREE: f64 = 111.32;

/// Lower bound on cos(latitude) so polar rows never divide by zero
const MIN_COS_LAT: f64 = 1e-6;

/// Great-circle distance between two points in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Planar (equirectangular) distance approximation in kilometres.
///
/// Accurate to well under a percent at the scales used for candidate
/// prefiltering and several times cheaper than [`haversine_km`].
pub fn equirectangular_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let mean_lat = ((lat1 + lat2) / 2.0).to_radians();
    let x = (lon2 - lon1) * mean_lat.cos() * KM_PER_DEGREE;
    let y = (lat2 - lat1) * KM_PER_DEGREE;
    (x * x + y * y).sqrt()
}

/// Convert a north-south distance to degrees of latitude
pub fn km_to_lat_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Convert an east-west distance to degrees of longitude at `latitude`,
/// compensating for meridian convergence
pub fn km_to_lon_degrees(km: f64, latitude: f64) -> f64 {
    let cos_lat = latitude.to_radians().cos().max(MIN_COS_LAT);
    km / (KM_PER_DEGREE * cos_lat)
}
