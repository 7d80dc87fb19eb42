//! Geographic primitives: great-circle math and map projections.
//!
//! All distances are kilometers on a spherical Earth, bearings are degrees
//! clockwise from true north. The projections map into a normalized unit
//! square so the addressing grid can subdivide it without caring which
//! projection produced the coordinates.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers (spherical model).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude bound of the Web-Mercator projection.
const MERCATOR_MAX_LAT: f64 = 85.05112878;

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to another point (haversine), in km.
    pub fn distance_km(&self, other: &LatLng) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }

    /// Initial bearing toward another point, degrees in [0, 360).
    pub fn bearing_to(&self, other: &LatLng) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let y = d_lambda.sin() * phi2.cos();
        let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();
        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }

    /// Destination point after traveling `distance_km` along `bearing_deg`
    /// on a great circle (spherical direct geodesic).
    pub fn destination(&self, bearing_deg: f64, distance_km: f64) -> LatLng {
        let delta = distance_km / EARTH_RADIUS_KM;
        let theta = bearing_deg.to_radians();
        let phi1 = self.lat.to_radians();
        let lambda1 = self.lng.to_radians();

        let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
        let lambda2 = lambda1
            + (theta.sin() * delta.sin() * phi1.cos())
                .atan2(delta.cos() - phi1.sin() * phi2.sin());

        LatLng {
            lat: phi2.to_degrees(),
            lng: normalize_lng(lambda2.to_degrees()),
        }
    }

    /// Point at fraction `f` (0 = self, 1 = other) along the great circle.
    ///
    /// Falls back to the start point when the endpoints coincide (the
    /// interpolation is undefined there).
    pub fn intermediate(&self, other: &LatLng, f: f64) -> LatLng {
        let delta = self.distance_km(other) / EARTH_RADIUS_KM;
        if delta < 1e-12 {
            return *self;
        }
        let phi1 = self.lat.to_radians();
        let lambda1 = self.lng.to_radians();
        let phi2 = other.lat.to_radians();
        let lambda2 = other.lng.to_radians();

        let a = ((1.0 - f) * delta).sin() / delta.sin();
        let b = (f * delta).sin() / delta.sin();
        let x = a * phi1.cos() * lambda1.cos() + b * phi2.cos() * lambda2.cos();
        let y = a * phi1.cos() * lambda1.sin() + b * phi2.cos() * lambda2.sin();
        let z = a * phi1.sin() + b * phi2.sin();

        LatLng {
            lat: z.atan2((x * x + y * y).sqrt()).to_degrees(),
            lng: y.atan2(x).to_degrees(),
        }
    }
}

/// Wrap a longitude into [-180, 180).
fn normalize_lng(lng: f64) -> f64 {
    let mut l = (lng + 180.0) % 360.0;
    if l < 0.0 {
        l += 360.0;
    }
    l - 180.0
}

/// Map projection used by the addressing grid.
///
/// Both project into a normalized unit square: x grows eastward from the
/// antimeridian, y grows southward from the north edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Projection {
    #[default]
    WebMercator,
    Equirectangular,
}

impl Projection {
    /// Project to normalized (x, y), each clamped into [0, 1).
    pub fn project(&self, point: &LatLng) -> (f64, f64) {
        let x = (point.lng + 180.0) / 360.0;
        let y = match self {
            Projection::WebMercator => {
                let lat = point.lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
                let phi = lat.to_radians();
                (1.0 - ((phi.tan() + 1.0 / phi.cos()).ln() / std::f64::consts::PI)) / 2.0
            }
            Projection::Equirectangular => (90.0 - point.lat) / 180.0,
        };
        (clamp_unit(x), clamp_unit(y))
    }

    /// Inverse projection from normalized (x, y) back to lat/lng.
    pub fn unproject(&self, x: f64, y: f64) -> LatLng {
        let lng = x * 360.0 - 180.0;
        let lat = match self {
            Projection::WebMercator => {
                let n = std::f64::consts::PI * (1.0 - 2.0 * y);
                n.sinh().atan().to_degrees()
            }
            Projection::Equirectangular => 90.0 - y * 180.0,
        };
        LatLng { lat, lng }
    }
}

/// Clamp into [0, 1) so grid indices derived from the value stay in range.
fn clamp_unit(v: f64) -> f64 {
    if v < 0.0 {
        0.0
    } else if v >= 1.0 {
        f64::from_bits(1.0f64.to_bits() - 1)
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONDON: LatLng = LatLng { lat: 51.5074, lng: -0.1278 };
    const PARIS: LatLng = LatLng { lat: 48.8566, lng: 2.3522 };

    #[test]
    fn test_haversine_known_distance() {
        let d = LONDON.distance_km(&PARIS);
        assert!((d - 343.5).abs() < 2.0, "London-Paris was {d} km");
        assert_eq!(LONDON.distance_km(&LONDON), 0.0);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = LatLng::new(0.0, 0.0);
        let north = LatLng::new(1.0, 0.0);
        let east = LatLng::new(0.0, 1.0);

        assert!((origin.bearing_to(&north) - 0.0).abs() < 0.01);
        assert!((origin.bearing_to(&east) - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_destination_round_trip() {
        let origin = LatLng::new(47.6, -122.3);
        for bearing in [0.0, 45.0, 90.0, 180.0, 270.0] {
            let dest = origin.destination(bearing, 100.0);
            let back = origin.distance_km(&dest);
            assert!((back - 100.0).abs() < 0.01, "bearing {bearing}: {back} km");
        }
    }

    #[test]
    fn test_intermediate_midpoint() {
        let mid = LONDON.intermediate(&PARIS, 0.5);
        let d1 = LONDON.distance_km(&mid);
        let d2 = mid.distance_km(&PARIS);
        assert!((d1 - d2).abs() < 0.01);
    }

    #[test]
    fn test_mercator_round_trip() {
        let points = [
            LatLng::new(0.0, 0.0),
            LatLng::new(47.6, -122.3),
            LatLng::new(-33.9, 151.2),
            LatLng::new(84.9, 179.9),
        ];
        for p in points {
            let (x, y) = Projection::WebMercator.project(&p);
            let back = Projection::WebMercator.unproject(x, y);
            assert!((back.lat - p.lat).abs() < 1e-6, "{p:?} -> {back:?}");
            assert!((back.lng - p.lng).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mercator_clamps_poles() {
        let (_, y_pole) = Projection::WebMercator.project(&LatLng::new(90.0, 0.0));
        assert!((0.0..1.0).contains(&y_pole));
        let (x, _) = Projection::WebMercator.project(&LatLng::new(0.0, 180.0));
        assert!((0.0..1.0).contains(&x));
    }

    #[test]
    fn test_equirectangular_round_trip() {
        let p = LatLng::new(-45.0, 12.5);
        let (x, y) = Projection::Equirectangular.project(&p);
        let back = Projection::Equirectangular.unproject(x, y);
        assert!((back.lat - p.lat).abs() < 1e-9);
        assert!((back.lng - p.lng).abs() < 1e-9);
    }
}
