//! Terrain line-of-sight test.
//!
//! Samples a fixed number of points along the great-circle path between two
//! antennas. At each sample the test compares the linearly interpolated
//! line-of-sight height against the terrain, corrected for Earth curvature
//! (parabolic approximation scaled by an atmospheric refraction k-factor),
//! and requires a configurable fraction of the first Fresnel zone to be
//! clear. Samples with unknown elevation are assumed clear (fail-open):
//! missing terrain data must not block a link.

use crate::elevation::{ElevationCache, ElevationSource};
use crate::geo::{LatLng, EARTH_RADIUS_KM};

/// Speed of light in m/s, for wavelength from frequency.
const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LosConfig {
    /// Interior profile samples per path.
    pub sample_count: usize,
    /// Carrier frequency, for the Fresnel-zone radius.
    pub frequency_hz: f64,
    /// Atmospheric refraction k-factor (4/3 standard atmosphere).
    pub k_factor: f64,
    /// Fraction of the first Fresnel radius that must be unobstructed.
    pub clearance_fraction: f64,
    /// Antenna height above ground at both endpoints, meters.
    pub antenna_height_m: f64,
}

impl Default for LosConfig {
    fn default() -> Self {
        Self {
            sample_count: 64,
            frequency_hz: 915.0e6,
            k_factor: 4.0 / 3.0,
            clearance_fraction: 0.6,
            antenna_height_m: 10.0,
        }
    }
}

/// The first profile sample that violated the clearance requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstructionSample {
    /// Index of the sample along the path (0 = nearest the start).
    pub index: usize,
    pub position: LatLng,
    /// Height of the ray above the corrected terrain, meters (may be negative).
    pub clearance_m: f64,
    /// Clearance the Fresnel criterion required at this sample, meters.
    pub required_m: f64,
}

/// Outcome of a line-of-sight test.
#[derive(Debug, Clone, PartialEq)]
pub struct LosResult {
    pub clear: bool,
    /// Minimum clearance observed over the profile, meters.
    pub worst_clearance_m: f64,
    pub obstruction: Option<ObstructionSample>,
}

impl LosResult {
    fn unobstructed() -> Self {
        Self { clear: true, worst_clearance_m: f64::INFINITY, obstruction: None }
    }
}

/// Fresnel-zone line-of-sight calculator over a cached elevation source.
#[derive(Debug)]
pub struct LosCalculator<S> {
    config: LosConfig,
    cache: ElevationCache<S>,
}

impl<S: ElevationSource> LosCalculator<S> {
    pub fn new(config: LosConfig, cache: ElevationCache<S>) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &LosConfig {
        &self.config
    }

    /// Test the path between two antennas.
    pub async fn check(&mut self, a: &LatLng, b: &LatLng) -> LosResult {
        let total_m = a.distance_km(b) * 1000.0;
        if total_m < 1.0 {
            return LosResult::unobstructed();
        }

        let samples = self.config.sample_count.max(1);
        // Endpoints first, then the interior profile, fetched as one batch.
        let mut points = Vec::with_capacity(samples + 2);
        points.push(*a);
        points.push(*b);
        for i in 1..=samples {
            let f = i as f64 / (samples + 1) as f64;
            points.push(a.intermediate(b, f));
        }
        let elevations = self.cache.get_many(&points).await;

        // Unknown endpoint ground defaults to 0; the fail-open rule below
        // covers the interior samples.
        let height_a = elevations[0].unwrap_or(0.0) + self.config.antenna_height_m;
        let height_b = elevations[1].unwrap_or(0.0) + self.config.antenna_height_m;

        let wavelength_m = SPEED_OF_LIGHT_M_S / self.config.frequency_hz;
        let effective_radius_m = self.config.k_factor * EARTH_RADIUS_KM * 1000.0;

        let mut result = LosResult::unobstructed();
        for i in 1..=samples {
            let ground = match elevations[i + 1] {
                Some(e) => e,
                None => continue, // unknown terrain is assumed clear
            };
            let f = i as f64 / (samples + 1) as f64;
            let d1 = total_m * f;
            let d2 = total_m - d1;

            let los_height = height_a + (height_b - height_a) * f;
            let curvature = d1 * d2 / (2.0 * effective_radius_m);
            let fresnel_radius = (wavelength_m * d1 * d2 / total_m).sqrt();

            let clearance = los_height - (ground + curvature);
            let required = fresnel_radius * self.config.clearance_fraction;

            result.worst_clearance_m = result.worst_clearance_m.min(clearance);
            if clearance < required {
                result.clear = false;
                if result.obstruction.is_none() {
                    result.obstruction = Some(ObstructionSample {
                        index: i - 1,
                        position: points[i + 1],
                        clearance_m: clearance,
                        required_m: required,
                    });
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::{ConstantElevation, ElevationCacheConfig};
    use async_trait::async_trait;

    fn calculator<S: ElevationSource>(source: S, config: LosConfig) -> LosCalculator<S> {
        LosCalculator::new(config, ElevationCache::new(source, ElevationCacheConfig::default()))
    }

    fn path_km(km: f64) -> (LatLng, LatLng) {
        let a = LatLng::new(47.0, -120.0);
        (a, a.destination(90.0, km))
    }

    /// Flat terrain with one ridge across a longitude band.
    struct Ridge {
        center_lng: f64,
        half_width_deg: f64,
        height_m: f64,
    }

    #[async_trait]
    impl ElevationSource for Ridge {
        async fn elevations(&self, points: &[LatLng]) -> Vec<Option<f64>> {
            points
                .iter()
                .map(|p| {
                    if (p.lng - self.center_lng).abs() < self.half_width_deg {
                        Some(self.height_m)
                    } else {
                        Some(0.0)
                    }
                })
                .collect()
        }
    }

    /// Source with no data at all.
    struct NoData;

    #[async_trait]
    impl ElevationSource for NoData {
        async fn elevations(&self, points: &[LatLng]) -> Vec<Option<f64>> {
            vec![None; points.len()]
        }
    }

    #[tokio::test]
    async fn test_short_flat_path_is_clear() {
        let mut calc = calculator(ConstantElevation(0.0), LosConfig::default());
        let (a, b) = path_km(1.0);
        let result = calc.check(&a, &b).await;
        assert!(result.clear);
        assert!(result.obstruction.is_none());
        assert!(result.worst_clearance_m > 0.0);
    }

    #[tokio::test]
    async fn test_ridge_obstructs_and_reports_first_sample() {
        let (a, b) = path_km(10.0);
        let mid_lng = (a.lng + b.lng) / 2.0;
        let ridge = Ridge { center_lng: mid_lng, half_width_deg: 0.01, height_m: 80.0 };
        let mut calc = calculator(ridge, LosConfig::default());

        let result = calc.check(&a, &b).await;
        assert!(!result.clear);
        let obstruction = result.obstruction.expect("obstructing sample");
        assert!(obstruction.clearance_m < obstruction.required_m);
        assert!(result.worst_clearance_m < 0.0);
    }

    #[tokio::test]
    async fn test_earth_curvature_blocks_long_flat_path() {
        // 50 km of flat ground: the bulge at midpoint (~37 m with k=4/3)
        // exceeds 30 m antennas even before the Fresnel requirement.
        let config = LosConfig { antenna_height_m: 30.0, ..Default::default() };
        let mut calc = calculator(ConstantElevation(0.0), config);
        let (a, b) = path_km(50.0);
        let result = calc.check(&a, &b).await;
        assert!(!result.clear);
    }

    #[tokio::test]
    async fn test_unknown_terrain_fails_open() {
        let mut calc = calculator(NoData, LosConfig::default());
        let (a, b) = path_km(20.0);
        let result = calc.check(&a, &b).await;
        assert!(result.clear);
        assert!(result.obstruction.is_none());
    }

    #[tokio::test]
    async fn test_zero_length_path_is_clear() {
        let mut calc = calculator(ConstantElevation(500.0), LosConfig::default());
        let a = LatLng::new(47.0, -120.0);
        let result = calc.check(&a, &a).await;
        assert!(result.clear);
    }
}
