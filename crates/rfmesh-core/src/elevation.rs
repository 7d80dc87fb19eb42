//! Terrain elevation lookup with caching.
//!
//! Elevation data comes from an external batch source. Lookups are
//! cache-first with grid-quantized keys; misses are batch-fetched up to the
//! provider limit, behind a bounded timeout. Failures never raise: a point
//! the source cannot resolve is simply unknown (`None`), and the
//! line-of-sight logic treats unknown terrain as clear.

use crate::geo::LatLng;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// External provider of terrain heights.
///
/// `elevations` returns one entry per input point (parallel arrays) and must
/// never fail; a point the provider cannot resolve is `None`.
#[async_trait]
pub trait ElevationSource: Send + Sync {
    async fn elevations(&self, points: &[LatLng]) -> Vec<Option<f64>>;
}

/// Source returning one fixed elevation everywhere. The default terrain.
#[derive(Debug, Clone, Copy)]
pub struct ConstantElevation(pub f64);

#[async_trait]
impl ElevationSource for ConstantElevation {
    async fn elevations(&self, points: &[LatLng]) -> Vec<Option<f64>> {
        vec![Some(self.0); points.len()]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationCacheConfig {
    /// Cache key grid step in degrees (~55 m at the default).
    pub quantum_deg: f64,
    /// Entries older than this are refetched.
    pub max_age_secs: u64,
    /// Provider batch limit; larger requests are chunked.
    pub batch_limit: usize,
    /// Per-batch fetch timeout; a timeout yields unknowns, never an error.
    pub fetch_timeout_ms: u64,
    /// Expired-entry sweep threshold.
    pub max_entries: usize,
}

impl Default for ElevationCacheConfig {
    fn default() -> Self {
        Self {
            quantum_deg: 0.0005,
            max_age_secs: 3600,
            batch_limit: 100,
            fetch_timeout_ms: 5000,
            max_entries: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    elevation: f64,
    fetched_at: Instant,
}

/// Grid-quantized, age-evicting elevation cache over a batch source.
#[derive(Debug)]
pub struct ElevationCache<S> {
    source: S,
    config: ElevationCacheConfig,
    entries: HashMap<(i64, i64), Entry>,
}

impl<S: ElevationSource> ElevationCache<S> {
    pub fn new(source: S, config: ElevationCacheConfig) -> Self {
        Self { source, config, entries: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(&self, point: &LatLng) -> (i64, i64) {
        let q = self.config.quantum_deg;
        ((point.lat / q).round() as i64, (point.lng / q).round() as i64)
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.config.max_age_secs)
    }

    /// Elevations for all points, cache-first. Unknown stays unknown; only
    /// resolved samples enter the cache, so failed points retry next call.
    pub async fn get_many(&mut self, points: &[LatLng]) -> Vec<Option<f64>> {
        if self.entries.len() > self.config.max_entries {
            self.sweep_expired();
        }

        let max_age = self.max_age();
        let mut results: Vec<Option<f64>> = vec![None; points.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, point) in points.iter().enumerate() {
            let key = self.key(point);
            match self.entries.get(&key) {
                Some(entry) if entry.fetched_at.elapsed() <= max_age => {
                    results[i] = Some(entry.elevation);
                }
                _ => misses.push(i),
            }
        }

        for chunk in misses.chunks(self.config.batch_limit.max(1)) {
            let chunk_points: Vec<LatLng> = chunk.iter().map(|&i| points[i]).collect();
            let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
            let fetched = match tokio::time::timeout(timeout, self.source.elevations(&chunk_points)).await {
                Ok(values) if values.len() == chunk_points.len() => values,
                Ok(values) => {
                    warn!(
                        expected = chunk_points.len(),
                        got = values.len(),
                        "elevation source returned malformed batch, treating as unknown"
                    );
                    continue;
                }
                Err(_) => {
                    warn!(points = chunk_points.len(), "elevation fetch timed out");
                    continue;
                }
            };
            let now = Instant::now();
            for (&i, value) in chunk.iter().zip(fetched) {
                if let Some(elevation) = value {
                    let key = self.key(&points[i]);
                    self.entries.insert(key, Entry { elevation, fetched_at: now });
                    results[i] = Some(elevation);
                }
            }
        }

        results
    }

    /// Drop entries older than the configured age.
    pub fn sweep_expired(&mut self) {
        let max_age = self.max_age();
        self.entries.retain(|_, e| e.fetched_at.elapsed() <= max_age);
    }
}
