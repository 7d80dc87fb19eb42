//! RF propagation model and link-budget computation.
//!
//! The medium uses a log-distance path-loss model:
//!
//! ```text
//! PL(d) = PL(d0) + 10 * n * log10(d / d0)
//! ```
//!
//! clamped to the reference loss below the reference distance. RSSI is
//! `tx_power - PL(d)`, optionally perturbed by log-normal fading drawn from a
//! forked PRNG stream so fading never disturbs other consumers' sequences.
//! The terrain-aware path additionally consults the line-of-sight calculator
//! and applies a flat obstruction penalty when the path is blocked.

use crate::elevation::ElevationSource;
use crate::geo::LatLng;
use crate::los::LosCalculator;
use crate::rng::SimRng;
use serde::{Deserialize, Serialize};

/// Speed of light, kilometers per millisecond.
pub const SPEED_OF_LIGHT_KM_PER_MS: f64 = 299.792458;

/// Propagation model parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Path loss exponent n (2.0 free space, 2.7-3.5 suburban/urban).
    pub path_loss_exponent: f64,
    /// Reference distance d0 in km (1 m).
    pub reference_distance_km: f64,
    /// PL(d0) in dB (free-space loss at 1 m, ~915 MHz).
    pub reference_loss_db: f64,
    /// Receiver sensitivity in dBm.
    pub rx_sensitivity_dbm: f64,
    /// Thermal noise floor in dBm.
    pub noise_floor_dbm: f64,
    /// Minimum SNR for successful reception in dB.
    pub min_snr_db: f64,
    /// Log-normal fading standard deviation in dB; 0 disables fading.
    pub fading_sigma_db: f64,
    /// Flat penalty applied when terrain blocks line of sight, dB.
    pub obstruction_loss_db: f64,
    /// Fixed per-packet airtime overhead (preamble + header), ms.
    pub airtime_overhead_ms: f64,
    /// Payload bitrate in kbit/s, for airtime estimates.
    pub bitrate_kbps: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            path_loss_exponent: 2.8,
            reference_distance_km: 0.001,
            reference_loss_db: 31.7,
            rx_sensitivity_dbm: -110.0,
            noise_floor_dbm: -120.0,
            min_snr_db: -20.0,
            fading_sigma_db: 0.0,
            obstruction_loss_db: 30.0,
            airtime_overhead_ms: 12.0,
            bitrate_kbps: 5.0,
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.path_loss_exponent <= 0.0 {
            return Err(crate::MeshSimError::InvalidConfig(
                "path_loss_exponent must be positive".into(),
            ));
        }
        if self.reference_distance_km <= 0.0 {
            return Err(crate::MeshSimError::InvalidConfig(
                "reference_distance_km must be positive".into(),
            ));
        }
        if self.bitrate_kbps <= 0.0 {
            return Err(crate::MeshSimError::InvalidConfig(
                "bitrate_kbps must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of a node as the medium sees it.
#[derive(Debug, Clone)]
pub struct RadioPeer {
    pub id: String,
    pub position: LatLng,
    pub tx_power_dbm: f64,
}

/// Computed link characteristics between two positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkBudget {
    pub distance_km: f64,
    pub path_loss_db: f64,
    pub rssi_dbm: f64,
    pub snr_db: f64,
    pub can_receive: bool,
    /// Set only by the terrain-aware path.
    pub has_line_of_sight: Option<bool>,
    /// Obstruction penalty applied, if the terrain path ran.
    pub terrain_loss_db: Option<f64>,
}

/// One successful reception produced by [`RadioMedium::transmit`].
#[derive(Debug, Clone)]
pub struct Reception {
    pub node_id: String,
    pub rssi_dbm: f64,
    pub snr_db: f64,
    pub delay_ms: f64,
}

/// The shared radio channel.
#[derive(Debug)]
pub struct RadioMedium {
    config: RadioConfig,
    /// Fading stream, forked from the engine's master PRNG.
    rng: SimRng,
}

impl RadioMedium {
    pub fn new(config: RadioConfig, rng: SimRng) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Restore the fading stream to its initial sequence.
    pub fn reset_rng(&mut self) {
        self.rng.reset();
    }

    /// Deterministic log-distance path loss, clamped at the reference loss
    /// below the reference distance.
    pub fn path_loss_db(&self, distance_km: f64) -> f64 {
        let c = &self.config;
        if distance_km <= c.reference_distance_km {
            return c.reference_loss_db;
        }
        c.reference_loss_db
            + 10.0 * c.path_loss_exponent * (distance_km / c.reference_distance_km).log10()
    }

    /// Propagation delay for a distance; sub-millisecond delays clamp to 0.
    pub fn propagation_delay_ms(&self, distance_km: f64) -> f64 {
        let delay = distance_km / SPEED_OF_LIGHT_KM_PER_MS;
        if delay < 1.0 {
            0.0
        } else {
            delay
        }
    }

    /// Time on air for a payload of `payload_len` bytes.
    pub fn airtime_ms(&self, payload_len: usize) -> f64 {
        self.config.airtime_overhead_ms + (payload_len as f64 * 8.0) / self.config.bitrate_kbps
    }

    /// Synchronous link budget between two positions.
    ///
    /// Draws one fading sample when fading is enabled; `can_receive` is
    /// judged on the faded RSSI.
    pub fn link_budget(&mut self, tx_power_dbm: f64, from: &LatLng, to: &LatLng) -> LinkBudget {
        let distance_km = from.distance_km(to);
        let path_loss_db = self.path_loss_db(distance_km);
        let rssi_dbm = tx_power_dbm - path_loss_db
            + self.rng.next_gaussian(0.0, self.config.fading_sigma_db);
        self.budget_from_rssi(distance_km, path_loss_db, rssi_dbm)
    }

    /// Terrain-aware link budget: runs the line-of-sight test and applies
    /// the flat obstruction penalty when the path is blocked, re-judging
    /// `can_receive` against the penalized RSSI.
    pub async fn link_budget_with_terrain<S: ElevationSource>(
        &mut self,
        tx_power_dbm: f64,
        from: &LatLng,
        to: &LatLng,
        los: &mut LosCalculator<S>,
    ) -> LinkBudget {
        let mut budget = self.link_budget(tx_power_dbm, from, to);
        let result = los.check(from, to).await;

        let penalty = if result.clear {
            0.0
        } else {
            self.config.obstruction_loss_db
        };
        budget.path_loss_db += penalty;
        budget.rssi_dbm -= penalty;
        budget.snr_db = budget.rssi_dbm - self.config.noise_floor_dbm;
        budget.can_receive = self.receivable(budget.rssi_dbm, budget.snr_db);
        budget.has_line_of_sight = Some(result.clear);
        budget.terrain_loss_db = Some(penalty);
        budget
    }

    /// Compute receptions for one transmission.
    ///
    /// Every candidate other than the sender gets a link budget and a
    /// propagation delay; only candidates whose budget allows reception are
    /// returned. The reported RSSI takes a second, separate fading draw from
    /// the link-budget RSSI: the admission sample and the measured sample
    /// are intentionally decorrelated.
    pub fn transmit(&mut self, sender: &RadioPeer, candidates: &[RadioPeer]) -> Vec<Reception> {
        let mut reached = Vec::new();
        for candidate in candidates {
            if candidate.id == sender.id {
                continue;
            }
            let budget =
                self.link_budget(sender.tx_power_dbm, &sender.position, &candidate.position);
            if !budget.can_receive {
                continue;
            }
            let measured_rssi = sender.tx_power_dbm - self.path_loss_db(budget.distance_km)
                + self.rng.next_gaussian(0.0, self.config.fading_sigma_db);
            reached.push(Reception {
                node_id: candidate.id.clone(),
                rssi_dbm: measured_rssi,
                snr_db: measured_rssi - self.config.noise_floor_dbm,
                delay_ms: self.propagation_delay_ms(budget.distance_km),
            });
        }
        reached
    }

    fn receivable(&self, rssi_dbm: f64, snr_db: f64) -> bool {
        rssi_dbm >= self.config.rx_sensitivity_dbm && snr_db >= self.config.min_snr_db
    }

    fn budget_from_rssi(&self, distance_km: f64, path_loss_db: f64, rssi_dbm: f64) -> LinkBudget {
        let snr_db = rssi_dbm - self.config.noise_floor_dbm;
        LinkBudget {
            distance_km,
            path_loss_db,
            rssi_dbm,
            snr_db,
            can_receive: self.receivable(rssi_dbm, snr_db),
            has_line_of_sight: None,
            terrain_loss_db: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn medium(config: RadioConfig) -> RadioMedium {
        RadioMedium::new(config, SimRng::new(42)).unwrap()
    }

    fn points_km_apart(km: f64) -> (LatLng, LatLng) {
        let a = LatLng::new(47.0, -120.0);
        (a, a.destination(90.0, km))
    }

    #[test]
    fn test_rssi_decreases_with_distance() {
        let mut m = medium(RadioConfig::default());
        let mut last = f64::INFINITY;
        for km in [0.1, 0.5, 1.0, 5.0, 20.0, 100.0] {
            let (a, b) = points_km_apart(km);
            let budget = m.link_budget(20.0, &a, &b);
            assert!(budget.rssi_dbm < last, "{km} km: {}", budget.rssi_dbm);
            last = budget.rssi_dbm;
        }
    }

    #[test]
    fn test_higher_exponent_never_raises_rssi() {
        let (a, b) = points_km_apart(3.0);
        let mut last = f64::INFINITY;
        for n in [2.0, 2.5, 3.0, 4.0] {
            let mut m = medium(RadioConfig { path_loss_exponent: n, ..Default::default() });
            let rssi = m.link_budget(20.0, &a, &b).rssi_dbm;
            assert!(rssi <= last, "n={n}");
            last = rssi;
        }
    }

    #[test]
    fn test_loss_clamped_below_reference_distance() {
        let m = medium(RadioConfig::default());
        assert_eq!(m.path_loss_db(0.0005), m.config.reference_loss_db);
        assert_eq!(m.path_loss_db(0.0), m.config.reference_loss_db);
    }

    #[test]
    fn test_short_link_receivable_long_link_not() {
        let mut m = medium(RadioConfig::default());

        let (a, b) = points_km_apart(1.2);
        assert!(m.link_budget(20.0, &a, &b).can_receive);

        let mut strict = medium(RadioConfig {
            rx_sensitivity_dbm: -100.0,
            ..Default::default()
        });
        let (a, b) = points_km_apart(111.0);
        assert!(!strict.link_budget(20.0, &a, &b).can_receive);
    }

    #[test]
    fn test_fading_is_seed_reproducible() {
        let cfg = RadioConfig { fading_sigma_db: 6.0, ..Default::default() };
        let mut m1 = RadioMedium::new(cfg.clone(), SimRng::new(7)).unwrap();
        let mut m2 = RadioMedium::new(cfg, SimRng::new(7)).unwrap();
        let (a, b) = points_km_apart(2.0);
        for _ in 0..20 {
            assert_eq!(m1.link_budget(20.0, &a, &b).rssi_dbm, m2.link_budget(20.0, &a, &b).rssi_dbm);
        }
    }

    #[test]
    fn test_propagation_delay_clamps_sub_millisecond() {
        let m = medium(RadioConfig::default());
        assert_eq!(m.propagation_delay_ms(100.0), 0.0);
        let delay = m.propagation_delay_ms(600.0);
        assert!((delay - 2.0014).abs() < 0.01, "{delay}");
    }

    #[test]
    fn test_transmit_skips_sender_and_unreachable() {
        let mut m = medium(RadioConfig::default());
        let base = LatLng::new(47.0, -120.0);
        let sender = RadioPeer { id: "a".into(), position: base, tx_power_dbm: 20.0 };
        let candidates = vec![
            sender.clone(),
            RadioPeer { id: "near".into(), position: base.destination(0.0, 1.0), tx_power_dbm: 20.0 },
            RadioPeer { id: "far".into(), position: base.destination(0.0, 500.0), tx_power_dbm: 20.0 },
        ];
        let reached = m.transmit(&sender, &candidates);
        assert_eq!(reached.len(), 1);
        assert_eq!(reached[0].node_id, "near");
        assert_eq!(reached[0].delay_ms, 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = RadioConfig { path_loss_exponent: 0.0, ..Default::default() };
        assert!(RadioMedium::new(cfg, SimRng::new(1)).is_err());
    }

    #[test]
    fn test_airtime_grows_with_payload() {
        let m = medium(RadioConfig::default());
        assert!(m.airtime_ms(200) > m.airtime_ms(10));
        assert!(m.airtime_ms(0) > 0.0);
    }
}
