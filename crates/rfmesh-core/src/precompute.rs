//! Batch computation of the link graph.
//!
//! The precomputer fills a [`LinkGraph`] with pairwise link budgets so that
//! neighbor and route queries never re-run RF physics. Work is restricted to
//! node pairs within a configurable great-circle distance, processed in
//! batches with progress reporting, and can be repaired incrementally when a
//! single node moves, joins, or leaves. Stale entries can be dropped or
//! recomputed in place. The terrain-aware mode routes every pairwise
//! computation through the asynchronous line-of-sight-checked budget; each
//! batch fully resolves before the next starts, so graph state never
//! interleaves with simulation steps.

use crate::elevation::ElevationSource;
use crate::graph::LinkGraph;
use crate::los::LosCalculator;
use crate::radio::{RadioMedium, RadioPeer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecomputeConfig {
    /// Pairs farther apart than this are skipped entirely.
    pub max_pair_distance_km: f64,
    /// Pairs computed between progress callbacks.
    pub batch_size: usize,
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self { max_pair_distance_km: 50.0, batch_size: 64 }
    }
}

/// Progress callback: (pairs done, pairs total).
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

/// Computes and maintains cached pairwise link budgets.
#[derive(Debug, Clone, Default)]
pub struct LinkPrecomputer {
    config: PrecomputeConfig,
}

impl LinkPrecomputer {
    pub fn new(config: PrecomputeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrecomputeConfig {
        &self.config
    }

    /// All unordered pairs within the distance cutoff, transmitter first.
    ///
    /// The lexically smaller id transmits, so a pair's budget does not
    /// depend on iteration order.
    fn candidate_pairs<'p>(&self, peers: &'p [RadioPeer]) -> Vec<(&'p RadioPeer, &'p RadioPeer)> {
        let mut pairs = Vec::new();
        for (i, a) in peers.iter().enumerate() {
            for b in peers.iter().skip(i + 1) {
                if a.position.distance_km(&b.position) > self.config.max_pair_distance_km {
                    continue;
                }
                if a.id <= b.id {
                    pairs.push((a, b));
                } else {
                    pairs.push((b, a));
                }
            }
        }
        pairs
    }

    /// Compute every in-range pair and store the results. Returns the
    /// number of edges written.
    pub fn precompute_all(
        &self,
        graph: &mut LinkGraph,
        radio: &mut RadioMedium,
        peers: &[RadioPeer],
        now_ms: f64,
        mut progress: Option<Progress<'_>>,
    ) -> usize {
        let pairs = self.candidate_pairs(peers);
        let total = pairs.len();
        graph.begin_update();
        for (done, chunk) in pairs.chunks(self.config.batch_size.max(1)).enumerate() {
            for (tx, rx) in chunk {
                let budget = radio.link_budget(tx.tx_power_dbm, &tx.position, &rx.position);
                graph.insert_edge(&tx.id, &rx.id, &budget, now_ms);
            }
            let finished = (done * self.config.batch_size.max(1) + chunk.len()).min(total);
            if let Some(report) = progress.as_deref_mut() {
                report(finished, total);
            }
        }
        graph.end_update();
        debug!(pairs = total, "link precompute complete");
        total
    }

    /// Terrain-aware variant: every pair goes through the asynchronous,
    /// line-of-sight-checked budget. Batches are serialized; each resolves
    /// fully before the next begins.
    pub async fn precompute_all_with_terrain<S: ElevationSource>(
        &self,
        graph: &mut LinkGraph,
        radio: &mut RadioMedium,
        peers: &[RadioPeer],
        los: &mut LosCalculator<S>,
        now_ms: f64,
        mut progress: Option<Progress<'_>>,
    ) -> usize {
        let pairs = self.candidate_pairs(peers);
        let total = pairs.len();
        graph.begin_update();
        for (done, chunk) in pairs.chunks(self.config.batch_size.max(1)).enumerate() {
            for (tx, rx) in chunk {
                let budget = radio
                    .link_budget_with_terrain(tx.tx_power_dbm, &tx.position, &rx.position, los)
                    .await;
                graph.insert_edge(&tx.id, &rx.id, &budget, now_ms);
            }
            let finished = (done * self.config.batch_size.max(1) + chunk.len()).min(total);
            if let Some(report) = progress.as_deref_mut() {
                report(finished, total);
            }
        }
        graph.end_update();
        debug!(pairs = total, "terrain-aware link precompute complete");
        total
    }

    /// Repair the graph after one node moved or joined: drop its cached
    /// edges and recompute its in-range pairs. For a removed node, the
    /// drop is the whole repair (pass the post-removal peer set).
    pub fn recompute_node(
        &self,
        graph: &mut LinkGraph,
        radio: &mut RadioMedium,
        peers: &[RadioPeer],
        node_id: &str,
        now_ms: f64,
    ) -> usize {
        graph.begin_update();
        graph.remove_node(node_id);
        let Some(moved) = peers.iter().find(|p| p.id == node_id) else {
            graph.end_update();
            return 0;
        };
        let mut written = 0;
        for other in peers {
            if other.id == node_id {
                continue;
            }
            if moved.position.distance_km(&other.position) > self.config.max_pair_distance_km {
                continue;
            }
            let (tx, rx) = if moved.id <= other.id { (moved, other) } else { (other, moved) };
            let budget = radio.link_budget(tx.tx_power_dbm, &tx.position, &rx.position);
            graph.insert_edge(&tx.id, &rx.id, &budget, now_ms);
            written += 1;
        }
        graph.end_update();
        written
    }

    /// Drop every edge older than the graph's max age. Returns how many
    /// were removed.
    pub fn invalidate_stale(&self, graph: &mut LinkGraph, now_ms: f64) -> usize {
        graph.invalidate_stale(now_ms)
    }

    /// Recompute stale edges in place. Pairs whose endpoints are no longer
    /// registered are dropped instead. Returns how many were refreshed.
    pub fn refresh_stale(
        &self,
        graph: &mut LinkGraph,
        radio: &mut RadioMedium,
        peers: &[RadioPeer],
        now_ms: f64,
    ) -> usize {
        let by_id: HashMap<&str, &RadioPeer> = peers.iter().map(|p| (p.id.as_str(), p)).collect();
        let mut refreshed = 0;
        graph.begin_update();
        for (a, b) in graph.stale_pairs(now_ms) {
            match (by_id.get(a.as_str()), by_id.get(b.as_str())) {
                (Some(&pa), Some(&pb)) => {
                    let (tx, rx) = if pa.id <= pb.id { (pa, pb) } else { (pb, pa) };
                    let budget = radio.link_budget(tx.tx_power_dbm, &tx.position, &rx.position);
                    graph.insert_edge(&tx.id, &rx.id, &budget, now_ms);
                    refreshed += 1;
                }
                _ => {
                    graph.remove_edge(&a, &b);
                }
            }
        }
        graph.end_update();
        refreshed
    }
}
