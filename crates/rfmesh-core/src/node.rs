//! Per-node packet state machine.
//!
//! A node owns its queues, duplicate-detection set, duty-cycle accounting,
//! and counters. Protocol behavior lives entirely in the bound
//! [`RoutingStrategy`]; the node only enforces mechanics: dedup before the
//! strategy sees a packet, queue bookkeeping after it decides.

use crate::address::MeshAddress;
use crate::error::{MeshSimError, Result};
use crate::geo::{LatLng, Projection};
use crate::packet::{Destination, Packet};
use crate::radio::RadioPeer;
use crate::rng::SimRng;
use crate::routing::{RoutingDecision, RoutingStrategy, StrategyContext};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Seen-set size threshold; crossing it evicts the oldest half.
const DEDUP_LIMIT: usize = 512;

/// Static configuration of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub position: LatLng,
    /// Nominal radio range in km (advisory; reception is decided by the
    /// link budget, not this value).
    pub range_km: f64,
    pub tx_power_dbm: f64,
    /// Maximum fraction of elapsed time this node may spend transmitting.
    pub duty_cycle: f64,
}

impl NodeConfig {
    pub fn new(id: &str, position: LatLng) -> Self {
        Self {
            id: id.to_string(),
            position,
            range_km: 10.0,
            tx_power_dbm: 20.0,
            duty_cycle: 1.0,
        }
    }

    pub fn with_tx_power(mut self, dbm: f64) -> Self {
        self.tx_power_dbm = dbm;
        self
    }

    pub fn with_duty_cycle(mut self, fraction: f64) -> Self {
        self.duty_cycle = fraction;
        self
    }
}

/// Per-node packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounters {
    pub received: u64,
    pub sent: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub duplicates: u64,
}

/// What `receive` did with a packet, for the engine's event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    /// Already seen; counted and otherwise ignored.
    Duplicate,
    /// Kept locally.
    Delivered,
    /// A per-hop clone was queued on the outbox.
    Forwarded { delay_ms: f64 },
    /// Not relayed.
    Dropped { reason: String },
}

/// A simulated mesh endpoint.
pub struct MeshNode {
    config: NodeConfig,
    pub address: MeshAddress,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    inbox: VecDeque<Packet>,
    outbox: VecDeque<Packet>,
    counters: NodeCounters,
    local_clock_ms: f64,
    tx_time_ms: f64,
    strategy: Option<Box<dyn RoutingStrategy>>,
    rng: SimRng,
}

impl MeshNode {
    pub fn new(config: NodeConfig, projection: Projection, rng: SimRng) -> Self {
        let address = MeshAddress::from_lat_lng(&config.position, projection);
        Self {
            config,
            address,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            counters: NodeCounters::default(),
            local_clock_ms: 0.0,
            tx_time_ms: 0.0,
            strategy: None,
            rng,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn position(&self) -> LatLng {
        self.config.position
    }

    pub fn set_position(&mut self, position: LatLng, projection: Projection) {
        self.config.position = position;
        self.address = MeshAddress::from_lat_lng(&position, projection);
    }

    pub fn counters(&self) -> NodeCounters {
        self.counters
    }

    pub fn local_clock_ms(&self) -> f64 {
        self.local_clock_ms
    }

    pub fn inbox(&self) -> &VecDeque<Packet> {
        &self.inbox
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Snapshot for the radio medium.
    pub fn peer(&self) -> RadioPeer {
        RadioPeer {
            id: self.config.id.clone(),
            position: self.config.position,
            tx_power_dbm: self.config.tx_power_dbm,
        }
    }

    pub fn bind_strategy(&mut self, strategy: Box<dyn RoutingStrategy>) {
        self.strategy = Some(strategy);
    }

    pub fn has_strategy(&self) -> bool {
        self.strategy.is_some()
    }

    /// Handle one reception.
    ///
    /// Counts the receipt; a duplicate id is counted and goes no further.
    /// A fresh packet is marked seen, appended to the inbox, and handed to
    /// the routing strategy, whose decision drives the queue and counter
    /// updates.
    pub fn receive(&mut self, packet: Packet, rssi_dbm: f64) -> ReceiveOutcome {
        self.counters.received += 1;

        if self.seen.contains(&packet.header.id) {
            self.counters.duplicates += 1;
            trace!(node = %self.config.id, packet = %packet.header.id, "duplicate receipt");
            return ReceiveOutcome::Duplicate;
        }
        self.mark_seen(packet.header.id.clone());
        self.inbox.push_back(packet.clone());

        let strategy = match self.strategy.as_mut() {
            Some(s) => s,
            None => return ReceiveOutcome::Delivered,
        };
        let mut ctx = StrategyContext {
            node_id: &self.config.id,
            now_ms: self.local_clock_ms,
            rng: &mut self.rng,
        };
        match strategy.on_receive(&mut ctx, &packet, rssi_dbm) {
            RoutingDecision::Deliver => ReceiveOutcome::Delivered,
            RoutingDecision::Forward { delay_ms, packet: replacement } => {
                let outgoing = replacement.unwrap_or(packet);
                self.outbox.push_back(outgoing);
                self.counters.forwarded += 1;
                ReceiveOutcome::Forwarded { delay_ms }
            }
            RoutingDecision::Drop { reason } => {
                self.counters.dropped += 1;
                ReceiveOutcome::Dropped { reason }
            }
        }
    }

    /// Construct and queue an outgoing packet via the bound strategy.
    ///
    /// The new id is marked seen so the node never re-forwards its own
    /// packet when the flood echoes it back.
    pub fn send(&mut self, destination: Destination, payload: Vec<u8>) -> Result<Packet> {
        let strategy = self
            .strategy
            .as_mut()
            .ok_or_else(|| MeshSimError::NoRoutingStrategy(self.config.id.clone()))?;
        let mut ctx = StrategyContext {
            node_id: &self.config.id,
            now_ms: self.local_clock_ms,
            rng: &mut self.rng,
        };
        let packet = strategy.on_send(&mut ctx, destination, payload);
        self.mark_seen(packet.header.id.clone());
        self.outbox.push_back(packet.clone());
        self.counters.sent += 1;
        Ok(packet)
    }

    /// Duty-cycle admission: cumulative transmit time over elapsed local
    /// time must stay below the configured fraction.
    pub fn can_transmit(&self) -> bool {
        if self.local_clock_ms <= 0.0 {
            return true;
        }
        self.tx_time_ms / self.local_clock_ms < self.config.duty_cycle
    }

    pub fn record_transmission(&mut self, duration_ms: f64) {
        self.tx_time_ms += duration_ms;
    }

    pub fn transmit_time_ms(&self) -> f64 {
        self.tx_time_ms
    }

    /// Advance the local clock, run strategy maintenance, trim the seen-set.
    pub fn tick(&mut self, delta_ms: f64) {
        self.local_clock_ms += delta_ms;
        if let Some(strategy) = self.strategy.as_mut() {
            let mut ctx = StrategyContext {
                node_id: &self.config.id,
                now_ms: self.local_clock_ms,
                rng: &mut self.rng,
            };
            strategy.on_tick(&mut ctx, delta_ms);
        }
        self.trim_seen();
    }

    /// Take everything queued for transmission.
    pub fn drain_outbox(&mut self) -> Vec<Packet> {
        self.outbox.drain(..).collect()
    }

    /// Pop the oldest queued outgoing packet, if any.
    pub fn pop_outbox_front(&mut self) -> Option<Packet> {
        self.outbox.pop_front()
    }

    /// Pop the most recently queued outgoing packet, if any.
    pub fn pop_outbox_back(&mut self) -> Option<Packet> {
        self.outbox.pop_back()
    }

    /// Clear all dynamic state; configuration and address stay.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.seen_order.clear();
        self.inbox.clear();
        self.outbox.clear();
        self.counters = NodeCounters::default();
        self.local_clock_ms = 0.0;
        self.tx_time_ms = 0.0;
        self.rng.reset();
    }

    fn mark_seen(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.seen_order.push_back(id);
        }
    }

    /// Once the seen-set is over the limit, evict the oldest half by
    /// insertion order. This approximates a time-windowed duplicate cache.
    fn trim_seen(&mut self) {
        if self.seen.len() <= DEDUP_LIMIT {
            return;
        }
        let evict = self.seen.len() / 2;
        for _ in 0..evict {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        trace!(node = %self.config.id, evicted = evict, "trimmed duplicate cache");
    }
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshNode")
            .field("id", &self.config.id)
            .field("address", &self.address)
            .field("counters", &self.counters)
            .field("inbox", &self.inbox.len())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}
