//! Discrete-event simulation engine.
//!
//! The engine owns the node registry, a monotonically increasing clock, a
//! time-ordered future-event list, and a registry of logical packets (keyed
//! by packet id, distinct from per-hop clones). It is single-threaded and
//! cooperative: an external timer callback or explicit `step()` calls drive
//! the same state machine, so real-time and deterministic test runs cannot
//! diverge.
//!
//! Scheduling has one model and two modes. Every reception and rebroadcast
//! goes through the event queue; in zero-delay mode all delays collapse to
//! zero and freshly forwarded packets are transmitted recursively within the
//! same call. Delay affects observed timing, never the final delivery set
//! (except where duty-cycle admission interacts with timing).
//!
//! Ordering guarantees: events due at the same timestamp run in insertion
//! order, and delivery across multiple receivers of one transmission follows
//! candidate iteration order (node registration order), not RSSI or
//! distance.

use crate::error::{MeshSimError, Result};
use crate::geo::{LatLng, Projection};
use crate::graph::{GraphConfig, LinkGraph};
use crate::node::{MeshNode, NodeConfig, ReceiveOutcome};
use crate::packet::{Destination, Packet, BROADCAST_WIRE};
use crate::radio::{RadioConfig, RadioMedium, RadioPeer};
use crate::rng::SimRng;
use crate::routing::{FloodingStrategy, RoutingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap};
use tracing::{debug, info};

/// Engine construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub seed: u64,
    /// Simulated time advanced per `step()`, ms.
    pub tick_interval_ms: f64,
    /// Real-time pacing factor for timer-driven runs (1.0 = wall clock).
    pub realtime_multiplier: f64,
    /// Collapse all propagation and rebroadcast delays to zero and forward
    /// recursively within the triggering call.
    pub zero_delay: bool,
    pub radio: RadioConfig,
    pub enable_graph: bool,
    pub graph: GraphConfig,
    pub projection: Projection,
    /// Hop limit given to packets built by the default flooding strategy.
    pub default_hop_limit: u8,
    /// Rebroadcast delay used by the default flooding strategy, ms.
    pub rebroadcast_delay_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_interval_ms: 100.0,
            realtime_multiplier: 1.0,
            zero_delay: false,
            radio: RadioConfig::default(),
            enable_graph: false,
            graph: GraphConfig::default(),
            projection: Projection::WebMercator,
            default_hop_limit: crate::packet::DEFAULT_HOP_LIMIT,
            rebroadcast_delay_ms: 200.0,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms <= 0.0 {
            return Err(MeshSimError::InvalidConfig("tick_interval_ms must be positive".into()));
        }
        if self.realtime_multiplier <= 0.0 {
            return Err(MeshSimError::InvalidConfig("realtime_multiplier must be positive".into()));
        }
        Ok(())
    }
}

/// Packet lifecycle and registry notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    NodeAdded { id: String },
    NodeRemoved { id: String },
    PacketCreated { packet_id: String, source: String },
    PacketTransmitted { packet_id: String, from: String, receivers: usize },
    PacketReceived { packet_id: String, node: String, rssi_dbm: f64 },
    /// Emitted once per receiving node; broadcasts fan out to several
    /// `PacketDelivered` events for one packet id.
    PacketDelivered { packet_id: String, node: String, hops: u8, latency_ms: f64 },
    PacketDropped { packet_id: String, node: String, reason: String },
    Tick { time_ms: f64 },
}

/// Aggregate delivery statistics. Per-message counters are deduplicated by
/// logical packet id; hop and latency averages are over first deliveries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SimStats {
    pub total_packets: u64,
    pub delivered_packets: u64,
    pub dropped_packets: u64,
    pub average_hops: f64,
    pub average_latency_ms: f64,
    pub delivery_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyNode {
    pub id: String,
    pub position: LatLng,
    pub neighbors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyLink {
    pub from: String,
    pub to: String,
    pub distance_km: f64,
    pub rssi_dbm: f64,
}

/// Snapshot of who can currently hear whom.
#[derive(Debug, Clone, Serialize)]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
}

/// Registry entry for one logical packet (id-keyed, not per-hop clones).
#[derive(Debug, Clone)]
struct PacketRecord {
    source: String,
    created_at_ms: f64,
    delivered: bool,
}

#[derive(Debug)]
enum EngineAction {
    Receive { node_id: String, packet: Packet, rssi_dbm: f64 },
    Flush { node_id: String },
}

#[derive(Debug)]
struct ScheduledEvent {
    due_ms: f64,
    /// Insertion sequence; ties on `due_ms` run in insertion order.
    seq: u64,
    action: EngineAction,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Inverted: BinaryHeap pops the earliest (due, seq) first.
        other
            .due_ms
            .total_cmp(&self.due_ms)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

type Listener = Box<dyn FnMut(&SimEvent)>;

/// The simulation: node registry, clock, event queue, packet registry.
pub struct SimulationEngine {
    config: EngineConfig,
    clock_ms: f64,
    running: bool,
    nodes: HashMap<String, MeshNode>,
    /// Registration order; candidate iteration and flushes follow it.
    node_order: Vec<String>,
    events: BinaryHeap<ScheduledEvent>,
    seq: u64,
    packets: HashMap<String, PacketRecord>,
    rng: SimRng,
    radio: RadioMedium,
    graph: Option<LinkGraph>,
    listeners: Vec<Listener>,
    event_log: Vec<SimEvent>,
    delivered_unique: u64,
    dropped_events: u64,
    hops_sum: f64,
    latency_sum_ms: f64,
}

impl SimulationEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = SimRng::new(config.seed);
        // The medium gets its own stream so fading draws never perturb node
        // id generation or any later randomness consumer.
        let radio = RadioMedium::new(config.radio.clone(), rng.fork())?;
        let graph = config.enable_graph.then(|| LinkGraph::new(config.graph.clone()));
        Ok(Self {
            config,
            clock_ms: 0.0,
            running: false,
            nodes: HashMap::new(),
            node_order: Vec::new(),
            events: BinaryHeap::new(),
            seq: 0,
            packets: HashMap::new(),
            rng,
            radio,
            graph,
            listeners: Vec::new(),
            event_log: Vec::new(),
            delivered_unique: 0,
            dropped_events: 0,
            hops_sum: 0.0,
            latency_sum_ms: 0.0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> f64 {
        self.clock_ms
    }

    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    /// Register a node with the default flooding strategy bound.
    pub fn add_node(&mut self, config: NodeConfig) -> Result<&MeshNode> {
        let strategy = FloodingStrategy {
            default_hop_limit: self.config.default_hop_limit,
            rebroadcast_delay_ms: self.config.rebroadcast_delay_ms,
        };
        self.add_node_with_strategy(config, Box::new(strategy))
    }

    /// Register a node with an explicit routing strategy.
    pub fn add_node_with_strategy(
        &mut self,
        config: NodeConfig,
        strategy: Box<dyn RoutingStrategy>,
    ) -> Result<&MeshNode> {
        if config.id == BROADCAST_WIRE || config.id.is_empty() {
            return Err(MeshSimError::InvalidConfig(format!(
                "'{}' is not a valid node id",
                config.id
            )));
        }
        if self.nodes.contains_key(&config.id) {
            return Err(MeshSimError::DuplicateNode(config.id));
        }
        let id = config.id.clone();
        let mut node = MeshNode::new(config, self.config.projection, self.rng.fork());
        node.bind_strategy(strategy);
        info!(node = %id, "node registered");
        self.nodes.insert(id.clone(), node);
        self.node_order.push(id.clone());
        self.emit(SimEvent::NodeAdded { id: id.clone() });
        Ok(&self.nodes[&id])
    }

    /// Unregister a node; its cached graph edges go with it.
    pub fn remove_node(&mut self, id: &str) -> Result<()> {
        if self.nodes.remove(id).is_none() {
            return Err(MeshSimError::UnknownNode(id.to_string()));
        }
        self.node_order.retain(|n| n != id);
        if let Some(graph) = self.graph.as_mut() {
            graph.remove_node(id);
        }
        info!(node = %id, "node removed");
        self.emit(SimEvent::NodeRemoved { id: id.to_string() });
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Option<&MeshNode> {
        self.nodes.get(id)
    }

    pub fn graph(&self) -> Option<&LinkGraph> {
        self.graph.as_ref()
    }

    pub fn graph_mut(&mut self) -> Option<&mut LinkGraph> {
        self.graph.as_mut()
    }

    pub fn radio_mut(&mut self) -> &mut RadioMedium {
        &mut self.radio
    }

    /// Snapshot of every node as the radio medium sees it, in registration
    /// order.
    pub fn peers(&self) -> Vec<RadioPeer> {
        self.node_order
            .iter()
            .map(|id| self.nodes[id].peer())
            .collect()
    }

    /// Fill the link graph from the current node set.
    pub fn precompute_links(
        &mut self,
        precomputer: &crate::precompute::LinkPrecomputer,
        progress: Option<crate::precompute::Progress<'_>>,
    ) -> Result<usize> {
        let peers = self.peers();
        let now = self.clock_ms;
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| MeshSimError::InvalidConfig("link graph is disabled".into()))?;
        Ok(precomputer.precompute_all(graph, &mut self.radio, &peers, now, progress))
    }

    /// Terrain-aware graph fill; resolves fully before returning, so graph
    /// state never interleaves with simulation steps.
    pub async fn precompute_links_with_terrain<S: crate::elevation::ElevationSource>(
        &mut self,
        precomputer: &crate::precompute::LinkPrecomputer,
        los: &mut crate::los::LosCalculator<S>,
        progress: Option<crate::precompute::Progress<'_>>,
    ) -> Result<usize> {
        let peers = self.peers();
        let now = self.clock_ms;
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| MeshSimError::InvalidConfig("link graph is disabled".into()))?;
        Ok(precomputer
            .precompute_all_with_terrain(graph, &mut self.radio, &peers, los, now, progress)
            .await)
    }

    /// Repair the link graph for one moved, added, or removed node.
    pub fn recompute_node_links(
        &mut self,
        precomputer: &crate::precompute::LinkPrecomputer,
        node_id: &str,
    ) -> Result<usize> {
        let peers = self.peers();
        let now = self.clock_ms;
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| MeshSimError::InvalidConfig("link graph is disabled".into()))?;
        Ok(precomputer.recompute_node(graph, &mut self.radio, &peers, node_id, now))
    }

    /// Recompute stale graph edges in place.
    pub fn refresh_stale_links(
        &mut self,
        precomputer: &crate::precompute::LinkPrecomputer,
    ) -> Result<usize> {
        let peers = self.peers();
        let now = self.clock_ms;
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| MeshSimError::InvalidConfig("link graph is disabled".into()))?;
        Ok(precomputer.refresh_stale(graph, &mut self.radio, &peers, now))
    }

    /// Subscribe to lifecycle and packet events.
    pub fn subscribe(&mut self, listener: impl FnMut(&SimEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Event history (tick notifications are not logged).
    pub fn events(&self) -> &[SimEvent] {
        &self.event_log
    }

    /// Synthesize a packet at `from` and transmit it immediately, bypassing
    /// the per-tick flush and the duty-cycle gate (external stimulus).
    /// Returns the logical packet id.
    pub fn inject_packet(
        &mut self,
        from: &str,
        destination: Destination,
        payload: Vec<u8>,
    ) -> Result<String> {
        let node = self
            .nodes
            .get_mut(from)
            .ok_or_else(|| MeshSimError::UnknownNode(from.to_string()))?;
        node.send(destination, payload)?;
        // `send` queued the packet; pull it back out and push it through the
        // medium right now.
        let packet = node
            .pop_outbox_back()
            .expect("send() queues exactly one packet");
        let id = packet.header.id.clone();
        self.transmit_packet(from, packet)?;
        Ok(id)
    }

    /// Advance the simulation by one tick: run due events, flush outboxes,
    /// tick nodes, advance the clock.
    pub fn step(&mut self) -> Result<()> {
        self.process_due_events()?;
        for id in self.node_order.clone() {
            self.flush_node(&id)?;
        }
        for id in self.node_order.clone() {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.tick(self.config.tick_interval_ms);
            }
        }
        self.clock_ms += self.config.tick_interval_ms;
        self.emit(SimEvent::Tick { time_ms: self.clock_ms });
        Ok(())
    }

    /// Run `n` steps back to back.
    pub fn run_steps(&mut self, n: u64) -> Result<()> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Mark the engine running. The caller's timer drives `step()`; pacing
    /// comes from `tick_interval_ms / realtime_multiplier`.
    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Clear the clock, queues, registries, statistics, and every node's
    /// dynamic state. Registered nodes and cached graph edges stay.
    pub fn reset(&mut self) {
        self.clock_ms = 0.0;
        self.running = false;
        self.events.clear();
        self.seq = 0;
        self.packets.clear();
        self.event_log.clear();
        self.delivered_unique = 0;
        self.dropped_events = 0;
        self.hops_sum = 0.0;
        self.latency_sum_ms = 0.0;
        self.rng.reset();
        self.radio.reset_rng();
        for node in self.nodes.values_mut() {
            node.reset();
        }
        debug!("engine reset");
    }

    /// Current receivability snapshot, computed from the deterministic
    /// (fade-free) link budget so repeated calls agree.
    pub fn get_topology(&self) -> Topology {
        let peers = self.peers();
        let mut neighbors: HashMap<&str, Vec<String>> = HashMap::new();
        let mut links = Vec::new();

        for (i, a) in peers.iter().enumerate() {
            for b in peers.iter().skip(i + 1) {
                let distance_km = a.position.distance_km(&b.position);
                let path_loss_db = self.radio.path_loss_db(distance_km);
                let rssi_dbm = a.tx_power_dbm - path_loss_db;
                let snr_db = rssi_dbm - self.config.radio.noise_floor_dbm;
                if rssi_dbm < self.config.radio.rx_sensitivity_dbm
                    || snr_db < self.config.radio.min_snr_db
                {
                    continue;
                }
                neighbors.entry(&a.id).or_default().push(b.id.clone());
                neighbors.entry(&b.id).or_default().push(a.id.clone());
                links.push(TopologyLink {
                    from: a.id.clone(),
                    to: b.id.clone(),
                    distance_km,
                    rssi_dbm,
                });
            }
        }

        let nodes = peers
            .iter()
            .map(|p| TopologyNode {
                id: p.id.clone(),
                position: p.position,
                neighbors: neighbors.remove(p.id.as_str()).unwrap_or_default(),
            })
            .collect();
        Topology { nodes, links }
    }

    pub fn get_stats(&self) -> SimStats {
        let total = self.packets.len() as u64;
        let delivered = self.delivered_unique;
        SimStats {
            total_packets: total,
            delivered_packets: delivered,
            dropped_packets: self.dropped_events,
            average_hops: if delivered > 0 { self.hops_sum / delivered as f64 } else { 0.0 },
            average_latency_ms: if delivered > 0 {
                self.latency_sum_ms / delivered as f64
            } else {
                0.0
            },
            delivery_rate: if total > 0 { delivered as f64 / total as f64 } else { 0.0 },
        }
    }

    // ---- internals ----

    fn schedule(&mut self, due_ms: f64, action: EngineAction) {
        self.seq += 1;
        self.events.push(ScheduledEvent { due_ms, seq: self.seq, action });
    }

    /// Drain every event due at or before the current clock, in (due, seq)
    /// order. Events scheduled during the drain with a due time at or
    /// before now run in the same drain.
    fn process_due_events(&mut self) -> Result<()> {
        while let Some(top) = self.events.peek() {
            if top.due_ms > self.clock_ms {
                break;
            }
            let event = self.events.pop().expect("peeked above");
            match event.action {
                EngineAction::Receive { node_id, packet, rssi_dbm } => {
                    self.receive_packet(&node_id, packet, rssi_dbm)?;
                }
                EngineAction::Flush { node_id } => {
                    self.flush_node(&node_id)?;
                }
            }
        }
        Ok(())
    }

    /// Transmit queued packets from a node while its duty cycle allows;
    /// anything over the budget stays queued for a later tick.
    fn flush_node(&mut self, node_id: &str) -> Result<()> {
        loop {
            let packet = match self.nodes.get_mut(node_id) {
                Some(node) => {
                    if !node.can_transmit() {
                        break;
                    }
                    match node.pop_outbox_front() {
                        Some(packet) => packet,
                        None => break,
                    }
                }
                None => break, // removed while a flush was pending
            };
            self.transmit_packet(node_id, packet)?;
        }
        Ok(())
    }

    /// Push one packet through the radio medium.
    ///
    /// First sight of a packet id registers it and emits `PacketCreated`.
    /// Receivers with zero propagation delay are delivered within this
    /// call; the rest get scheduled receive events.
    fn transmit_packet(&mut self, sender_id: &str, packet: Packet) -> Result<()> {
        let sender = self
            .nodes
            .get(sender_id)
            .ok_or_else(|| MeshSimError::UnknownNode(sender_id.to_string()))?
            .peer();

        let packet_id = packet.header.id.clone();
        if !self.packets.contains_key(&packet_id) {
            self.packets.insert(
                packet_id.clone(),
                PacketRecord {
                    source: packet.header.source.clone(),
                    created_at_ms: packet.header.created_at_ms,
                    delivered: false,
                },
            );
            self.emit(SimEvent::PacketCreated {
                packet_id: packet_id.clone(),
                source: packet.header.source.clone(),
            });
        }

        let candidates = self.peers();
        let receptions = self.radio.transmit(&sender, &candidates);
        let airtime = self.radio.airtime_ms(packet.payload.len());
        if let Some(node) = self.nodes.get_mut(sender_id) {
            node.record_transmission(airtime);
        }

        debug!(
            packet = %packet_id,
            from = %sender_id,
            receivers = receptions.len(),
            "transmission"
        );
        self.emit(SimEvent::PacketTransmitted {
            packet_id,
            from: sender_id.to_string(),
            receivers: receptions.len(),
        });

        for reception in receptions {
            let delay_ms = if self.config.zero_delay { 0.0 } else { reception.delay_ms };
            if delay_ms <= 0.0 {
                self.receive_packet(&reception.node_id, packet.clone(), reception.rssi_dbm)?;
            } else {
                self.schedule(
                    self.clock_ms + delay_ms,
                    EngineAction::Receive {
                        node_id: reception.node_id,
                        packet: packet.clone(),
                        rssi_dbm: reception.rssi_dbm,
                    },
                );
            }
        }
        Ok(())
    }

    /// Hand a packet to a node and react to its routing outcome.
    fn receive_packet(&mut self, node_id: &str, packet: Packet, rssi_dbm: f64) -> Result<()> {
        let node = match self.nodes.get_mut(node_id) {
            Some(node) => node,
            None => return Ok(()), // removed while the packet was in flight
        };
        let outcome = node.receive(packet.clone(), rssi_dbm);
        let packet_id = packet.header.id.clone();
        self.emit(SimEvent::PacketReceived {
            packet_id: packet_id.clone(),
            node: node_id.to_string(),
            rssi_dbm,
        });
        if outcome == ReceiveOutcome::Duplicate {
            return Ok(());
        }

        let addressed_here = packet.header.destination.is_node(node_id)
            || packet.header.destination.is_broadcast();
        if addressed_here {
            let latency_ms = self.clock_ms - packet.header.created_at_ms;
            let hops = packet.header.hop_count;
            if let Some(record) = self.packets.get_mut(&packet_id) {
                if !record.delivered {
                    record.delivered = true;
                    self.delivered_unique += 1;
                    self.hops_sum += hops as f64;
                    self.latency_sum_ms += latency_ms;
                }
            }
            // One event per receiving node; broadcasts fan out.
            self.emit(SimEvent::PacketDelivered {
                packet_id: packet_id.clone(),
                node: node_id.to_string(),
                hops,
                latency_ms,
            });
        }

        match outcome {
            ReceiveOutcome::Dropped { reason } => {
                self.dropped_events += 1;
                self.emit(SimEvent::PacketDropped {
                    packet_id,
                    node: node_id.to_string(),
                    reason,
                });
            }
            ReceiveOutcome::Forwarded { delay_ms } => {
                let delay_ms = if self.config.zero_delay { 0.0 } else { delay_ms };
                if delay_ms <= 0.0 {
                    // Zero-delay mode: relay recursively within this call.
                    self.flush_node(node_id)?;
                } else {
                    self.schedule(
                        self.clock_ms + delay_ms,
                        EngineAction::Flush { node_id: node_id.to_string() },
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn emit(&mut self, event: SimEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
        if !matches!(event, SimEvent::Tick { .. }) {
            self.event_log.push(event);
        }
    }
}

impl std::fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("clock_ms", &self.clock_ms)
            .field("nodes", &self.node_order)
            .field("pending_events", &self.events.len())
            .field("packets", &self.packets.len())
            .finish()
    }
}
