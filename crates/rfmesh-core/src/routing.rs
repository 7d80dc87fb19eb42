//! Routing strategy abstraction and flooding.
//!
//! Routing is a strategy object bound to each node at construction, not a
//! property of the node state machine: new protocols implement
//! [`RoutingStrategy`] and nothing else changes. The node invokes the
//! strategy on every receive, send, and tick, and acts on the returned
//! [`RoutingDecision`].

use crate::packet::{Destination, Packet};
use crate::rng::SimRng;
use std::fmt;

/// What a strategy decided to do with a received packet.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    /// Keep the packet locally; it stays in the inbox.
    Deliver,
    /// Relay after `delay_ms`. `packet` carries the per-hop clone to send;
    /// `None` means relay the received packet unchanged.
    Forward { delay_ms: f64, packet: Option<Packet> },
    /// Do not relay; `reason` lands in the drop event and counters.
    Drop { reason: String },
}

/// Per-call view of the owning node handed to strategy hooks.
pub struct StrategyContext<'a> {
    pub node_id: &'a str,
    /// Node-local simulation clock, ms.
    pub now_ms: f64,
    /// The node's own forked random stream.
    pub rng: &'a mut SimRng,
}

/// A routing protocol: decides forwarding on receive, constructs outgoing
/// packets on send, and gets a periodic maintenance hook.
pub trait RoutingStrategy: fmt::Debug + Send {
    fn on_receive(
        &mut self,
        ctx: &mut StrategyContext<'_>,
        packet: &Packet,
        rssi_dbm: f64,
    ) -> RoutingDecision;

    fn on_send(
        &mut self,
        ctx: &mut StrategyContext<'_>,
        destination: Destination,
        payload: Vec<u8>,
    ) -> Packet;

    fn on_tick(&mut self, ctx: &mut StrategyContext<'_>, delta_ms: f64) {
        let _ = (ctx, delta_ms);
    }
}

/// Flooding: rebroadcast everything not addressed to us until the hop limit
/// runs out.
///
/// Decision table:
/// - addressed to this node: deliver;
/// - broadcast: deliver locally, and relay too while hops remain. A
///   broadcast is never dropped outright, only possibly not relayed further;
/// - addressed elsewhere with hops remaining: relay after the rebroadcast
///   delay;
/// - addressed elsewhere with the hop limit spent: drop.
#[derive(Debug, Clone)]
pub struct FloodingStrategy {
    pub default_hop_limit: u8,
    pub rebroadcast_delay_ms: f64,
}

impl Default for FloodingStrategy {
    fn default() -> Self {
        Self {
            default_hop_limit: crate::packet::DEFAULT_HOP_LIMIT,
            rebroadcast_delay_ms: 200.0,
        }
    }
}

impl FloodingStrategy {
    fn forward(&self, ctx: &StrategyContext<'_>, packet: &Packet) -> RoutingDecision {
        RoutingDecision::Forward {
            delay_ms: self.rebroadcast_delay_ms,
            packet: packet.clone_for_forward(ctx.node_id),
        }
    }
}

impl RoutingStrategy for FloodingStrategy {
    fn on_receive(
        &mut self,
        ctx: &mut StrategyContext<'_>,
        packet: &Packet,
        _rssi_dbm: f64,
    ) -> RoutingDecision {
        match &packet.header.destination {
            Destination::Node(id) if id == ctx.node_id => RoutingDecision::Deliver,
            Destination::Broadcast => {
                if packet.header.hop_limit > 0 {
                    // Local delivery still happens: the packet is already in
                    // the inbox and broadcast delivery is decided by address,
                    // not by this decision.
                    self.forward(ctx, packet)
                } else {
                    RoutingDecision::Deliver
                }
            }
            Destination::Node(_) => {
                if packet.header.hop_limit > 0 {
                    self.forward(ctx, packet)
                } else {
                    RoutingDecision::Drop { reason: "hop limit exhausted".into() }
                }
            }
        }
    }

    fn on_send(
        &mut self,
        ctx: &mut StrategyContext<'_>,
        destination: Destination,
        payload: Vec<u8>,
    ) -> Packet {
        Packet::create(
            ctx.node_id,
            destination,
            payload,
            self.default_hop_limit,
            ctx.now_ms,
            ctx.rng,
        )
    }
}
