//! # rfmesh - Radio Mesh Simulation Library
//!
//! This crate simulates packet propagation and routing across an ad hoc
//! radio mesh built from independently positioned nodes, without hardware.
//! It models:
//!
//! - Multiple nodes at geographic positions with per-node radio configs
//! - Radio propagation with log-distance path loss and optional fading
//! - Optional terrain awareness (Fresnel-zone line-of-sight over elevation)
//! - Flooding-style routing with hop limits and duplicate suppression
//! - A precomputed link graph with lowest-loss path search
//!
//! Everything is deterministic for a given seed: the engine owns one master
//! PRNG and hands each subsystem a fork, and the event queue drives both the
//! delayed and the zero-delay scheduling modes of the same model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SimulationEngine                          │
//! │   clock · event queue · node registry · packet registry      │
//! └──────────┬───────────────────┬───────────────┬──────────────┘
//!            │                   │               │
//!            ▼                   ▼               ▼
//! ┌────────────────┐   ┌─────────────────┐   ┌────────────────────┐
//! │   MeshNode     │   │  RadioMedium    │   │ LinkGraph +        │
//! │ queues · dedup │   │ path loss ·     │   │ LinkPrecomputer    │
//! │ duty cycle     │   │ fading · delay  │   │ find_path · hops   │
//! └───────┬────────┘   └────────┬────────┘   └────────────────────┘
//!         │                     │
//!         ▼                     ▼
//! ┌────────────────┐   ┌─────────────────┐
//! │RoutingStrategy │   │ LosCalculator   │
//! │ (flooding)     │   │ over elevation  │
//! └────────────────┘   └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rfmesh_core::{Destination, EngineConfig, LatLng, NodeConfig, SimulationEngine};
//!
//! let mut sim = SimulationEngine::new(EngineConfig { seed: 7, ..Default::default() }).unwrap();
//! let a = LatLng::new(47.60, -122.33);
//! sim.add_node(NodeConfig::new("alpha", a)).unwrap();
//! sim.add_node(NodeConfig::new("bravo", a.destination(90.0, 1.2))).unwrap();
//!
//! sim.inject_packet("alpha", Destination::Node("bravo".into()), b"hello".to_vec()).unwrap();
//! sim.run_steps(10).unwrap();
//!
//! let stats = sim.get_stats();
//! assert_eq!(stats.delivered_packets, 1);
//! ```

pub mod address;
pub mod elevation;
pub mod engine;
pub mod error;
pub mod geo;
pub mod graph;
pub mod los;
pub mod node;
pub mod packet;
pub mod precompute;
pub mod radio;
pub mod rng;
pub mod routing;

// Re-export main types
pub use address::MeshAddress;
pub use elevation::{ConstantElevation, ElevationCache, ElevationCacheConfig, ElevationSource};
pub use engine::{EngineConfig, SimEvent, SimStats, SimulationEngine, Topology};
pub use error::{MeshSimError, Result};
pub use geo::{LatLng, Projection};
pub use graph::{GraphConfig, GraphDocument, LinkEdge, LinkGraph};
pub use los::{LosCalculator, LosConfig, LosResult};
pub use node::{MeshNode, NodeConfig, NodeCounters};
pub use packet::{Destination, Packet, DEFAULT_HOP_LIMIT};
pub use precompute::{LinkPrecomputer, PrecomputeConfig};
pub use radio::{LinkBudget, RadioConfig, RadioMedium, RadioPeer};
pub use rng::SimRng;
pub use routing::{FloodingStrategy, RoutingDecision, RoutingStrategy};
