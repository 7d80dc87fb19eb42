//! Radio Mesh Simulation CLI
//!
//! This CLI provides tools for:
//! - Running seeded mesh simulations and printing delivery statistics
//! - Dumping the computed topology of a scenario as JSON
//! - Converting between coordinates and mesh addresses

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rfmesh_core::{
    ConstantElevation, Destination, ElevationCache, ElevationCacheConfig, EngineConfig, LatLng,
    LinkPrecomputer, LosCalculator, LosConfig, MeshAddress, NodeConfig, PrecomputeConfig,
    Projection, SimRng, SimulationEngine,
};
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "rfmesh")]
#[command(author, version, about = "Radio mesh simulation CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a seeded simulation and print a summary
    Run {
        /// Number of nodes
        #[arg(short, long, default_value = "10")]
        nodes: usize,

        /// Side length of the square placement area (km)
        #[arg(long, default_value = "8.0")]
        area_km: f64,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Number of simulation steps
        #[arg(long, default_value = "600")]
        steps: u64,

        /// Hop limit for generated packets
        #[arg(long, default_value = "7")]
        hop_limit: u8,

        /// Chance per node per step of generating a broadcast
        #[arg(long, default_value = "0.01")]
        message_rate: f64,

        /// Collapse all delays and forward recursively
        #[arg(long)]
        zero_delay: bool,

        /// Pace steps against the wall clock
        #[arg(long)]
        realtime: bool,
    },

    /// Print the computed topology of a scenario as JSON
    Topology {
        #[arg(short, long, default_value = "10")]
        nodes: usize,

        #[arg(long, default_value = "8.0")]
        area_km: f64,

        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Also precompute the link graph and print its export document
        #[arg(long)]
        links: bool,

        /// Route link computation through the terrain line-of-sight check
        /// (flat reference terrain)
        #[arg(long, requires = "links")]
        terrain: bool,
    },

    /// Convert a coordinate to its mesh address, or parse an address
    Address {
        /// Latitude in decimal degrees
        #[arg(long, requires = "lng")]
        lat: Option<f64>,

        /// Longitude in decimal degrees
        #[arg(long, requires = "lat")]
        lng: Option<f64>,

        /// An "O1.O2.O3" address to decode back to its cell center
        #[arg(long, conflicts_with_all = ["lat", "lng"])]
        parse: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!("rfmesh={level},rfmesh_core={level}"))
            }),
        )
        .init();

    match cli.command {
        Commands::Run { nodes, area_km, seed, steps, hop_limit, message_rate, zero_delay, realtime } => {
            run_simulation(nodes, area_km, seed, steps, hop_limit, message_rate, zero_delay, realtime)
        }
        Commands::Topology { nodes, area_km, seed, links, terrain } => {
            let config = EngineConfig { enable_graph: links, ..Default::default() };
            let mut sim = build_scenario(nodes, area_km, seed, config)?;
            if links {
                precompute(&mut sim, terrain)?;
                let document = sim.graph().expect("graph enabled above").export();
                let json = serde_json::to_string_pretty(&document)
                    .context("serializing link document")?;
                println!("{json}");
            } else {
                let json = serde_json::to_string_pretty(&sim.get_topology())
                    .context("serializing topology")?;
                println!("{json}");
            }
            Ok(())
        }
        Commands::Address { lat, lng, parse } => address_command(lat, lng, parse),
    }
}

/// Place `count` nodes uniformly in a square area, seeded and reproducible.
fn build_scenario(
    count: usize,
    area_km: f64,
    seed: u64,
    mut config: EngineConfig,
) -> Result<SimulationEngine> {
    if area_km <= 0.0 {
        bail!("area must be positive, got {area_km}");
    }
    config.seed = seed;
    let mut sim = SimulationEngine::new(config).context("building engine")?;

    // Placement draws from its own stream so engine internals stay stable
    // regardless of node count.
    let mut placement = SimRng::new(seed ^ 0x9e37_79b9);
    let base = LatLng::new(47.0, -120.0);
    for i in 0..count {
        let east = placement.next_range(0.0, area_km);
        let north = placement.next_range(0.0, area_km);
        let position = base.destination(90.0, east).destination(0.0, north);
        sim.add_node(NodeConfig::new(&format!("node-{i:02}"), position))
            .with_context(|| format!("adding node {i}"))?;
    }
    Ok(sim)
}

#[allow(clippy::too_many_arguments)]
fn run_simulation(
    nodes: usize,
    area_km: f64,
    seed: u64,
    steps: u64,
    hop_limit: u8,
    message_rate: f64,
    zero_delay: bool,
    realtime: bool,
) -> Result<()> {
    let config = EngineConfig { zero_delay, default_hop_limit: hop_limit, ..Default::default() };
    let mut sim = build_scenario(nodes, area_km, seed, config)?;
    let mut traffic = SimRng::new(seed ^ 0x51ed_270b);
    let ids: Vec<String> = sim.node_ids().to_vec();

    info!(nodes, steps, seed, "starting simulation");
    sim.start();
    let config = sim.config();
    let pace = Duration::from_millis(
        (config.tick_interval_ms / config.realtime_multiplier) as u64,
    );
    for step in 0..steps {
        for id in &ids {
            if traffic.next_f64() < message_rate {
                let payload = format!("msg from {id} step {step}").into_bytes();
                sim.inject_packet(id, Destination::Broadcast, payload)?;
            }
        }
        sim.step()?;
        if realtime {
            std::thread::sleep(pace);
        }
    }
    sim.stop();

    print_summary(&sim);
    Ok(())
}

fn print_summary(sim: &SimulationEngine) {
    let stats = sim.get_stats();
    let topology = sim.get_topology();

    println!("\n=== Mesh Simulation Summary ===");
    println!("Simulated time: {:.1} s", sim.now_ms() / 1000.0);
    println!("Nodes: {}", sim.node_count());
    println!("Links: {}", topology.links.len());
    println!();
    println!("Packets:");
    println!("  Created:   {}", stats.total_packets);
    println!("  Delivered: {}", stats.delivered_packets);
    println!("  Dropped:   {}", stats.dropped_packets);
    println!("  Delivery rate: {:.1}%", stats.delivery_rate * 100.0);
    println!("  Avg hops: {:.2}", stats.average_hops);
    println!("  Avg latency: {:.1} ms", stats.average_latency_ms);
    println!();
    println!("Per-node counters:");
    for id in sim.node_ids() {
        if let Some(node) = sim.get_node(id) {
            let c = node.counters();
            println!(
                "  {id}: sent={} recv={} fwd={} dup={} drop={}",
                c.sent, c.received, c.forwarded, c.duplicates, c.dropped
            );
        }
    }
}

/// Fill the engine's link graph, optionally through the asynchronous
/// terrain-checked path.
fn precompute(sim: &mut SimulationEngine, terrain: bool) -> Result<()> {
    let precomputer = LinkPrecomputer::new(PrecomputeConfig::default());
    let mut report = |done: usize, total: usize| info!(done, total, "link precompute");
    if terrain {
        let cache = ElevationCache::new(ConstantElevation(0.0), ElevationCacheConfig::default());
        let mut los = LosCalculator::new(LosConfig::default(), cache);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("building runtime")?;
        runtime.block_on(sim.precompute_links_with_terrain(
            &precomputer,
            &mut los,
            Some(&mut report),
        ))?;
    } else {
        sim.precompute_links(&precomputer, Some(&mut report))?;
    }
    Ok(())
}

fn address_command(lat: Option<f64>, lng: Option<f64>, parse: Option<String>) -> Result<()> {
    match (lat, lng, parse) {
        (Some(lat), Some(lng), None) => {
            let address = MeshAddress::from_lat_lng(&LatLng::new(lat, lng), Projection::WebMercator);
            println!("{address}");
            Ok(())
        }
        (None, None, Some(text)) => {
            let address = MeshAddress::parse(&text)
                .with_context(|| format!("'{text}' is not a valid mesh address"))?;
            let center = address.to_lat_lng(Projection::WebMercator);
            println!("{:.6}, {:.6}", center.lat, center.lng);
            Ok(())
        }
        _ => bail!("pass either --lat/--lng or --parse"),
    }
}
