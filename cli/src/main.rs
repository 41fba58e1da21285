//! Headless wiresim driver.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario for ten simulated seconds
//! wiresim demos/http_farm.json --duration-ms 10000
//!
//! # Same run at double speed, writing every message event as JSON lines
//! wiresim demos/http_farm.json --speed 2 --telemetry events.jsonl --events-only
//! ```

mod output;
mod scenario;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wiresim_core::telemetry::MessageState;
use wiresim_core::{
    EntityKind, MetricsCollector, Simulation, DEFAULT_EXTERNAL_TICK, DEFAULT_SUB_STEPS,
};

use output::{JsonLines, Tee};
use scenario::Scenario;

/// Runs a client/server/load balancer scenario and prints what happened
#[derive(Parser, Debug)]
#[command(name = "wiresim")]
#[command(version)]
struct Args {
    /// Scenario description (JSON)
    scenario: PathBuf,

    /// Simulated time to run for
    #[arg(short, long, default_value_t = 10_000)]
    duration_ms: u64,

    /// Interval of the external clock driving the simulation
    #[arg(long, default_value_t = DEFAULT_EXTERNAL_TICK.as_millis() as u64)]
    tick_ms: u64,

    /// Sub-steps per external tick
    #[arg(long, default_value_t = DEFAULT_SUB_STEPS)]
    sub_steps: u32,

    /// Simulated time per unit of external time
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// RNG seed; overrides the scenario's
    #[arg(long)]
    seed: Option<u64>,

    /// Write telemetry as JSON lines to this file
    #[arg(long)]
    telemetry: Option<PathBuf>,

    /// Only write message and round-trip events, no per-step snapshots
    #[arg(long)]
    events_only: bool,

    /// Points kept in the sampled metrics history
    #[arg(long, default_value_t = 300)]
    history: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if !args.speed.is_finite() || args.speed <= 0.0 {
        return Err(format!("speed must be a positive number, got {}", args.speed).into());
    }
    if args.tick_ms == 0 {
        return Err("tick must be at least 1ms".into());
    }

    let scenario = Scenario::load(&args.scenario)?;
    let seed = args.seed.or(scenario.seed).unwrap_or(0);
    let mut sim = Simulation::new_with_seed(seed);

    let collector = Arc::new(RwLock::new(MetricsCollector::new(args.history)?));
    let mut tee = Tee::default().with(Arc::clone(&collector));
    let telemetry = match &args.telemetry {
        Some(path) => {
            let file = File::create(path).map_err(|err| format!("cannot create {}: {err}", path.display()))?;
            let sink = Arc::new(RwLock::new(JsonLines::new(BufWriter::new(file), args.events_only)));
            tee = tee.with(Arc::clone(&sink));
            Some(sink)
        }
        None => None,
    };
    sim.set_sink(Box::new(tee));

    let base_dir = args.scenario.parent().map(PathBuf::from).unwrap_or_default();
    let labels = scenario.build(&mut sim, &base_dir)?;
    log::info!(
        "loaded {} entities and {} connections from {}",
        labels.len(),
        sim.connections().count(),
        args.scenario.display()
    );

    let tick = Duration::from_millis(args.tick_ms);
    let target = Duration::from_millis(args.duration_ms);
    while sim.time() < target {
        let before = sim.time();
        sim.advance(tick, args.sub_steps, args.speed);
        if sim.time() == before {
            log::warn!("clock stopped at {before:?}, speed {} too small", args.speed);
            break;
        }
    }

    if let Some(sink) = telemetry {
        let mut sink = sink.write().map_err(|_| "telemetry sink lock poisoned")?;
        sink.flush()?;
    }

    let collector = collector.read().map_err(|_| "metrics lock poisoned")?;
    print_summary(&sim, &labels, &collector);
    Ok(())
}

fn print_summary(
    sim: &Simulation,
    labels: &std::collections::BTreeMap<String, wiresim_core::EntityId>,
    metrics: &MetricsCollector,
) {
    println!("simulated {:.3}s", sim.time().as_secs_f64());
    println!();

    for (label, &id) in labels {
        let Some(entity) = sim.entity_dyn(id) else {
            continue;
        };
        let detail = match entity.kind() {
            EntityKind::Client => metrics
                .client(entity.ip())
                .map(|c| format!("{:?}, queue {}, {}", c.state, c.queue_depth, c.transfer_status))
                .unwrap_or_default(),
            EntityKind::Server => metrics
                .server(entity.ip())
                .map(|s| format!("processing {}, queued {}", s.processing_load, s.queued_count))
                .unwrap_or_default(),
            EntityKind::LoadBalancer => metrics
                .load_balancer(entity.ip())
                .map(|lb| {
                    format!(
                        "{}, {} servers, {} pinned clients",
                        lb.algorithm,
                        lb.servers.len(),
                        lb.affinity_entries
                    )
                })
                .unwrap_or_default(),
        };
        println!("{label:<12} {:<13} {:<15} {detail}", entity.kind().to_string(), entity.ip());
    }
    println!();

    for connection in metrics.connections() {
        println!(
            "{:<32} {:<4} in transit {:>3}, pending {:>3}, {:>8} bytes",
            connection.name,
            if connection.active { "up" } else { "down" },
            connection.messages_in_transit,
            connection.pending,
            connection.total_bytes_in_flight
        );
    }
    println!();

    println!("round trips      {}", metrics.round_trips());
    for p in [50.0, 99.0] {
        if let Some(latency) = metrics.percentile(p) {
            println!("p{p:<15} {:.1}ms", latency.as_secs_f64() * 1000.0);
        }
    }
    if let Some(point) = metrics.history.back() {
        println!("round trips/s    {:.2}", point.round_trips_per_sec);
    }
    for state in [
        MessageState::InTransit,
        MessageState::Received,
        MessageState::Decompressing,
        MessageState::Processed,
    ] {
        println!("{:<16} {}", format!("{state:?}"), metrics.message_count(state));
    }
}
