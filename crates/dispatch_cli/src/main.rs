use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use dispatch_core::activities::{RatingBoard, RatingSide, RideDurationModel, StoreTripActions};
use dispatch_core::agents::{Driver, DriverId, Location, Passenger, PassengerId, Rating};
use dispatch_core::config::DispatchConfig;
use dispatch_core::cycle::MatchCycle;
use dispatch_core::lifecycle::{
    InMemoryCheckpoints, LifecycleOptions, LifecycleRegistry, LifecycleStatus,
};
use dispatch_core::logging::init_tracing;
use dispatch_core::matching::{AssignmentSolver, CostGraphBuilder, CostMatrix, HungarianSolver};
use dispatch_core::scheduler::MatchScheduler;
use dispatch_core::signal::{LifecycleSignal, SignalSender};
use dispatch_core::store::EcsStore;
use dispatch_core::telemetry::{TelemetrySummary, TripTelemetry};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dispatch",
    about = "Batch ride dispatcher: periodic matching plus durable trip lifecycles"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-memory dispatch session with a random population
    Run(RunArgs),
    /// Solve a square cost matrix read as JSON (`[[..], [..]]`)
    Solve {
        /// Matrix file; reads stdin when omitted
        path: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// JSON config file; defaults apply to every missing field
    #[arg(long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 20)]
    passengers: u64,
    #[arg(long, default_value_t = 8)]
    drivers: u64,
    #[arg(long, default_value_t = 123)]
    seed: u64,
    /// Payments each client declines before accepting
    #[arg(long, default_value_t = 1)]
    declined_payments: u32,
    /// Override for `matching.period_ms`
    #[arg(long)]
    period_ms: Option<u64>,
    /// Override for `ride.max_duration_ms`
    #[arg(long)]
    max_ride_ms: Option<u64>,
    /// Abandon whatever is still running after this many seconds
    #[arg(long, default_value_t = 300)]
    deadline_secs: u64,
}

#[derive(Serialize)]
struct RunReport {
    summary: TelemetrySummary,
    unfinished: Vec<LifecycleStatus>,
}

#[derive(Serialize)]
struct SolveReport {
    assignment: Vec<usize>,
    total_cost: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Solve { path } => solve(path),
    }
}

// ── run ────────────────────────────────────────────────────────────

fn load_config(args: &RunArgs) -> Result<DispatchConfig> {
    let mut config = match &args.config {
        Some(path) => DispatchConfig::from_path(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(period_ms) = args.period_ms {
        config.matching.period_ms = period_ms;
    }
    if let Some(max_ride_ms) = args.max_ride_ms {
        config.ride.max_duration_ms = max_ride_ms;
        config.ride.min_duration_ms = config.ride.min_duration_ms.min(max_ride_ms);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn populate(store: &EcsStore, rng: &mut StdRng, passengers: u64, drivers: u64) -> Result<()> {
    let now = Utc::now();
    for id in 0..passengers {
        store.request_trip(Passenger::new(
            PassengerId(id),
            format!("passenger {id}"),
            Location(rng.gen_range(0..1_000)),
            Location(rng.gen_range(0..1_000)),
            Rating::new(rng.gen_range(3.0..=5.0))?,
            now,
        ));
    }
    for id in 0..drivers {
        store.go_online(Driver::new(
            DriverId(id),
            format!("driver {id}"),
            Location(rng.gen_range(0..1_000)),
            Rating::new(rng.gen_range(3.0..=5.0))?,
            now,
        ));
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let store = Arc::new(EcsStore::new());
    populate(&store, &mut rng, args.passengers, args.drivers)?;

    let ratings = RatingBoard::new();
    let actions = StoreTripActions::new(
        store.clone(),
        ratings.clone(),
        RideDurationModel::new(Some(args.seed), &config.ride),
        config.ride.heartbeat_interval(),
        config.lifecycle.rating.window(),
    );
    let telemetry = TripTelemetry::new();
    let registry = LifecycleRegistry::new(
        Arc::new(actions),
        Arc::new(InMemoryCheckpoints::new()),
        LifecycleOptions::from_config(&config),
        telemetry.clone(),
    );

    // Client role: every trip gets its ratings and payment answers up front.
    let mut keys = Vec::new();
    for id in 0..args.passengers {
        let passenger = store
            .passenger(PassengerId(id))
            .with_context(|| format!("passenger {id} missing after seeding"))?;
        let key = passenger.lifecycle_key;
        registry.start(key.clone(), passenger.id)?;
        ratings.submit(
            key.clone(),
            RatingSide::DriverRatesPassenger,
            Rating::new(rng.gen_range(1.0..=5.0))?,
        );
        ratings.submit(
            key.clone(),
            RatingSide::PassengerRatesDriver,
            Rating::new(rng.gen_range(1.0..=5.0))?,
        );
        for _ in 0..args.declined_payments {
            registry.send(&key, LifecycleSignal::Payment(false))?;
        }
        registry.send(&key, LifecycleSignal::Payment(true))?;
        keys.push(key);
    }

    let cycle = MatchCycle::new(
        store.clone(),
        Arc::new(HungarianSolver::new()),
        CostGraphBuilder::new(config.matching.max_batch),
        Arc::new(registry.clone()),
    );
    let scheduler =
        MatchScheduler::new(Arc::new(cycle), config.matching.period(), telemetry.clone()).spawn();
    info!(
        passengers = args.passengers,
        drivers = args.drivers,
        period = ?config.matching.period(),
        "dispatch session started"
    );

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.deadline_secs);
    for key in &keys {
        if tokio::time::timeout_at(deadline, registry.wait(key))
            .await
            .is_err()
        {
            warn!(deadline_secs = args.deadline_secs, "deadline reached");
            break;
        }
    }
    scheduler.stop().await;

    let unfinished: Vec<LifecycleStatus> = registry
        .statuses()
        .into_iter()
        .filter(|status| !status.outcome.is_finished())
        .collect();
    for status in &unfinished {
        registry.abandon(&status.key)?;
    }

    let report = RunReport {
        summary: telemetry.summary(),
        unfinished,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── solve ──────────────────────────────────────────────────────────

fn solve(path: Option<PathBuf>) -> Result<()> {
    let json = match &path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let rows: Vec<Vec<f64>> = serde_json::from_str(&json).context("expected a JSON array of rows")?;
    if rows.is_empty() {
        bail!("cost matrix is empty");
    }

    let matrix = CostMatrix::from_rows(rows);
    let assignment = HungarianSolver::new().solve(&matrix)?;
    let report = SolveReport {
        total_cost: assignment.total_cost(&matrix),
        assignment: assignment.as_slice().to_vec(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
