use anyhow::{Context, Result};
use clap::Parser;
use frontline_core::profiling::{self, TraceLevel};
use frontline_core::{
    odds, BattleContext, BattleTracker, DefaultParticipant, EventLogObserver, ObserverRegistry,
    SeededRandomSource,
};
use std::path::PathBuf;

mod loader;

#[cfg(feature = "tracy")]
#[global_allocator]
static GLOBAL: tracy_client::ProfiledAllocator<std::alloc::System> =
    tracy_client::ProfiledAllocator::new(std::alloc::System, 100);

#[derive(Parser, Debug)]
#[command(author, version, about = "Resolve the battles of a scenario", long_about = None)]
struct Args {
    /// Scenario file (JSON)
    #[arg(long)]
    scenario: PathBuf,

    /// Seed for the dice
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// Force low-luck dice
    #[arg(long)]
    low_luck: bool,

    /// Estimate odds over this many trials instead of resolving once
    #[arg(long)]
    trials: Option<u32>,

    /// Write the combat log to this file as JSON Lines
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Tracy span level (info, debug, trace); tracy builds only
    #[arg(long, default_value = "info")]
    trace_level: TraceLevel,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = std::str::FromStr::from_str(&args.log_level).unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
    profiling::init_tracy(args.trace_level);

    let mut scenario = loader::load_scenario(&args.scenario)?;
    if args.low_luck {
        scenario.config.low_luck = true;
    }

    if let Some(trials) = args.trials {
        log::info!("Estimating odds over {} trials (seed {})", trials, args.seed);
        let summary = odds::estimate(
            &scenario.state,
            &scenario.attacks,
            &scenario.config,
            trials,
            args.seed,
        )?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut observers = ObserverRegistry::new();
    if let Some(path) = &args.event_log {
        let observer = EventLogObserver::file(path)
            .with_context(|| format!("Failed to create event log {}", path.display()))?;
        observers.register(Box::new(observer));
    }

    let mut tracker = BattleTracker::new();
    tracker.add_attacks(&mut scenario.state, &scenario.attacks)?;
    log::info!("{} battles pending", tracker.pending_count());

    let mut random = SeededRandomSource::new(args.seed);
    let mut participant = DefaultParticipant;
    let mut ctx = BattleContext {
        config: &scenario.config,
        random: &mut random,
        participant: &mut participant,
        observers: &observers,
    };
    let outcomes = tracker.fight_all(&scenario.order, &mut scenario.state, &mut ctx)?;
    observers.shutdown();

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}
