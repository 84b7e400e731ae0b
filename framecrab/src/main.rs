//! FrameCrab workload driver
//!
//! Runs the scripted call-stack workload against a pool configured from the
//! environment and the command line, and reports pool statistics.

use anyhow::Result;
use clap::Parser;
use framecrab::PoolConfig;
use framecrab::runner::{Workload, run_workload};
use std::process::ExitCode;
use tracing::{error, info};

/// Exercise the frame manager under a compacting pool.
///
/// ENVIRONMENT VARIABLES:
///     FRAMECRAB_LOG          Log filter (default: info)
///     FRAMECRAB_POOL_SIZE    Pool size in bytes
///     FRAMECRAB_GC_STRESS    Set to '1' to collect before every allocation
#[derive(Parser, Debug)]
#[command(name = "framecrab")]
#[command(version)]
struct Args {
    /// Pool size in bytes, overriding FRAMECRAB_POOL_SIZE
    #[arg(long)]
    pool_size: Option<u16>,
    /// Collect before every allocation
    #[arg(long)]
    gc_stress: bool,
    /// Call nesting depth of each round
    #[arg(long, default_value_t = 8)]
    depth: u16,
    /// Locals bound in every frame
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(..=1024))]
    locals: u16,
    /// Number of rounds
    #[arg(long, default_value_t = 16)]
    rounds: u32,
}

fn main() -> ExitCode {
    let log_level = std::env::var("FRAMECRAB_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Workload failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut config = PoolConfig::from_env()?;
    if let Some(pool_size) = args.pool_size {
        config = config.with_pool_size(pool_size);
    }
    if args.gc_stress {
        config = config.with_gc_stress(true);
    }

    let workload = Workload {
        depth: args.depth,
        locals: args.locals,
        rounds: args.rounds,
    };
    let report = run_workload(config, &workload)?;
    info!("Verified {} bindings", report.verified);

    let stats = report.stats;
    println!("calls:        {}", report.calls);
    println!("verified:     {}", report.verified);
    println!("capacity:     {} bytes", stats.capacity);
    println!("in use:       {} bytes", stats.used);
    println!("allocations:  {}", stats.allocations);
    println!("collections:  {}", stats.collections);
    println!("reclaimed:    {} bytes", stats.reclaimed);
    Ok(())
}
