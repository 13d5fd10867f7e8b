//! # STOMP Benchmark - Main Entry Point
//!
//! 1. **Parse arguments** and initialize logging
//! 2. **Build the configuration**; without a server and a destination there
//!    is nothing to do and the process exits successfully
//! 3. **Build the runtime** of the requested flavor and run the benchmark
//! 4. **Report** on stdout, then export JSON/CSV and phase timings if asked
//!
//! Any failure before the report (connection, subscription, delivery, run
//! timeout) exits with an error and prints no report.

use anyhow::{Context, Result};
use clap::Parser;
use stomp_bench::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    broker::TransportFactory,
    cli::Args,
    logging,
    profiling::PhaseTimer,
    results::ResultsManager,
    utils::generate_run_id,
};
use tracing::{debug, info};

fn main() -> Result<()> {
    let args = Args::parse();

    // Held until exit so buffered file logs are flushed.
    let _log_guard = logging::init(args.verbose, args.quiet, args.log_file.as_deref())?;
    debug!("Configuration: {:?}", args);

    let Some(config) = BenchmarkConfig::from_args(&args)? else {
        debug!("No server or destination given, nothing to do");
        return Ok(());
    };

    let runtime = config
        .runtime
        .build()
        .context("failed to build the async runtime")?;
    runtime.block_on(run(config, &args))
}

async fn run(config: BenchmarkConfig, args: &Args) -> Result<()> {
    let run_id = generate_run_id();
    info!("Starting STOMP Benchmark (run {})", run_id);

    let mut results_manager = ResultsManager::new(run_id);
    if let Some(path) = &args.output_file {
        results_manager = results_manager.with_json_output(path);
    }
    if let Some(path) = &args.csv {
        results_manager = results_manager.with_csv_output(path);
    }

    let connector = TransportFactory::create(config.transport, config.stomp_config());
    let runner = BenchmarkRunner::new(config, connector);

    let mut timer = PhaseTimer::new(args.profile);
    let benchmark = runner.run_profiled(&mut timer).await?;

    print!("{}", benchmark.report());

    if results_manager.is_enabled() {
        let results = results_manager.collect(runner.config(), &benchmark, timer.phases());
        results_manager.write(&results)?;
    }

    if timer.is_enabled() {
        println!();
        println!("{}", timer);
    }

    info!("STOMP Benchmark completed successfully");
    Ok(())
}
