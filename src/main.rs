//! # latency_rig entry point
//!
//! Builds the stage graph (built-in topology or a TOML file), runs it until
//! Ctrl+C or for a fixed duration, then shuts down and reports.
//!
//! ## Outputs
//! - Per-stage summary in the log at shutdown.
//! - `--trace-csv`: every publish/receive/store/take/sink event (nanosecond timestamps).
//! - `--summary-csv`: one appended row per stage, for comparing runs.

use clap::Parser;
use crossbeam::channel::bounded;
use log::{error, info, warn};
use std::{path::PathBuf, time::Duration};

use latency_rig::{
    graph::{Graph, GraphConfig},
    utils::export::export_summary_csv,
};

/// Latency benchmark workload: sensor, relay and sink stages over named channels
#[derive(Parser, Debug)]
#[command(name = "latency_rig", version, long_about = None)]
struct Args {
    /// TOML graph description (default: built-in six-stage graph)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads (default: from config, else number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Seed for the latency generator (default: from config, else OS entropy)
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Write the per-message event trace to this CSV file
    #[arg(long)]
    trace_csv: Option<PathBuf>,

    /// Append per-stage summary rows to this CSV file
    #[arg(long)]
    summary_csv: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("[main] loading graph from {}", path.display());
            GraphConfig::load(path)?
        }
        None => GraphConfig::default(),
    };
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    if args.seed.is_some() {
        config.latency.seed = args.seed;
    }

    let (graph, recorder) = Graph::prepare(&config, args.trace_csv.clone())?;
    info!(
        "[main] {} stages, {} workers, latency cap {} ms",
        config.stages.len(),
        graph.workers(),
        config.latency.cap_ms
    );

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        info!("[main] shutdown signal received");
        let _ = stop_tx.try_send(());
    })?;

    let running = graph.start()?;
    match args.duration_secs {
        Some(secs) => {
            info!("[main] running for {}s (Ctrl+C to stop early)", secs);
            let _ = stop_rx.recv_timeout(Duration::from_secs(secs));
        }
        None => {
            info!("[main] running until Ctrl+C");
            if stop_rx.recv().is_err() {
                warn!("[main] signal channel closed, stopping");
            }
        }
    }

    let report = running.shutdown();
    report.log_summary();

    if let Some(path) = &args.summary_csv {
        let label = match config.latency.seed {
            Some(seed) => format!("seed-{}", seed),
            None => format!("workers-{}", config.worker_count()),
        };
        if let Err(e) = export_summary_csv(path, &report, &label) {
            error!("[main] summary export to {} failed: {}", path.display(), e);
        }
    }

    recorder.stop_exporter();
    if recorder.dropped() > 0 {
        warn!("[main] {} trace events dropped (queue full)", recorder.dropped());
    }
    info!("[main] done");
    Ok(())
}
