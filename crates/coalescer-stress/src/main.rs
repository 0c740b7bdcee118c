//! Drives coalesced operations with synthetic workloads and reports how well they coalesce.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use humantime::parse_duration;

use config::Config;
use logging::ensure_log_error;
use workloads::WorkloadsConfig;

mod config;
mod logging;
mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = parse_duration)]
    duration: Duration,
}

fn main() {
    if let Err(error) = execute() {
        ensure_log_error(&error);
        std::process::exit(1);
    }
}

fn execute() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads = WorkloadsConfig::get(&cli.workloads)?;
    let config = Config::get(cli.config.as_deref())?;

    // SAFETY: no other threads are running yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        coalescer::metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("coalescer-stress")
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;

    runtime.block_on(stresstest::perform_stresstest(workloads, cli.duration))
}
