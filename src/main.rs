// src/main.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use seismon::{
    FanoutSink, LogSink, MonitorConfig, PlotStyle, SnapshotSink, SourceRegistry, SyntheticSource,
    SystemClock,
};

/// Run a live waveform monitor against a synthetic provider.
#[derive(Parser, Debug)]
#[command(name = "seismon", version, about)]
struct Args {
    /// JSON monitor configuration; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Channel to monitor (repeatable).
    #[arg(long = "channel", default_value = "AV.OKCF.--.EHZ")]
    channels: Vec<String>,

    /// Sample rate of the synthetic provider in Hz.
    #[arg(long, default_value_t = 100.0)]
    sample_rate: f64,

    /// Simulated provider latency per fetch in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Probability that a fetch fails.
    #[arg(long, default_value_t = 0.0)]
    failure_rate: f64,

    /// How long to run before stopping.
    #[arg(long, default_value_t = 10)]
    run_seconds: u64,

    /// Write one PNG per channel here on exit.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MonitorConfig::default(),
    };

    let registry = SourceRegistry::new();
    let source = SyntheticSource::new("synthetic", args.sample_rate, Arc::new(SystemClock))
        .context("creating synthetic source")?
        .with_latency(Duration::from_millis(args.latency_ms))
        .with_failure_rate(args.failure_rate);
    registry.register(Arc::new(source));

    let snapshots = SnapshotSink::new(PlotStyle::default());
    let sink = FanoutSink::new(vec![Arc::new(snapshots.clone()), Arc::new(LogSink)]);
    let monitor = registry
        .monitor("synthetic", Arc::new(sink), config)
        .context("building monitor")?;
    for channel in &args.channels {
        monitor.register_channel(channel);
    }

    monitor.start().context("starting monitor")?;
    thread::sleep(Duration::from_secs(args.run_seconds));
    monitor.stop();

    let report = monitor.report();
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(dir) = &args.snapshot_dir {
        let written = snapshots
            .write_all(dir)
            .with_context(|| format!("writing snapshots to {}", dir.display()))?;
        for path in written {
            info!("wrote {}", path.display());
        }
    }
    registry.close_all();
    Ok(())
}
