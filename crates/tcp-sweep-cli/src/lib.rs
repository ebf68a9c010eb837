pub mod addressing;
pub mod catalog;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod topology;
pub mod wiring;

use anyhow::{Context, bail};
use clap::Parser;
use std::time::Duration;
use tcp_sweep_abstract::{SimulationEngine, SweepConfig};
use tcp_sweep_simulator::Simulator;
use tracing::info;

use crate::export::ResultExporter;
use crate::runner::{SweepRunner, SweepSummary};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sweep TCP congestion-control variants over dumbbell scenarios")]
pub struct Args {
    /// Traffic duration of every run, in seconds.
    #[arg(long, default_value_t = 20.0)]
    pub simulation_time: f64,
}

impl Args {
    pub fn sweep_config(&self) -> anyhow::Result<SweepConfig> {
        if !self.simulation_time.is_finite() || self.simulation_time <= 0.0 {
            bail!(
                "--simulation-time must be a positive number of seconds, got {}",
                self.simulation_time
            );
        }
        let time = Duration::try_from_secs_f64(self.simulation_time)
            .context("--simulation-time is out of range")?;
        Ok(SweepConfig::default().with_simulation_time(time))
    }
}

/// Run the whole sweep against `engine`, writing the table to `config.output_path`.
pub fn sweep<E: SimulationEngine + ?Sized>(
    engine: &mut E,
    config: &SweepConfig,
) -> anyhow::Result<SweepSummary> {
    let runner = SweepRunner::new(config);
    // An invalid sweep must not truncate an earlier results file.
    runner.validate()?;
    let path = &config.output_path;
    let mut exporter = ResultExporter::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let summary = runner.run(engine, &mut exporter)?;
    exporter
        .finish()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(summary)
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let config = args.sweep_config()?;
    info!(
        "TCP sweep starting ({}s per run, results to {})",
        config.simulation_time.as_secs_f64(),
        config.output_path.display()
    );

    let mut engine = Simulator::new();
    let summary = sweep(&mut engine, &config)?;

    if !summary.skipped_variants.is_empty() {
        info!("Skipped variants: {}", summary.skipped_variants.join(", "));
    }
    info!(
        "Simulation complete: {} runs, {} rows. Results saved to {}",
        summary.runs_completed,
        summary.rows_written,
        config.output_path.display()
    );
    Ok(())
}
