use crate::addressing::AddressAllocator;
use crate::catalog::{self, Resolution};
use crate::export::ResultExporter;
use crate::metrics::{self, RunContext};
use crate::topology::TopologyBuilder;
use crate::wiring::TrafficWiring;
use anyhow::{Context, bail};
use std::io::Write;
use tcp_sweep_abstract::{EngineDefaults, Scenario, SimulationEngine, SweepConfig, VariantHandle};
use tracing::{info, warn};

/// What a finished sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub runs_completed: usize,
    pub rows_written: usize,
    pub skipped_variants: Vec<String>,
}

/// Drives every (variant, scenario) pair through one engine, strictly in sequence.
pub struct SweepRunner<'a> {
    config: &'a SweepConfig,
    variants: &'a [&'a str],
    scenarios: &'a [Scenario],
}

impl<'a> SweepRunner<'a> {
    pub fn new(config: &'a SweepConfig) -> Self {
        Self {
            config,
            variants: &catalog::VARIANTS,
            scenarios: &catalog::SCENARIOS,
        }
    }

    pub fn with_variants(mut self, variants: &'a [&'a str]) -> Self {
        self.variants = variants;
        self
    }

    pub fn with_scenarios(mut self, scenarios: &'a [Scenario]) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// Reject configurations where the access links would be the bottleneck.
    pub fn validate(&self) -> anyhow::Result<()> {
        let access = self.config.access_link.rate;
        for (idx, scenario) in self.scenarios.iter().enumerate() {
            if scenario.num_flows == 0 {
                bail!("scenario {} ({}) has no flows", idx + 1, scenario.description);
            }
            if access <= scenario.bandwidth {
                bail!(
                    "access links ({access}) must be faster than the bottleneck of scenario {} ({})",
                    idx + 1,
                    scenario.bandwidth
                );
            }
        }
        if self.config.simulation_time.is_zero() {
            bail!("simulation time must be positive");
        }
        Ok(())
    }

    pub fn run<E, W>(
        &self,
        engine: &mut E,
        exporter: &mut ResultExporter<W>,
    ) -> anyhow::Result<SweepSummary>
    where
        E: SimulationEngine + ?Sized,
        W: Write,
    {
        self.validate()?;
        let mut summary = SweepSummary::default();

        for variant in self.variants {
            let handle = match catalog::resolve(&*engine, variant) {
                Resolution::Found(handle) => handle,
                Resolution::NotFound => {
                    warn!("Variant {variant} is not available in this simulation engine, skipping");
                    summary.skipped_variants.push(variant.to_string());
                    continue;
                }
            };

            for (idx, scenario) in self.scenarios.iter().enumerate() {
                info!(
                    "Running {} - Scenario {}: {}",
                    variant,
                    idx + 1,
                    scenario.description
                );
                let written = self
                    .run_scenario(engine, exporter, variant, &handle, idx, scenario)
                    .with_context(|| {
                        format!("{variant} - scenario {} ({})", idx + 1, scenario.description)
                    })?;
                summary.runs_completed += 1;
                summary.rows_written += written;
            }
        }
        Ok(summary)
    }

    /// One isolated run; returns the number of rows appended.
    fn run_scenario<E, W>(
        &self,
        engine: &mut E,
        exporter: &mut ResultExporter<W>,
        variant: &str,
        handle: &VariantHandle,
        idx: usize,
        scenario: &Scenario,
    ) -> anyhow::Result<usize>
    where
        E: SimulationEngine + ?Sized,
        W: Write,
    {
        engine
            .configure(&EngineDefaults {
                congestion_control: handle.clone(),
                queue_capacity: scenario.buffer_packets,
            })
            .context("failed to configure engine defaults")?;

        let topology = TopologyBuilder::new(self.config.access_link)
            .build(engine, scenario)
            .context("failed to build topology")?;
        let plan = AddressAllocator::new()
            .assign(engine, &topology)
            .context("failed to assign addresses")?;
        engine
            .populate_routing()
            .context("failed to populate routing")?;
        TrafficWiring::new(self.config)
            .wire(engine, &topology, &plan)
            .context("failed to install applications")?;
        engine
            .install_flow_monitor()
            .context("failed to install flow monitor")?;

        engine
            .run_until(self.config.stop_deadline())
            .context("simulation run failed")?;

        let ctx = RunContext {
            variant,
            scenario_index: idx,
            scenario,
            simulation_time: self.config.simulation_time,
        };
        let records = metrics::collect(&*engine, &ctx).context("failed to read flow statistics")?;
        let written = exporter
            .append_all(&records)
            .context("failed to write results")?;

        topology
            .tear_down(engine)
            .context("failed to tear down simulation")?;
        Ok(written)
    }
}
