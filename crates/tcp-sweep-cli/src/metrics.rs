use std::time::Duration;
use tcp_sweep_abstract::{EngineResult, FlowRecord, MonitoredFlow, Scenario, SimulationEngine};
use tracing::info;

/// Received bytes over the configured traffic duration, in Mbit/s.
pub fn throughput_mbps(rx_bytes: u64, simulation_time: Duration) -> f64 {
    let secs = simulation_time.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    rx_bytes as f64 * 8.0 / (secs * 1e6)
}

/// Mean one-way delay of delivered packets in seconds; zero when nothing arrived.
pub fn average_delay(delay_sum: Duration, rx_packets: u64) -> f64 {
    if rx_packets == 0 {
        return 0.0;
    }
    delay_sum.as_secs_f64() / rx_packets as f64
}

/// What a record is annotated with besides the flow's own counters.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub variant: &'a str,
    /// Position in the scenario catalog, 0-based.
    pub scenario_index: usize,
    pub scenario: &'a Scenario,
    pub simulation_time: Duration,
}

impl RunContext<'_> {
    pub fn record(&self, flow: &MonitoredFlow) -> FlowRecord {
        let stats = &flow.stats;
        FlowRecord {
            variant: self.variant.to_string(),
            scenario: self.scenario_index + 1,
            description: self.scenario.description.to_string(),
            bandwidth: self.scenario.bandwidth,
            delay: self.scenario.delay,
            buffer_packets: self.scenario.buffer_packets,
            num_flows: self.scenario.num_flows,
            flow_id: flow.id,
            source: flow.tuple.source_address,
            destination: flow.tuple.destination_address,
            throughput_mbps: throughput_mbps(stats.rx_bytes, self.simulation_time),
            delay_s: average_delay(stats.delay_sum, stats.rx_packets),
            lost_packets: stats.lost_packets,
            tx_packets: stats.tx_packets,
            rx_packets: stats.rx_packets,
        }
    }
}

/// One record per classified flow, in flow-id order.
pub fn collect<E: SimulationEngine + ?Sized>(
    engine: &E,
    ctx: &RunContext<'_>,
) -> EngineResult<Vec<FlowRecord>> {
    let mut flows = engine.flow_stats()?;
    flows.sort_by_key(|f| f.id);
    let records: Vec<FlowRecord> = flows.iter().map(|f| ctx.record(f)).collect();
    for record in &records {
        info!(
            "  Flow {} ({} -> {}): {:.4} Mbps, delay {:.4} s, lost {}",
            record.flow_id,
            record.source,
            record.destination,
            record.throughput_mbps,
            record.delay_s,
            record.lost_packets
        );
    }
    Ok(records)
}
