//! Compiled-in sweep tables and variant resolution.

use std::time::Duration;
use tcp_sweep_abstract::{DataRate, Scenario, SimulationEngine, VariantHandle};
use tracing::debug;

/// Bottleneck configurations, swept in this order for every variant.
pub const SCENARIOS: [Scenario; 4] = [
    Scenario {
        bandwidth: DataRate::from_mbps(2),
        delay: Duration::from_millis(10),
        buffer_packets: 10,
        num_flows: 2,
        description: "Low-bandwidth, Low-latency",
    },
    Scenario {
        bandwidth: DataRate::from_mbps(2),
        delay: Duration::from_millis(100),
        buffer_packets: 20,
        num_flows: 3,
        description: "Low-bandwidth, High-latency",
    },
    Scenario {
        bandwidth: DataRate::from_mbps(10),
        delay: Duration::from_millis(10),
        buffer_packets: 20,
        num_flows: 3,
        description: "High-bandwidth, Low-latency",
    },
    Scenario {
        bandwidth: DataRate::from_mbps(10),
        delay: Duration::from_millis(100),
        buffer_packets: 50,
        num_flows: 3,
        description: "High-bandwidth, High-latency",
    },
];

/// Congestion-control type names to sweep.
pub const VARIANTS: [&str; 3] = ["TcpNewReno", "TcpCubic", "TcpBbr"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(VariantHandle),
    NotFound,
}

/// Ask the engine for `name`. An error and an empty answer both mean "not available".
pub fn resolve<E: SimulationEngine + ?Sized>(engine: &E, name: &str) -> Resolution {
    match engine.lookup_congestion_control(name) {
        Ok(Some(handle)) => Resolution::Found(handle),
        Ok(None) => {
            debug!("Engine has no congestion control named {name}");
            Resolution::NotFound
        }
        Err(err) => {
            debug!("Lookup of {name} failed: {err}");
            Resolution::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_have_flows() {
        assert!(SCENARIOS.iter().all(|s| s.num_flows >= 1));
        assert!(SCENARIOS.iter().all(|s| s.buffer_packets >= 1));
        assert_eq!(SCENARIOS[0].description, "Low-bandwidth, Low-latency");
        assert_eq!(SCENARIOS[3].bandwidth, DataRate::from_mbps(10));
    }

    #[test]
    fn builtin_engine_misses_bbr() {
        let engine = tcp_sweep_simulator::Simulator::new();
        assert!(matches!(resolve(&engine, "TcpNewReno"), Resolution::Found(_)));
        assert!(matches!(resolve(&engine, "TcpCubic"), Resolution::Found(_)));
        assert_eq!(resolve(&engine, "TcpBbr"), Resolution::NotFound);
    }
}
