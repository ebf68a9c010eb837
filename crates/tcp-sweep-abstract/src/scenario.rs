use crate::config::LinkProfile;
use crate::units::{self, DataRate};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// One bottleneck configuration of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub bandwidth: DataRate,
    #[serde(with = "units::millis")]
    pub delay: Duration,
    pub buffer_packets: u32,
    pub num_flows: u32,
    pub description: &'static str,
}

impl Scenario {
    pub fn bottleneck(&self) -> LinkProfile {
        LinkProfile {
            rate: self.bandwidth,
            delay: self.delay,
        }
    }
}

/// One output row: a single flow of a single (variant, scenario) run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FlowRecord {
    pub variant: String,
    /// 1-based position in the scenario catalog.
    pub scenario: usize,
    pub description: String,
    pub bandwidth: DataRate,
    #[serde(with = "units::millis")]
    pub delay: Duration,
    pub buffer_packets: u32,
    pub num_flows: u32,
    pub flow_id: u32,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    #[serde(rename = "Throughput_Mbps")]
    pub throughput_mbps: f64,
    #[serde(rename = "Delay_s")]
    pub delay_s: f64,
    pub lost_packets: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
}

impl FlowRecord {
    pub const HEADER: [&'static str; 15] = [
        "Variant",
        "Scenario",
        "Description",
        "Bandwidth",
        "Delay",
        "BufferPackets",
        "NumFlows",
        "FlowId",
        "Source",
        "Destination",
        "Throughput_Mbps",
        "Delay_s",
        "LostPackets",
        "TxPackets",
        "RxPackets",
    ];
}
