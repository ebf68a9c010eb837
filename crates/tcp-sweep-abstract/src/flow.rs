use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const PROTOCOL_TCP: u8 = 6;

/// Identifier the flow classifier hands out, starting at 1.
pub type FlowId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FiveTuple {
    pub protocol: u8,
    pub source_address: Ipv4Addr,
    pub destination_address: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
}

/// Counters accumulated by a flow monitor for one flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Sum of one-way delays of every delivered packet.
    pub delay_sum: Duration,
    pub lost_packets: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoredFlow {
    pub id: FlowId,
    pub tuple: FiveTuple,
    pub stats: FlowStats,
}
