use crate::packet::{MonitorTag, Packet};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tcp_sweep_abstract::{FiveTuple, FlowId, FlowStats, MonitoredFlow};

/// Per-flow counters keyed by five-tuple.
///
/// Only data-bearing segments are classified; handshake and pure ACK
/// segments pass through untracked.
#[derive(Debug, Default)]
pub struct FlowMonitor {
    classifier: HashMap<FiveTuple, FlowId>,
    flows: BTreeMap<FlowId, (FiveTuple, FlowStats)>,
    next_id: FlowId,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    /// Record a packet leaving its originating node.
    pub fn on_send(&mut self, packet: &mut Packet, now: Duration) {
        if packet.payload_len == 0 {
            return;
        }
        let tuple = packet.five_tuple();
        let id = match self.classifier.get(&tuple) {
            Some(id) => *id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.classifier.insert(tuple, id);
                self.flows.insert(id, (tuple, FlowStats::default()));
                id
            }
        };
        if let Some((_, stats)) = self.flows.get_mut(&id) {
            stats.tx_packets += 1;
            stats.tx_bytes += packet.size() as u64;
        }
        packet.tag = Some(MonitorTag {
            flow: id,
            sent_at: now,
        });
    }

    /// Record a packet reaching its destination node.
    pub fn on_receive(&mut self, packet: &Packet, now: Duration) {
        let Some(tag) = packet.tag else { return };
        if let Some((_, stats)) = self.flows.get_mut(&tag.flow) {
            stats.rx_packets += 1;
            stats.rx_bytes += packet.size() as u64;
            stats.delay_sum += now.saturating_sub(tag.sent_at);
        }
    }

    /// Record a packet discarded anywhere in the network.
    pub fn on_drop(&mut self, packet: &Packet) {
        let Some(tag) = packet.tag else { return };
        if let Some((_, stats)) = self.flows.get_mut(&tag.flow) {
            stats.lost_packets += 1;
        }
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn report(&self) -> Vec<MonitoredFlow> {
        self.flows
            .iter()
            .map(|(id, (tuple, stats))| MonitoredFlow {
                id: *id,
                tuple: *tuple,
                stats: stats.clone(),
            })
            .collect()
    }
}
