//! Collision-free /24 blocks for every link of a dumbbell.

use crate::topology::TopologyInstance;
use std::net::Ipv4Addr;
use tcp_sweep_abstract::{EngineError, Ipv4Subnet, LinkId, SimulationEngine};
use thiserror::Error;

/// The block reserved for the router-to-router link.
pub const BOTTLENECK_BLOCK: Ipv4Subnet = Ipv4Subnet::slash24(10, 1, 1);

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address space exhausted at flow index {flow}")]
    Exhausted { flow: usize },

    #[error("block {block} for {link:?} overlaps {existing}")]
    Overlap {
        link: LinkId,
        block: Ipv4Subnet,
        existing: Ipv4Subnet,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Second octet base for sender blocks; receivers use the next odd one.
const SENDER_BASE: u32 = 2;

fn flow_block(flow: usize, side: u32) -> Result<Ipv4Subnet, AddressError> {
    let k = flow + 1;
    let second = SENDER_BASE as usize + side as usize + 2 * (k / 256);
    let second = u8::try_from(second).map_err(|_| AddressError::Exhausted { flow })?;
    Ok(Ipv4Subnet::slash24(10, second, (k % 256) as u8))
}

/// Block for the access link between sender `flow` and the left router.
pub fn sender_block(flow: usize) -> Result<Ipv4Subnet, AddressError> {
    flow_block(flow, 0)
}

/// Block for the access link between the right router and receiver `flow`.
pub fn receiver_block(flow: usize) -> Result<Ipv4Subnet, AddressError> {
    flow_block(flow, 1)
}

/// Addresses handed out on one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkAddresses {
    pub block: Ipv4Subnet,
    /// The link's first endpoint (host .1).
    pub first: Ipv4Addr,
    /// The link's second endpoint (host .2).
    pub second: Ipv4Addr,
}

/// Every address assigned within one topology instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    pub bottleneck: LinkAddresses,
    /// Indexed by flow; `first` is the sender.
    pub senders: Vec<LinkAddresses>,
    /// Indexed by flow; `second` is the receiver.
    pub receivers: Vec<LinkAddresses>,
}

impl AddressPlan {
    pub fn sender_address(&self, flow: usize) -> Option<Ipv4Addr> {
        self.senders.get(flow).map(|l| l.first)
    }

    pub fn receiver_address(&self, flow: usize) -> Option<Ipv4Addr> {
        self.receivers.get(flow).map(|l| l.second)
    }
}

/// Assigns blocks to one topology instance. Lives no longer than that instance.
#[derive(Debug, Default)]
pub struct AddressAllocator {
    assigned: Vec<Ipv4Subnet>,
}

impl AddressAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the bottleneck and all `2N` access links of `topology`.
    pub fn assign<E: SimulationEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        topology: &TopologyInstance,
    ) -> Result<AddressPlan, AddressError> {
        let bottleneck = self.assign_link(engine, topology.bottleneck, BOTTLENECK_BLOCK)?;
        let mut senders = Vec::with_capacity(topology.flow_count());
        let mut receivers = Vec::with_capacity(topology.flow_count());
        for flow in 0..topology.flow_count() {
            senders.push(self.assign_link(engine, topology.sender_links[flow], sender_block(flow)?)?);
            receivers.push(self.assign_link(
                engine,
                topology.receiver_links[flow],
                receiver_block(flow)?,
            )?);
        }
        Ok(AddressPlan {
            bottleneck,
            senders,
            receivers,
        })
    }

    fn assign_link<E: SimulationEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        link: LinkId,
        block: Ipv4Subnet,
    ) -> Result<LinkAddresses, AddressError> {
        if let Some(existing) = self.assigned.iter().find(|b| b.overlaps(&block)) {
            return Err(AddressError::Overlap {
                link,
                block,
                existing: *existing,
            });
        }
        let (first, second) = engine.assign_subnet(link, block)?;
        self.assigned.push(block);
        Ok(LinkAddresses {
            block,
            first,
            second,
        })
    }

    pub fn assigned(&self) -> &[Ipv4Subnet] {
        &self.assigned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(flows: usize) -> Vec<Ipv4Subnet> {
        let mut all = vec![BOTTLENECK_BLOCK];
        for flow in 0..flows {
            all.push(sender_block(flow).unwrap());
            all.push(receiver_block(flow).unwrap());
        }
        all
    }

    fn assert_disjoint(all: &[Ipv4Subnet]) {
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert!(!a.overlaps(b), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn matches_classic_layout() {
        assert_eq!(sender_block(0).unwrap().to_string(), "10.2.1.0/24");
        assert_eq!(receiver_block(0).unwrap().to_string(), "10.3.1.0/24");
        assert_eq!(sender_block(2).unwrap().to_string(), "10.2.3.0/24");
        assert_eq!(receiver_block(254).unwrap().to_string(), "10.3.255.0/24");
        assert_eq!(sender_block(255).unwrap().to_string(), "10.4.0.0/24");
    }

    #[test]
    fn blocks_are_pairwise_disjoint() {
        for flows in 1..=10 {
            assert_disjoint(&blocks(flows));
        }
    }

    #[test]
    fn generalizes_past_one_octet() {
        assert_disjoint(&blocks(1500));
    }

    #[test]
    fn runs_out_eventually() {
        let last = 256 * 127 - 2;
        assert_eq!(receiver_block(last).unwrap().to_string(), "10.255.255.0/24");
        assert!(matches!(
            sender_block(last + 1),
            Err(AddressError::Exhausted { .. })
        ));
    }
}
