//! Dumbbell construction.
//!
//! ```text
//! sender[0] ──┐                          ┌── receiver[0]
//! sender[1] ──┤── router[0] ══ router[1] ┤── receiver[1]
//!    ...    ──┘     (bottleneck link)    └──    ...
//! ```

use tcp_sweep_abstract::{
    EngineError, EngineResult, LinkId, LinkProfile, NodeId, Scenario, SimulationEngine,
};
use tracing::debug;

/// Handles to everything one scenario's dumbbell created inside the engine.
///
/// The engine owns the actual nodes and links; dropping this value does not
/// free them, [`TopologyInstance::tear_down`] does.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a topology must be torn down before the next run"]
pub struct TopologyInstance {
    pub routers: [NodeId; 2],
    pub senders: Vec<NodeId>,
    pub receivers: Vec<NodeId>,
    pub bottleneck: LinkId,
    /// sender[j] to router[0]
    pub sender_links: Vec<LinkId>,
    /// router[1] to receiver[j]
    pub receiver_links: Vec<LinkId>,
}

impl TopologyInstance {
    pub fn flow_count(&self) -> usize {
        self.senders.len()
    }

    /// Destroy every node, link, address and pending event in the engine.
    pub fn tear_down<E: SimulationEngine + ?Sized>(self, engine: &mut E) -> EngineResult<()> {
        debug!("Tearing down dumbbell with {} flows", self.flow_count());
        engine.destroy()
    }
}

/// Builds dumbbells whose leaves hang off a fixed access-link profile.
#[derive(Debug, Clone, Copy)]
pub struct TopologyBuilder {
    access: LinkProfile,
}

impl TopologyBuilder {
    pub fn new(access: LinkProfile) -> Self {
        Self { access }
    }

    pub fn build<E: SimulationEngine + ?Sized>(
        &self,
        engine: &mut E,
        scenario: &Scenario,
    ) -> EngineResult<TopologyInstance> {
        let flows = scenario.num_flows as usize;
        let routers = engine.create_nodes(2)?;
        let senders = engine.create_nodes(flows)?;
        let receivers = engine.create_nodes(flows)?;

        engine.install_stack(&routers)?;
        engine.install_stack(&senders)?;
        engine.install_stack(&receivers)?;

        let &[left, right] = routers.as_slice() else {
            return Err(EngineError::InvalidConfiguration(format!(
                "engine created {} routers, expected 2",
                routers.len()
            )));
        };
        if senders.len() != flows || receivers.len() != flows {
            return Err(EngineError::InvalidConfiguration(format!(
                "engine created {}/{} leaves, expected {flows} each",
                senders.len(),
                receivers.len()
            )));
        }
        let routers = [left, right];
        let bottleneck = engine.connect(left, right, &scenario.bottleneck())?;

        let mut sender_links = Vec::with_capacity(flows);
        let mut receiver_links = Vec::with_capacity(flows);
        for (sender, receiver) in senders.iter().zip(&receivers) {
            sender_links.push(engine.connect(*sender, left, &self.access)?);
            receiver_links.push(engine.connect(right, *receiver, &self.access)?);
        }
        debug!(
            "Built dumbbell: {} flows, bottleneck {}/{:?}",
            flows, scenario.bandwidth, scenario.delay
        );

        Ok(TopologyInstance {
            routers,
            senders,
            receivers,
            bottleneck,
            sender_links,
            receiver_links,
        })
    }
}
