use crate::config::{EngineDefaults, LinkProfile};
use crate::error::EngineResult;
use crate::flow::MonitoredFlow;
use crate::subnet::Ipv4Subnet;
use crate::units::DataRate;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub u32);

/// Engine-issued token naming a registered congestion-control implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VariantHandle {
    type_id: u32,
    name: String,
}

impl VariantHandle {
    pub fn new(type_id: u32, name: impl Into<String>) -> Self {
        Self {
            type_id,
            name: name.into(),
        }
    }

    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A constant-bitrate source: always "on" between `start` and `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CbrSpec {
    pub remote: SocketAddrV4,
    pub rate: DataRate,
    pub packet_size: u32,
    pub start: Duration,
    pub stop: Duration,
}

/// The capability set the sweep harness needs from a packet-level simulator.
///
/// Engines are single-threaded and hold process-wide defaults, so a value
/// implementing this trait must only ever drive one run at a time.
pub trait SimulationEngine {
    /// Look up a congestion-control implementation by type name.
    ///
    /// Engines may signal "unknown" either as `Ok(None)` or as an error.
    fn lookup_congestion_control(&self, name: &str) -> EngineResult<Option<VariantHandle>>;

    /// Set the defaults applied to every socket and link created afterwards.
    fn configure(&mut self, defaults: &EngineDefaults) -> EngineResult<()>;

    fn create_nodes(&mut self, count: usize) -> EngineResult<Vec<NodeId>>;

    fn install_stack(&mut self, nodes: &[NodeId]) -> EngineResult<()>;

    /// Connect two nodes with a point-to-point link.
    fn connect(&mut self, a: NodeId, b: NodeId, profile: &LinkProfile) -> EngineResult<LinkId>;

    /// Number both ends of `link` from `subnet`; returns (first, second) endpoint addresses.
    fn assign_subnet(
        &mut self,
        link: LinkId,
        subnet: Ipv4Subnet,
    ) -> EngineResult<(Ipv4Addr, Ipv4Addr)>;

    /// Compute routes once every link and address exists.
    fn populate_routing(&mut self) -> EngineResult<()>;

    fn install_cbr_source(&mut self, node: NodeId, spec: &CbrSpec) -> EngineResult<()>;

    fn install_sink(&mut self, node: NodeId, listen: SocketAddrV4) -> EngineResult<()>;

    fn install_flow_monitor(&mut self) -> EngineResult<()>;

    /// Drain the event queue until `deadline` or until it is empty.
    fn run_until(&mut self, deadline: Duration) -> EngineResult<()>;

    /// Classifier output joined with per-flow counters, ordered by flow id.
    fn flow_stats(&self) -> EngineResult<Vec<MonitoredFlow>>;

    /// Discard every node, link, address, application, event and default.
    fn destroy(&mut self) -> EngineResult<()>;
}
