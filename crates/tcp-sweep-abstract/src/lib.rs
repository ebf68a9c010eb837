pub mod config;
pub mod error;
pub mod flow;
pub mod interface;
pub mod scenario;
pub mod subnet;
pub mod units;

pub use interface::{CbrSpec, LinkId, NodeId, SimulationEngine, VariantHandle};

pub use config::{EngineDefaults, LinkProfile, SweepConfig};
pub use error::{EngineError, EngineResult};
pub use flow::{FiveTuple, FlowId, FlowStats, MonitoredFlow, PROTOCOL_TCP};
pub use scenario::{FlowRecord, Scenario};
pub use subnet::Ipv4Subnet;
pub use units::DataRate;
