use crate::interface::{LinkId, NodeId};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Failures reported by a simulation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("unknown link {0:?}")]
    UnknownLink(LinkId),

    #[error("node {0:?} has no internet stack installed")]
    StackNotInstalled(NodeId),

    #[error("link {0:?} already has addresses assigned")]
    AddressAlreadyAssigned(LinkId),

    #[error("address {0} is already in use")]
    AddressConflict(Ipv4Addr),

    #[error("invalid subnet {0}")]
    InvalidSubnet(String),

    #[error("routing tables have not been populated")]
    RoutingNotPopulated,

    #[error("no route from node {from:?} to {destination}")]
    NoRoute { from: NodeId, destination: Ipv4Addr },

    #[error("flow monitor is not installed")]
    MonitorNotInstalled,

    #[error("unknown type id '{0}'")]
    UnknownTypeId(String),

    #[error("engine defaults have not been configured")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
