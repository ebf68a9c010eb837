//! A deterministic, single-threaded packet-level network simulator.
//!
//! Nodes are joined by point-to-point links with drop-tail queues; TCP
//! senders run a pluggable congestion-control algorithm drawn from a
//! [`CongestionRegistry`]. Everything is driven by one time-ordered event
//! queue so identical inputs always produce identical flow statistics.

pub mod congestion;
pub mod engine;
pub mod monitor;
pub mod network;
pub mod packet;
pub mod tcp;

pub use congestion::{CongestionOps, CongestionRegistry, CongestionWindow};
pub use engine::Simulator;
