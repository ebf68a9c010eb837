use crate::interface::VariantHandle;
use crate::units::{self, DataRate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Rate and one-way delay of a point-to-point link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkProfile {
    pub rate: DataRate,
    #[serde(with = "units::millis")]
    pub delay: Duration,
}

/// Engine-wide defaults that must be in place before a run's topology exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDefaults {
    /// Congestion control given to every TCP socket created afterwards.
    pub congestion_control: VariantHandle,
    /// Drop-tail capacity, in packets, of every link device created afterwards.
    pub queue_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Configured traffic duration; also the throughput denominator.
    #[serde(with = "units::seconds")]
    pub simulation_time: Duration,
    /// Extra simulated time after the generators stop.
    #[serde(with = "units::seconds")]
    pub drain_time: Duration,
    pub sink_port: u16,
    pub access_link: LinkProfile,
    pub generator_rate: DataRate,
    pub generator_packet_size: u32,
    #[serde(with = "units::seconds")]
    pub first_start: Duration,
    #[serde(with = "units::seconds")]
    pub start_stagger: Duration,
    pub output_path: PathBuf,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            simulation_time: Duration::from_secs(20),
            drain_time: Duration::from_secs(1),
            sink_port: 9,
            access_link: LinkProfile {
                rate: DataRate::from_mbps(100),
                delay: Duration::from_millis(2),
            },
            generator_rate: DataRate::from_mbps(5),
            generator_packet_size: 512,
            first_start: Duration::from_secs(1),
            start_stagger: Duration::from_millis(200),
            output_path: PathBuf::from("results.csv"),
        }
    }
}

impl SweepConfig {
    pub fn with_simulation_time(mut self, simulation_time: Duration) -> Self {
        self.simulation_time = simulation_time;
        self
    }

    /// When flow `flow_index`'s generator starts.
    pub fn start_time(&self, flow_index: u32) -> Duration {
        self.first_start + self.start_stagger * flow_index
    }

    /// The deadline handed to the engine: traffic duration plus drain.
    pub fn stop_deadline(&self) -> Duration {
        self.simulation_time + self.drain_time
    }
}
