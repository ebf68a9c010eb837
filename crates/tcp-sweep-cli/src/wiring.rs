use crate::addressing::AddressPlan;
use crate::topology::TopologyInstance;
use std::net::{Ipv4Addr, SocketAddrV4};
use tcp_sweep_abstract::{CbrSpec, EngineError, EngineResult, SimulationEngine, SweepConfig};
use tracing::debug;

/// Attaches one CBR generator and one matching sink per flow.
#[derive(Debug, Clone, Copy)]
pub struct TrafficWiring<'a> {
    config: &'a SweepConfig,
}

impl<'a> TrafficWiring<'a> {
    pub fn new(config: &'a SweepConfig) -> Self {
        Self { config }
    }

    /// Generator settings for flow `flow` aimed at `receiver`.
    pub fn generator(&self, flow: usize, receiver: Ipv4Addr) -> CbrSpec {
        CbrSpec {
            remote: SocketAddrV4::new(receiver, self.config.sink_port),
            rate: self.config.generator_rate,
            packet_size: self.config.generator_packet_size,
            start: self.config.start_time(flow as u32),
            stop: self.config.simulation_time,
        }
    }

    pub fn wire<E: SimulationEngine + ?Sized>(
        &self,
        engine: &mut E,
        topology: &TopologyInstance,
        plan: &AddressPlan,
    ) -> EngineResult<()> {
        let listen = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.sink_port);
        for (flow, (sender, receiver)) in topology
            .senders
            .iter()
            .zip(&topology.receivers)
            .enumerate()
        {
            let (Some(source), Some(address)) =
                (plan.sender_address(flow), plan.receiver_address(flow))
            else {
                return Err(EngineError::InvalidConfiguration(format!(
                    "flow {flow} has no address pair"
                )));
            };
            // Sink first so no generator ever exists without one.
            engine.install_sink(*receiver, listen)?;
            let spec = self.generator(flow, address);
            debug!(
                "Flow {flow}: {source} -> {} from {:.1}s to {:.1}s",
                spec.remote,
                spec.start.as_secs_f64(),
                spec.stop.as_secs_f64()
            );
            engine.install_cbr_source(*sender, &spec)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::AddressAllocator;
    use crate::catalog::SCENARIOS;
    use crate::topology::TopologyBuilder;
    use std::time::Duration;
    use tcp_sweep_abstract::EngineDefaults;
    use tcp_sweep_simulator::Simulator;

    #[test]
    fn generators_are_staggered_and_share_stop() {
        let config = SweepConfig::default();
        let wiring = TrafficWiring::new(&config);
        let receiver = Ipv4Addr::new(10, 3, 2, 2);
        let spec = wiring.generator(1, receiver);
        assert_eq!(spec.remote, SocketAddrV4::new(receiver, 9));
        assert_eq!(spec.start, Duration::from_millis(1200));
        assert_eq!(spec.stop, Duration::from_secs(20));
        assert_eq!(spec.packet_size, 512);
        assert_eq!(wiring.generator(0, receiver).start, Duration::from_secs(1));
    }

    #[test]
    fn flow_without_sender_address_is_rejected() {
        let config = SweepConfig::default();
        let mut engine = Simulator::new();
        let variant = engine.lookup_congestion_control("TcpNewReno").unwrap().unwrap();
        engine
            .configure(&EngineDefaults {
                congestion_control: variant,
                queue_capacity: 10,
            })
            .unwrap();
        let topology = TopologyBuilder::new(config.access_link)
            .build(&mut engine, &SCENARIOS[0])
            .unwrap();
        let mut plan = AddressAllocator::new().assign(&mut engine, &topology).unwrap();
        assert_eq!(plan.sender_address(1), Some(Ipv4Addr::new(10, 2, 2, 1)));

        plan.senders.truncate(1);
        let err = TrafficWiring::new(&config)
            .wire(&mut engine, &topology, &plan)
            .unwrap_err();
        assert!(err.to_string().contains("flow 1"), "{err}");
        topology.tear_down(&mut engine).unwrap();
    }
}
