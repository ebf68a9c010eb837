use crate::congestion::CongestionRegistry;
use crate::monitor::FlowMonitor;
use crate::network::{Enqueue, Network, Port};
use crate::packet::Packet;
use crate::tcp::{SocketActions, TcpReceiver, TcpSender};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tcp_sweep_abstract::{
    CbrSpec, EngineDefaults, EngineError, EngineResult, Ipv4Subnet, LinkId, LinkProfile,
    MonitoredFlow, NodeId, SimulationEngine, VariantHandle,
};
use tracing::{debug, info};

/// Queue capacity used when no defaults have been configured (packets).
pub const DEFAULT_QUEUE_CAPACITY: u32 = 100;

#[derive(Debug)]
enum EventType {
    /// A packet finished propagating and reached `node`.
    PacketArrival { node: NodeId, packet: Packet },
    /// The device behind `port` finished serializing a packet.
    TransmitComplete { port: Port },
    SourceStart { source: usize },
    SourceSend { source: usize },
    RetransmitTimeout { socket: usize, generation: u64 },
}

#[derive(Debug)]
struct Event {
    time: Duration,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: smallest time is Greater in BinaryHeap
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A constant-bitrate application bound to one TCP socket once started.
struct CbrSource {
    node: NodeId,
    spec: CbrSpec,
    interval: Duration,
    socket: Option<usize>,
    dropped_writes: u64,
}

/// A sink accepting any number of connections on one port.
#[derive(Default)]
struct PacketSink {
    connections: HashMap<SocketAddrV4, TcpReceiver>,
}

impl PacketSink {
    fn total_received(&self) -> u64 {
        self.connections.values().map(|c| c.delivered_bytes()).sum()
    }
}

/// Deterministic packet-level simulator behind the [`SimulationEngine`] trait.
pub struct Simulator {
    time: Duration,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    events_processed: u64,

    registry: CongestionRegistry,
    defaults: Option<EngineDefaults>,

    network: Network,
    sources: Vec<CbrSource>,
    senders: Vec<TcpSender>,
    /// Node each sender lives on, indexed like `senders`.
    sender_nodes: Vec<NodeId>,
    /// Active sockets by local endpoint.
    endpoints: HashMap<SocketAddrV4, usize>,
    sinks: Vec<PacketSink>,
    /// Listening sinks by (node, port).
    listeners: HashMap<(NodeId, u16), usize>,
    monitor: Option<FlowMonitor>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self::with_registry(CongestionRegistry::default())
    }

    pub fn with_registry(registry: CongestionRegistry) -> Self {
        Self {
            time: Duration::ZERO,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            events_processed: 0,
            registry,
            defaults: None,
            network: Network::default(),
            sources: Vec::new(),
            senders: Vec::new(),
            sender_nodes: Vec::new(),
            endpoints: HashMap::new(),
            sinks: Vec::new(),
            listeners: HashMap::new(),
            monitor: None,
        }
    }

    pub fn current_time(&self) -> Duration {
        self.time
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn node_count(&self) -> usize {
        self.network.node_count()
    }

    /// Application bytes delivered in order to the sink on `node`:`port`.
    pub fn sink_received(&self, node: NodeId, port: u16) -> Option<u64> {
        self.listeners
            .get(&(node, port))
            .map(|idx| self.sinks[*idx].total_received())
    }

    /// (congestion control, retransmissions) of every socket opened so far.
    pub fn socket_summary(&self) -> Vec<(String, u64)> {
        self.senders
            .iter()
            .map(|s| (s.congestion_control().to_string(), s.retransmissions()))
            .collect()
    }

    fn push_event(&mut self, time: Duration, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn peek_next_event_time(&self) -> Option<Duration> {
        self.event_queue.peek().map(|e| e.time)
    }

    /// Process the next event. Returns false if the queue is empty.
    pub fn step(&mut self) -> EngineResult<bool> {
        let Some(event) = self.event_queue.pop() else {
            return Ok(false);
        };
        self.time = event.time;
        self.events_processed += 1;

        match event.event_type {
            EventType::PacketArrival { node, packet } => self.forward(node, packet)?,
            EventType::TransmitComplete { port } => {
                if let Some(next) = self.network.transmit_complete(port)? {
                    self.start_transmission(port, next)?;
                }
            }
            EventType::SourceStart { source } => self.start_source(source)?,
            EventType::SourceSend { source } => self.source_send(source)?,
            EventType::RetransmitTimeout { socket, generation } => {
                if self.senders[socket].timer_generation() != generation {
                    return Ok(true);
                }
                let mut actions = SocketActions::default();
                self.senders[socket].on_retransmit_timeout(self.time, &mut actions);
                self.process_actions(socket, actions)?;
            }
        }
        Ok(true)
    }

    fn start_source(&mut self, source: usize) -> EngineResult<()> {
        let defaults = self.defaults.as_ref().ok_or(EngineError::NotConfigured)?;
        let cc = self.registry.instantiate(&defaults.congestion_control)?;
        let node = self.sources[source].node;
        let remote = self.sources[source].spec.remote;

        let local_ip = self.network.source_address(node, *remote.ip())?;
        let local = SocketAddrV4::new(local_ip, self.network.allocate_port(node)?);
        info!(
            "[{}] {local} -> {remote} starting with {}",
            self.time.as_secs_f64(),
            cc.name()
        );

        let socket = self.senders.len();
        self.senders.push(TcpSender::new(local, remote, cc));
        self.sender_nodes.push(node);
        self.endpoints.insert(local, socket);
        self.sources[source].socket = Some(socket);

        let mut actions = SocketActions::default();
        self.senders[socket].connect(self.time, &mut actions);
        self.process_actions(socket, actions)?;
        self.source_send(source)
    }

    fn source_send(&mut self, source: usize) -> EngineResult<()> {
        let entry = &mut self.sources[source];
        if self.time >= entry.spec.stop {
            return Ok(());
        }
        let Some(socket) = entry.socket else {
            return Ok(());
        };
        if !self.senders[socket].write(entry.spec.packet_size) {
            entry.dropped_writes += 1;
        }
        let next = self.time + entry.interval;

        let mut actions = SocketActions::default();
        self.senders[socket].try_send(self.time, &mut actions);
        self.process_actions(socket, actions)?;
        self.push_event(next, EventType::SourceSend { source });
        Ok(())
    }

    /// Turn socket-requested actions into packets and timer events.
    fn process_actions(&mut self, socket: usize, actions: SocketActions) -> EngineResult<()> {
        let (local, remote) = {
            let sender = &self.senders[socket];
            (sender.local, sender.remote)
        };
        let node = self.sender_nodes[socket];
        if let Some((delay, generation)) = actions.arm_timer {
            self.push_event(
                self.time + delay,
                EventType::RetransmitTimeout { socket, generation },
            );
        }
        for (header, payload_len) in actions.outgoing {
            let packet = Packet::new(local, remote, header, payload_len);
            self.originate(node, packet)?;
        }
        Ok(())
    }

    /// A packet created by a socket on `node` enters the IP layer.
    fn originate(&mut self, node: NodeId, mut packet: Packet) -> EngineResult<()> {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.on_send(&mut packet, self.time);
        }
        self.forward(node, packet)
    }

    fn forward(&mut self, node: NodeId, packet: Packet) -> EngineResult<()> {
        if self.network.owns(node, packet.destination) {
            return self.deliver_local(node, packet);
        }
        let Some(port) = self.network.route(node, packet.destination) else {
            debug!("{:?}: no route to {}, dropping", node, packet.destination);
            self.drop_packet(&packet);
            return Ok(());
        };
        match self.network.enqueue(port, packet)? {
            Enqueue::Transmit(packet) => self.start_transmission(port, packet)?,
            Enqueue::Queued => {}
            Enqueue::Dropped(packet) => {
                debug!(
                    "[{}] queue full on {:?}, dropping seq={}",
                    self.time.as_secs_f64(),
                    port.link,
                    packet.header.seq_num
                );
                self.drop_packet(&packet);
            }
        }
        Ok(())
    }

    fn drop_packet(&mut self, packet: &Packet) {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.on_drop(packet);
        }
    }

    fn start_transmission(&mut self, port: Port, packet: Packet) -> EngineResult<()> {
        let profile = self.network.link(port.link)?.profile;
        let peer = self.network.peer(port)?;
        let done = self.time + profile.rate.transmission_time(packet.size());
        self.push_event(done, EventType::TransmitComplete { port });
        self.push_event(
            done + profile.delay,
            EventType::PacketArrival { node: peer, packet },
        );
        Ok(())
    }

    fn deliver_local(&mut self, node: NodeId, packet: Packet) -> EngineResult<()> {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.on_receive(&packet, self.time);
        }

        if let Some(&socket) = self.endpoints.get(&packet.destination_socket()) {
            let mut actions = SocketActions::default();
            self.senders[socket].on_segment(&packet.header, self.time, &mut actions);
            return self.process_actions(socket, actions);
        }

        let Some(&sink) = self.listeners.get(&(node, packet.header.dst_port)) else {
            debug!("{:?}: nothing listening on port {}", node, packet.header.dst_port);
            return Ok(());
        };
        let peer = packet.source_socket();
        let reply = self.sinks[sink]
            .connections
            .entry(peer)
            .or_default()
            .on_segment(&packet.header, packet.payload_len);
        if let Some(header) = reply {
            let reply = Packet::new(packet.destination_socket(), peer, header, 0);
            self.originate(node, reply)?;
        }
        Ok(())
    }

    fn queue_capacity(&self) -> u32 {
        self.defaults
            .as_ref()
            .map(|d| d.queue_capacity)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }
}

impl SimulationEngine for Simulator {
    fn lookup_congestion_control(&self, name: &str) -> EngineResult<Option<VariantHandle>> {
        self.registry.lookup(name).map(Some)
    }

    fn configure(&mut self, defaults: &EngineDefaults) -> EngineResult<()> {
        self.registry.instantiate(&defaults.congestion_control)?;
        if defaults.queue_capacity == 0 {
            return Err(EngineError::InvalidConfiguration(
                "queue capacity must be at least one packet".to_string(),
            ));
        }
        self.defaults = Some(defaults.clone());
        Ok(())
    }

    fn create_nodes(&mut self, count: usize) -> EngineResult<Vec<NodeId>> {
        Ok(self.network.add_nodes(count))
    }

    fn install_stack(&mut self, nodes: &[NodeId]) -> EngineResult<()> {
        self.network.install_stack(nodes)
    }

    fn connect(&mut self, a: NodeId, b: NodeId, profile: &LinkProfile) -> EngineResult<LinkId> {
        let capacity = self.queue_capacity();
        self.network.connect(a, b, *profile, capacity)
    }

    fn assign_subnet(
        &mut self,
        link: LinkId,
        subnet: Ipv4Subnet,
    ) -> EngineResult<(Ipv4Addr, Ipv4Addr)> {
        self.network.assign(link, subnet)
    }

    fn populate_routing(&mut self) -> EngineResult<()> {
        self.network.populate_routes();
        Ok(())
    }

    fn install_cbr_source(&mut self, node: NodeId, spec: &CbrSpec) -> EngineResult<()> {
        self.network.require_stack(node)?;
        if self.defaults.is_none() {
            return Err(EngineError::NotConfigured);
        }
        if spec.packet_size == 0 || spec.rate.bits_per_sec() == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "CBR source needs a positive rate and packet size, got {} / {} bytes",
                spec.rate, spec.packet_size
            )));
        }
        let source = self.sources.len();
        self.sources.push(CbrSource {
            node,
            spec: spec.clone(),
            interval: spec.rate.transmission_time(spec.packet_size),
            socket: None,
            dropped_writes: 0,
        });
        if spec.start < spec.stop {
            self.push_event(spec.start, EventType::SourceStart { source });
        }
        Ok(())
    }

    fn install_sink(&mut self, node: NodeId, listen: SocketAddrV4) -> EngineResult<()> {
        self.network.require_stack(node)?;
        if !listen.ip().is_unspecified() && !self.network.owns(node, *listen.ip()) {
            return Err(EngineError::InvalidConfiguration(format!(
                "node {node:?} does not own listen address {}",
                listen.ip()
            )));
        }
        let key = (node, listen.port());
        if self.listeners.contains_key(&key) {
            return Err(EngineError::InvalidConfiguration(format!(
                "port {} already bound on node {node:?}",
                listen.port()
            )));
        }
        self.listeners.insert(key, self.sinks.len());
        self.sinks.push(PacketSink::default());
        Ok(())
    }

    fn install_flow_monitor(&mut self) -> EngineResult<()> {
        self.monitor = Some(FlowMonitor::new());
        Ok(())
    }

    fn run_until(&mut self, deadline: Duration) -> EngineResult<()> {
        if !self.network.is_routed() && !self.sources.is_empty() {
            return Err(EngineError::RoutingNotPopulated);
        }
        info!(
            "Running until {:.3}s ({} nodes, {} links, {} sources)",
            deadline.as_secs_f64(),
            self.network.node_count(),
            self.network.link_count(),
            self.sources.len()
        );
        while let Some(next) = self.peek_next_event_time() {
            if next > deadline {
                break;
            }
            self.step()?;
        }
        self.time = self.time.max(deadline);

        let dropped_writes: u64 = self.sources.iter().map(|s| s.dropped_writes).sum();
        info!(
            "Stopped at {:.3}s after {} events ({} application writes refused)",
            self.time.as_secs_f64(),
            self.events_processed,
            dropped_writes
        );
        Ok(())
    }

    fn flow_stats(&self) -> EngineResult<Vec<MonitoredFlow>> {
        self.monitor
            .as_ref()
            .map(FlowMonitor::report)
            .ok_or(EngineError::MonitorNotInstalled)
    }

    fn destroy(&mut self) -> EngineResult<()> {
        debug!(
            "Destroying simulation state ({} pending events)",
            self.event_queue.len()
        );
        let registry = std::mem::take(&mut self.registry);
        *self = Self::with_registry(registry);
        Ok(())
    }
}
