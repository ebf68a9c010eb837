use crate::packet::Packet;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use tcp_sweep_abstract::{EngineError, EngineResult, Ipv4Subnet, LinkId, LinkProfile, NodeId};

/// First port handed out to active sockets on a node.
const EPHEMERAL_PORT_BASE: u16 = 49153;

/// One direction of a link: `side` 0 transmits from `endpoints[0]` to `endpoints[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Port {
    pub link: LinkId,
    pub side: usize,
}

#[derive(Debug)]
struct Interface {
    link: LinkId,
    address: Option<Ipv4Addr>,
}

#[derive(Debug)]
struct Node {
    stack_installed: bool,
    interfaces: Vec<Interface>,
    routes: HashMap<Ipv4Addr, Port>,
    next_port: u16,
}

/// Transmit side of a point-to-point device with a drop-tail queue.
#[derive(Debug)]
struct Device {
    queue: VecDeque<Packet>,
    capacity: u32,
    busy: bool,
}

#[derive(Debug)]
pub struct Link {
    pub endpoints: [NodeId; 2],
    pub profile: LinkProfile,
    subnet: Option<Ipv4Subnet>,
    devices: [Device; 2],
}

/// Result of handing a packet to a device.
#[derive(Debug)]
pub enum Enqueue {
    /// The device was idle; the caller must start transmitting this packet.
    Transmit(Packet),
    Queued,
    Dropped(Packet),
}

#[derive(Debug, Default)]
pub struct Network {
    nodes: Vec<Node>,
    links: Vec<Link>,
    owners: HashMap<Ipv4Addr, NodeId>,
    routed: bool,
}

impl Network {
    pub fn add_nodes(&mut self, count: usize) -> Vec<NodeId> {
        (0..count)
            .map(|_| {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(Node {
                    stack_installed: false,
                    interfaces: Vec::new(),
                    routes: HashMap::new(),
                    next_port: EPHEMERAL_PORT_BASE,
                });
                id
            })
            .collect()
    }

    fn node(&self, id: NodeId) -> EngineResult<&Node> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(EngineError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut Node> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(EngineError::UnknownNode(id))
    }

    pub fn link(&self, id: LinkId) -> EngineResult<&Link> {
        self.links
            .get(id.0 as usize)
            .ok_or(EngineError::UnknownLink(id))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_routed(&self) -> bool {
        self.routed
    }

    pub fn install_stack(&mut self, nodes: &[NodeId]) -> EngineResult<()> {
        for id in nodes {
            self.node_mut(*id)?.stack_installed = true;
        }
        Ok(())
    }

    pub fn require_stack(&self, id: NodeId) -> EngineResult<()> {
        if self.node(id)?.stack_installed {
            Ok(())
        } else {
            Err(EngineError::StackNotInstalled(id))
        }
    }

    pub fn connect(
        &mut self,
        a: NodeId,
        b: NodeId,
        profile: LinkProfile,
        queue_capacity: u32,
    ) -> EngineResult<LinkId> {
        self.node(a)?;
        self.node(b)?;
        if a == b {
            return Err(EngineError::InvalidConfiguration(format!(
                "cannot link node {a:?} to itself"
            )));
        }
        let id = LinkId(self.links.len() as u32);
        let device = || Device {
            queue: VecDeque::new(),
            capacity: queue_capacity,
            busy: false,
        };
        self.links.push(Link {
            endpoints: [a, b],
            profile,
            subnet: None,
            devices: [device(), device()],
        });
        for node in [a, b] {
            self.node_mut(node)?.interfaces.push(Interface {
                link: id,
                address: None,
            });
        }
        self.routed = false;
        Ok(id)
    }

    /// Give host .1 of `subnet` to the link's first endpoint and .2 to the second.
    pub fn assign(&mut self, link: LinkId, subnet: Ipv4Subnet) -> EngineResult<(Ipv4Addr, Ipv4Addr)> {
        let endpoints = {
            let entry = self.link(link)?;
            if entry.subnet.is_some() {
                return Err(EngineError::AddressAlreadyAssigned(link));
            }
            entry.endpoints
        };
        for node in endpoints {
            self.require_stack(node)?;
        }
        if let Some(other) = self
            .links
            .iter()
            .filter_map(|l| l.subnet)
            .find(|other| other.overlaps(&subnet))
        {
            return Err(EngineError::AddressConflict(other.network()));
        }

        let hosts = [subnet.host(1), subnet.host(2)];
        let [Some(first), Some(second)] = hosts else {
            return Err(EngineError::InvalidSubnet(format!(
                "{subnet} cannot number two endpoints"
            )));
        };
        for (node, addr) in endpoints.into_iter().zip([first, second]) {
            let entry = self.node_mut(node)?;
            if let Some(iface) = entry
                .interfaces
                .iter_mut()
                .find(|i| i.link == link && i.address.is_none())
            {
                iface.address = Some(addr);
            }
            self.owners.insert(addr, node);
        }
        if let Some(entry) = self.links.get_mut(link.0 as usize) {
            entry.subnet = Some(subnet);
        }
        self.routed = false;
        Ok((first, second))
    }

    /// Shortest-hop host routes from every node to every assigned address.
    pub fn populate_routes(&mut self) {
        let mut adjacency: Vec<Vec<(NodeId, Port)>> = vec![Vec::new(); self.nodes.len()];
        for (idx, link) in self.links.iter().enumerate() {
            let id = LinkId(idx as u32);
            let [a, b] = link.endpoints;
            adjacency[a.0 as usize].push((b, Port { link: id, side: 0 }));
            adjacency[b.0 as usize].push((a, Port { link: id, side: 1 }));
        }

        for origin in 0..self.nodes.len() {
            // first_hop[n] = the port leaving `origin` on a shortest path to n
            let mut first_hop: Vec<Option<Port>> = vec![None; self.nodes.len()];
            let mut visited = vec![false; self.nodes.len()];
            visited[origin] = true;
            let mut frontier = VecDeque::from([origin]);
            while let Some(current) = frontier.pop_front() {
                for (next, port) in &adjacency[current] {
                    let next = next.0 as usize;
                    if visited[next] {
                        continue;
                    }
                    visited[next] = true;
                    first_hop[next] = if current == origin {
                        Some(*port)
                    } else {
                        first_hop[current]
                    };
                    frontier.push_back(next);
                }
            }

            let routes = self
                .owners
                .iter()
                .filter_map(|(addr, owner)| first_hop[owner.0 as usize].map(|port| (*addr, port)))
                .collect();
            self.nodes[origin].routes = routes;
        }
        self.routed = true;
    }

    pub fn owns(&self, node: NodeId, addr: Ipv4Addr) -> bool {
        self.owners.get(&addr) == Some(&node)
    }

    pub fn route(&self, node: NodeId, destination: Ipv4Addr) -> Option<Port> {
        self.nodes
            .get(node.0 as usize)
            .and_then(|n| n.routes.get(&destination).copied())
    }

    /// Address of the interface `node` would use to reach `destination`.
    pub fn source_address(&self, node: NodeId, destination: Ipv4Addr) -> EngineResult<Ipv4Addr> {
        let port = self
            .route(node, destination)
            .ok_or(EngineError::NoRoute {
                from: node,
                destination,
            })?;
        self.node(node)?
            .interfaces
            .iter()
            .find(|i| i.link == port.link)
            .and_then(|i| i.address)
            .ok_or(EngineError::NoRoute {
                from: node,
                destination,
            })
    }

    pub fn allocate_port(&mut self, node: NodeId) -> EngineResult<u16> {
        let entry = self.node_mut(node)?;
        let port = entry.next_port;
        entry.next_port = entry.next_port.wrapping_add(1).max(EPHEMERAL_PORT_BASE);
        Ok(port)
    }

    /// The node at the receiving end of `port`.
    pub fn peer(&self, port: Port) -> EngineResult<NodeId> {
        Ok(self.link(port.link)?.endpoints[1 - port.side])
    }

    pub fn enqueue(&mut self, port: Port, packet: Packet) -> EngineResult<Enqueue> {
        let device = self.device_mut(port)?;
        if !device.busy {
            device.busy = true;
            return Ok(Enqueue::Transmit(packet));
        }
        if device.queue.len() as u32 >= device.capacity {
            return Ok(Enqueue::Dropped(packet));
        }
        device.queue.push_back(packet);
        Ok(Enqueue::Queued)
    }

    /// Called when the device finishes a transmission; returns the next packet to send.
    pub fn transmit_complete(&mut self, port: Port) -> EngineResult<Option<Packet>> {
        let device = self.device_mut(port)?;
        let next = device.queue.pop_front();
        device.busy = next.is_some();
        Ok(next)
    }

    fn device_mut(&mut self, port: Port) -> EngineResult<&mut Device> {
        self.links
            .get_mut(port.link.0 as usize)
            .and_then(|l| l.devices.get_mut(port.side))
            .ok_or(EngineError::UnknownLink(port.link))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tcp_sweep_abstract::DataRate;

    fn profile() -> LinkProfile {
        LinkProfile {
            rate: DataRate::from_mbps(10),
            delay: Duration::from_millis(1),
        }
    }

    fn chain(network: &mut Network, len: usize) -> Vec<NodeId> {
        let nodes = network.add_nodes(len);
        network.install_stack(&nodes).unwrap();
        for (i, pair) in nodes.windows(2).enumerate() {
            let link = network.connect(pair[0], pair[1], profile(), 2).unwrap();
            network
                .assign(link, Ipv4Subnet::slash24(10, 0, i as u8 + 1))
                .unwrap();
        }
        network.populate_routes();
        nodes
    }

    #[test]
    fn routes_follow_shortest_path() {
        let mut network = Network::default();
        let nodes = chain(&mut network, 4);
        let far = Ipv4Addr::new(10, 0, 3, 2);
        assert!(network.owns(nodes[3], far));
        let hop = network.route(nodes[0], far).unwrap();
        assert_eq!(hop, Port { link: LinkId(0), side: 0 });
        let back = network.route(nodes[3], Ipv4Addr::new(10, 0, 1, 1)).unwrap();
        assert_eq!(back, Port { link: LinkId(2), side: 1 });
        assert_eq!(
            network.source_address(nodes[0], far).unwrap(),
            Ipv4Addr::new(10, 0, 1, 1)
        );
    }

    #[test]
    fn rejects_overlapping_and_repeated_assignment() {
        let mut network = Network::default();
        let nodes = network.add_nodes(3);
        network.install_stack(&nodes).unwrap();
        let first = network.connect(nodes[0], nodes[1], profile(), 2).unwrap();
        let second = network.connect(nodes[1], nodes[2], profile(), 2).unwrap();
        network.assign(first, Ipv4Subnet::slash24(10, 1, 1)).unwrap();
        assert!(matches!(
            network.assign(first, Ipv4Subnet::slash24(10, 1, 2)),
            Err(EngineError::AddressAlreadyAssigned(_))
        ));
        assert!(matches!(
            network.assign(second, Ipv4Subnet::slash24(10, 1, 1)),
            Err(EngineError::AddressConflict(_))
        ));
    }

    #[test]
    fn assignment_requires_stack() {
        let mut network = Network::default();
        let nodes = network.add_nodes(2);
        let link = network.connect(nodes[0], nodes[1], profile(), 2).unwrap();
        assert!(matches!(
            network.assign(link, Ipv4Subnet::slash24(10, 1, 1)),
            Err(EngineError::StackNotInstalled(_))
        ));
    }

    #[test]
    fn drop_tail_queue_overflows() {
        let mut network = Network::default();
        chain(&mut network, 2);
        let port = Port { link: LinkId(0), side: 0 };
        let packet = || {
            crate::packet::Packet::new(
                std::net::SocketAddrV4::new(Ipv4Addr::new(10, 0, 1, 1), 1),
                std::net::SocketAddrV4::new(Ipv4Addr::new(10, 0, 1, 2), 2),
                crate::packet::TcpHeader::default(),
                100,
            )
        };
        assert!(matches!(network.enqueue(port, packet()).unwrap(), Enqueue::Transmit(_)));
        assert!(matches!(network.enqueue(port, packet()).unwrap(), Enqueue::Queued));
        assert!(matches!(network.enqueue(port, packet()).unwrap(), Enqueue::Queued));
        assert!(matches!(network.enqueue(port, packet()).unwrap(), Enqueue::Dropped(_)));
        assert!(network.transmit_complete(port).unwrap().is_some());
        assert!(network.transmit_complete(port).unwrap().is_some());
        assert!(network.transmit_complete(port).unwrap().is_none());
        assert!(matches!(network.enqueue(port, packet()).unwrap(), Enqueue::Transmit(_)));
    }
}
