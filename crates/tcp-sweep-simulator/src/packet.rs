use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tcp_sweep_abstract::{FiveTuple, FlowId, PROTOCOL_TCP};

/// IPv4 + TCP header bytes carried by every segment.
pub const HEADER_BYTES: u32 = 40;

/// TCP Header flags
pub mod flags {
    pub const SYN: u8 = 0x02;
    pub const ACK: u8 = 0x10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: u8,
}

impl TcpHeader {
    pub fn new(seq: u32, ack: u32, flags: u8) -> Self {
        Self {
            seq_num: seq,
            ack_num: ack,
            flags,
            ..Default::default()
        }
    }

    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// Stamp put on a packet when the flow monitor first sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTag {
    pub flow: FlowId,
    pub sent_at: Duration,
}

/// A TCP segment in flight. Only sizes are simulated, not payload bytes.
#[derive(Debug, Clone)]
pub struct Packet {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub header: TcpHeader,
    pub payload_len: u32,
    pub tag: Option<MonitorTag>,
}

impl Packet {
    pub fn new(from: SocketAddrV4, to: SocketAddrV4, mut header: TcpHeader, payload_len: u32) -> Self {
        header.src_port = from.port();
        header.dst_port = to.port();
        Self {
            source: *from.ip(),
            destination: *to.ip(),
            header,
            payload_len,
            tag: None,
        }
    }

    /// Bytes on the wire.
    pub fn size(&self) -> u32 {
        self.payload_len + HEADER_BYTES
    }

    pub fn five_tuple(&self) -> FiveTuple {
        FiveTuple {
            protocol: PROTOCOL_TCP,
            source_address: self.source,
            destination_address: self.destination,
            source_port: self.header.src_port,
            destination_port: self.header.dst_port,
        }
    }

    pub fn source_socket(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.source, self.header.src_port)
    }

    pub fn destination_socket(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.destination, self.header.dst_port)
    }
}
