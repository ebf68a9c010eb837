use crate::error::{EngineError, EngineResult};
use serde::{Serialize, Serializer};
use std::fmt;
use std::net::Ipv4Addr;

/// An IPv4 network block such as `10.1.1.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Subnet {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> EngineResult<Self> {
        if prefix_len > 32 {
            return Err(EngineError::InvalidSubnet(format!(
                "{network}/{prefix_len}: prefix longer than 32 bits"
            )));
        }
        let subnet = Self {
            network,
            prefix_len,
        };
        if u32::from(network) & !subnet.mask() != 0 {
            return Err(EngineError::InvalidSubnet(format!(
                "{network}/{prefix_len}: host bits set in network address"
            )));
        }
        Ok(subnet)
    }

    /// The `a.b.c.0/24` block.
    pub const fn slash24(a: u8, b: u8, c: u8) -> Self {
        Self {
            network: Ipv4Addr::new(a, b, c, 0),
            prefix_len: 24,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> u32 {
        match self.prefix_len {
            0 => 0,
            len => u32::MAX << (32 - len as u32),
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.network)
    }

    /// Two blocks overlap iff the shorter prefix contains the other's network.
    pub fn overlaps(&self, other: &Ipv4Subnet) -> bool {
        let shared = if self.prefix_len <= other.prefix_len {
            self.mask()
        } else {
            other.mask()
        };
        u32::from(self.network) & shared == u32::from(other.network) & shared
    }

    /// Number of usable host addresses (network and broadcast excluded).
    pub fn host_capacity(&self) -> u64 {
        match self.prefix_len {
            32 => 1,
            31 => 2,
            len => (1u64 << (32 - len as u32)) - 2,
        }
    }

    /// The `index`-th host address, starting at 1.
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        if index == 0 || index as u64 > self.host_capacity() {
            return None;
        }
        let offset = if self.prefix_len >= 31 { index - 1 } else { index };
        Some(Ipv4Addr::from(u32::from(self.network) + offset))
    }
}

impl fmt::Display for Ipv4Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl Serialize for Ipv4Subnet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::Ipv4Subnet;
    use std::net::Ipv4Addr;

    #[test]
    fn rejects_host_bits() {
        assert!(Ipv4Subnet::new(Ipv4Addr::new(10, 1, 1, 1), 24).is_err());
        assert!(Ipv4Subnet::new(Ipv4Addr::new(10, 1, 1, 0), 33).is_err());
        assert!(Ipv4Subnet::new(Ipv4Addr::new(10, 1, 0, 0), 16).is_ok());
    }

    #[test]
    fn overlap_uses_shorter_prefix() {
        let wide = Ipv4Subnet::new(Ipv4Addr::new(10, 2, 0, 0), 16).unwrap();
        let inside = Ipv4Subnet::slash24(10, 2, 7);
        let outside = Ipv4Subnet::slash24(10, 3, 7);
        assert!(wide.overlaps(&inside));
        assert!(inside.overlaps(&wide));
        assert!(!wide.overlaps(&outside));
        assert!(!inside.overlaps(&outside));
    }

    #[test]
    fn hosts_skip_network_address() {
        let block = Ipv4Subnet::slash24(10, 1, 1);
        assert_eq!(block.host(1), Some(Ipv4Addr::new(10, 1, 1, 1)));
        assert_eq!(block.host(2), Some(Ipv4Addr::new(10, 1, 1, 2)));
        assert_eq!(block.host(255), None);
        assert_eq!(block.host(0), None);
        assert!(block.contains(Ipv4Addr::new(10, 1, 1, 200)));
        assert!(!block.contains(Ipv4Addr::new(10, 1, 2, 1)));
        assert_eq!(block.to_string(), "10.1.1.0/24");
    }
}
