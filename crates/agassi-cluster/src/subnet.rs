//! IPv4 subnet handling for the discovery sweep.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;

use crate::error::ClusterError;

/// An IPv4 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, ClusterError> {
        if prefix > 32 {
            return Err(ClusterError::InvalidSubnet(format!("{addr}/{prefix}")));
        }
        let network = Ipv4Addr::from(u32::from(addr) & mask(prefix));
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask(self.prefix))
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => u32::from(v4) & mask(self.prefix) == u32::from(self.network),
            IpAddr::V6(_) => false,
        }
    }

    /// Number of usable host addresses.
    pub fn host_count(&self) -> u64 {
        let total = 1u64 << (32 - u32::from(self.prefix));
        if self.prefix >= 31 { total } else { total - 2 }
    }

    /// Usable host addresses, excluding network and broadcast addresses
    /// (except for /31 and /32, which have none to exclude).
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let start = u32::from(self.network);
        let end = u32::from(self.broadcast());
        let (first, last) = if self.prefix >= 31 {
            (start, end)
        } else {
            (start + 1, end - 1)
        };
        (first..=last).map(Ipv4Addr::from)
    }

    /// The local address the kernel would use to reach this subnet,
    /// provided it lies inside the subnet.
    pub fn local_address(&self) -> Option<IpAddr> {
        let probe = self.hosts().next()?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        // Connecting a UDP socket only selects a route; nothing is sent.
        socket.connect((probe, 9)).ok()?;
        let local = socket.local_addr().ok()?.ip();
        self.contains(local).then_some(local)
    }
}

fn mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

impl FromStr for Subnet {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClusterError::InvalidSubnet(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Subnet::new(addr, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
