//! Network peer identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A network peer taking part in match setup.
///
/// Nodes are compared by identity (name, address and port together) and are
/// never mutated once the host has admitted them. Seat ownership is recorded
/// by node name, which the host keeps unique across connected peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    name: String,
    address: IpAddr,
    port: u16,
}

impl Node {
    /// Create a new node
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
        }
    }

    /// Create a node from a socket address
    pub fn from_socket(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self::new(name, addr.ip(), addr.port())
    }

    /// Display name, unique among the peers of one host
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Network address of the peer
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Port the peer is reachable on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket address of the peer
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_node_identity() {
        let a = Node::new("alice", IpAddr::V4(Ipv4Addr::LOCALHOST), 3300);
        let b = Node::new("alice", IpAddr::V4(Ipv4Addr::LOCALHOST), 3300);
        let c = Node::new("alice", IpAddr::V4(Ipv4Addr::LOCALHOST), 3301);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_node_display() {
        let node = Node::from_socket("bob", "10.0.0.2:4000".parse().unwrap());
        assert_eq!(format!("{}", node), "bob (10.0.0.2:4000)");
    }
}
