//! Connected peer registry

use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use muster_protocol::{ErrorCode, HostEvent, Node};

/// Longest node name the host accepts
pub const MAX_NAME_LEN: usize = 50;

/// Commands delivered to a single peer's connection task
#[derive(Debug, Clone)]
pub enum PeerCommand {
    /// Push an event to this peer only
    Event(HostEvent),
    /// Tell the peer why and close the connection
    Close { code: ErrorCode, reason: String },
}

/// A registered peer connection
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Node as the host sees it
    pub node: Node,
    /// Channel to the connection task
    pub command_tx: mpsc::Sender<PeerCommand>,
    /// Token to cancel the connection task
    pub cancel: CancellationToken,
    /// When the peer finished its login
    pub connected_at: Instant,
}

/// Peers keyed by their unique node name, plus the ban list
pub struct PeerRegistry {
    peers: DashMap<String, PeerHandle>,
    banned: DashSet<IpAddr>,
    reserved: String,
    naming: Mutex<()>,
}

impl PeerRegistry {
    /// New registry; `host_name` is never handed out to a peer
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            peers: DashMap::new(),
            banned: DashSet::new(),
            reserved: host_name.into(),
            naming: Mutex::new(()),
        }
    }

    /// Register a peer under a unique variant of `requested`
    pub fn register(
        &self,
        requested: &str,
        addr: SocketAddr,
        command_tx: mpsc::Sender<PeerCommand>,
        cancel: CancellationToken,
    ) -> Node {
        let _naming = self.naming.lock().unwrap_or_else(PoisonError::into_inner);
        let name = unique_name(requested, |candidate| self.is_name_taken(candidate));
        let node = Node::from_socket(name.clone(), addr);

        self.peers.insert(
            name,
            PeerHandle {
                node: node.clone(),
                command_tx,
                cancel,
                connected_at: Instant::now(),
            },
        );
        node
    }

    /// Remove a peer. Returns false if it was already gone.
    pub fn unregister(&self, node: &Node) -> bool {
        self.peers
            .remove_if(node.name(), |_, handle| handle.node == *node)
            .is_some()
    }

    /// Look up a peer's node by name
    pub fn get(&self, name: &str) -> Option<Node> {
        self.peers.get(name).map(|r| r.node.clone())
    }

    /// All connected peers
    pub fn nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.peers.iter().map(|r| r.node.clone()).collect();
        nodes.sort();
        nodes
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if no peers are connected
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queue an event for one peer. Returns false if it cannot be delivered.
    pub fn send_to(&self, node: &Node, event: HostEvent) -> bool {
        let Some(handle) = self.peers.get(node.name()) else {
            tracing::debug!("Cannot send to {}: not connected", node);
            return false;
        };
        match handle.command_tx.try_send(PeerCommand::Event(event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to queue event for {}: {}", node, e);
                false
            }
        }
    }

    /// Close every connection matching `identifier` (node name or IP)
    pub fn disconnect(&self, identifier: &str, code: ErrorCode, reason: &str) -> Vec<Node> {
        let targets: Vec<PeerHandle> = self
            .peers
            .iter()
            .filter(|r| matches_identifier(&r.node, identifier))
            .map(|r| r.value().clone())
            .collect();

        for handle in &targets {
            tracing::info!("Disconnecting {}: {}", handle.node, reason);
            close(handle, code, reason);
        }
        targets.into_iter().map(|h| h.node).collect()
    }

    /// Refuse future connections from `address`
    pub fn ban(&self, address: IpAddr) {
        if self.banned.insert(address) {
            tracing::info!("Banned {}", address);
        }
    }

    /// Whether `address` is banned
    pub fn is_banned(&self, address: &IpAddr) -> bool {
        self.banned.contains(address)
    }

    /// Close every connection
    pub fn close_all(&self, reason: &str) {
        for r in self.peers.iter() {
            close(r.value(), ErrorCode::ShuttingDown, reason);
        }
    }

    fn is_name_taken(&self, candidate: &str) -> bool {
        candidate.eq_ignore_ascii_case(&self.reserved)
            || self
                .peers
                .iter()
                .any(|r| r.key().eq_ignore_ascii_case(candidate))
    }
}

fn close(handle: &PeerHandle, code: ErrorCode, reason: &str) {
    let command = PeerCommand::Close {
        code,
        reason: reason.to_string(),
    };
    // a full queue means the connection is stuck; drop it without a goodbye
    if handle.command_tx.try_send(command).is_err() {
        handle.cancel.cancel();
    }
}

fn matches_identifier(node: &Node, identifier: &str) -> bool {
    node.name() == identifier
        || identifier
            .parse::<IpAddr>()
            .map(|ip| ip == node.address())
            .unwrap_or(false)
}

/// Make `requested` acceptable and unique.
///
/// Names are cut to `MAX_NAME_LEN` characters and padded to at least two;
/// a taken name gets the first free ` (n)` suffix.
pub fn unique_name(requested: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let mut base: String = requested.trim().chars().take(MAX_NAME_LEN).collect();
    if base.chars().count() < 2 {
        base = format!("aa{}", base);
    }
    if !is_taken(&base) {
        return base;
    }
    (1..)
        .map(|i| format!("{} ({})", base, i))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 40000 + last as u16))
    }

    fn register(registry: &PeerRegistry, name: &str, last: u8) -> (Node, mpsc::Receiver<PeerCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let node = registry.register(name, addr(last), tx, CancellationToken::new());
        (node, rx)
    }

    #[test]
    fn test_unique_name_rules() {
        let taken = |n: &str| n == "bob" || n == "bob (1)";
        assert_eq!(unique_name("bob", taken), "bob (2)");
        assert_eq!(unique_name("x", |_| false), "aax");
        assert_eq!(unique_name(&"n".repeat(80), |_| false).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_register_avoids_host_and_peers() {
        let registry = PeerRegistry::new("Host");
        let (first, _rx1) = register(&registry, "host", 1);
        let (second, _rx2) = register(&registry, "HOST", 2);

        assert_eq!(first.name(), "host (1)");
        assert_eq!(second.name(), "HOST (2)");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_pads_short_names() {
        let registry = PeerRegistry::new("Hans");
        let (short, _rx1) = register(&registry, "C", 1);
        let (again, _rx2) = register(&registry, "c", 2);

        assert_eq!(short.name(), "aaC");
        assert_eq!(again.name(), "aac (1)");
        assert_eq!(registry.get("aaC"), Some(short));
    }

    #[test]
    fn test_unregister_only_matching_node() {
        let registry = PeerRegistry::new("Hans");
        let (node, _rx) = register(&registry, "alice", 1);
        let impostor = Node::from_socket("alice", addr(9));

        assert!(!registry.unregister(&impostor));
        assert!(registry.unregister(&node));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_send_to_and_disconnect_by_ip() {
        let registry = PeerRegistry::new("Hans");
        let (node, mut rx) = register(&registry, "alice", 3);

        assert!(registry.send_to(&node, HostEvent::MatchReset));
        assert!(matches!(rx.recv().await, Some(PeerCommand::Event(HostEvent::MatchReset))));

        let closed = registry.disconnect("10.0.0.3", ErrorCode::NotPermitted, "kicked");
        assert_eq!(closed, vec![node]);
        assert!(matches!(rx.recv().await, Some(PeerCommand::Close { .. })));
    }

    #[test]
    fn test_ban_list() {
        let registry = PeerRegistry::new("Hans");
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        assert!(!registry.is_banned(&ip));
        registry.ban(ip);
        assert!(registry.is_banned(&ip));
    }
}
