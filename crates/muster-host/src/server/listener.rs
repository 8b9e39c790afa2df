//! Peer listener
//!
//! Accepts incoming connections and spawns a handler for each peer.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::coordinator::HostCoordinator;
use crate::server::handler::PeerConnection;

/// Accept loop feeding peers into a `HostCoordinator`
pub struct PeerServer {
    /// Coordinator the peers talk to
    coordinator: Arc<HostCoordinator>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl PeerServer {
    /// Create a new peer server
    pub fn new(coordinator: Arc<HostCoordinator>, cancel: CancellationToken) -> Self {
        Self {
            coordinator,
            cancel,
        }
    }

    /// Accept peers until cancelled
    pub async fn run(self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Peer server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!("New connection from {}", peer_addr);

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let connection = PeerConnection::new(
            Arc::clone(&self.coordinator),
            peer_addr,
            self.cancel.child_token(),
        );

        tokio::spawn(async move {
            match connection.run(socket).await {
                Ok(()) => {
                    tracing::debug!("Connection from {} closed normally", peer_addr);
                }
                Err(e) => {
                    tracing::warn!("Connection from {} closed with error: {}", peer_addr, e);
                }
            }
        });
    }
}
