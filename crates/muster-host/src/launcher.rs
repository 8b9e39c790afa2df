//! Hand-off from seat selection to the live match
//!
//! Once every seat has an owner the coordinator produces a
//! `LauncherDescriptor`. Turning it into a `ServerLauncher` and installing
//! that on the coordinator routes every later disconnect, late join and
//! ready signal to the launcher instead of the seat maps.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use muster_protocol::{HostEvent, Node, PlayerListing};

use crate::server::PeerRegistry;

/// Reason sent to peers that try to join while the match is starting
pub const LAUNCHING_REASON: &str = "Match is launching, try again soon";

/// Errors of a launch attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// A remote player dropped out or the launch was stopped
    #[error("Launch aborted: {0}")]
    Aborted(String),

    /// Some remote nodes never reported ready
    #[error("Timed out waiting for {0:?} to get ready")]
    ReadyTimeout(Vec<String>),

    /// A launcher is already installed
    #[error("A match is already active")]
    AlreadyActive,
}

/// What the coordinator routes to an installed launcher
pub trait MatchLauncher: Send + Sync {
    /// A peer disconnected
    fn connection_lost(&self, node: &Node);

    /// A peer connected after the launcher was installed
    fn add_late_joiner(&self, node: &Node);

    /// A remote node finished starting the match
    fn client_ready(&self, node: &Node);

    /// End the match
    fn stop(&self, reason: &str);
}

/// Everything needed to start a match with the settled seats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherDescriptor {
    /// Final seating
    pub listing: PlayerListing,
    /// Seats played by connected remote nodes
    pub remote_seats: BTreeMap<String, Node>,
    /// Remote nodes that must report ready
    pub remote_nodes: BTreeSet<Node>,
    /// Serialized match state sent to every participant
    pub match_bytes: Bytes,
}

impl LauncherDescriptor {
    /// Build the launcher that drives this match
    pub fn into_launcher(
        self,
        peers: Arc<PeerRegistry>,
        events: broadcast::Sender<HostEvent>,
        ready_timeout: Duration,
    ) -> ServerLauncher {
        let pending = self
            .remote_nodes
            .iter()
            .map(|n| n.name().to_string())
            .collect();

        ServerLauncher {
            descriptor: self,
            peers,
            events,
            ready_timeout,
            inner: Mutex::new(LaunchState {
                phase: LaunchPhase::Launching,
                pending_ready: pending,
                rejected_observers: HashSet::new(),
                observers: HashSet::new(),
            }),
            ready: Notify::new(),
            abort: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }
}

/// Lifecycle of a launched match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    /// Waiting for remote nodes to get ready
    Launching,
    /// The match is live
    Running,
    /// Ended or aborted
    Finished,
}

struct LaunchState {
    phase: LaunchPhase,
    pending_ready: BTreeSet<String>,
    rejected_observers: HashSet<Node>,
    observers: HashSet<Node>,
}

/// Drives one match from launch to its end
pub struct ServerLauncher {
    descriptor: LauncherDescriptor,
    peers: Arc<PeerRegistry>,
    events: broadcast::Sender<HostEvent>,
    ready_timeout: Duration,
    inner: Mutex<LaunchState>,
    ready: Notify,
    abort: CancellationToken,
    finished: CancellationToken,
}

impl ServerLauncher {
    /// Descriptor this launcher was built from
    pub fn descriptor(&self) -> &LauncherDescriptor {
        &self.descriptor
    }

    /// Current phase
    pub fn phase(&self) -> LaunchPhase {
        self.state().phase
    }

    /// Tell every peer the match is starting and wait for remote nodes.
    ///
    /// On success the match is running. On failure the launcher is finished
    /// and the caller should reset the coordinator.
    pub async fn start(&self) -> Result<(), LaunchError> {
        tracing::info!(
            "Launching {} with {} remote node(s)",
            self.descriptor.listing.match_name().unwrap_or("match"),
            self.descriptor.remote_nodes.len()
        );

        let launching = HostEvent::MatchLaunching {
            match_bytes: self.descriptor.match_bytes.clone(),
            remote_seats: self.descriptor.remote_seats.clone(),
        };
        if self.events.send(launching).is_err() {
            tracing::debug!("No subscribers for launch event");
        }

        let all_ready = async {
            loop {
                let notified = self.ready.notified();
                if self.state().pending_ready.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        let outcome = tokio::select! {
            _ = self.abort.cancelled() => Err(LaunchError::Aborted("a player left during launch".to_string())),
            result = tokio::time::timeout(self.ready_timeout, all_ready) => match result {
                Ok(()) => Ok(()),
                Err(_) => Err(LaunchError::ReadyTimeout(
                    self.state().pending_ready.iter().cloned().collect(),
                )),
            },
        };

        match outcome {
            Ok(()) => {
                let mut state = self.state();
                if state.phase != LaunchPhase::Launching {
                    return Err(LaunchError::Aborted("launch stopped".to_string()));
                }
                state.phase = LaunchPhase::Running;
                state.rejected_observers.clear();
                drop(state);
                tracing::info!("Match running");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{}", e);
                self.finish();
                Err(e)
            }
        }
    }

    /// Resolves once the match has ended or been aborted
    pub fn finished(&self) -> WaitForCancellationFuture<'_> {
        self.finished.cancelled()
    }

    fn finish(&self) {
        self.state().phase = LaunchPhase::Finished;
        self.finished.cancel();
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LaunchState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MatchLauncher for ServerLauncher {
    fn connection_lost(&self, node: &Node) {
        let mut state = self.state();
        state.observers.remove(node);

        match state.phase {
            LaunchPhase::Launching => {
                // it was told it could not join, so the drop is expected
                if state.rejected_observers.remove(node) {
                    return;
                }
                if self.descriptor.remote_nodes.contains(node) {
                    drop(state);
                    tracing::warn!("Player {} dropped during launch, aborting", node);
                    self.abort.cancel();
                }
            }
            LaunchPhase::Running => {
                if self.descriptor.remote_nodes.contains(node) {
                    drop(state);
                    self.stop(&format!("lost connection to player {}", node.name()));
                }
            }
            LaunchPhase::Finished => {}
        }
    }

    fn add_late_joiner(&self, node: &Node) {
        let mut state = self.state();
        let event = match state.phase {
            LaunchPhase::Launching => {
                state.rejected_observers.insert(node.clone());
                HostEvent::JoinRejected {
                    reason: LAUNCHING_REASON.to_string(),
                }
            }
            LaunchPhase::Running => {
                state.observers.insert(node.clone());
                HostEvent::JoinInProgress {
                    match_bytes: self.descriptor.match_bytes.clone(),
                    remote_seats: self.descriptor.remote_seats.clone(),
                }
            }
            LaunchPhase::Finished => HostEvent::JoinRejected {
                reason: "Match has ended".to_string(),
            },
        };
        drop(state);

        tracing::info!("Late joiner {}", node);
        self.peers.send_to(node, event);
    }

    fn client_ready(&self, node: &Node) {
        let removed = self.state().pending_ready.remove(node.name());
        if removed {
            tracing::debug!("{} is ready", node);
            self.ready.notify_waiters();
        }
    }

    fn stop(&self, reason: &str) {
        if self.phase() != LaunchPhase::Finished {
            tracing::info!("Stopping match: {}", reason);
        }
        self.abort.cancel();
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    use crate::server::PeerCommand;

    fn node(name: &str, last: u8) -> Node {
        Node::from_socket(name, SocketAddr::from(([10, 0, 0, last], 5000)))
    }

    fn descriptor(remote: &[Node]) -> LauncherDescriptor {
        LauncherDescriptor {
            listing: PlayerListing::default(),
            remote_seats: remote
                .iter()
                .enumerate()
                .map(|(i, n)| (format!("seat-{}", i), n.clone()))
                .collect(),
            remote_nodes: remote.iter().cloned().collect(),
            match_bytes: Bytes::from_static(b"match"),
        }
    }

    fn launcher(remote: &[Node]) -> (Arc<ServerLauncher>, Arc<PeerRegistry>) {
        let peers = Arc::new(PeerRegistry::new("Hans"));
        let (events, _) = broadcast::channel(16);
        let launcher =
            descriptor(remote).into_launcher(Arc::clone(&peers), events, Duration::from_secs(60));
        (Arc::new(launcher), peers)
    }

    #[tokio::test]
    async fn test_start_without_remote_nodes() {
        let (launcher, _) = launcher(&[]);
        launcher.start().await.unwrap();
        assert_eq!(launcher.phase(), LaunchPhase::Running);
    }

    #[tokio::test]
    async fn test_start_waits_for_ready() {
        let c = node("Carl", 2);
        let (launcher, _) = launcher(&[c.clone()]);

        let starting = {
            let launcher = Arc::clone(&launcher);
            tokio::spawn(async move { launcher.start().await })
        };
        tokio::task::yield_now().await;
        assert_eq!(launcher.phase(), LaunchPhase::Launching);

        launcher.client_ready(&c);
        starting.await.unwrap().unwrap();
        assert_eq!(launcher.phase(), LaunchPhase::Running);
    }

    #[tokio::test]
    async fn test_player_drop_aborts_launch() {
        let c = node("Carl", 2);
        let (launcher, _) = launcher(&[c.clone()]);

        let starting = {
            let launcher = Arc::clone(&launcher);
            tokio::spawn(async move { launcher.start().await })
        };
        tokio::task::yield_now().await;
        launcher.connection_lost(&c);

        assert!(matches!(starting.await.unwrap(), Err(LaunchError::Aborted(_))));
        assert_eq!(launcher.phase(), LaunchPhase::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout() {
        let (launcher, _) = launcher(&[node("Carl", 2)]);
        let result = launcher.start().await;
        assert_eq!(result, Err(LaunchError::ReadyTimeout(vec!["Carl".to_string()])));
    }

    #[tokio::test]
    async fn test_late_joiner_during_launch_is_rejected_and_ignored() {
        let c = node("Carl", 2);
        let (launcher, peers) = launcher(&[c.clone()]);

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = peers.register(
            "W",
            SocketAddr::from(([10, 0, 0, 9], 5000)),
            tx,
            CancellationToken::new(),
        );

        launcher.add_late_joiner(&watcher);
        match rx.recv().await {
            Some(PeerCommand::Event(HostEvent::JoinRejected { reason })) => {
                assert_eq!(reason, LAUNCHING_REASON)
            }
            other => panic!("unexpected {:?}", other),
        }

        launcher.connection_lost(&watcher);
        assert!(!launcher.abort.is_cancelled());
    }

    #[tokio::test]
    async fn test_running_match_ends_on_player_loss_only() {
        let c = node("Carl", 2);
        let (launcher, peers) = launcher(&[c.clone()]);
        launcher.client_ready(&c);
        launcher.start().await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = peers.register(
            "W",
            SocketAddr::from(([10, 0, 0, 9], 5000)),
            tx,
            CancellationToken::new(),
        );
        launcher.add_late_joiner(&watcher);
        assert!(matches!(
            rx.recv().await,
            Some(PeerCommand::Event(HostEvent::JoinInProgress { .. }))
        ));

        launcher.connection_lost(&watcher);
        assert_eq!(launcher.phase(), LaunchPhase::Running);

        launcher.connection_lost(&c);
        launcher.finished().await;
        assert_eq!(launcher.phase(), LaunchPhase::Finished);
    }
}
