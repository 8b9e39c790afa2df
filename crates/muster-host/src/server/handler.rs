//! Per-peer connection handler
//!
//! Runs the login handshake, then multiplexes three flows over one framed
//! socket: requests from the peer (each answered on its own task), events
//! broadcast by the coordinator, and commands addressed to this peer only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use muster_core::{auth, MatchDataError, MusterError};
use muster_protocol::{
    ErrorCode, Frame, FrameCodec, HostEvent, HostRequest, HostResponse, Message, Node,
    ProtocolError, PROTOCOL_VERSION,
};

use crate::coordinator::HostCoordinator;
use crate::server::registry::PeerCommand;

/// How long a peer may take for each login step
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const COMMAND_QUEUE: usize = 256;

type PeerFramed = Framed<TcpStream, FrameCodec>;

/// One peer's connection from accept to close
pub struct PeerConnection {
    coordinator: Arc<HostCoordinator>,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
}

impl PeerConnection {
    pub fn new(
        coordinator: Arc<HostCoordinator>,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            peer_addr,
            cancel,
        }
    }

    /// Serve the peer until it leaves or the host shuts down
    pub async fn run(self, socket: TcpStream) -> Result<(), ProtocolError> {
        let mut framed = Framed::new(socket, FrameCodec::new());

        let Some(requested) = self.handshake(&mut framed).await? else {
            return Ok(());
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let node = self.coordinator.peers().register(
            &requested,
            self.peer_addr,
            command_tx,
            self.cancel.clone(),
        );

        // subscribe before the welcome so no listing published after it is missed
        let events = self.coordinator.subscribe();

        let welcome = Message::Welcome {
            accepted: true,
            node: Some(node.clone()),
            reason: None,
        };
        if let Err(e) = framed.send(Frame::control(welcome)).await {
            self.coordinator.peers().unregister(&node);
            return Err(e);
        }
        self.coordinator.on_peer_connected(&node);

        let result = self.serve(&node, framed, events, command_rx).await;

        self.coordinator.peers().unregister(&node);
        self.coordinator.on_peer_disconnected(&node).await;
        result
    }

    /// Returns the requested name of an admitted peer, `None` if refused
    async fn handshake(&self, framed: &mut PeerFramed) -> Result<Option<String>, ProtocolError> {
        if self.coordinator.peers().is_banned(&self.peer_addr.ip()) {
            tracing::info!("Refusing banned address {}", self.peer_addr);
            reject(framed, "You have been banned from this host").await?;
            return Ok(None);
        }

        let (name, version) = match next_message(framed).await? {
            Message::Hello { name, version } => (name, version),
            other => {
                return Err(ProtocolError::Handshake(format!(
                    "expected hello, got {:?}",
                    other.message_type()
                )))
            }
        };
        if let Some(version) = version.filter(|v| v != PROTOCOL_VERSION) {
            tracing::info!("{} speaks protocol {}, refusing", self.peer_addr, version);
            reject(framed, &format!("Protocol {} required", PROTOCOL_VERSION)).await?;
            return Ok(None);
        }

        let password = self.coordinator.config().password.as_deref();
        let nonce = auth::new_nonce();
        framed
            .send(Frame::control(Message::Challenge {
                nonce: nonce.clone(),
                password_required: password.is_some(),
            }))
            .await?;

        let digest = match next_message(framed).await? {
            Message::ChallengeResponse { digest } => digest,
            other => {
                return Err(ProtocolError::Handshake(format!(
                    "expected challenge response, got {:?}",
                    other.message_type()
                )))
            }
        };
        if !auth::verify_digest(&nonce, password, digest.as_deref()) {
            tracing::warn!("Wrong password from {} ({})", name, self.peer_addr);
            reject(framed, "Invalid password").await?;
            return Ok(None);
        }

        Ok(Some(name))
    }

    async fn serve(
        &self,
        node: &Node,
        framed: PeerFramed,
        mut events: broadcast::Receiver<HostEvent>,
        mut command_rx: mpsc::Receiver<PeerCommand>,
    ) -> Result<(), ProtocolError> {
        let (mut sink, mut stream) = framed.split();
        let (response_tx, mut response_rx) = mpsc::channel::<Frame>(COMMAND_QUEUE);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Connection to {} cancelled", node);
                    break;
                }

                incoming = stream.next() => {
                    let frame = match incoming {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Err(e),
                        None => break,
                    };
                    let call_id = frame.call_id;
                    match frame.message {
                        Message::Request(request) => {
                            let coordinator = Arc::clone(&self.coordinator);
                            let response_tx = response_tx.clone();
                            let node = node.clone();
                            tokio::spawn(async move {
                                tracing::trace!("{} from {}", request.name(), node);
                                let response = dispatch(&coordinator, &node, request);
                                let frame = Frame::new(call_id, Message::Response(response));
                                let _ = response_tx.send(frame).await;
                            });
                        }
                        other => {
                            tracing::warn!("Unexpected message from {}: {:?}", node, other.message_type());
                        }
                    }
                }

                Some(frame) = response_rx.recv() => {
                    sink.send(frame).await?;
                }

                command = command_rx.recv() => {
                    match command {
                        Some(PeerCommand::Event(event)) => {
                            sink.send(Frame::control(Message::Event(event))).await?;
                        }
                        Some(PeerCommand::Close { code, reason }) => {
                            let goodbye = Message::Error { code, message: reason };
                            if let Err(e) = sink.send(Frame::control(goodbye)).await {
                                tracing::debug!("Failed to say goodbye to {}: {}", node, e);
                            }
                            break;
                        }
                        None => break,
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            sink.send(Frame::control(Message::Event(event))).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("{} lagged by {} events, resending listing", node, n);
                            let listing = self.coordinator.player_listing();
                            sink.send(Frame::control(Message::Event(HostEvent::ListingChanged(listing)))).await?;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        Ok(())
    }
}

async fn next_message(framed: &mut PeerFramed) -> Result<Message, ProtocolError> {
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
        Ok(Some(Ok(frame))) => Ok(frame.message),
        Ok(Some(Err(e))) => Err(e),
        Ok(None) => Err(ProtocolError::ConnectionClosed),
        Err(_) => Err(ProtocolError::Handshake("timed out".to_string())),
    }
}

async fn reject(framed: &mut PeerFramed, reason: &str) -> Result<(), ProtocolError> {
    framed
        .send(Frame::control(Message::Welcome {
            accepted: false,
            node: None,
            reason: Some(reason.to_string()),
        }))
        .await
}

/// Answer one request from `node`.
///
/// Seat requests act on the authenticated node, whatever node the payload
/// names. Seat enabling and match-changing requests are only honoured by a
/// headless host.
pub fn dispatch(coordinator: &HostCoordinator, node: &Node, request: HostRequest) -> HostResponse {
    match request {
        HostRequest::GetPlayerListing => HostResponse::Listing(coordinator.player_listing()),

        HostRequest::TakeSeat { node: claimed, seat } => {
            warn_on_impersonation(node, &claimed);
            coordinator.take_seat(node, &seat);
            HostResponse::Ok
        }

        HostRequest::ReleaseSeat { node: claimed, seat } => {
            warn_on_impersonation(node, &claimed);
            coordinator.release_seat(node, &seat);
            HostResponse::Ok
        }

        HostRequest::DisableSeat { seat } => {
            if let Some(refused) = require_headless(coordinator) {
                return refused;
            }
            coordinator.set_seat_enabled(&seat, false);
            HostResponse::Ok
        }

        HostRequest::EnableSeat { seat } => {
            if let Some(refused) = require_headless(coordinator) {
                return refused;
            }
            coordinator.set_seat_enabled(&seat, true);
            HostResponse::Ok
        }

        HostRequest::IsMatchInProgress { node: claimed } => {
            warn_on_impersonation(node, &claimed);
            HostResponse::Flag(coordinator.is_match_in_progress(node))
        }

        HostRequest::GetMatchOptions => match coordinator.get_match_options() {
            Ok(options) => HostResponse::Options(options),
            Err(e) => HostResponse::error(ErrorCode::BadMatchData, e.to_string()),
        },

        HostRequest::ChangeMatchOptions { options } => {
            if let Some(refused) = require_headless(coordinator) {
                return refused;
            }
            match coordinator.change_match_options(&options) {
                Ok(_) => HostResponse::Ok,
                Err(e) => HostResponse::error(ErrorCode::BadMatchData, e.to_string()),
            }
        }

        HostRequest::ChangeActiveMatch { name } => {
            if let Some(refused) = require_headless(coordinator) {
                return refused;
            }
            match coordinator.change_active_match(&name) {
                Ok(_) => HostResponse::Ok,
                Err(e) => match_error(e),
            }
        }

        HostRequest::ChangeToSavedMatch { save, filename } => {
            if let Some(refused) = require_headless(coordinator) {
                return refused;
            }
            match coordinator.change_to_saved_match(&save, &filename) {
                Ok(_) => HostResponse::Ok,
                Err(e) => match_error(e),
            }
        }

        HostRequest::IsHostHeadless => HostResponse::Flag(coordinator.is_headless()),

        HostRequest::ListAvailableMatches => {
            HostResponse::Matches(coordinator.list_available_matches())
        }

        HostRequest::ClientReady => {
            coordinator.client_ready(node);
            HostResponse::Ok
        }
    }
}

fn warn_on_impersonation(node: &Node, claimed: &Node) {
    if claimed.name() != node.name() {
        tracing::warn!("{} sent a request as {}, using its own node", node, claimed.name());
    }
}

fn require_headless(coordinator: &HostCoordinator) -> Option<HostResponse> {
    if coordinator.is_headless() {
        None
    } else {
        Some(HostResponse::error(
            ErrorCode::NotPermitted,
            "Only a headless host accepts match and seat changes from peers",
        ))
    }
}

fn match_error(error: MusterError) -> HostResponse {
    match error {
        MusterError::MatchData(MatchDataError::UnknownMatch(name)) => {
            HostResponse::error(ErrorCode::UnknownMatch, format!("Unknown match: {}", name))
        }
        other => HostResponse::error(ErrorCode::BadMatchData, other.to_string()),
    }
}
