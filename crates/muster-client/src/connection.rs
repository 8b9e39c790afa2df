//! Connection to a host
//!
//! One task owns the socket. Requests are written through an mpsc queue and
//! matched to their responses by `CallId`; events pushed by the host are
//! forwarded on a separate channel whose closing signals transport loss.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use muster_core::{auth, ClientConfig, ConnectFailure, RpcError};
use muster_protocol::{
    CallId, Frame, FrameCodec, HostEvent, HostRequest, HostResponse, Message, Node,
    PlayerListing, PROTOCOL_VERSION,
};

/// Capacity of the outbound and event queues
const QUEUE_CAPACITY: usize = 256;

type Pending = Arc<DashMap<CallId, oneshot::Sender<HostResponse>>>;

/// An authenticated session with a host
pub struct HostConnection {
    node: Node,
    outbound: mpsc::Sender<Frame>,
    pending: Pending,
    next_call: AtomicU32,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl HostConnection {
    /// Connect to `address` and log in as `config.node_name`.
    ///
    /// Returns the connection and the stream of events the host pushes.
    pub async fn open(
        address: &str,
        config: &ClientConfig,
        password: Option<&str>,
    ) -> Result<(Self, mpsc::Receiver<HostEvent>), ConnectFailure> {
        tracing::debug!("Connecting to host at {}", address);
        let socket = tokio::time::timeout(config.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectFailure::TransportError("connection timed out".to_string()))?
            .map_err(|e| {
                ConnectFailure::TransportError(format!("failed to connect to {}: {}", address, e))
            })?;
        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }

        let mut framed = Framed::new(socket, FrameCodec::new());
        let node = tokio::time::timeout(
            config.connect_timeout,
            login(&mut framed, &config.node_name, password),
        )
        .await
        .map_err(|_| ConnectFailure::TransportError("login timed out".to_string()))??;
        tracing::info!("Logged in to {} as {}", address, node.name());

        let (outbound, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(QUEUE_CAPACITY);
        let pending: Pending = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        tokio::spawn(run_io(
            framed,
            outbound_rx,
            Arc::clone(&pending),
            event_tx,
            cancel.clone(),
        ));

        Ok((
            Self {
                node,
                outbound,
                pending,
                next_call: AtomicU32::new(1),
                request_timeout: config.request_timeout,
                cancel,
            },
            event_rx,
        ))
    }

    /// This node as the host admitted it
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Drop the connection without waiting for the host
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection is gone
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send a request and wait for its response
    pub async fn request(&self, request: HostRequest) -> Result<HostResponse, RpcError> {
        if self.is_closed() {
            return Err(RpcError::Disconnected);
        }

        let call_id = self.next_call_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(call_id, tx);

        let frame = Frame::new(call_id, Message::Request(request));
        if self.outbound.send(frame).await.is_err() {
            self.pending.remove(&call_id);
            return Err(RpcError::Disconnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(HostResponse::Error { code, message })) => {
                Err(RpcError::Rejected { code, message })
            }
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RpcError::Disconnected),
            Err(_) => {
                self.pending.remove(&call_id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Send a request that has no result beyond success
    pub async fn send(&self, request: HostRequest) -> Result<(), RpcError> {
        let name = request.name();
        match self.request(request).await? {
            HostResponse::Ok => Ok(()),
            _ => Err(RpcError::UnexpectedResponse(name)),
        }
    }

    /// Current listing on the host
    pub async fn player_listing(&self) -> Result<PlayerListing, RpcError> {
        match self.request(HostRequest::GetPlayerListing).await? {
            HostResponse::Listing(listing) => Ok(listing),
            _ => Err(RpcError::UnexpectedResponse("get_player_listing")),
        }
    }

    /// Whether a match is running; the host treats this node as a late joiner if so
    pub async fn is_match_in_progress(&self) -> Result<bool, RpcError> {
        let request = HostRequest::IsMatchInProgress {
            node: self.node.clone(),
        };
        self.flag(request).await
    }

    /// Whether the host runs unattended
    pub async fn is_host_headless(&self) -> Result<bool, RpcError> {
        self.flag(HostRequest::IsHostHeadless).await
    }

    /// Matches the host can load
    pub async fn list_available_matches(&self) -> Result<Vec<String>, RpcError> {
        match self.request(HostRequest::ListAvailableMatches).await? {
            HostResponse::Matches(names) => Ok(names),
            _ => Err(RpcError::UnexpectedResponse("list_available_matches")),
        }
    }

    /// Serialized options of the host's match
    pub async fn match_options(&self) -> Result<Bytes, RpcError> {
        match self.request(HostRequest::GetMatchOptions).await? {
            HostResponse::Options(options) => Ok(options),
            _ => Err(RpcError::UnexpectedResponse("get_match_options")),
        }
    }

    async fn flag(&self, request: HostRequest) -> Result<bool, RpcError> {
        let name = request.name();
        match self.request(request).await? {
            HostResponse::Flag(flag) => Ok(flag),
            _ => Err(RpcError::UnexpectedResponse(name)),
        }
    }

    fn next_call_id(&self) -> CallId {
        loop {
            let id = CallId::new(self.next_call.fetch_add(1, Ordering::Relaxed));
            if !id.is_control() {
                return id;
            }
        }
    }
}

impl Drop for HostConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn login(
    framed: &mut Framed<TcpStream, FrameCodec>,
    name: &str,
    password: Option<&str>,
) -> Result<Node, ConnectFailure> {
    send(
        framed,
        Message::Hello {
            name: name.to_string(),
            version: Some(PROTOCOL_VERSION.to_string()),
        },
    )
    .await?;

    let (nonce, password_required) = match receive(framed).await? {
        Message::Challenge {
            nonce,
            password_required,
        } => (nonce, password_required),
        Message::Welcome { reason, .. } => return Err(refused(reason)),
        other => return Err(unexpected(&other)),
    };

    let digest = match (password_required, password) {
        (true, Some(password)) => Some(auth::challenge_digest(&nonce, password)),
        (true, None) => {
            tracing::debug!("Host requires a password but none was given");
            None
        }
        (false, _) => None,
    };
    send(framed, Message::ChallengeResponse { digest }).await?;

    match receive(framed).await? {
        Message::Welcome {
            accepted: true,
            node: Some(node),
            ..
        } => Ok(node),
        Message::Welcome { reason, .. } => Err(refused(reason)),
        other => Err(unexpected(&other)),
    }
}

async fn send(
    framed: &mut Framed<TcpStream, FrameCodec>,
    message: Message,
) -> Result<(), ConnectFailure> {
    framed
        .send(Frame::control(message))
        .await
        .map_err(|e| ConnectFailure::TransportError(e.to_string()))
}

async fn receive(framed: &mut Framed<TcpStream, FrameCodec>) -> Result<Message, ConnectFailure> {
    match framed.next().await {
        Some(Ok(frame)) => Ok(frame.message),
        Some(Err(e)) => Err(ConnectFailure::TransportError(e.to_string())),
        None => Err(ConnectFailure::TransportError(
            "host closed the connection during login".to_string(),
        )),
    }
}

fn refused(reason: Option<String>) -> ConnectFailure {
    ConnectFailure::AuthenticationFailed(reason.unwrap_or_else(|| "login refused".to_string()))
}

fn unexpected(message: &Message) -> ConnectFailure {
    ConnectFailure::TransportError(format!(
        "unexpected {:?} during login",
        message.message_type()
    ))
}

async fn run_io(
    framed: Framed<TcpStream, FrameCodec>,
    mut outbound: mpsc::Receiver<Frame>,
    pending: Pending,
    events: mpsc::Sender<HostEvent>,
    cancel: CancellationToken,
) {
    let (mut sink, mut stream) = framed.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Host connection closed locally");
                break;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!("Failed to write to host: {}", e);
                    break;
                }
            }

            incoming = stream.next() => {
                let frame = match incoming {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::warn!("Failed to read from host: {}", e);
                        break;
                    }
                    None => {
                        tracing::info!("Host closed the connection");
                        break;
                    }
                };
                match frame.message {
                    Message::Response(response) => match pending.remove(&frame.call_id) {
                        Some((_, waiter)) => {
                            let _ = waiter.send(response);
                        }
                        None => tracing::debug!("Response to unknown call {}", frame.call_id),
                    },
                    Message::Event(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Message::Error { code, message } => {
                        tracing::warn!("Host ended the session ({:?}): {}", code, message);
                        break;
                    }
                    other => {
                        tracing::warn!("Unexpected {:?} from host", other.message_type());
                    }
                }
            }
        }
    }

    // dropping the waiters answers every outstanding call with Disconnected
    pending.clear();
    cancel.cancel();
}
