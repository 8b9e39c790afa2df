//! Client-side seat coordinator
//!
//! `ClientCoordinator` mirrors one host's player listing and proposes seat
//! changes to it. It never decides anything about seating itself: every
//! change it requests comes back, or doesn't, in the next listing the host
//! pushes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use muster_core::{ClientConfig, ConnectFailure, MatchDefinition, RpcError};
use muster_protocol::{HostEvent, HostRequest, LocalPlayerType, Node, PlayerListing, SeatAlliances};

use crate::connection::HostConnection;
use crate::selection::MatchSelection;
use crate::state::ClientState;

const UPDATE_CAPACITY: usize = 64;

/// Where to find the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    /// Host name or IP
    pub host: String,
    /// Port, validated on connect
    pub port: u32,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Login secrets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Host password, if it has one
    pub password: Option<String>,
}

/// What a successful connect learned about the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// This node as the host admitted it
    pub node: Node,
    /// Listing at connect time
    pub listing: PlayerListing,
    /// Whether the host runs unattended
    pub host_headless: bool,
    /// Whether a match was already running
    pub match_in_progress: bool,
}

/// Notifications for whatever presents the session
#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    /// New listing from the host
    ListingChanged(PlayerListing),
    /// Session state changed
    StateChanged(ClientState),
    /// A match was handed to this node
    MatchStarted {
        match_data: MatchDefinition,
        remote_seats: BTreeMap<String, Node>,
        /// The match was already running when this node joined
        in_progress: bool,
    },
    /// The host would not let this node join the running match
    JoinRejected(String),
    /// The host went back to seat selection
    MatchReset,
    /// The host connection was lost
    Disconnected,
}

/// One node's view of, and requests against, a host
pub struct ClientCoordinator {
    config: ClientConfig,
    selection: Arc<MatchSelection>,
    state: RwLock<ClientState>,
    listing: RwLock<Option<PlayerListing>>,
    connection: RwLock<Option<Arc<HostConnection>>>,
    host_headless: AtomicBool,
    updates: broadcast::Sender<ClientUpdate>,
}

impl ClientCoordinator {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_selection(config, Arc::new(MatchSelection::new()))
    }

    /// Coordinator sharing an existing match selection
    pub fn with_selection(config: ClientConfig, selection: Arc<MatchSelection>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            config,
            selection,
            state: RwLock::new(ClientState::Disconnected),
            listing: RwLock::new(None),
            connection: RwLock::new(None),
            host_headless: AtomicBool::new(false),
            updates,
        }
    }

    /// Subscribe to session updates
    pub fn subscribe(&self) -> broadcast::Receiver<ClientUpdate> {
        self.updates.subscribe()
    }

    /// The node's own match selection
    pub fn selection(&self) -> &Arc<MatchSelection> {
        &self.selection
    }

    /// Current session state
    pub fn state(&self) -> ClientState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to a host and start mirroring its listing.
    ///
    /// On failure the match selection held aside for the attempt is put
    /// back and the coordinator is `Disconnected` again.
    pub async fn connect(
        self: &Arc<Self>,
        address: HostAddress,
        credentials: Credentials,
    ) -> Result<SessionHandle, ConnectFailure> {
        if self.state().is_connected() || self.state() == ClientState::Connecting {
            return Err(ConnectFailure::TransportError(
                "already connected to a host".to_string(),
            ));
        }
        self.set_state(ClientState::Connecting);
        self.selection.hold_aside();

        match self.establish(address, credentials).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                tracing::warn!("Connect failed: {}", e);
                if let Some(connection) = self.take_connection() {
                    connection.close();
                }
                self.selection.restore();
                if self.state() != ClientState::Cancelled {
                    self.set_state(ClientState::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        self: &Arc<Self>,
        address: HostAddress,
        credentials: Credentials,
    ) -> Result<SessionHandle, ConnectFailure> {
        let port = u16::try_from(address.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConnectFailure::InvalidPort(address.port))?;
        let target = format!("{}:{}", address.host, port);

        let (connection, events) =
            HostConnection::open(&target, &self.config, credentials.password.as_deref()).await?;
        let connection = Arc::new(connection);

        if self.state() != ClientState::Connecting {
            connection.close();
            return Err(ConnectFailure::TransportError("connect cancelled".to_string()));
        }
        *self.connection.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&connection));

        let listing = connection.player_listing().await.map_err(rpc_failure)?;
        let host_headless = connection.is_host_headless().await.map_err(rpc_failure)?;
        self.host_headless.store(host_headless, Ordering::SeqCst);
        self.on_listing_changed(listing.clone());

        if !self.transition(ClientState::Connecting, ClientState::SeatSelection) {
            return Err(ConnectFailure::TransportError("connect cancelled".to_string()));
        }

        // events flow before the in-progress query so its JoinInProgress is not missed
        tokio::spawn(Arc::clone(self).pump_events(Arc::clone(&connection), events));

        let match_in_progress = connection.is_match_in_progress().await.map_err(rpc_failure)?;
        tracing::info!(
            "Joined {} as {}{}",
            target,
            connection.node().name(),
            if match_in_progress { " (match in progress)" } else { "" }
        );

        Ok(SessionHandle {
            node: connection.node().clone(),
            listing,
            host_headless,
            match_in_progress,
        })
    }

    /// Tear the session down and give back the held-aside selection.
    ///
    /// Safe to call in any state and more than once; does not wait for the
    /// host.
    pub fn cancel(&self) {
        if let Some(connection) = self.take_connection() {
            connection.close();
        }
        self.selection.restore();

        let next = match self.state() {
            ClientState::Connecting | ClientState::SeatSelection => ClientState::Cancelled,
            ClientState::Launching | ClientState::InMatch => ClientState::Disconnected,
            ClientState::Disconnected | ClientState::Cancelled => return,
        };
        tracing::info!("Session cancelled");
        self.set_state(next);
    }

    /// Replace the cached listing with one pushed by the host
    pub fn on_listing_changed(&self, listing: PlayerListing) {
        *self.listing.write().unwrap_or_else(PoisonError::into_inner) = Some(listing.clone());
        self.emit(ClientUpdate::ListingChanged(listing));
    }

    /// The host says the match this node asked about is already running
    pub fn on_match_already_started(
        self: &Arc<Self>,
        match_bytes: &[u8],
        remote_seats: BTreeMap<String, Node>,
    ) {
        self.enter_match(match_bytes, remote_seats, true);
    }

    /// The host finished seat selection and launched the match
    pub fn on_done_selecting_players(
        self: &Arc<Self>,
        match_bytes: &[u8],
        remote_seats: BTreeMap<String, Node>,
    ) {
        self.enter_match(match_bytes, remote_seats, false);
    }

    /// Ask the host to give `seat` to this node
    pub fn request_take_seat(&self, seat: &str) {
        let Some(node) = self.local_node() else {
            tracing::warn!("Cannot take {}: not connected", seat);
            return;
        };
        self.fire(HostRequest::TakeSeat {
            node,
            seat: seat.to_string(),
        });
    }

    /// Ask the host to clear `seat`
    pub fn request_release_seat(&self, seat: &str) {
        let Some(node) = self.local_node() else {
            tracing::warn!("Cannot release {}: not connected", seat);
            return;
        };
        self.fire(HostRequest::ReleaseSeat {
            node,
            seat: seat.to_string(),
        });
    }

    /// Ask the host to disable `seat`
    pub fn request_disable(&self, seat: &str) {
        self.fire(HostRequest::DisableSeat {
            seat: seat.to_string(),
        });
    }

    /// Ask the host to enable `seat`
    pub fn request_enable(&self, seat: &str) {
        self.fire(HostRequest::EnableSeat {
            seat: seat.to_string(),
        });
    }

    /// Whether the host runs unattended, as learned at connect
    pub fn is_host_headless(&self) -> bool {
        self.host_headless.load(Ordering::SeqCst)
    }

    /// Matches the host can load
    pub async fn list_available_matches(&self) -> Result<Vec<String>, RpcError> {
        self.connected()?.list_available_matches().await
    }

    /// Make the host load another match from its catalog
    pub async fn change_active_match(&self, name: &str) -> Result<(), RpcError> {
        self.connected()?
            .send(HostRequest::ChangeActiveMatch {
                name: name.to_string(),
            })
            .await
    }

    /// Serialized options of the host's match
    pub async fn get_match_options(&self) -> Result<Bytes, RpcError> {
        self.connected()?.match_options().await
    }

    /// Replace option values of the host's match
    pub async fn change_match_options(&self, options: Bytes) -> Result<(), RpcError> {
        self.connected()?
            .send(HostRequest::ChangeMatchOptions { options })
            .await
    }

    /// Make the host load a saved match
    pub async fn change_to_saved_match(&self, save: Bytes, filename: &str) -> Result<(), RpcError> {
        self.connected()?
            .send(HostRequest::ChangeToSavedMatch {
                save,
                filename: filename.to_string(),
            })
            .await
    }

    /// Last listing received from the host
    pub fn player_listing(&self) -> Option<PlayerListing> {
        self.listing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn seat_owners(&self) -> BTreeMap<String, Option<String>> {
        self.with_listing(|l| l.seat_owners().clone())
    }

    pub fn seats_enabled(&self) -> BTreeMap<String, bool> {
        self.with_listing(|l| l.seats_enabled().clone())
    }

    pub fn seats_allowed_to_be_disabled(&self) -> BTreeSet<String> {
        self.with_listing(|l| l.seats_allowed_to_be_disabled().clone())
    }

    pub fn alliances_in_turn_order(&self) -> Vec<SeatAlliances> {
        self.with_listing(|l| l.alliances_in_turn_order().to_vec())
    }

    /// How this node plays the seats it holds
    pub fn player_type(&self) -> LocalPlayerType {
        self.config.player_type
    }

    /// This node as the host sees it, while connected
    pub fn local_node(&self) -> Option<Node> {
        self.current_connection().map(|c| c.node().clone())
    }

    async fn pump_events(
        self: Arc<Self>,
        connection: Arc<HostConnection>,
        mut events: mpsc::Receiver<HostEvent>,
    ) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }

        let is_current = self
            .current_connection()
            .map(|current| Arc::ptr_eq(&current, &connection))
            .unwrap_or(false);
        if is_current {
            tracing::warn!("Lost connection to host");
            self.take_connection();
            self.selection.restore();
            self.set_state(ClientState::Disconnected);
            self.emit(ClientUpdate::Disconnected);
        }
    }

    fn handle_event(self: &Arc<Self>, event: HostEvent) {
        match event {
            HostEvent::ListingChanged(listing) => self.on_listing_changed(listing),
            HostEvent::MatchLaunching {
                match_bytes,
                remote_seats,
            } => self.on_done_selecting_players(&match_bytes, remote_seats),
            HostEvent::JoinInProgress {
                match_bytes,
                remote_seats,
            } => self.on_match_already_started(&match_bytes, remote_seats),
            HostEvent::JoinRejected { reason } => {
                tracing::info!("Host rejected join: {}", reason);
                self.emit(ClientUpdate::JoinRejected(reason));
            }
            HostEvent::MatchReset => {
                let state = self.state();
                if matches!(state, ClientState::Launching | ClientState::InMatch) {
                    self.transition(state, ClientState::SeatSelection);
                }
                self.emit(ClientUpdate::MatchReset);
            }
        }
    }

    fn enter_match(
        self: &Arc<Self>,
        match_bytes: &[u8],
        remote_seats: BTreeMap<String, Node>,
        in_progress: bool,
    ) {
        let match_data = match MatchDefinition::from_bytes(match_bytes) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Host sent unusable match data: {}", e);
                return;
            }
        };

        let state = self.state();
        let next = if in_progress {
            ClientState::InMatch
        } else {
            ClientState::Launching
        };
        if !self.transition(state, next) {
            tracing::warn!("Ignoring match start while {}", state);
            return;
        }
        tracing::info!("Entering match {} with {} remote seat(s)", match_data.name, remote_seats.len());
        if let Some(me) = self.local_node() {
            let mine: Vec<&str> = remote_seats
                .iter()
                .filter(|(_, node)| **node == me)
                .map(|(seat, _)| seat.as_str())
                .collect();
            if !mine.is_empty() {
                tracing::info!("Playing {} as {}", mine.join(", "), self.config.player_type.as_str());
            }
        }
        self.emit(ClientUpdate::MatchStarted {
            match_data,
            remote_seats,
            in_progress,
        });

        if in_progress {
            return;
        }
        let Some(connection) = self.current_connection() else {
            return;
        };
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            match connection.send(HostRequest::ClientReady).await {
                Ok(()) => {
                    coordinator.transition(ClientState::Launching, ClientState::InMatch);
                }
                Err(e) => tracing::warn!("Failed to report ready: {}", e),
            }
        });
    }

    fn fire(&self, request: HostRequest) {
        let Some(connection) = self.current_connection() else {
            tracing::warn!("Dropping {}: not connected", request.name());
            return;
        };
        tokio::spawn(async move {
            let name = request.name();
            if let Err(e) = connection.send(request).await {
                tracing::warn!("{} failed: {}", name, e);
            }
        });
    }

    fn connected(&self) -> Result<Arc<HostConnection>, RpcError> {
        self.current_connection().ok_or(RpcError::Disconnected)
    }

    fn current_connection(&self) -> Option<Arc<HostConnection>> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take_connection(&self) -> Option<Arc<HostConnection>> {
        self.connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn with_listing<T: Default>(&self, f: impl FnOnce(&PlayerListing) -> T) -> T {
        self.listing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
            .unwrap_or_default()
    }

    fn set_state(&self, next: ClientState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == next {
            return;
        }
        tracing::debug!("Client state {} -> {}", *state, next);
        *state = next;
        drop(state);
        self.emit(ClientUpdate::StateChanged(next));
    }

    /// Move from `from` to `to` if still in `from` and the move is legal
    fn transition(&self, from: ClientState, to: ClientState) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != from || !from.can_transition_to(to) {
            return false;
        }
        tracing::debug!("Client state {} -> {}", from, to);
        *state = to;
        drop(state);
        self.emit(ClientUpdate::StateChanged(to));
        true
    }

    fn emit(&self, update: ClientUpdate) {
        let _ = self.updates.send(update);
    }
}

fn rpc_failure(error: RpcError) -> ConnectFailure {
    ConnectFailure::TransportError(error.to_string())
}
