//! Authoritative seat coordinator
//!
//! `HostCoordinator` owns the single source of truth for seating. Every
//! mutation takes one coordinator-wide lock around `HostState`, builds the
//! new `PlayerListing` and queues it on the event channel before the lock
//! is released, so peers observe listings in mutation order. Queuing never
//! blocks; the network fan-out happens in each peer's connection task.
//!
//! # Collaborators
//!
//! - `PeerRegistry` tracks connected peers and the ban list.
//! - An installed `MatchLauncher` receives disconnects, late joins and
//!   ready signals once a match has been handed off.
//! - A `HostListener` and a `LobbyBridge` are optional and only called
//!   when present.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use muster_core::lobby::{MatchAnnouncement, MatchStatus};
use muster_core::{
    HostConfig, LobbyBridge, MatchCatalog, MatchDataError, MatchDefinition, ModerationAction,
    ModerationMessage, MusterError, SeatingError, StartupError,
};
use muster_protocol::{
    ErrorCode, HostEvent, LocalPlayerType, Node, PlayerListing, SeatAlliances,
};

use crate::autostart::Autostart;
use crate::gate::RemovalGate;
use crate::launcher::{LaunchError, LauncherDescriptor, MatchLauncher, ServerLauncher};
use crate::lobby::LobbyWatcher;
use crate::server::{PeerRegistry, PeerServer};
use crate::state::HostState;

/// Local observer of seat changes, such as an operator console
pub trait HostListener: Send + Sync {
    /// A new listing was published
    fn listing_changed(&self, listing: &PlayerListing);

    /// Seat ownership changed
    fn seats_taken_changed(&self);
}

/// Where the host listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Address to bind
    pub bind_address: String,
    /// Port to bind
    pub port: u16,
}

impl From<&HostConfig> for ConnectionParams {
    fn from(config: &HostConfig) -> Self {
        Self {
            bind_address: config.bind_address.clone(),
            port: config.port,
        }
    }
}

/// Result of a successful `initialize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRegistrationInfo {
    /// Address the listener is bound to
    pub local_addr: SocketAddr,
    /// The host's own node
    pub node: Node,
    /// Lobby game id, when registered with a lobby
    pub game_id: Option<String>,
}

struct Runtime {
    local_addr: SocketAddr,
    game_id: Option<String>,
}

/// Single authoritative owner of seat assignment
pub struct HostCoordinator {
    config: HostConfig,
    local_node: Node,
    state: Mutex<HostState>,
    catalog: RwLock<MatchCatalog>,
    events: broadcast::Sender<HostEvent>,
    peers: Arc<PeerRegistry>,
    gate: RemovalGate,
    launcher: RwLock<Option<Arc<dyn MatchLauncher>>>,
    listener: RwLock<Option<Arc<dyn HostListener>>>,
    lobby: Option<Arc<dyn LobbyBridge>>,
    runtime: Mutex<Option<Runtime>>,
    shutdown: CancellationToken,
}

impl HostCoordinator {
    /// Create a coordinator with no match loaded
    pub fn new(config: HostConfig, catalog: MatchCatalog) -> Self {
        let address = config
            .bind_address
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let local_node = Node::new(config.node_name.clone(), address, config.port);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            state: Mutex::new(HostState::new(
                config.node_name.clone(),
                config.leaves_seats_open(),
                config.default_local_type,
            )),
            catalog: RwLock::new(catalog),
            events,
            peers: Arc::new(PeerRegistry::new(config.node_name.clone())),
            gate: RemovalGate::new(config.removal_gate_timeout),
            launcher: RwLock::new(None),
            listener: RwLock::new(None),
            lobby: None,
            runtime: Mutex::new(None),
            shutdown: CancellationToken::new(),
            local_node,
            config,
        }
    }

    /// Attach a matchmaking lobby (before `initialize`)
    pub fn with_lobby(mut self, lobby: Arc<dyn LobbyBridge>) -> Self {
        self.lobby = Some(lobby);
        self
    }

    /// Set or clear the local listener
    pub fn set_listener(&self, listener: Option<Arc<dyn HostListener>>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    /// Host configuration
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The host's own node
    pub fn local_node(&self) -> &Node {
        &self.local_node
    }

    /// Connected peers
    pub fn peers(&self) -> &Arc<PeerRegistry> {
        &self.peers
    }

    /// Subscribe to broadcast events
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Whether the host runs unattended
    pub fn is_headless(&self) -> bool {
        self.config.headless
    }

    /// Address the listener is bound to, once initialized
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime().as_ref().map(|r| r.local_addr)
    }

    /// Lobby game id, once registered
    pub fn game_id(&self) -> Option<String> {
        self.runtime().as_ref().and_then(|r| r.game_id.clone())
    }

    /// Token cancelled when the host shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting peers and close every connection
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Host shutting down");
            self.peers.close_all("host is shutting down");
            self.shutdown.cancel();
        }
    }

    /// Open the listening endpoint and start accepting peers.
    ///
    /// With a lobby attached the match is registered first. Any failure
    /// leaves the coordinator unstarted so the call can be retried.
    pub async fn initialize(
        self: &Arc<Self>,
        params: ConnectionParams,
    ) -> Result<LaunchRegistrationInfo, StartupError> {
        if self.runtime().is_some() {
            return Err(StartupError::TransportError(
                "host is already listening".to_string(),
            ));
        }

        let bind_addr = format!("{}:{}", params.bind_address, params.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            tracing::error!("Failed to bind to {}: {}", bind_addr, e);
            if e.kind() == std::io::ErrorKind::AddrInUse {
                StartupError::PortInUse(params.port)
            } else {
                StartupError::TransportError(e.to_string())
            }
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StartupError::TransportError(e.to_string()))?;

        let game_id = match &self.lobby {
            Some(lobby) => {
                let announcement = MatchAnnouncement {
                    host_name: self.local_node.name().to_string(),
                    port: local_addr.port(),
                    match_name: self.player_listing().match_name().map(str::to_string),
                    password_required: self.config.password.is_some(),
                    headless: self.config.headless,
                };
                let registration = lobby.register_match(&announcement).await.map_err(|e| {
                    tracing::error!("Lobby registration failed: {}", e);
                    StartupError::TransportError(e.to_string())
                })?;
                tracing::info!("Registered with lobby as game {}", registration.game_id);
                Some(registration.game_id)
            }
            None => None,
        };

        {
            let mut runtime = self.runtime();
            if runtime.is_some() {
                return Err(StartupError::TransportError(
                    "host is already listening".to_string(),
                ));
            }
            *runtime = Some(Runtime {
                local_addr,
                game_id: game_id.clone(),
            });
        }

        let server = PeerServer::new(Arc::clone(self), self.shutdown.child_token());
        tokio::spawn(server.run(listener));

        if let (Some(lobby), Some(id)) = (&self.lobby, &game_id) {
            let watcher = LobbyWatcher::new(
                Arc::clone(lobby),
                id.clone(),
                self.config.lobby_poll_interval,
            );
            tokio::spawn(watcher.run(Arc::clone(self)));
        }

        if self.config.headless {
            let autostart = Autostart::new(self.config.autostart_interval);
            tokio::spawn(autostart.run(Arc::clone(self)));
        }

        tracing::info!("Host {} listening on {}", self.local_node.name(), local_addr);
        Ok(LaunchRegistrationInfo {
            local_addr,
            node: self.local_node.clone(),
            game_id,
        })
    }

    /// Recompute seating from new match data (or none) and publish it
    pub fn on_match_data_changed(
        &self,
        data: Option<MatchDefinition>,
    ) -> Result<PlayerListing, SeatingError> {
        let mut state = self.state();
        match data {
            Some(data) => {
                tracing::info!("Loading match {}", data.name);
                state.load_match(data)?;
            }
            None => state.clear_match(),
        }
        let listing = state.listing();
        self.publish(HostEvent::ListingChanged(listing.clone()));
        drop(state);

        if let Some(listener) = self.listener() {
            listener.listing_changed(&listing);
        }
        Ok(listing)
    }

    /// Assign `seat` to `node`. Unknown seats are ignored.
    pub fn take_seat(&self, node: &Node, seat: &str) -> bool {
        tracing::debug!("{} takes {}", node.name(), seat);
        self.mutate_seats(|state| state.take_seat(node.name(), seat))
    }

    /// Clear the owner of `seat`. Unknown seats are ignored.
    pub fn release_seat(&self, node: &Node, seat: &str) -> bool {
        tracing::debug!("{} releases {}", node.name(), seat);
        self.mutate_seats(|state| state.release_seat(seat))
    }

    /// Take a seat for the host's own node
    pub fn take_seat_as_host(&self, seat: &str) -> bool {
        self.take_seat(&self.local_node, seat)
    }

    /// Release a seat held by the host's own node
    pub fn release_seat_as_host(&self, seat: &str) -> bool {
        self.release_seat(&self.local_node, seat)
    }

    /// Enable or disable a seat, reclaiming it for the host first
    pub fn set_seat_enabled(&self, seat: &str, enabled: bool) -> bool {
        tracing::debug!("Setting {} enabled={}", seat, enabled);
        self.mutate_seats(|state| state.set_seat_enabled(seat, enabled))
    }

    /// Override how the host plays one of its seats
    pub fn set_local_player_type(&self, seat: &str, player_type: LocalPlayerType) -> bool {
        self.mutate(|state| state.set_local_player_type(seat, player_type))
    }

    /// Keep the current seating across the next match-data reload
    pub fn persist_seating(&self) {
        self.state().persist_seating();
    }

    /// Unassign every seat
    pub fn release_all_seats(&self) {
        tracing::info!("Releasing all seats");
        self.mutate_seats(|state| {
            state.release_all_seats();
            true
        });
    }

    /// Current snapshot
    pub fn player_listing(&self) -> PlayerListing {
        self.state().listing()
    }

    /// Seat name to owner
    pub fn seat_owners(&self) -> BTreeMap<String, Option<String>> {
        self.player_listing().seat_owners().clone()
    }

    /// Seat name to enabled flag
    pub fn seats_enabled(&self) -> BTreeMap<String, bool> {
        self.player_listing().seats_enabled().clone()
    }

    /// Seats the match permits to be disabled
    pub fn seats_allowed_to_be_disabled(&self) -> BTreeSet<String> {
        self.player_listing().seats_allowed_to_be_disabled().clone()
    }

    /// Seats with their alliances, in turn order
    pub fn alliances_in_turn_order(&self) -> Vec<SeatAlliances> {
        self.player_listing().alliances_in_turn_order().to_vec()
    }

    /// Whether a match has been handed off. Registers `node` as a late
    /// joiner with the launcher if so.
    pub fn is_match_in_progress(&self, node: &Node) -> bool {
        match self.active_launcher() {
            Some(launcher) => {
                launcher.add_late_joiner(node);
                true
            }
            None => false,
        }
    }

    /// Build a launcher descriptor if every seat is claimed by the host or
    /// a connected peer.
    ///
    /// Removals are held back from here until `set_active_launcher` (or
    /// `reset_match`) so a disconnect in between cannot free a seat of the
    /// match that is about to start.
    pub fn try_build_launcher(&self) -> Option<LauncherDescriptor> {
        let state = self.state();
        let listing = state.listing();
        if !listing.all_seats_claimed() {
            return None;
        }
        let data = state.match_data()?;
        let match_bytes = match data.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot serialize match {}: {}", data.name, e);
                return None;
            }
        };

        let mut remote_seats = BTreeMap::new();
        for (seat, owner) in listing.seat_owners() {
            let Some(owner) = owner.as_deref() else {
                continue;
            };
            if owner == state.host_name() {
                continue;
            }
            match self.peers.get(owner) {
                Some(node) => {
                    remote_seats.insert(seat.clone(), node);
                }
                None => {
                    tracing::debug!("Seat {} belongs to {}, who is not connected", seat, owner);
                    return None;
                }
            }
        }

        self.gate.disallow();
        let remote_nodes = remote_seats.values().cloned().collect();

        Some(LauncherDescriptor {
            listing,
            remote_seats,
            remote_nodes,
            match_bytes,
        })
    }

    /// Install the launcher that now owns disconnect handling
    pub fn set_active_launcher(&self, launcher: Arc<dyn MatchLauncher>) {
        *self.launcher.write().unwrap_or_else(PoisonError::into_inner) = Some(launcher);
        self.gate.allow();
    }

    /// Drop the installed launcher
    pub fn clear_launcher(&self) {
        *self.launcher.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Whether a launcher is installed
    pub fn has_active_launcher(&self) -> bool {
        self.active_launcher().is_some()
    }

    /// Go back to seat selection after a match ended or failed to start
    pub fn reset_match(&self) {
        self.clear_launcher();
        self.gate.allow();

        let mut state = self.state();
        // a seat of a player who left mid-match would relaunch with nobody in it
        let vacated = state.release_departed(|name| self.peers.get(name).is_some());
        let listing = state.listing();
        self.publish(HostEvent::ListingChanged(listing.clone()));
        self.publish(HostEvent::MatchReset);
        drop(state);

        if !vacated.is_empty() {
            tracing::info!("Freed seats of departed players: {:?}", vacated);
            if let Some(listener) = self.listener() {
                listener.listing_changed(&listing);
                listener.seats_taken_changed();
            }
        }
        self.report_status(MatchStatus::WaitingForPlayers);
        tracing::info!("Back to seat selection");
    }

    /// Start a match if every seat is claimed.
    ///
    /// Returns `Ok(false)` when seats are still open. Once running, the
    /// match resets the coordinator by itself when it ends.
    pub async fn start_match(self: &Arc<Self>) -> Result<bool, LaunchError> {
        if self.has_active_launcher() {
            return Err(LaunchError::AlreadyActive);
        }
        let Some(descriptor) = self.try_build_launcher() else {
            return Ok(false);
        };

        let launcher = Arc::new(descriptor.into_launcher(
            Arc::clone(&self.peers),
            self.events.clone(),
            self.config.launch_ready_timeout,
        ));
        self.set_active_launcher(launcher.clone());
        self.report_status(MatchStatus::Launching);

        if let Err(e) = launcher.start().await {
            if self.is_active(&launcher) {
                self.reset_match();
            }
            return Err(e);
        }
        self.report_status(MatchStatus::InProgress);

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            launcher.finished().await;
            if coordinator.is_active(&launcher) {
                coordinator.reset_match();
            }
        });
        Ok(true)
    }

    /// Stop the running match, if any
    pub fn end_match(&self, reason: &str) -> bool {
        match self.active_launcher() {
            Some(launcher) => {
                launcher.stop(reason);
                true
            }
            None => false,
        }
    }

    /// A remote node reported that its match is running
    pub fn client_ready(&self, node: &Node) {
        if let Some(launcher) = self.active_launcher() {
            launcher.client_ready(node);
        }
    }

    /// A peer finished logging in
    pub fn on_peer_connected(&self, node: &Node) {
        tracing::info!("Peer connected: {}", node);
        self.notify_lobby_membership(node, true);
    }

    /// A peer went away.
    ///
    /// Waits out a launcher being built, then either lets the launcher
    /// handle it or frees every seat the node held.
    pub async fn on_peer_disconnected(&self, node: &Node) {
        tracing::info!("Peer disconnected: {}", node);
        self.notify_lobby_membership(node, false);

        self.gate.wait().await;

        if let Some(launcher) = self.active_launcher() {
            launcher.connection_lost(node);
            return;
        }

        self.mutate_seats(|state| {
            let owned = state.seats_owned_by(node.name());
            for seat in &owned {
                state.release_seat(seat);
            }
            !owned.is_empty()
        });
    }

    /// Apply a moderation command from an authorized operator
    pub fn apply_moderation(&self, message: &ModerationMessage) {
        let target = message.target_identifier.as_str();
        match message.action {
            ModerationAction::Disconnect => {
                let closed = self
                    .peers
                    .disconnect(target, ErrorCode::NotPermitted, "disconnected by moderator");
                if closed.is_empty() {
                    tracing::warn!("Moderation target {} is not connected", target);
                }
            }
            ModerationAction::Ban => {
                let addresses: Vec<IpAddr> = match target.parse::<IpAddr>() {
                    Ok(ip) => vec![ip],
                    Err(_) => self.peers.get(target).map(|n| n.address()).into_iter().collect(),
                };
                if addresses.is_empty() {
                    tracing::warn!("Cannot ban {}: unknown node", target);
                }
                for address in addresses {
                    self.peers.ban(address);
                    self.peers
                        .disconnect(&address.to_string(), ErrorCode::Banned, "banned by moderator");
                }
            }
        }
    }

    /// Names of the loadable matches
    pub fn list_available_matches(&self) -> Vec<String> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
    }

    /// Load a match from the catalog
    pub fn change_active_match(&self, name: &str) -> Result<PlayerListing, MusterError> {
        let data = self
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)?;
        Ok(self.on_match_data_changed(Some(data))?)
    }

    /// Load a saved match
    pub fn change_to_saved_match(
        &self,
        save: &[u8],
        filename: &str,
    ) -> Result<PlayerListing, MusterError> {
        let data = MatchDefinition::from_bytes(save)?;
        tracing::info!("Loading saved match {} from {}", data.name, filename);
        Ok(self.on_match_data_changed(Some(data))?)
    }

    /// Serialized options of the loaded match (empty without a match)
    pub fn get_match_options(&self) -> Result<Bytes, MatchDataError> {
        match self.state().match_data() {
            Some(data) => data.options_bytes(),
            None => Ok(Bytes::new()),
        }
    }

    /// Replace option values of the loaded match
    pub fn change_match_options(&self, options: &[u8]) -> Result<usize, MatchDataError> {
        let mut state = self.state();
        let Some(data) = state.match_data_mut() else {
            return Err(MatchDataError::Invalid("no match loaded".to_string()));
        };
        let changed = data.apply_options(options)?;
        tracing::info!("Changed {} match option(s)", changed);
        Ok(changed)
    }

    fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut HostState) -> bool,
    {
        let mut state = self.state();
        if !f(&mut state) {
            return false;
        }
        let listing = state.listing();
        self.publish(HostEvent::ListingChanged(listing.clone()));
        drop(state);

        if let Some(listener) = self.listener() {
            listener.listing_changed(&listing);
        }
        true
    }

    fn mutate_seats<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut HostState) -> bool,
    {
        let changed = self.mutate(f);
        if changed {
            if let Some(listener) = self.listener() {
                listener.seats_taken_changed();
            }
        }
        changed
    }

    fn publish(&self, event: HostEvent) {
        if let Err(e) = self.events.send(event) {
            tracing::trace!("No peers to receive {:?}", e.0);
        }
    }

    fn is_active(&self, launcher: &Arc<ServerLauncher>) -> bool {
        self.active_launcher()
            .map(|active| {
                Arc::as_ptr(&active) as *const () == Arc::as_ptr(launcher) as *const ()
            })
            .unwrap_or(false)
    }

    fn active_launcher(&self) -> Option<Arc<dyn MatchLauncher>> {
        self.launcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn listener(&self) -> Option<Arc<dyn HostListener>> {
        self.listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_lobby_membership(&self, node: &Node, joined: bool) {
        let (Some(lobby), Some(game_id)) = (self.lobby.clone(), self.game_id()) else {
            return;
        };
        let player = node.name().to_string();
        tokio::spawn(async move {
            let result = if joined {
                lobby.player_joined(&game_id, &player).await
            } else {
                lobby.player_left(&game_id, &player).await
            };
            if let Err(e) = result {
                tracing::warn!("Failed to report {} to lobby: {}", player, e);
            }
        });
    }

    fn report_status(&self, status: MatchStatus) {
        let (Some(lobby), Some(game_id)) = (self.lobby.clone(), self.game_id()) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = lobby.update_status(&game_id, status).await {
                tracing::warn!("Failed to report status {:?} to lobby: {}", status, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use muster_core::SeatDefinition;
    use tokio::sync::mpsc;

    fn classic() -> MatchDefinition {
        MatchDefinition::new(
            "Classic",
            vec![
                SeatDefinition::new("Germany", &["Axis"]),
                SeatDefinition::new("Russia", &["Allies"]),
            ],
        )
    }

    fn config(minimize: bool) -> HostConfig {
        HostConfig {
            node_name: "Hans".to_string(),
            minimize_remote_ai: minimize,
            removal_gate_timeout: Duration::from_millis(200),
            ..HostConfig::default()
        }
    }

    fn coordinator(minimize: bool) -> HostCoordinator {
        let config = config(minimize);
        let coordinator =
            HostCoordinator::new(config, MatchCatalog::from_definitions(vec![classic()]));
        coordinator.on_match_data_changed(Some(classic())).unwrap();
        coordinator
    }

    fn connect(coordinator: &HostCoordinator, name: &str) -> (Node, mpsc::Receiver<crate::server::PeerCommand>) {
        let (tx, rx) = mpsc::channel(8);
        let node = coordinator.peers().register(
            name,
            SocketAddr::from(([127, 0, 0, 1], 41000)),
            tx,
            CancellationToken::new(),
        );
        (node, rx)
    }

    #[derive(Default)]
    struct CountingListener {
        listings: AtomicUsize,
        seats: AtomicUsize,
    }

    impl HostListener for CountingListener {
        fn listing_changed(&self, _listing: &PlayerListing) {
            self.listings.fetch_add(1, Ordering::SeqCst);
        }

        fn seats_taken_changed(&self) {
            self.seats.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_take_seat_broadcasts_listing() {
        let coordinator = coordinator(false);
        let mut events = coordinator.subscribe();
        let (c, _rx) = connect(&coordinator, "Carl");

        assert!(coordinator.take_seat(&c, "Germany"));

        match events.recv().await.unwrap() {
            HostEvent::ListingChanged(listing) => {
                assert_eq!(listing.owner_of("Germany"), Some("Carl"));
                assert_eq!(listing.owner_of("Russia"), Some("Hans"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(coordinator.try_build_launcher().is_some());
    }

    #[tokio::test]
    async fn test_unknown_seat_publishes_nothing() {
        let coordinator = coordinator(false);
        let mut events = coordinator.subscribe();
        let (c, _rx) = connect(&coordinator, "Carl");

        assert!(!coordinator.take_seat(&c, "Atlantis"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_before_launch_frees_seats() {
        let coordinator = coordinator(false);
        let (c, _rx) = connect(&coordinator, "Carl");
        coordinator.take_seat(&c, "Germany");

        coordinator.peers().unregister(&c);
        coordinator.on_peer_disconnected(&c).await;

        let listing = coordinator.player_listing();
        assert_eq!(listing.owner_of("Germany"), None);
        assert_eq!(listing.owner_of("Russia"), Some("Hans"));
        assert!(coordinator.try_build_launcher().is_none());
    }

    #[test]
    fn test_try_build_launcher_requires_all_seats() {
        let coordinator = coordinator(true);
        assert!(coordinator.try_build_launcher().is_none());
        assert!(!coordinator.gate.is_blocking());

        coordinator.take_seat_as_host("Germany");
        coordinator.take_seat_as_host("Russia");
        let descriptor = coordinator.try_build_launcher().unwrap();

        assert!(descriptor.remote_nodes.is_empty());
        assert_eq!(descriptor.listing.seat_owners().len(), 2);
        assert!(coordinator.gate.is_blocking());

        let data = MatchDefinition::from_bytes(&descriptor.match_bytes).unwrap();
        assert_eq!(data.name, "Classic");
    }

    #[test]
    fn test_descriptor_lists_remote_nodes() {
        let coordinator = coordinator(false);
        let (c, _rx) = connect(&coordinator, "Carl");
        coordinator.take_seat(&c, "Russia");

        let descriptor = coordinator.try_build_launcher().unwrap();
        assert_eq!(descriptor.remote_seats.get("Russia"), Some(&c));
        assert!(descriptor.remote_nodes.contains(&c));
    }

    #[tokio::test]
    async fn test_disconnect_after_launcher_is_delegated() {
        let coordinator = Arc::new(coordinator(false));
        let (c, _rx) = connect(&coordinator, "Carl");
        coordinator.take_seat(&c, "Germany");

        let descriptor = coordinator.try_build_launcher().unwrap();
        let launcher = Arc::new(descriptor.into_launcher(
            Arc::clone(coordinator.peers()),
            coordinator.events.clone(),
            Duration::from_secs(60),
        ));
        coordinator.set_active_launcher(launcher.clone());

        coordinator.on_peer_disconnected(&c).await;

        assert_eq!(coordinator.player_listing().owner_of("Germany"), Some("Carl"));
        assert_eq!(launcher.phase(), crate::launcher::LaunchPhase::Launching);
    }

    #[tokio::test]
    async fn test_start_match_and_reset() {
        let coordinator = Arc::new(coordinator(false));
        let mut events = coordinator.subscribe();

        assert!(coordinator.start_match().await.unwrap());
        assert!(coordinator.has_active_launcher());
        assert!(matches!(
            events.recv().await.unwrap(),
            HostEvent::MatchLaunching { .. }
        ));

        let late = Node::from_socket("Lena", SocketAddr::from(([127, 0, 0, 1], 41001)));
        assert!(coordinator.is_match_in_progress(&late));
        assert!(matches!(
            coordinator.start_match().await,
            Err(LaunchError::AlreadyActive)
        ));

        assert!(coordinator.end_match("operator"));
        loop {
            if let HostEvent::MatchReset = events.recv().await.unwrap() {
                break;
            }
        }
        assert!(!coordinator.has_active_launcher());
        assert!(!coordinator.is_match_in_progress(&late));
    }

    #[test]
    fn test_set_seat_enabled_sequence() {
        let coordinator = coordinator(true);
        let x = Node::from_socket("Xena", SocketAddr::from(([127, 0, 0, 1], 41002)));
        coordinator.take_seat(&x, "Germany");

        coordinator.set_seat_enabled("Germany", false);
        assert_eq!(coordinator.seat_owners()["Germany"], Some("Hans".to_string()));
        assert!(!coordinator.seats_enabled()["Germany"]);

        coordinator.set_seat_enabled("Germany", true);
        assert_eq!(coordinator.seat_owners()["Germany"], None);
        assert!(coordinator.seats_enabled()["Germany"]);
    }

    #[test]
    fn test_listener_notified() {
        let coordinator = coordinator(false);
        let listener = Arc::new(CountingListener::default());
        coordinator.set_listener(Some(listener.clone()));

        coordinator.release_seat_as_host("Germany");
        coordinator.set_local_player_type("Russia", LocalPlayerType::HardAi);
        coordinator.release_seat_as_host("Nowhere");

        assert_eq!(listener.listings.load(Ordering::SeqCst), 2);
        assert_eq!(listener.seats.load(Ordering::SeqCst), 1);
        assert_eq!(
            coordinator.player_listing().local_player_types().get("Russia"),
            Some(&LocalPlayerType::HardAi)
        );
    }

    #[test]
    fn test_persist_and_change_match() {
        let coordinator = coordinator(false);
        coordinator.release_seat_as_host("Germany");
        coordinator.persist_seating();

        let listing = coordinator.change_active_match("Classic").unwrap();
        assert_eq!(listing.owner_of("Germany"), None);

        assert!(matches!(
            coordinator.change_active_match("Pacific"),
            Err(MusterError::MatchData(MatchDataError::UnknownMatch(_)))
        ));
        assert_eq!(coordinator.list_available_matches(), vec!["Classic".to_string()]);
    }

    #[test]
    fn test_match_options() {
        let coordinator = coordinator(false);
        assert!(coordinator.get_match_options().unwrap().is_empty());

        let mut data = classic();
        data.options.push(muster_core::MatchOption {
            name: "tech".to_string(),
            value: "off".to_string(),
        });
        let save = data.to_bytes().unwrap();
        coordinator.change_to_saved_match(&save, "autosave.bin").unwrap();

        let incoming = vec![muster_core::MatchOption {
            name: "tech".to_string(),
            value: "on".to_string(),
        }];
        let encoded = bincode::serialize(&incoming).unwrap();
        assert_eq!(coordinator.change_match_options(&encoded).unwrap(), 1);
        assert!(!coordinator.get_match_options().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moderation_ban() {
        let coordinator = coordinator(false);
        let (c, mut rx) = connect(&coordinator, "Carl");

        coordinator.apply_moderation(&ModerationMessage::ban("Carl"));

        assert!(coordinator.peers().is_banned(&c.address()));
        assert!(matches!(
            rx.recv().await,
            Some(crate::server::PeerCommand::Close {
                code: ErrorCode::Banned,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_initialize_port_in_use() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let coordinator = Arc::new(coordinator(false));
        let result = coordinator
            .initialize(ConnectionParams {
                bind_address: "127.0.0.1".to_string(),
                port,
            })
            .await;

        assert!(matches!(result, Err(StartupError::PortInUse(p)) if p == port));
        assert!(coordinator.local_addr().is_none());
    }

    async fn wait_for(events: &mut broadcast::Receiver<HostEvent>, wanted: fn(&HostEvent) -> bool) {
        loop {
            if wanted(&events.recv().await.unwrap()) {
                return;
            }
        }
    }

    #[test]
    fn test_descriptor_needs_connected_owners() {
        let coordinator = coordinator(false);
        let gone = Node::from_socket("Xena", SocketAddr::from(([127, 0, 0, 1], 41003)));
        coordinator.take_seat(&gone, "Germany");

        assert!(coordinator.try_build_launcher().is_none());
        assert!(!coordinator.gate.is_blocking());
    }

    #[tokio::test]
    async fn test_seat_of_player_lost_mid_match_is_freed() {
        let coordinator = Arc::new(coordinator(false));
        let mut events = coordinator.subscribe();
        let (carl, _rx) = connect(&coordinator, "Carl");
        coordinator.take_seat(&carl, "Germany");

        let starting = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.start_match().await })
        };
        wait_for(&mut events, |e| matches!(e, HostEvent::MatchLaunching { .. })).await;
        coordinator.client_ready(&carl);
        assert!(starting.await.unwrap().unwrap());

        coordinator.peers().unregister(&carl);
        coordinator.on_peer_disconnected(&carl).await;
        wait_for(&mut events, |e| matches!(e, HostEvent::MatchReset)).await;

        let listing = coordinator.player_listing();
        assert_eq!(listing.owner_of("Germany"), None);
        assert_eq!(listing.owner_of("Russia"), Some("Hans"));
        assert!(!coordinator.has_active_launcher());
        assert!(coordinator.try_build_launcher().is_none());
    }

    struct IdleLauncher;

    impl MatchLauncher for IdleLauncher {
        fn connection_lost(&self, _node: &Node) {}
        fn add_late_joiner(&self, _node: &Node) {}
        fn client_ready(&self, _node: &Node) {}
        fn stop(&self, _reason: &str) {}
    }

    #[tokio::test]
    async fn test_failed_start_keeps_newer_launcher() {
        let coordinator = Arc::new(HostCoordinator::new(
            HostConfig {
                launch_ready_timeout: Duration::from_millis(300),
                ..config(false)
            },
            MatchCatalog::from_definitions(vec![classic()]),
        ));
        coordinator.on_match_data_changed(Some(classic())).unwrap();
        let (carl, _rx) = connect(&coordinator, "Carl");
        coordinator.take_seat(&carl, "Germany");

        let starting = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.start_match().await })
        };
        while !coordinator.has_active_launcher() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        coordinator.set_active_launcher(Arc::new(IdleLauncher));

        assert!(matches!(
            starting.await.unwrap(),
            Err(LaunchError::ReadyTimeout(_))
        ));
        assert!(coordinator.has_active_launcher());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_and_release() {
        const NODES: usize = 8;
        const ROUNDS: usize = 50;

        let seats: Vec<String> = (0..NODES * 2).map(|i| format!("Seat{:02}", i)).collect();
        let data = MatchDefinition::new(
            "Crowd",
            seats.iter().map(|s| SeatDefinition::new(s, &["Team"])).collect(),
        );
        let coordinator = Arc::new(HostCoordinator::new(
            HostConfig {
                event_capacity: 8192,
                ..config(true)
            },
            MatchCatalog::new(),
        ));
        coordinator.on_match_data_changed(Some(data)).unwrap();
        let mut events = coordinator.subscribe();

        let mut receivers = Vec::new();
        let mut tasks = Vec::new();
        let mut seat_node = BTreeMap::new();
        for i in 0..NODES {
            let (node, rx) = connect(&coordinator, &format!("Node{:02}", i));
            receivers.push(rx);
            let (kept, dropped) = (seats[2 * i].clone(), seats[2 * i + 1].clone());
            seat_node.insert(kept.clone(), node.name().to_string());
            seat_node.insert(dropped.clone(), node.name().to_string());

            let coordinator = Arc::clone(&coordinator);
            tasks.push(tokio::spawn(async move {
                for _ in 0..ROUNDS {
                    assert!(coordinator.take_seat(&node, &kept));
                    assert!(coordinator.take_seat(&node, &dropped));
                    tokio::task::yield_now().await;
                    assert!(coordinator.release_seat(&node, &dropped));
                    assert!(coordinator.release_seat(&node, &kept));
                }
                assert!(coordinator.take_seat(&node, &kept));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut previous: Option<BTreeMap<String, Option<String>>> = None;
        let mut broadcasts = 0;
        while let Ok(event) = events.try_recv() {
            let HostEvent::ListingChanged(listing) = event else {
                continue;
            };
            let owners = listing.seat_owners().clone();
            assert_eq!(owners.len(), seats.len());
            for (seat, owner) in &owners {
                if let Some(owner) = owner {
                    assert_eq!(Some(owner), seat_node.get(seat));
                }
            }
            if let Some(previous) = &previous {
                let changed = owners.iter().filter(|(seat, owner)| previous[*seat] != **owner).count();
                assert!(changed <= 1, "successive listings differ in {} seats", changed);
            }
            previous = Some(owners);
            broadcasts += 1;
        }
        assert_eq!(broadcasts, NODES * (ROUNDS * 4 + 1));

        let expected: BTreeMap<String, Option<String>> = seats
            .iter()
            .enumerate()
            .map(|(i, seat)| (seat.clone(), (i % 2 == 0).then(|| seat_node[seat].clone())))
            .collect();
        assert_eq!(previous, Some(expected.clone()));
        assert_eq!(coordinator.seat_owners(), expected);
    }
}
