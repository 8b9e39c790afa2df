//! Host and client integration tests
//!
//! Runs a real host and real clients over localhost TCP.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use muster_client::{ClientCoordinator, ClientState, ClientUpdate, Credentials, HostAddress};
use muster_core::{
    ClientConfig, ConnectFailure, HostConfig, MatchCatalog, MatchDefinition, ModerationMessage,
    SeatDefinition, StartupError,
};
use muster_host::{ConnectionParams, HostCoordinator};
use muster_protocol::PlayerListing;

/// Base port for test hosts - each test gets a unique offset
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

fn get_test_port() -> u16 {
    let offset = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    39300 + offset
}

fn classic() -> MatchDefinition {
    MatchDefinition::new(
        "Classic",
        vec![
            SeatDefinition::new("Germany", &["Axis"]),
            SeatDefinition::new("Russia", &["Allies"]),
        ],
    )
}

/// Start a host named "Hans" with both seats owned by itself
async fn start_host(password: Option<&str>) -> (Arc<HostCoordinator>, u16) {
    let port = get_test_port();
    let config = HostConfig {
        node_name: "Hans".to_string(),
        bind_address: "127.0.0.1".to_string(),
        port,
        password: password.map(str::to_string),
        launch_ready_timeout: Duration::from_secs(5),
        ..HostConfig::default()
    };
    let params = ConnectionParams::from(&config);
    let host = Arc::new(HostCoordinator::new(
        config,
        MatchCatalog::from_definitions(vec![classic()]),
    ));
    host.on_match_data_changed(Some(classic())).unwrap();
    host.initialize(params).await.expect("host failed to start");
    (host, port)
}

fn client(name: &str) -> Arc<ClientCoordinator> {
    let config = ClientConfig {
        node_name: name.to_string(),
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    };
    Arc::new(ClientCoordinator::new(config))
}

async fn join(client: &Arc<ClientCoordinator>, port: u16) -> muster_client::SessionHandle {
    client
        .connect(HostAddress::new("127.0.0.1", port as u32), Credentials::default())
        .await
        .expect("client failed to connect")
}

/// Wait for an update matching `pred`
async fn wait_for<F>(updates: &mut broadcast::Receiver<ClientUpdate>, mut pred: F) -> ClientUpdate
where
    F: FnMut(&ClientUpdate) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match updates.recv().await {
                Ok(update) if pred(&update) => return update,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("updates closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for update")
}

async fn wait_for_listing<F>(
    updates: &mut broadcast::Receiver<ClientUpdate>,
    mut pred: F,
) -> PlayerListing
where
    F: FnMut(&PlayerListing) -> bool,
{
    match wait_for(updates, |u| matches!(u, ClientUpdate::ListingChanged(l) if pred(l))).await {
        ClientUpdate::ListingChanged(listing) => listing,
        _ => unreachable!(),
    }
}

/// Poll the host until `pred` holds
async fn eventually<F: Fn() -> bool>(pred: F) {
    timeout(Duration::from_secs(5), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_take_seat_reaches_every_peer() {
    let (host, port) = start_host(None).await;
    let c = client("Carl");
    let observer = client("Olga");

    let session = join(&c, port).await;
    assert_eq!(session.node.name(), "Carl");
    assert_eq!(session.listing.owner_of("Germany"), Some("Hans"));
    assert!(!session.match_in_progress);
    join(&observer, port).await;
    let mut seen_by_observer = observer.subscribe();

    c.request_take_seat("Germany");

    let listing = wait_for_listing(&mut seen_by_observer, |l| l.owner_of("Germany") == Some("Carl")).await;
    assert_eq!(listing.owner_of("Russia"), Some("Hans"));
    assert_eq!(host.player_listing().owner_of("Germany"), Some("Carl"));

    assert!(host.try_build_launcher().is_some());
    host.reset_match();
    host.shutdown();
}

#[tokio::test]
async fn test_disconnect_before_launch_frees_seats() {
    let (host, port) = start_host(None).await;
    let c = client("Carl");
    join(&c, port).await;
    let mut updates = c.subscribe();

    c.request_take_seat("Germany");
    wait_for_listing(&mut updates, |l| l.owner_of("Germany") == Some("Carl")).await;

    c.cancel();
    assert_eq!(c.state(), ClientState::Cancelled);

    eventually(|| host.player_listing().owner_of("Germany").is_none()).await;
    assert_eq!(host.player_listing().owner_of("Russia"), Some("Hans"));
    assert!(host.try_build_launcher().is_none());
    host.shutdown();
}

#[tokio::test]
async fn test_password_is_checked() {
    let (host, port) = start_host(Some("secret")).await;

    let result = client("Carl")
        .connect(HostAddress::new("127.0.0.1", port as u32), Credentials::default())
        .await;
    assert!(matches!(result, Err(ConnectFailure::AuthenticationFailed(_))));

    let c = client("Carl");
    let credentials = Credentials {
        password: Some("secret".to_string()),
    };
    c.connect(HostAddress::new("127.0.0.1", port as u32), credentials)
        .await
        .expect("right password refused");
    assert_eq!(c.state(), ClientState::SeatSelection);
    host.shutdown();
}

#[tokio::test]
async fn test_duplicate_names_are_made_unique() {
    let (host, port) = start_host(None).await;
    let first = client("Carl");
    let second = client("carl");
    let host_named = client("hans");

    assert_eq!(join(&first, port).await.node.name(), "Carl");
    assert_eq!(join(&second, port).await.node.name(), "carl (1)");
    assert_eq!(join(&host_named, port).await.node.name(), "hans (1)");
    assert_eq!(host.peers().len(), 3);
    host.shutdown();
}

#[tokio::test]
async fn test_port_in_use() {
    let (host, port) = start_host(None).await;
    let config = HostConfig {
        node_name: "Other".to_string(),
        bind_address: "127.0.0.1".to_string(),
        port,
        ..HostConfig::default()
    };
    let params = ConnectionParams::from(&config);
    let other = Arc::new(HostCoordinator::new(config, MatchCatalog::new()));

    let result = other.initialize(params).await;
    assert!(matches!(result, Err(StartupError::PortInUse(p)) if p == port));
    assert!(other.local_addr().is_none());
    host.shutdown();
}

#[tokio::test]
async fn test_launch_late_join_and_reset() {
    let (host, port) = start_host(None).await;
    let c = client("Carl");
    join(&c, port).await;
    let mut updates = c.subscribe();

    c.request_take_seat("Germany");
    wait_for_listing(&mut updates, |l| l.owner_of("Germany") == Some("Carl")).await;

    assert!(host.start_match().await.expect("launch failed"));
    match wait_for(&mut updates, |u| matches!(u, ClientUpdate::MatchStarted { .. })).await {
        ClientUpdate::MatchStarted {
            match_data,
            remote_seats,
            in_progress,
        } => {
            assert_eq!(match_data.name, "Classic");
            assert_eq!(remote_seats["Germany"].name(), "Carl");
            assert!(!in_progress);
        }
        _ => unreachable!(),
    }
    eventually(|| c.state() == ClientState::InMatch).await;

    let late = client("Lena");
    let mut late_updates = late.subscribe();
    let session = join(&late, port).await;
    assert!(session.match_in_progress);
    match wait_for(&mut late_updates, |u| matches!(u, ClientUpdate::MatchStarted { .. })).await {
        ClientUpdate::MatchStarted { in_progress, .. } => assert!(in_progress),
        _ => unreachable!(),
    }

    assert!(host.end_match("finished"));
    wait_for(&mut updates, |u| *u == ClientUpdate::MatchReset).await;
    eventually(|| !host.has_active_launcher()).await;
    assert_eq!(c.state(), ClientState::SeatSelection);
    host.shutdown();
}

#[tokio::test]
async fn test_player_lost_mid_match_frees_seat() {
    let (host, port) = start_host(None).await;
    let c = client("Carl");
    join(&c, port).await;
    let mut updates = c.subscribe();

    c.request_take_seat("Germany");
    wait_for_listing(&mut updates, |l| l.owner_of("Germany") == Some("Carl")).await;
    assert!(host.start_match().await.expect("launch failed"));
    eventually(|| c.state() == ClientState::InMatch).await;

    c.cancel();

    eventually(|| !host.has_active_launcher()).await;
    eventually(|| host.player_listing().owner_of("Germany").is_none()).await;
    assert_eq!(host.player_listing().owner_of("Russia"), Some("Hans"));
    assert!(host.try_build_launcher().is_none());
    assert!(matches!(host.start_match().await, Ok(false)));
    host.shutdown();
}

#[tokio::test]
async fn test_banned_peer_cannot_return() {
    let (host, port) = start_host(None).await;
    let c = client("Carl");
    join(&c, port).await;
    let mut updates = c.subscribe();

    host.apply_moderation(&ModerationMessage::ban("Carl"));

    wait_for(&mut updates, |u| *u == ClientUpdate::Disconnected).await;
    assert_eq!(c.state(), ClientState::Disconnected);
    eventually(|| host.peers().is_empty()).await;

    let result = c
        .connect(HostAddress::new("127.0.0.1", port as u32), Credentials::default())
        .await;
    assert!(matches!(result, Err(ConnectFailure::AuthenticationFailed(_))));
    host.shutdown();
}

#[tokio::test]
async fn test_host_shutdown_disconnects_clients() {
    let (host, port) = start_host(None).await;
    let c = client("Carl");
    join(&c, port).await;
    let mut updates = c.subscribe();

    host.shutdown();

    wait_for(&mut updates, |u| *u == ClientUpdate::Disconnected).await;
    assert!(c.local_node().is_none());
}
