//! muster host
//!
//! The authoritative side of seat coordination. A `HostCoordinator` owns the
//! seat table, accepts peers over TCP, publishes every new player listing and
//! hands a fully seated match to a `ServerLauncher`.

pub mod autostart;
pub mod coordinator;
pub mod gate;
pub mod launcher;
pub mod lobby;
pub mod server;
pub mod state;

pub use coordinator::{ConnectionParams, HostCoordinator, HostListener, LaunchRegistrationInfo};
pub use launcher::{LaunchError, LaunchPhase, LauncherDescriptor, MatchLauncher, ServerLauncher};
pub use lobby::HttpLobbyBridge;
