//! muster-core: Core abstractions and configuration for muster
//!
//! This crate provides the configuration structures, error taxonomy, match
//! definitions and lobby contracts shared by the host, the client and the
//! CLI.

pub mod auth;
pub mod config;
pub mod error;
pub mod lobby;
pub mod matches;

pub use config::{Bootstrap, ClientConfig, HostConfig};
pub use error::{
    ConfigError, ConnectFailure, LobbyError, MatchDataError, MusterError, RpcError, SeatingError,
    StartupError,
};
pub use lobby::{
    LobbyBridge, LobbyCommand, LobbyRegistration, MatchAnnouncement, MatchStatus, ModerationAction,
    ModerationMessage,
};
pub use matches::{MatchCatalog, MatchDefinition, MatchOption, SeatDefinition};
