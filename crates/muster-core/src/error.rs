//! Core error types for muster

use muster_protocol::{ErrorCode, ProtocolError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the muster ecosystem
#[derive(Error, Debug)]
pub enum MusterError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Client connection error
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectFailure),

    /// Host startup error
    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    /// Request error
    #[error("Request error: {0}")]
    Rpc(#[from] RpcError),

    /// Seating error
    #[error("Seating error: {0}")]
    Seating(#[from] SeatingError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Match data error
    #[error("Match data error: {0}")]
    MatchData(#[from] MatchDataError),

    /// Lobby error
    #[error("Lobby error: {0}")]
    Lobby(#[from] LobbyError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a client connecting to a host.
///
/// All of these are recoverable by retrying.
#[derive(Error, Debug)]
pub enum ConnectFailure {
    /// The host refused the login
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Port outside 1-65535
    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    /// Anything else on the way to an established session
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Failures of a host opening its listening endpoint
#[derive(Error, Debug)]
pub enum StartupError {
    /// The port is already bound by another process
    #[error("Port {0} is already in use")]
    PortInUse(u16),

    /// Any other I/O or lobby registration failure
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Errors of a single request sent to the host
#[derive(Error, Debug)]
pub enum RpcError {
    /// The connection to the host is gone
    #[error("Not connected to host")]
    Disconnected,

    /// No response within the request timeout
    #[error("Request timed out")]
    Timeout,

    /// Writing the request failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// The host refused the request
    #[error("Host rejected request ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    /// The host answered with a response of the wrong shape
    #[error("Unexpected response to {0}")]
    UnexpectedResponse(&'static str),
}

/// Seat bookkeeping errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SeatingError {
    /// Preserved seating cannot be applied to match data with other seats
    #[error("Expected seats to match when preserving seating: had {expected:?}, new match has {found:?}")]
    SeatSetMismatch {
        expected: BTreeSet<String>,
        found: BTreeSet<String>,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Match definition errors
#[derive(Error, Debug)]
pub enum MatchDataError {
    /// Bytes did not decode into a match
    #[error("Failed to decode match data: {0}")]
    Decode(bincode::Error),

    /// Match could not be encoded
    #[error("Failed to encode match data: {0}")]
    Encode(bincode::Error),

    /// Decoded match is unusable
    #[error("Invalid match data: {0}")]
    Invalid(String),

    /// A match definition file is malformed
    #[error("Invalid match definition {path:?}: {source}")]
    Definition {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Named match is not in the catalog
    #[error("Unknown match: {0}")]
    UnknownMatch(String),

    /// Reading match files failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lobby service errors
#[derive(Error, Debug)]
pub enum LobbyError {
    /// HTTP transport failure
    #[error("Lobby request failed: {0}")]
    Http(String),

    /// The lobby refused the request
    #[error("Lobby rejected request: {0}")]
    Rejected(String),
}
