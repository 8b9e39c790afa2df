//! Host RPC contract
//!
//! Clients only ever propose seat changes; the host is the single writer of
//! the player listing and pushes every new snapshot to all peers. This keeps
//! the contract asymmetric: requests flow client to host, events flow host to
//! client.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::listing::PlayerListing;
use crate::message::ErrorCode;
use crate::node::Node;

/// Operations a client may invoke on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostRequest {
    /// Current player listing
    GetPlayerListing,
    /// Assign a seat to the requesting node
    TakeSeat { node: Node, seat: String },
    /// Clear a seat's owner
    ReleaseSeat { node: Node, seat: String },
    /// Disable a seat
    DisableSeat { seat: String },
    /// Enable a seat
    EnableSeat { seat: String },
    /// Whether a match is already running; registers the node as a late joiner if so
    IsMatchInProgress { node: Node },
    /// Serialized editable options of the current match
    GetMatchOptions,
    /// Replace the editable options of the current match
    ChangeMatchOptions { options: Bytes },
    /// Load another match from the host's catalog
    ChangeActiveMatch { name: String },
    /// Load a saved match
    ChangeToSavedMatch { save: Bytes, filename: String },
    /// Whether the host runs unattended
    IsHostHeadless,
    /// Names of the matches the host can load
    ListAvailableMatches,
    /// The client finished starting a launched match
    ClientReady,
}

impl HostRequest {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            HostRequest::GetPlayerListing => "get_player_listing",
            HostRequest::TakeSeat { .. } => "take_seat",
            HostRequest::ReleaseSeat { .. } => "release_seat",
            HostRequest::DisableSeat { .. } => "disable_seat",
            HostRequest::EnableSeat { .. } => "enable_seat",
            HostRequest::IsMatchInProgress { .. } => "is_match_in_progress",
            HostRequest::GetMatchOptions => "get_match_options",
            HostRequest::ChangeMatchOptions { .. } => "change_match_options",
            HostRequest::ChangeActiveMatch { .. } => "change_active_match",
            HostRequest::ChangeToSavedMatch { .. } => "change_to_saved_match",
            HostRequest::IsHostHeadless => "is_host_headless",
            HostRequest::ListAvailableMatches => "list_available_matches",
            HostRequest::ClientReady => "client_ready",
        }
    }
}

/// Host answers to `HostRequest`s
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostResponse {
    /// Request applied (or ignored as a no-op)
    Ok,
    /// A player listing
    Listing(PlayerListing),
    /// A yes/no answer
    Flag(bool),
    /// Serialized match options
    Options(Bytes),
    /// Match names
    Matches(Vec<String>),
    /// The request was refused
    Error { code: ErrorCode, message: String },
}

impl HostResponse {
    /// Build an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        HostResponse::Error {
            code,
            message: message.into(),
        }
    }
}

/// Events pushed by the host, to every peer or to a single late joiner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostEvent {
    /// The listing changed
    ListingChanged(PlayerListing),
    /// The match went back to seat selection
    MatchReset,
    /// Seats are settled and the match is starting
    MatchLaunching {
        match_bytes: Bytes,
        remote_seats: BTreeMap<String, Node>,
    },
    /// Sent to one late joiner: the match is running, join it directly
    JoinInProgress {
        match_bytes: Bytes,
        remote_seats: BTreeMap<String, Node>,
    },
    /// Sent to one late joiner: joining is not possible right now
    JoinRejected { reason: String },
}

impl HostEvent {
    /// Whether this event goes to every subscriber
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            HostEvent::ListingChanged(_) | HostEvent::MatchReset | HostEvent::MatchLaunching { .. }
        )
    }
}
