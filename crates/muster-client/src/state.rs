//! Client session state machine

use std::fmt;

/// Where a client is in the setup protocol.
///
/// ```text
/// Disconnected -> Connecting -> SeatSelection -> Launching -> InMatch
///                     |               |
///                     +--> Cancelled <+
/// ```
///
/// Any state falls back to `Disconnected` when the transport is lost. Only
/// events pushed by the host move a session out of `SeatSelection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    SeatSelection,
    Launching,
    InMatch,
    Cancelled,
}

impl ClientState {
    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: ClientState) -> bool {
        use ClientState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected | Cancelled, Connecting) => true,
            (Connecting, SeatSelection) => true,
            (Connecting | SeatSelection, Cancelled) => true,
            // a late joiner may go straight from login into a running match
            (Connecting | SeatSelection, Launching | InMatch) => true,
            (Launching, InMatch) => true,
            (Launching | InMatch, SeatSelection) => true,
            _ => false,
        }
    }

    /// Whether a host connection is expected to exist
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ClientState::SeatSelection | ClientState::Launching | ClientState::InMatch
        )
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::SeatSelection => "seat selection",
            ClientState::Launching => "launching",
            ClientState::InMatch => "in match",
            ClientState::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}
