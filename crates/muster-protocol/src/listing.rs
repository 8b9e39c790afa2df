//! Player listing snapshot
//!
//! A `PlayerListing` is the immutable picture of seat assignment that the host
//! publishes after every mutation. Peers never edit a listing; they replace
//! their cached copy with the next one the host broadcasts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// How a seat owned by the host's own node is played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalPlayerType {
    /// A person at the host's keyboard
    Human,
    /// Cheap fallback AI
    WeakAi,
    /// Faster, slightly stronger AI
    FastAi,
    /// Expensive AI
    HardAi,
    /// Passive seat that ends every turn immediately
    DoesNothing,
}

impl LocalPlayerType {
    /// Stable lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalPlayerType::Human => "human",
            LocalPlayerType::WeakAi => "weak_ai",
            LocalPlayerType::FastAi => "fast_ai",
            LocalPlayerType::HardAi => "hard_ai",
            LocalPlayerType::DoesNothing => "does_nothing",
        }
    }

    /// Whether a machine plays this seat
    pub fn is_ai(&self) -> bool {
        !matches!(self, LocalPlayerType::Human)
    }
}

impl fmt::Display for LocalPlayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalPlayerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "human" => Ok(LocalPlayerType::Human),
            "weak_ai" | "weak" => Ok(LocalPlayerType::WeakAi),
            "fast_ai" | "fast" => Ok(LocalPlayerType::FastAi),
            "hard_ai" | "hard" => Ok(LocalPlayerType::HardAi),
            "does_nothing" => Ok(LocalPlayerType::DoesNothing),
            other => Err(format!("unknown player type: {}", other)),
        }
    }
}

/// A seat together with the alliances it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAlliances {
    /// Seat name
    pub seat: String,
    /// Alliance groups, in declaration order
    pub alliances: Vec<String>,
}

impl SeatAlliances {
    /// Create a new seat/alliance entry
    pub fn new(seat: impl Into<String>, alliances: Vec<String>) -> Self {
        Self {
            seat: seat.into(),
            alliances,
        }
    }
}

/// Immutable snapshot of seat assignment, enablement and alliance state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerListing {
    seat_owners: BTreeMap<String, Option<String>>,
    seats_enabled: BTreeMap<String, bool>,
    local_player_types: BTreeMap<String, LocalPlayerType>,
    match_name: Option<String>,
    match_round: Option<String>,
    seats_allowed_to_be_disabled: BTreeSet<String>,
    alliances_in_turn_order: Vec<SeatAlliances>,
}

impl PlayerListing {
    /// Assemble a listing.
    ///
    /// `alliances_in_turn_order` is authoritative for turn order; the other
    /// collections are keyed by seat name.
    pub fn new(
        seat_owners: BTreeMap<String, Option<String>>,
        seats_enabled: BTreeMap<String, bool>,
        local_player_types: BTreeMap<String, LocalPlayerType>,
        match_name: Option<String>,
        match_round: Option<String>,
        seats_allowed_to_be_disabled: BTreeSet<String>,
        alliances_in_turn_order: Vec<SeatAlliances>,
    ) -> Self {
        Self {
            seat_owners,
            seats_enabled,
            local_player_types,
            match_name,
            match_round,
            seats_allowed_to_be_disabled,
            alliances_in_turn_order,
        }
    }

    /// Seat name to owning node name (`None` = unassigned)
    pub fn seat_owners(&self) -> &BTreeMap<String, Option<String>> {
        &self.seat_owners
    }

    /// Owner of a seat, if the seat exists and is claimed
    pub fn owner_of(&self, seat: &str) -> Option<&str> {
        self.seat_owners.get(seat).and_then(|o| o.as_deref())
    }

    /// Whether the listing knows this seat
    pub fn has_seat(&self, seat: &str) -> bool {
        self.seat_owners.contains_key(seat)
    }

    /// Seat name to enabled flag
    pub fn seats_enabled(&self) -> &BTreeMap<String, bool> {
        &self.seats_enabled
    }

    /// Enabled flag of a seat (`false` for unknown seats)
    pub fn is_enabled(&self, seat: &str) -> bool {
        self.seats_enabled.get(seat).copied().unwrap_or(false)
    }

    /// Player types of the seats the host plays locally
    pub fn local_player_types(&self) -> &BTreeMap<String, LocalPlayerType> {
        &self.local_player_types
    }

    /// Name of the loaded match
    pub fn match_name(&self) -> Option<&str> {
        self.match_name.as_deref()
    }

    /// Round label of the loaded match
    pub fn match_round(&self) -> Option<&str> {
        self.match_round.as_deref()
    }

    /// Seats the match permits to be disabled
    pub fn seats_allowed_to_be_disabled(&self) -> &BTreeSet<String> {
        &self.seats_allowed_to_be_disabled
    }

    /// Seats with their alliances, in turn order
    pub fn alliances_in_turn_order(&self) -> &[SeatAlliances] {
        &self.alliances_in_turn_order
    }

    /// Seat names in turn order
    pub fn seats_in_turn_order(&self) -> impl Iterator<Item = &str> {
        self.alliances_in_turn_order.iter().map(|s| s.seat.as_str())
    }

    /// Seats currently owned by the named node
    pub fn seats_owned_by(&self, node_name: &str) -> Vec<&str> {
        self.seat_owners
            .iter()
            .filter(|(_, owner)| owner.as_deref() == Some(node_name))
            .map(|(seat, _)| seat.as_str())
            .collect()
    }

    /// True when the listing has seats and every one of them is claimed
    pub fn all_seats_claimed(&self) -> bool {
        !self.seat_owners.is_empty() && self.seat_owners.values().all(Option::is_some)
    }
}
