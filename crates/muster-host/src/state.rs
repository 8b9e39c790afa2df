//! Authoritative seat state of a host
//!
//! `HostState` holds every per-seat map together so one critical section
//! covers each operation. It does no locking and no I/O itself; the
//! `HostCoordinator` wraps it in a mutex and publishes a fresh
//! `PlayerListing` after every mutation.

use std::collections::{BTreeMap, BTreeSet};

use muster_core::{MatchDefinition, SeatingError};
use muster_protocol::{LocalPlayerType, PlayerListing, SeatAlliances};

/// Seat assignment, enablement and alliance state of the loaded match
#[derive(Debug, Clone)]
pub struct HostState {
    host_name: String,
    minimize_remote_ai: bool,
    default_local_type: LocalPlayerType,
    match_data: Option<MatchDefinition>,
    seat_owners: BTreeMap<String, Option<String>>,
    seats_enabled: BTreeMap<String, bool>,
    local_types: BTreeMap<String, LocalPlayerType>,
    seats_allowed_to_be_disabled: BTreeSet<String>,
    alliances_in_turn_order: Vec<SeatAlliances>,
    persist_seating: bool,
}

impl HostState {
    /// Empty state for the host node `host_name`
    pub fn new(
        host_name: impl Into<String>,
        minimize_remote_ai: bool,
        default_local_type: LocalPlayerType,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            minimize_remote_ai,
            default_local_type,
            match_data: None,
            seat_owners: BTreeMap::new(),
            seats_enabled: BTreeMap::new(),
            local_types: BTreeMap::new(),
            seats_allowed_to_be_disabled: BTreeSet::new(),
            alliances_in_turn_order: Vec::new(),
            persist_seating: false,
        }
    }

    /// Name of the host's own node
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Loaded match, if any
    pub fn match_data(&self) -> Option<&MatchDefinition> {
        self.match_data.as_ref()
    }

    /// Mutable access to the loaded match, for option edits
    pub fn match_data_mut(&mut self) -> Option<&mut MatchDefinition> {
        self.match_data.as_mut()
    }

    /// Recompute seats from newly loaded match data.
    ///
    /// When seating was marked persistent the previous owner and enabled
    /// maps are carried over, which requires the new match to have exactly
    /// the same seat names. The flag is consumed whether or not that holds;
    /// on a mismatch the state is left untouched.
    pub fn load_match(&mut self, data: MatchDefinition) -> Result<(), SeatingError> {
        if std::mem::take(&mut self.persist_seating) {
            let found = data.seat_names();
            let expected: BTreeSet<String> = self.seat_owners.keys().cloned().collect();
            if found != expected {
                return Err(SeatingError::SeatSetMismatch { expected, found });
            }
            self.seats_allowed_to_be_disabled = data.seats_that_may_be_disabled();
            self.alliances_in_turn_order = alliances_of(&data);
            self.match_data = Some(data);
            return Ok(());
        }

        self.seat_owners.clear();
        self.seats_enabled.clear();
        self.local_types.clear();
        self.seats_allowed_to_be_disabled = data.seats_that_may_be_disabled();
        self.alliances_in_turn_order = alliances_of(&data);

        for seat in &data.seats {
            let owner = if !self.minimize_remote_ai {
                Some(self.host_name.clone())
            } else if seat.disabled {
                self.local_types
                    .insert(seat.name.clone(), LocalPlayerType::WeakAi);
                Some(self.host_name.clone())
            } else {
                // keep the host from playing expensive AI turns
                None
            };
            self.seat_owners.insert(seat.name.clone(), owner);
            self.seats_enabled.insert(seat.name.clone(), !seat.disabled);
        }

        self.match_data = Some(data);
        Ok(())
    }

    /// Forget the loaded match
    pub fn clear_match(&mut self) {
        self.match_data = None;
        self.seat_owners.clear();
        self.seats_enabled.clear();
        self.local_types.clear();
        self.seats_allowed_to_be_disabled.clear();
        self.alliances_in_turn_order.clear();
    }

    /// Assign `seat` to `node_name`. Returns false for an unknown seat.
    pub fn take_seat(&mut self, node_name: &str, seat: &str) -> bool {
        match self.seat_owners.get_mut(seat) {
            Some(owner) => {
                *owner = Some(node_name.to_string());
                true
            }
            None => false,
        }
    }

    /// Clear the owner of `seat`. Returns false for an unknown seat.
    pub fn release_seat(&mut self, seat: &str) -> bool {
        match self.seat_owners.get_mut(seat) {
            Some(owner) => {
                *owner = None;
                true
            }
            None => false,
        }
    }

    /// Enable or disable a seat.
    ///
    /// The host reclaims the seat first. In minimize-remote-AI mode an
    /// enabled seat is then opened for a human and a disabled one is played
    /// by the weak AI.
    pub fn set_seat_enabled(&mut self, seat: &str, enabled: bool) -> bool {
        let host_name = self.host_name.clone();
        if !self.take_seat(&host_name, seat) {
            return false;
        }
        let Some(flag) = self.seats_enabled.get_mut(seat) else {
            return true;
        };
        *flag = enabled;

        if self.minimize_remote_ai {
            if enabled {
                self.release_seat(seat);
            } else {
                self.local_types
                    .insert(seat.to_string(), LocalPlayerType::WeakAi);
            }
        }
        true
    }

    /// Override how the host plays `seat`
    pub fn set_local_player_type(&mut self, seat: &str, player_type: LocalPlayerType) -> bool {
        if !self.seat_owners.contains_key(seat) {
            return false;
        }
        self.local_types.insert(seat.to_string(), player_type);
        true
    }

    /// Keep the current seating across the next match-data reload
    pub fn persist_seating(&mut self) {
        self.persist_seating = true;
    }

    /// Whether the next reload keeps the current seating
    pub fn is_seating_persisted(&self) -> bool {
        self.persist_seating
    }

    /// Unassign every seat
    pub fn release_all_seats(&mut self) {
        self.seat_owners.values_mut().for_each(|owner| *owner = None);
    }

    /// Free seats whose owner is neither the host nor still connected.
    ///
    /// Returns the seats that were freed.
    pub fn release_departed(&mut self, is_connected: impl Fn(&str) -> bool) -> Vec<String> {
        let host = self.host_name.as_str();
        let mut freed = Vec::new();
        for (seat, owner) in self.seat_owners.iter_mut() {
            let gone = matches!(owner.as_deref(), Some(name) if name != host && !is_connected(name));
            if gone {
                *owner = None;
                freed.push(seat.clone());
            }
        }
        freed
    }

    /// Seats owned by `node_name`
    pub fn seats_owned_by(&self, node_name: &str) -> Vec<String> {
        self.seat_owners
            .iter()
            .filter(|(_, owner)| owner.as_deref() == Some(node_name))
            .map(|(seat, _)| seat.clone())
            .collect()
    }

    /// Seat name to owner
    pub fn seat_owners(&self) -> &BTreeMap<String, Option<String>> {
        &self.seat_owners
    }

    /// Player types of the seats the host plays, defaults filled in
    pub fn local_player_types(&self) -> BTreeMap<String, LocalPlayerType> {
        if self.match_data.is_none() {
            return BTreeMap::new();
        }
        self.seat_owners
            .iter()
            .filter(|(_, owner)| owner.as_deref() == Some(self.host_name.as_str()))
            .map(|(seat, _)| {
                let player_type = self
                    .local_types
                    .get(seat)
                    .copied()
                    .unwrap_or(self.default_local_type);
                (seat.clone(), player_type)
            })
            .collect()
    }

    /// Fresh snapshot of the current state
    pub fn listing(&self) -> PlayerListing {
        PlayerListing::new(
            self.seat_owners.clone(),
            self.seats_enabled.clone(),
            self.local_player_types(),
            self.match_data.as_ref().map(|m| m.name.clone()),
            self.match_data.as_ref().map(MatchDefinition::round_label),
            self.seats_allowed_to_be_disabled.clone(),
            self.alliances_in_turn_order.clone(),
        )
    }
}

fn alliances_of(data: &MatchDefinition) -> Vec<SeatAlliances> {
    data.seats
        .iter()
        .map(|seat| SeatAlliances::new(seat.name.clone(), seat.alliances.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::SeatDefinition;

    fn two_seats() -> MatchDefinition {
        MatchDefinition::new(
            "Classic",
            vec![
                SeatDefinition::new("Germany", &["Axis"]),
                SeatDefinition::new("Russia", &["Allies"]),
            ],
        )
    }

    fn loaded(minimize: bool) -> HostState {
        let mut state = HostState::new("Hans", minimize, LocalPlayerType::Human);
        state.load_match(two_seats()).unwrap();
        state
    }

    #[test]
    fn test_load_assigns_host() {
        let state = loaded(false);
        let listing = state.listing();

        assert_eq!(listing.owner_of("Germany"), Some("Hans"));
        assert_eq!(listing.owner_of("Russia"), Some("Hans"));
        assert_eq!(listing.match_name(), Some("Classic"));
        assert_eq!(listing.match_round(), Some("1"));
        assert_eq!(
            listing.seats_in_turn_order().collect::<Vec<_>>(),
            vec!["Germany", "Russia"]
        );
        assert_eq!(
            listing.local_player_types().get("Germany"),
            Some(&LocalPlayerType::Human)
        );
    }

    #[test]
    fn test_release_departed_keeps_host_and_connected() {
        let mut state = loaded(true);
        state.take_seat("Carl", "Germany");
        state.take_seat("Olga", "Russia");

        let freed = state.release_departed(|name| name == "Olga");
        assert_eq!(freed, vec!["Germany".to_string()]);
        assert_eq!(state.seat_owners()["Germany"], None);
        assert_eq!(state.seat_owners()["Russia"].as_deref(), Some("Olga"));

        state.take_seat("Hans", "Germany");
        assert_eq!(state.release_departed(|_| false), vec!["Russia".to_string()]);
        assert_eq!(state.seat_owners()["Germany"].as_deref(), Some("Hans"));
    }

    #[test]
    fn test_load_minimize_remote_ai() {
        let mut data = two_seats();
        data.seats[1].disabled = true;

        let mut state = HostState::new("Hans", true, LocalPlayerType::Human);
        state.load_match(data).unwrap();
        let listing = state.listing();

        assert_eq!(listing.owner_of("Germany"), None);
        assert!(listing.is_enabled("Germany"));
        assert_eq!(listing.owner_of("Russia"), Some("Hans"));
        assert!(!listing.is_enabled("Russia"));
        assert_eq!(
            listing.local_player_types().get("Russia"),
            Some(&LocalPlayerType::WeakAi)
        );
    }

    #[test]
    fn test_take_then_release_round_trip() {
        let mut state = loaded(true);
        let before = state.listing();

        assert!(state.take_seat("Carl", "Germany"));
        assert_eq!(state.listing().owner_of("Germany"), Some("Carl"));
        assert!(state.release_seat("Germany"));

        assert_eq!(state.listing(), before);
    }

    #[test]
    fn test_unknown_seat_is_noop() {
        let mut state = loaded(false);
        let before = state.listing();

        assert!(!state.take_seat("Carl", "Atlantis"));
        assert!(!state.release_seat("Atlantis"));
        assert!(!state.set_seat_enabled("Atlantis", false));
        assert!(!state.set_local_player_type("Atlantis", LocalPlayerType::HardAi));

        assert_eq!(state.listing(), before);
    }

    #[test]
    fn test_disable_then_enable_in_minimize_mode() {
        let mut state = loaded(true);
        state.take_seat("X", "Germany");

        state.set_seat_enabled("Germany", false);
        let listing = state.listing();
        assert_eq!(listing.owner_of("Germany"), Some("Hans"));
        assert!(!listing.is_enabled("Germany"));
        assert_eq!(
            listing.local_player_types().get("Germany"),
            Some(&LocalPlayerType::WeakAi)
        );

        state.set_seat_enabled("Germany", true);
        let listing = state.listing();
        assert_eq!(listing.owner_of("Germany"), None);
        assert!(listing.is_enabled("Germany"));
    }

    #[test]
    fn test_disable_without_minimize_keeps_host() {
        let mut state = loaded(false);
        state.take_seat("X", "Russia");

        state.set_seat_enabled("Russia", false);
        state.set_seat_enabled("Russia", true);

        let listing = state.listing();
        assert_eq!(listing.owner_of("Russia"), Some("Hans"));
        assert!(listing.is_enabled("Russia"));
    }

    #[test]
    fn test_persisted_seating_survives_reload() {
        let mut state = loaded(false);
        state.take_seat("Carl", "Germany");
        state.set_seat_enabled("Russia", false);
        let before = state.listing();

        state.persist_seating();
        let mut next_round = two_seats();
        next_round.round = 4;
        state.load_match(next_round).unwrap();

        let after = state.listing();
        assert_eq!(after.seat_owners(), before.seat_owners());
        assert_eq!(after.seats_enabled(), before.seats_enabled());
        assert_eq!(after.match_round(), Some("4"));
        assert!(!state.is_seating_persisted());
    }

    #[test]
    fn test_persisted_seating_mismatch() {
        let mut state = loaded(false);
        state.persist_seating();

        let other = MatchDefinition::new("Pacific", vec![SeatDefinition::new("Japan", &[])]);
        let err = state.load_match(other).unwrap_err();

        assert_eq!(
            err,
            SeatingError::SeatSetMismatch {
                expected: ["Germany", "Russia"].iter().map(|s| s.to_string()).collect(),
                found: ["Japan"].iter().map(|s| s.to_string()).collect(),
            }
        );
        assert_eq!(state.listing().match_name(), Some("Classic"));
        assert!(!state.is_seating_persisted());
    }

    #[test]
    fn test_release_all_and_seats_owned_by() {
        let mut state = loaded(false);
        state.take_seat("Carl", "Germany");
        assert_eq!(state.seats_owned_by("Carl"), vec!["Germany".to_string()]);

        state.release_all_seats();
        assert!(state.seat_owners().values().all(Option::is_none));
        assert!(state.listing().local_player_types().is_empty());
    }
}
