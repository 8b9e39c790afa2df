//! Locally selected match data
//!
//! A node browsing matches has one selected locally. Joining a host makes
//! that selection irrelevant, but a failed or cancelled join must give it
//! back untouched, so `hold_aside` parks it instead of discarding it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use muster_core::MatchDefinition;

#[derive(Debug, Default)]
struct Slots {
    current: Option<MatchDefinition>,
    held: Option<MatchDefinition>,
    holding: bool,
}

/// The node's own match selection, with a parking slot
#[derive(Debug, Default)]
pub struct MatchSelection {
    slots: Mutex<Slots>,
}

impl MatchSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently selected match
    pub fn current(&self) -> Option<MatchDefinition> {
        self.slots().current.clone()
    }

    /// Replace the selection
    pub fn select(&self, data: Option<MatchDefinition>) {
        self.slots().current = data;
    }

    /// Park the selection. A second call while parked keeps the first.
    pub fn hold_aside(&self) {
        let mut slots = self.slots();
        if slots.holding {
            return;
        }
        slots.held = slots.current.take();
        slots.holding = true;
    }

    /// Put the parked selection back, exactly as it was
    pub fn restore(&self) {
        let mut slots = self.slots();
        if !slots.holding {
            return;
        }
        slots.current = slots.held.take();
        slots.holding = false;
    }

    /// Whether a selection is parked
    pub fn is_held(&self) -> bool {
        self.slots().holding
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
