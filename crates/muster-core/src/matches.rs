//! Match definitions and the host's match catalog
//!
//! A match definition carries only what seat coordination needs: the seats
//! with their alliances and default enablement, the round, and the editable
//! options. The turn engine's own data model stays outside this crate.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::MatchDataError;

/// One seat of a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatDefinition {
    /// Seat name, unique within the match
    pub name: String,
    /// Whether the seat starts disabled
    #[serde(default)]
    pub disabled: bool,
    /// Whether the seat may be disabled at all
    #[serde(default)]
    pub may_be_disabled: bool,
    /// Alliances the seat belongs to
    #[serde(default)]
    pub alliances: Vec<String>,
}

impl SeatDefinition {
    /// An enabled seat in the given alliances
    pub fn new(name: impl Into<String>, alliances: &[&str]) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            may_be_disabled: false,
            alliances: alliances.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// An editable match option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOption {
    /// Option name
    pub name: String,
    /// Option value as text
    pub value: String,
}

/// A loadable match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchDefinition {
    /// Match name
    pub name: String,
    /// Current round (1 for a fresh match)
    #[serde(default = "first_round")]
    pub round: u32,
    /// Seats in turn order
    pub seats: Vec<SeatDefinition>,
    /// Editable options
    #[serde(default)]
    pub options: Vec<MatchOption>,
}

fn first_round() -> u32 {
    1
}

impl MatchDefinition {
    /// A fresh match with the given seats
    pub fn new(name: impl Into<String>, seats: Vec<SeatDefinition>) -> Self {
        Self {
            name: name.into(),
            round: 1,
            seats,
            options: Vec::new(),
        }
    }

    /// Seat names as a set
    pub fn seat_names(&self) -> BTreeSet<String> {
        self.seats.iter().map(|s| s.name.clone()).collect()
    }

    /// Seats that may be disabled
    pub fn seats_that_may_be_disabled(&self) -> BTreeSet<String> {
        self.seats
            .iter()
            .filter(|s| s.may_be_disabled)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Round label shown in listings
    pub fn round_label(&self) -> String {
        self.round.to_string()
    }

    /// Serialized match state sent to launching and late-joining peers
    pub fn to_bytes(&self) -> Result<Bytes, MatchDataError> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(MatchDataError::Encode)
    }

    /// Decode serialized match state
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MatchDataError> {
        let data: Self = bincode::deserialize(bytes).map_err(MatchDataError::Decode)?;
        data.validate()?;
        Ok(data)
    }

    /// Serialized editable options
    pub fn options_bytes(&self) -> Result<Bytes, MatchDataError> {
        if self.options.is_empty() {
            return Ok(Bytes::new());
        }
        bincode::serialize(&self.options)
            .map(Bytes::from)
            .map_err(MatchDataError::Encode)
    }

    /// Apply serialized options, overwriting values of known options only
    pub fn apply_options(&mut self, bytes: &[u8]) -> Result<usize, MatchDataError> {
        let incoming: Vec<MatchOption> =
            bincode::deserialize(bytes).map_err(MatchDataError::Decode)?;
        let incoming: BTreeMap<String, String> =
            incoming.into_iter().map(|o| (o.name, o.value)).collect();

        let mut changed = 0;
        for option in &mut self.options {
            if let Some(value) = incoming.get(&option.name) {
                if *value != option.value {
                    option.value = value.clone();
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    fn validate(&self) -> Result<(), MatchDataError> {
        if self.seats.is_empty() {
            return Err(MatchDataError::Invalid(format!(
                "match {} has no seats",
                self.name
            )));
        }
        if self.seat_names().len() != self.seats.len() {
            return Err(MatchDataError::Invalid(format!(
                "match {} has duplicate seat names",
                self.name
            )));
        }
        Ok(())
    }
}

/// Matches a host can load, keyed by name
#[derive(Debug, Clone, Default)]
pub struct MatchCatalog {
    matches: BTreeMap<String, MatchDefinition>,
}

impl MatchCatalog {
    /// An empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from definitions already in memory
    pub fn from_definitions(definitions: impl IntoIterator<Item = MatchDefinition>) -> Self {
        Self {
            matches: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    /// Load every `*.toml` match definition in a directory
    pub fn load_dir(dir: &Path) -> Result<Self, MatchDataError> {
        let mut catalog = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let definition: MatchDefinition =
                toml::from_str(&content).map_err(|source| MatchDataError::Definition {
                    path: path.clone(),
                    source,
                })?;
            tracing::debug!("Loaded match {} from {:?}", definition.name, path);
            catalog.insert(definition);
        }
        tracing::info!("Match catalog has {} matches", catalog.len());
        Ok(catalog)
    }

    /// Add or replace a definition
    pub fn insert(&mut self, definition: MatchDefinition) {
        self.matches.insert(definition.name.clone(), definition);
    }

    /// Look up a match by name
    pub fn get(&self, name: &str) -> Result<MatchDefinition, MatchDataError> {
        self.matches
            .get(name)
            .cloned()
            .ok_or_else(|| MatchDataError::UnknownMatch(name.to_string()))
    }

    /// Match names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.matches.keys().cloned().collect()
    }

    /// Number of matches
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
