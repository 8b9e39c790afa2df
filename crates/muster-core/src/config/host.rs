//! Host configuration

use muster_protocol::LocalPlayerType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::DEFAULT_PORT;
use crate::error::ConfigError;

/// Configuration for a hosting node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Name of the host's own node
    pub node_name: String,

    /// Address to bind the peer listener to
    pub bind_address: String,

    /// Port peers connect to
    pub port: u16,

    /// Password peers must prove knowledge of, if any
    pub password: Option<String>,

    /// Run unattended (a bot host that remote players steer)
    pub headless: bool,

    /// Leave enabled seats open for humans instead of giving them to the host
    pub minimize_remote_ai: bool,

    /// How seats kept by the host are played unless overridden
    pub default_local_type: LocalPlayerType,

    /// Directory holding `*.toml` match definitions
    pub matches_dir: Option<PathBuf>,

    /// Match loaded at startup
    pub initial_match: Option<String>,

    /// Longest a disconnect waits while a launcher is being built
    #[serde(with = "duration_secs")]
    pub removal_gate_timeout: Duration,

    /// How long a launch waits for every remote node to report ready
    #[serde(with = "duration_secs")]
    pub launch_ready_timeout: Duration,

    /// How often a headless host checks whether it can start
    #[serde(with = "duration_secs")]
    pub autostart_interval: Duration,

    /// Capacity of the host event channel
    pub event_capacity: usize,

    /// Matchmaking lobby to announce the match to
    pub lobby_uri: Option<String>,

    /// How often lobby commands are polled
    #[serde(with = "duration_secs")]
    pub lobby_poll_interval: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            node_name: whoami::username(),
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            password: None,
            headless: false,
            minimize_remote_ai: false,
            default_local_type: LocalPlayerType::Human,
            matches_dir: None,
            initial_match: None,
            removal_gate_timeout: Duration::from_secs(6),
            launch_ready_timeout: Duration::from_secs(60),
            autostart_interval: Duration::from_secs(8),
            event_capacity: 256,
            lobby_uri: None,
            lobby_poll_interval: Duration::from_secs(10),
        }
    }
}

impl HostConfig {
    /// A headless host leaves enabled seats to remote players and plays
    /// the rest as AI
    pub fn headless() -> Self {
        Self {
            headless: true,
            minimize_remote_ai: true,
            default_local_type: LocalPlayerType::WeakAi,
            ..Self::default()
        }
    }

    /// Whether enabled seats start open for remote players.
    ///
    /// Always true on a headless host, whatever `minimize_remote_ai` says.
    pub fn leaves_seats_open(&self) -> bool {
        self.headless || self.minimize_remote_ai
    }

    /// Socket address string the listener binds
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_name.trim().is_empty() {
            return Err(ConfigError::MissingField("node_name".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
