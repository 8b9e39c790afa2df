//! Client configuration

use muster_protocol::LocalPlayerType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Configuration for a joining node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name announced to the host
    pub node_name: String,

    /// Connection and login timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How long a request waits for the host's answer
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// How this node plays the seats it takes
    pub player_type: LocalPlayerType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_name: whoami::username(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            player_type: LocalPlayerType::Human,
        }
    }
}
