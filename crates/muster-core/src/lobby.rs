//! Matchmaking lobby contract
//!
//! A host may announce its match to an external lobby service. The lobby is
//! told when peers come and go and can send moderation commands back. Only
//! this thin contract is defined here; `muster-host` ships an HTTP
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LobbyError;

/// What a moderation command does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    /// Close the target's connection
    Disconnect,
    /// Close the connection and refuse the target's address from now on
    Ban,
}

/// A moderation command issued by an authorized lobby operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationMessage {
    /// What to do
    pub action: ModerationAction,
    /// Node name or IP address of the target
    pub target_identifier: String,
}

impl ModerationMessage {
    /// Disconnect the target
    pub fn disconnect(target: impl Into<String>) -> Self {
        Self {
            action: ModerationAction::Disconnect,
            target_identifier: target.into(),
        }
    }

    /// Ban the target
    pub fn ban(target: impl Into<String>) -> Self {
        Self {
            action: ModerationAction::Ban,
            target_identifier: target.into(),
        }
    }
}

/// Commands relayed from the lobby to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyCommand {
    /// Disconnect or ban a peer
    Moderation(ModerationMessage),
    /// Shut the host down if the game id matches
    Shutdown {
        #[serde(rename = "gameId")]
        game_id: String,
    },
}

/// Lifecycle stage reported to the lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Seats are open
    WaitingForPlayers,
    /// The launcher is starting the match
    Launching,
    /// The match is running
    InProgress,
}

/// Match metadata published to the lobby
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAnnouncement {
    /// Host node name
    pub host_name: String,
    /// Port peers connect to
    pub port: u16,
    /// Loaded match, if any
    pub match_name: Option<String>,
    /// Whether a password is needed to join
    pub password_required: bool,
    /// Whether the host runs unattended
    pub headless: bool,
}

/// The lobby's answer to a registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyRegistration {
    /// Identifier the lobby assigned to this match
    pub game_id: String,
}

/// Connection from a host to a matchmaking lobby
#[async_trait]
pub trait LobbyBridge: Send + Sync {
    /// Announce the match and obtain a game id
    async fn register_match(
        &self,
        announcement: &MatchAnnouncement,
    ) -> Result<LobbyRegistration, LobbyError>;

    /// A peer connected to the host
    async fn player_joined(&self, game_id: &str, player: &str) -> Result<(), LobbyError>;

    /// A peer disconnected from the host
    async fn player_left(&self, game_id: &str, player: &str) -> Result<(), LobbyError>;

    /// The match changed lifecycle stage
    async fn update_status(&self, game_id: &str, status: MatchStatus) -> Result<(), LobbyError>;

    /// Commands queued for this host since the last poll
    async fn poll_commands(&self, game_id: &str) -> Result<Vec<LobbyCommand>, LobbyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderation_command_json() {
        let json = r#"{"type":"moderation","action":"ban","targetIdentifier":"10.1.2.3"}"#;
        let command: LobbyCommand = serde_json::from_str(json).unwrap();
        assert_eq!(command, LobbyCommand::Moderation(ModerationMessage::ban("10.1.2.3")));
    }

    #[test]
    fn test_shutdown_command_json() {
        let json = r#"{"type":"shutdown","gameId":"g-42"}"#;
        let command: LobbyCommand = serde_json::from_str(json).unwrap();
        assert_eq!(
            command,
            LobbyCommand::Shutdown {
                game_id: "g-42".to_string()
            }
        );
    }
}
