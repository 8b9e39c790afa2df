//! Polls the lobby for commands addressed to this host

use std::sync::Arc;
use std::time::Duration;

use muster_core::{LobbyBridge, LobbyCommand};

use crate::coordinator::HostCoordinator;

/// Background task relaying lobby commands to the coordinator
pub struct LobbyWatcher {
    lobby: Arc<dyn LobbyBridge>,
    game_id: String,
    interval: Duration,
}

impl LobbyWatcher {
    pub fn new(lobby: Arc<dyn LobbyBridge>, game_id: String, interval: Duration) -> Self {
        Self {
            lobby,
            game_id,
            interval,
        }
    }

    /// Poll until the host shuts down
    pub async fn run(self, coordinator: Arc<HostCoordinator>) {
        let shutdown = coordinator.shutdown_token();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!("Watching lobby for game {}", self.game_id);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let commands = match self.lobby.poll_commands(&self.game_id).await {
                Ok(commands) => commands,
                Err(e) => {
                    tracing::warn!("Lobby poll failed: {}", e);
                    continue;
                }
            };
            for command in commands {
                self.apply(&coordinator, command);
            }
        }
        tracing::debug!("Lobby watcher stopped");
    }

    fn apply(&self, coordinator: &HostCoordinator, command: LobbyCommand) {
        match command {
            LobbyCommand::Moderation(message) => {
                tracing::info!(
                    "Lobby moderation: {:?} {}",
                    message.action,
                    message.target_identifier
                );
                coordinator.apply_moderation(&message);
            }
            LobbyCommand::Shutdown { game_id } if game_id == self.game_id => {
                tracing::info!("Lobby requested shutdown of game {}", game_id);
                coordinator.shutdown();
            }
            LobbyCommand::Shutdown { game_id } => {
                tracing::debug!("Ignoring shutdown for other game {}", game_id);
            }
        }
    }
}
