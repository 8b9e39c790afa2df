//! HTTP lobby client

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use muster_core::{
    LobbyBridge, LobbyCommand, LobbyError, LobbyRegistration, MatchAnnouncement, MatchStatus,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerUpdate<'a> {
    player_name: &'a str,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: MatchStatus,
}

/// `LobbyBridge` speaking JSON over HTTP
pub struct HttpLobbyBridge {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLobbyBridge {
    /// Client for the lobby at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Lobby base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn game_url(&self, game_id: &str, path: &str) -> String {
        format!("{}/games/{}/{}", self.base_url, game_id, path)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, LobbyError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| LobbyError::Http(e.to_string()))?;
        check_status(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, LobbyError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LobbyError::Http(e.to_string()))?;
        check_status(response)?
            .json()
            .await
            .map_err(|e| LobbyError::Http(e.to_string()))
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LobbyError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(LobbyError::Rejected(format!(
            "{} returned status {}",
            response.url(),
            response.status()
        )))
    }
}

#[async_trait]
impl LobbyBridge for HttpLobbyBridge {
    async fn register_match(
        &self,
        announcement: &MatchAnnouncement,
    ) -> Result<LobbyRegistration, LobbyError> {
        let url = format!("{}/game-hosting", self.base_url);
        self.post(&url, announcement)
            .await?
            .json()
            .await
            .map_err(|e| LobbyError::Http(e.to_string()))
    }

    async fn player_joined(&self, game_id: &str, player: &str) -> Result<(), LobbyError> {
        let url = self.game_url(game_id, "players/joined");
        self.post(&url, &PlayerUpdate { player_name: player }).await?;
        Ok(())
    }

    async fn player_left(&self, game_id: &str, player: &str) -> Result<(), LobbyError> {
        let url = self.game_url(game_id, "players/left");
        self.post(&url, &PlayerUpdate { player_name: player }).await?;
        Ok(())
    }

    async fn update_status(&self, game_id: &str, status: MatchStatus) -> Result<(), LobbyError> {
        let url = self.game_url(game_id, "status");
        self.post(&url, &StatusUpdate { status }).await?;
        Ok(())
    }

    async fn poll_commands(&self, game_id: &str) -> Result<Vec<LobbyCommand>, LobbyError> {
        self.get_json(&self.game_url(game_id, "commands")).await
    }
}
