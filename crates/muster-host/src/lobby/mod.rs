//! Matchmaking lobby integration

mod http;
mod watcher;

pub use http::HttpLobbyBridge;
pub use watcher::LobbyWatcher;
