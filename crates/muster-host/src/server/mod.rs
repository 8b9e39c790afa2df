//! TCP peer server

mod handler;
mod listener;
mod registry;

pub use handler::{dispatch, HANDSHAKE_TIMEOUT};
pub use listener::PeerServer;
pub use registry::{unique_name, PeerCommand, PeerHandle, PeerRegistry, MAX_NAME_LEN};
