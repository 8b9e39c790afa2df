//! Protocol error types

use thiserror::Error;

/// Errors on a framed connection
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("Frame payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    /// Header announced one message type but the payload decoded as another
    #[error("Message type mismatch: header says {header:#04x}, payload is {payload:#04x}")]
    TypeMismatch { header: u8, payload: u8 },

    /// Peer broke the login sequence
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Peer closed the connection
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Malformed payload: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
