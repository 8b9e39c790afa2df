//! Message types for the muster protocol
//!
//! This module defines the high-level messages exchanged between a host and
//! its peers. Messages are serialized into frames using the codec defined in
//! `codec.rs`.
//!
//! # Message Flow
//!
//! 1. Peer connects and sends `Hello` with its requested name
//! 2. Host answers `Challenge` with a nonce (or `Welcome{accepted: false}` for a banned address)
//! 3. Peer answers `ChallengeResponse`, digesting the password when one is required
//! 4. Host answers `Welcome` carrying the node it admitted the peer as
//! 5. Peer sends `Request`s on fresh call ids; host answers each with a `Response`
//! 6. Host pushes `Event`s on the control id at any time after `Welcome`

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::rpc::{HostEvent, HostRequest, HostResponse};

/// Current protocol version string, sent in `Hello`.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Peer introduction
    Hello = 0x01,
    /// Login challenge
    Challenge = 0x02,
    /// Answer to the login challenge
    ChallengeResponse = 0x03,
    /// Login verdict
    Welcome = 0x04,
    /// RPC request (peer → host)
    Request = 0x10,
    /// RPC response (host → peer)
    Response = 0x11,
    /// Pushed event (host → peer)
    Event = 0x20,
    /// Error response
    Error = 0xFF,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Challenge),
            0x03 => Some(Self::ChallengeResponse),
            0x04 => Some(Self::Welcome),
            0x10 => Some(Self::Request),
            0x11 => Some(Self::Response),
            0x20 => Some(Self::Event),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Error codes for error messages and refused requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unknown error
    Unknown = 0,
    /// Login failed
    AuthenticationFailed = 1,
    /// Message not valid at this point of the conversation
    InvalidMessage = 2,
    /// Operation only available on a headless host
    NotPermitted = 3,
    /// Named match is not in the catalog
    UnknownMatch = 4,
    /// Match data could not be decoded or applied
    BadMatchData = 5,
    /// Peer address is banned
    Banned = 6,
    /// Host is shutting down
    ShuttingDown = 7,
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Peer introduction
    Hello {
        /// Requested display name (the host may make it unique)
        name: String,
        /// Protocol version, `PROTOCOL_VERSION` when sent by this crate
        version: Option<String>,
    },

    /// Login challenge
    Challenge {
        /// Random bytes the password digest is computed over
        nonce: Vec<u8>,
        /// Whether the host expects a password digest
        password_required: bool,
    },

    /// Answer to the login challenge
    ChallengeResponse {
        /// Hex digest of nonce and password, `None` when no password is sent
        digest: Option<String>,
    },

    /// Login verdict
    Welcome {
        /// Whether the peer was admitted
        accepted: bool,
        /// The node the host admitted the peer as
        node: Option<Node>,
        /// Reason if not accepted
        reason: Option<String>,
    },

    /// RPC request
    Request(HostRequest),

    /// RPC response
    Response(HostResponse),

    /// Pushed event
    Event(HostEvent),

    /// Error response
    Error {
        /// Error code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello { .. } => MessageType::Hello,
            Message::Challenge { .. } => MessageType::Challenge,
            Message::ChallengeResponse { .. } => MessageType::ChallengeResponse,
            Message::Welcome { .. } => MessageType::Welcome,
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::Event(_) => MessageType::Event,
            Message::Error { .. } => MessageType::Error,
        }
    }
}
