//! muster-protocol: Wire protocol for muster seat coordination
//!
//! This crate defines the binary protocol spoken between a match host and
//! the peers that connect to it during the setup phase, along with the value
//! types (nodes, player listings) that travel over it.

pub mod call;
pub mod codec;
pub mod error;
pub mod frame;
pub mod listing;
pub mod message;
pub mod node;
pub mod rpc;

pub use call::CallId;
pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use listing::{LocalPlayerType, PlayerListing, SeatAlliances};
pub use message::{ErrorCode, Message, MessageType, PROTOCOL_VERSION};
pub use node::Node;
pub use rpc::{HostEvent, HostRequest, HostResponse};
