//! Frame header
//!
//! Every frame starts with 8 bytes, all big-endian:
//!
//! ```text
//! +---------+------+----------------+
//! | call_id | type | payload_length |
//! |   u32   |  u8  |      u24       |
//! +---------+------+----------------+
//! ```
//!
//! Handshake messages and pushed events travel on `CallId::CONTROL`;
//! requests and their responses share the caller's id.

use bytes::{BufMut, BytesMut};

use crate::call::CallId;
use crate::error::ProtocolError;
use crate::message::MessageType;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest payload a u24 length can describe
pub const MAX_PAYLOAD_SIZE: usize = (1 << 24) - 1;

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub call_id: CallId,
    pub message_type: MessageType,
    pub payload_length: u32,
}

impl FrameHeader {
    pub fn new(call_id: CallId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            call_id,
            message_type,
            payload_length,
        }
    }

    /// Whether this frame is outside any request/response pair
    pub fn is_control(&self) -> bool {
        self.call_id == CallId::CONTROL
    }

    /// Append the 8 header bytes to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let length = self.payload_length.to_be_bytes();
        dst.reserve(HEADER_SIZE);
        dst.put_slice(&self.call_id.as_u32().to_be_bytes());
        dst.put_u8(self.message_type.as_u8());
        // the top byte of the u32 length is dropped, MAX_PAYLOAD_SIZE guards it
        dst.put_slice(&length[1..]);
    }

    /// Consume a header from the front of `src`.
    ///
    /// `Ok(None)` leaves `src` untouched until a full header has arrived. An
    /// unknown message type is rejected before any byte is consumed.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let Some(raw) = src.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        let message_type =
            MessageType::from_u8(raw[4]).ok_or(ProtocolError::UnknownMessageType(raw[4]))?;
        let call_id = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let payload_length = u32::from_be_bytes([0, raw[5], raw[6], raw[7]]);

        let _ = src.split_to(HEADER_SIZE);
        Ok(Some(Self::new(CallId::new(call_id), message_type, payload_length)))
    }
}
