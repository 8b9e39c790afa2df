//! Tokio codec for framed protocol messages

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::call::CallId;
use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::Message;

/// A complete frame with header and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Call this frame belongs to
    pub call_id: CallId,
    /// The message payload
    pub message: Message,
}

impl Frame {
    /// Create a new frame
    pub fn new(call_id: CallId, message: Message) -> Self {
        Self { call_id, message }
    }

    /// Create a frame on the control id
    pub fn control(message: Message) -> Self {
        Self::new(CallId::CONTROL, message)
    }
}

/// Length-prefixed bincode frames over a byte stream
#[derive(Debug)]
pub struct FrameCodec {
    /// Header whose payload has not fully arrived yet
    awaiting: Option<FrameHeader>,
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_SIZE)
    }

    /// Refuse payloads above `max` bytes (capped at `MAX_PAYLOAD_SIZE`)
    pub fn with_max_payload(max: usize) -> Self {
        Self {
            awaiting: None,
            max_payload: max.min(MAX_PAYLOAD_SIZE),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: self.max_payload,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let header = match self.awaiting.take() {
            Some(header) => header,
            None => {
                let Some(header) = FrameHeader::decode(src)? else {
                    return Ok(None);
                };
                self.check_size(header.payload_length as usize)?;
                header
            }
        };

        let needed = header.payload_length as usize;
        if src.len() < needed {
            src.reserve(needed - src.len());
            self.awaiting = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(needed);
        let message: Message = bincode::deserialize(&payload)?;
        if message.message_type() != header.message_type {
            return Err(ProtocolError::TypeMismatch {
                header: header.message_type.as_u8(),
                payload: message.message_type().as_u8(),
            });
        }

        Ok(Some(Frame::new(header.call_id, message)))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload = bincode::serialize(&frame.message)?;
        self.check_size(payload.len())?;

        FrameHeader::new(frame.call_id, frame.message.message_type(), payload.len() as u32)
            .encode(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
