use crate::error::{Error, InvalidMessage};
use crate::msgs::codec::Codec;
use crate::msgs::handshake::HandshakeMessagePayload;
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::enums::ProtocolVersion;

const HEADER_SIZE: usize = 1 + 3;

/// This works to reconstruct TLS handshake messages
/// from individual records.  It's guaranteed that the
/// underlying byte stream frames messages contiguously,
/// but records may carry several messages or fractions
/// of one.
#[derive(Default)]
pub struct HandshakeJoiner {
    /// Unprocessed bytes.
    buf: Vec<u8>,
}

impl HandshakeJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether received handshake bytes await processing, partial or
    /// complete.
    ///
    /// Other traffic must not interleave with a fractured message, and no
    /// buffered bytes may survive a key change.
    pub fn is_mid_message(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Take the contents of a handshake record.
    pub fn take_record(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.is_empty() {
            return Err(InvalidMessage::InvalidEmptyPayload.into());
        }
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    /// Pop the next complete handshake message, if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>, Error> {
        if self.buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let body_len =
            u32::from_be_bytes([0, self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if body_len > 0xff_ffff {
            return Err(InvalidMessage::HandshakePayloadTooLarge.into());
        }
        if self.buf.len() < HEADER_SIZE + body_len {
            return Ok(None);
        }

        let encoded: Vec<u8> = self
            .buf
            .drain(..HEADER_SIZE + body_len)
            .collect();
        let parsed = HandshakeMessagePayload::read_bytes(&encoded)?;

        Ok(Some(Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::Handshake { parsed, encoded },
        }))
    }
}
