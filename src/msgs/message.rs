use crate::error::InvalidMessage;
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::base::Payload;
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{AlertDescription, AlertLevel, ContentType, HandshakeType, ProtocolVersion};
use crate::msgs::handshake::{HandshakeMessagePayload, HandshakePayload};

#[derive(Clone, Debug)]
pub struct ChangeCipherSpecPayload;

impl Codec for ChangeCipherSpecPayload {
    fn encode(&self, bytes: &mut Vec<u8>) {
        1u8.encode(bytes);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        let typ = u8::read(r)?;
        if typ != 1 || r.any_left() {
            return Err(InvalidMessage::InvalidCcs);
        }
        Ok(Self)
    }
}

#[derive(Clone, Debug)]
pub enum MessagePayload {
    Alert(AlertMessagePayload),
    Handshake {
        parsed: HandshakeMessagePayload,
        encoded: Vec<u8>,
    },
    ChangeCipherSpec(ChangeCipherSpecPayload),
    ApplicationData(Payload),
}

impl MessagePayload {
    pub fn handshake(parsed: HandshakeMessagePayload) -> Self {
        let encoded = parsed.get_encoding();
        Self::Handshake { parsed, encoded }
    }

    pub fn encode(&self, bytes: &mut Vec<u8>) {
        match self {
            Self::Alert(x) => x.encode(bytes),
            Self::Handshake { encoded, .. } => bytes.extend_from_slice(encoded),
            Self::ChangeCipherSpec(x) => x.encode(bytes),
            Self::ApplicationData(x) => x.encode(bytes),
        }
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            Self::Alert(_) => ContentType::Alert,
            Self::Handshake { .. } => ContentType::Handshake,
            Self::ChangeCipherSpec(_) => ContentType::ChangeCipherSpec,
            Self::ApplicationData(_) => ContentType::ApplicationData,
        }
    }
}

/// A decrypted, decoded TLS message.
#[derive(Clone, Debug)]
pub struct Message {
    pub version: ProtocolVersion,
    pub payload: MessagePayload,
}

impl Message {
    pub fn build_alert(level: AlertLevel, description: AlertDescription) -> Self {
        Self {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::Alert(AlertMessagePayload { level, description }),
        }
    }

    pub fn build_key_update_notify() -> Self {
        Self {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::KeyUpdate,
                payload: HandshakePayload::KeyUpdate(
                    crate::msgs::enums::KeyUpdateRequest::UpdateNotRequested,
                ),
            }),
        }
    }

    pub fn is_content_type(&self, typ: ContentType) -> bool {
        self.payload.content_type() == typ
    }

    pub fn is_handshake_type(&self, typ: HandshakeType) -> bool {
        match &self.payload {
            MessagePayload::Handshake { parsed, .. } => parsed.typ == typ,
            _ => false,
        }
    }
}

/// A TLS frame, named TLSPlaintext in the standard.
///
/// This is the unit the record layer consumes and produces; its payload is
/// not decoded into a message yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlainRecord {
    pub typ: ContentType,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ccs_payload() {
        assert!(ChangeCipherSpecPayload::read_bytes(&[1]).is_ok());
        assert!(ChangeCipherSpecPayload::read_bytes(&[2]).is_err());
        assert!(ChangeCipherSpecPayload::read_bytes(&[1, 1]).is_err());
    }

    #[test]
    fn handshake_payload_is_pre_encoded() {
        let m = Message::build_key_update_notify();
        let mut bytes = Vec::new();
        m.payload.encode(&mut bytes);
        assert_eq!(bytes, vec![0x18, 0x00, 0x00, 0x01, 0x00]);
        assert!(m.is_content_type(ContentType::Handshake));
        assert!(m.is_handshake_type(HandshakeType::KeyUpdate));
    }
}
