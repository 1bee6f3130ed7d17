use crate::error::InvalidMessage;
use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::codec::{Codec, Reader};
use crate::msgs::enums::{CipherSuite, ProtocolVersion};

use zeroize::Zeroize;

/// The server-side state sealed into (or stored against) a session ticket.
///
/// This is what the ticket store's lookup returns: everything needed to
/// resume a connection and to judge an early-data offer.
#[derive(Clone, Debug)]
pub struct ResumptionState {
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,

    /// The PSK derived from the resumption master secret and ticket nonce.
    pub secret: PayloadU8,

    /// Server clock when the ticket was issued, in unix milliseconds.
    pub issued_unix_ms: u64,

    /// Obfuscation offset for the client's ticket age.
    pub ticket_age_add: u32,

    /// ALPN protocol negotiated on the original connection; empty if none.
    pub alpn: PayloadU8,

    /// Early data limit granted with this ticket.
    pub max_early_data: u32,

    /// Time of the original full handshake, in unix milliseconds.
    pub handshake_time_ms: u64,

    /// Opaque application token, checked by the app-token validator before
    /// early data is accepted.
    pub app_token: PayloadU16,
}

impl ResumptionState {
    pub fn alpn(&self) -> Option<&[u8]> {
        match self.alpn.0.is_empty() {
            true => None,
            false => Some(&self.alpn.0),
        }
    }
}

impl Codec for ResumptionState {
    fn encode(&self, bytes: &mut Vec<u8>) {
        self.version.encode(bytes);
        self.cipher_suite.encode(bytes);
        self.secret.encode(bytes);
        self.issued_unix_ms.encode(bytes);
        self.ticket_age_add.encode(bytes);
        self.alpn.encode(bytes);
        self.max_early_data.encode(bytes);
        self.handshake_time_ms.encode(bytes);
        self.app_token.encode(bytes);
    }

    fn read(r: &mut Reader) -> Result<Self, InvalidMessage> {
        Ok(Self {
            version: ProtocolVersion::read(r)?,
            cipher_suite: CipherSuite::read(r)?,
            secret: PayloadU8::read(r)?,
            issued_unix_ms: u64::read(r)?,
            ticket_age_add: u32::read(r)?,
            alpn: PayloadU8::read(r)?,
            max_early_data: u32::read(r)?,
            handshake_time_ms: u64::read(r)?,
            app_token: PayloadU16::read(r)?,
        })
    }
}

impl Drop for ResumptionState {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let state = ResumptionState {
            version: ProtocolVersion::TLSv1_3,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            secret: PayloadU8::new(vec![0xaa; 32]),
            issued_unix_ms: 1_700_000_000_000,
            ticket_age_add: 0xdead_beef,
            alpn: PayloadU8::new(b"h2".to_vec()),
            max_early_data: 16384,
            handshake_time_ms: 1_700_000_000_000,
            app_token: PayloadU16::new(vec![1, 2, 3]),
        };

        let enc = state.get_encoding();
        let decoded = ResumptionState::read_bytes(&enc).unwrap();
        assert_eq!(decoded.cipher_suite, state.cipher_suite);
        assert_eq!(decoded.secret, state.secret);
        assert_eq!(decoded.alpn(), Some(&b"h2"[..]));
        assert_eq!(decoded.ticket_age_add, state.ticket_age_add);
    }
}
