use crate::error::Error;
use crate::key::Certificate;
use crate::msgs::enums::SignatureScheme;

use ring::constant_time;
use ring::digest::Digest;

use std::fmt::Debug;

/// A verified peer certificate, produced by the certificate verification
/// collaborator from a raw chain.
///
/// The core never parses X.509 itself; everything it needs from the peer's
/// certificate is behind this interface.
pub trait PeerCert: Debug + Send + Sync {
    /// Verify `signature` over `message` using the end-entity public key
    /// and the given scheme.
    fn verify_signature(
        &self,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error>;

    /// The raw chain this certificate was verified from.
    fn chain(&self) -> &[Certificate];
}

fn construct_tls13_verify_message(context_string: &[u8], handshake_hash: &Digest) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.resize(64, 0x20u8);
    msg.extend_from_slice(context_string);
    msg.extend_from_slice(&[0]);
    msg.extend_from_slice(handshake_hash.as_ref());
    msg
}

/// The signed content of a server CertificateVerify; RFC 8446 section 4.4.3.
pub fn construct_tls13_server_verify_message(handshake_hash: &Digest) -> Vec<u8> {
    construct_tls13_verify_message(b"TLS 1.3, server CertificateVerify", handshake_hash)
}

/// The signed content of a client CertificateVerify.
pub fn construct_tls13_client_verify_message(handshake_hash: &Digest) -> Vec<u8> {
    construct_tls13_verify_message(b"TLS 1.3, client CertificateVerify", handshake_hash)
}

/// Constant-time comparison of a finished MAC.
pub(crate) fn verify_finished(expect: &ring::hmac::Tag, received: &[u8]) -> Result<(), Error> {
    constant_time::verify_slices_are_equal(expect.as_ref(), received)
        .map_err(|_| Error::DecryptError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::digest;

    #[test]
    fn verify_message_layout() {
        let hash = digest::digest(&digest::SHA256, b"transcript");
        let msg = construct_tls13_server_verify_message(&hash);
        assert_eq!(&msg[..64], &[0x20u8; 64][..]);
        assert_eq!(&msg[64..98], b"TLS 1.3, server CertificateVerify\x00");
        assert_eq!(&msg[98..], hash.as_ref());
    }
}
