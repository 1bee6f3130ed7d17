use crate::msgs::handshake::HandshakeMessagePayload;

use ring::digest;

/// Early stage buffering of handshake payloads.
///
/// Before the cipher suite (and so the hash function) is known, we just
/// buffer the serialized messages.  A HelloRetryRequest can revert a
/// `HandshakeHash` back into one of these.
#[derive(Clone)]
pub struct HandshakeHashBuffer {
    buffer: Vec<u8>,
}

impl HandshakeHashBuffer {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Buffer a serialized handshake message.
    pub fn add(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Get the hash value if we were to hash `extra` too.
    pub fn hash_given(&self, alg: &'static digest::Algorithm, extra: &[u8]) -> digest::Digest {
        let mut ctx = digest::Context::new(alg);
        ctx.update(&self.buffer);
        ctx.update(extra);
        ctx.finish()
    }

    /// We now know what hash function the transcript uses.
    pub fn start_hash(self, alg: &'static digest::Algorithm) -> HandshakeHash {
        let mut ctx = digest::Context::new(alg);
        ctx.update(&self.buffer);
        HandshakeHash { alg, ctx }
    }
}

impl Default for HandshakeHashBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A running hash of serialized handshake messages.
///
/// Computed by buffering initially; once the hash function is known we
/// switch to incremental hashing.
#[derive(Clone)]
pub struct HandshakeHash {
    alg: &'static digest::Algorithm,
    ctx: digest::Context,
}

impl HandshakeHash {
    /// Hash a serialized handshake message.
    pub fn add(&mut self, bytes: &[u8]) -> &mut Self {
        self.ctx.update(bytes);
        self
    }

    /// Get the hash value if we were to hash `extra` too.
    pub fn hash_given(&self, extra: &[u8]) -> digest::Digest {
        let mut ctx = self.ctx.clone();
        ctx.update(extra);
        ctx.finish()
    }

    /// Take the current hash value, and encapsulate it in a
    /// 'message_hash' handshake message.  Start this hash
    /// again, with that message at the front.  RFC 8446 section 4.4.1.
    pub fn rollup_for_hrr(&mut self) {
        let old_ctx = std::mem::replace(&mut self.ctx, digest::Context::new(self.alg));
        let old_hash = old_ctx.finish();
        let rollup = HandshakeMessagePayload::build_handshake_hash(old_hash.as_ref());
        self.add(&rollup);
    }

    /// Get the current hash value.
    pub fn current_hash(&self) -> digest::Digest {
        self.ctx.clone().finish()
    }

    /// The hash algorithm in use.
    pub fn algorithm(&self) -> &'static digest::Algorithm {
        self.alg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_correctly() {
        let mut hhb = HandshakeHashBuffer::new();
        hhb.add(b"hello");
        assert_eq!(hhb.buffer.len(), 5);
        let mut hh = hhb.start_hash(&digest::SHA256);
        hh.add(b"world");
        let h = hh.current_hash();
        let expect = digest::digest(&digest::SHA256, b"helloworld");
        assert_eq!(h.as_ref(), expect.as_ref());
    }

    #[test]
    fn hash_given_does_not_alter_running_hash(){
        let mut hhb = HandshakeHashBuffer::new();
        hhb.add(b"hello");
        let hh = hhb.start_hash(&digest::SHA256);
        let speculative = hh.hash_given(b"world");
        let expect = digest::digest(&digest::SHA256, b"helloworld");
        assert_eq!(speculative.as_ref(), expect.as_ref());

        let plain = digest::digest(&digest::SHA256, b"hello");
        assert_eq!(hh.current_hash().as_ref(), plain.as_ref());
    }

    #[test]
    fn rollup_replaces_transcript_with_message_hash() {
        let mut hh = HandshakeHashBuffer::new().start_hash(&digest::SHA256);
        hh.add(b"client hello 1");
        hh.rollup_for_hrr();
        hh.add(b"hello retry");

        let ch1_hash = digest::digest(&digest::SHA256, b"client hello 1");
        let mut expect_input = vec![0xfe, 0x00, 0x00, ch1_hash.as_ref().len() as u8];
        expect_input.extend_from_slice(ch1_hash.as_ref());
        expect_input.extend_from_slice(b"hello retry");
        let expect = digest::digest(&digest::SHA256, &expect_input);
        assert_eq!(hh.current_hash().as_ref(), expect.as_ref());
    }
}
