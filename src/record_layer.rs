//! Framing and record protection.
//!
//! The read and write record layers are closed sets: a direction is either
//! still plaintext or protected under an installed traffic key.  Each
//! direction owns its 64-bit sequence counter, which resets exactly when a
//! new key is installed.

use crate::aead::{self, AeadKey};
use crate::buffer::BufChain;
use crate::error::{Error, PeerMisbehaved};
use crate::key_schedule::{derive_traffic_keys, Iv};
use crate::msgs::enums::ContentType;
use crate::msgs::message::PlainRecord;
use crate::suites::Tls13CipherSuite;

use ring::hkdf;

/// Maximum plaintext fragment per record.
pub const MAX_FRAGMENT_LEN: usize = 16_384;

/// Maximum ciphertext per record: plaintext, content type byte, tag, and
/// allowed padding slack.
const MAX_ENCRYPTED_LEN: usize = MAX_FRAGMENT_LEN + 256;

const HEADER_SIZE: usize = 5;

const SEQ_HARD_LIMIT: u64 = 0xffff_ffff_ffff_fffe;

fn make_nonce(iv: &Iv, seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&seq.to_be_bytes());

    nonce
        .iter_mut()
        .zip(iv.value().iter())
        .for_each(|(nonce, iv)| {
            *nonce ^= *iv;
        });

    nonce
}

fn make_header(typ: ContentType, len: usize) -> [u8; HEADER_SIZE] {
    [
        typ.into(),
        0x03,
        0x03,
        (len >> 8) as u8,
        len as u8,
    ]
}

/// One direction's record protection material.
struct RecordCipher {
    key: AeadKey,
    iv: Iv,
}

impl RecordCipher {
    fn new(suite: &'static Tls13CipherSuite, secret: &hkdf::Prk) -> Self {
        let (key, iv) = derive_traffic_keys(secret, suite.aead);
        Self {
            key: AeadKey::new(suite.aead, key),
            iv,
        }
    }
}

/// Strip the trailing zero padding of an inner plaintext; the last
/// non-zero byte is the true content type.
fn unpad_tls13(v: &mut Vec<u8>) -> ContentType {
    loop {
        match v.pop() {
            Some(0) => {}
            Some(content_type) => return ContentType::from(content_type),
            None => return ContentType::Unknown(0),
        }
    }
}

pub struct EncryptedReadRecordLayer {
    cipher: RecordCipher,
    seq: u64,

    // Records encrypted with a key we declined to install (rejected early
    // data) are skipped rather than failed, up to this many ciphertext
    // bytes.
    trial_decryption_len: Option<usize>,
}

impl EncryptedReadRecordLayer {
    pub fn new(suite: &'static Tls13CipherSuite, secret: &hkdf::Prk) -> Self {
        Self {
            cipher: RecordCipher::new(suite, secret),
            seq: 0,
            trial_decryption_len: None,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn enable_trial_decryption(&mut self, max_length: usize) {
        self.trial_decryption_len = Some(max_length);
    }

    pub fn finish_trial_decryption(&mut self) {
        self.trial_decryption_len = None;
    }

    fn doing_trial_decryption(&mut self, requested: usize) -> bool {
        match self
            .trial_decryption_len
            .and_then(|value| value.checked_sub(requested))
        {
            Some(remaining) => {
                self.trial_decryption_len = Some(remaining);
                true
            }
            _ => false,
        }
    }

    fn read(&mut self, buf: &mut BufChain) -> Result<Option<PlainRecord>, Error> {
        loop {
            let mut header = [0u8; HEADER_SIZE];
            if !buf.peek(&mut header) {
                return Ok(None);
            }

            let typ = ContentType::from(header[0]);
            let len = u16::from_be_bytes([header[3], header[4]]) as usize;

            if len == 0 {
                return Err(Error::InvalidMessage(
                    crate::error::InvalidMessage::InvalidEmptyPayload,
                ));
            }
            if len > MAX_ENCRYPTED_LEN {
                return Err(Error::PeerSentOversizedRecord);
            }
            if buf.len() < HEADER_SIZE + len {
                return Ok(None);
            }

            buf.advance(HEADER_SIZE);
            let body = buf.split_to(len);

            // middlebox-compatibility records pass through unprotected
            if typ == ContentType::ChangeCipherSpec {
                return Ok(Some(PlainRecord {
                    typ,
                    payload: body.to_vec(),
                }));
            }

            if self.seq >= SEQ_HARD_LIMIT {
                return Err(Error::General("read sequence number exhausted".to_string()));
            }

            let nonce = make_nonce(&self.cipher.iv, self.seq);
            let aad = BufChain::from_vec(header.to_vec());

            let plain = match aead::decrypt(&self.cipher.key, body, &aad, &nonce)? {
                Some(plain) => plain,
                None if self.doing_trial_decryption(len) => {
                    log::trace!("dropping undecryptable record after rejected early data");
                    continue;
                }
                None => return Err(Error::DecryptError),
            };

            self.seq += 1;

            let mut payload = plain.to_vec();
            if payload.len() > MAX_FRAGMENT_LEN + 1 {
                return Err(Error::PeerSentOversizedRecord);
            }

            let typ = unpad_tls13(&mut payload);
            if typ == ContentType::Unknown(0) {
                return Err(PeerMisbehaved::IllegalTlsInnerPlaintext.into());
            }

            return Ok(Some(PlainRecord { typ, payload }));
        }
    }
}

pub struct PlaintextReadRecordLayer;

impl PlaintextReadRecordLayer {
    fn read(&mut self, buf: &mut BufChain) -> Result<Option<PlainRecord>, Error> {
        let mut header = [0u8; HEADER_SIZE];
        if !buf.peek(&mut header) {
            return Ok(None);
        }

        let typ = ContentType::from(header[0]);
        let len = u16::from_be_bytes([header[3], header[4]]) as usize;

        match typ {
            ContentType::Handshake | ContentType::Alert | ContentType::ChangeCipherSpec => {}
            _ => {
                return Err(Error::InappropriateMessage {
                    expect_types: vec![ContentType::Handshake, ContentType::Alert],
                    got_type: typ,
                });
            }
        }

        if len == 0 {
            return Err(Error::InvalidMessage(
                crate::error::InvalidMessage::InvalidEmptyPayload,
            ));
        }
        if len > MAX_FRAGMENT_LEN {
            return Err(Error::PeerSentOversizedRecord);
        }
        if buf.len() < HEADER_SIZE + len {
            return Ok(None);
        }

        buf.advance(HEADER_SIZE);
        let body = buf.split_to(len);

        Ok(Some(PlainRecord {
            typ,
            payload: body.to_vec(),
        }))
    }
}

/// The read direction: unprotected, or protected under an installed key.
pub enum ReadRecordLayer {
    Plaintext(PlaintextReadRecordLayer),
    Encrypted(EncryptedReadRecordLayer),
}

impl ReadRecordLayer {
    pub fn plaintext() -> Self {
        Self::Plaintext(PlaintextReadRecordLayer)
    }

    pub fn encrypted(suite: &'static Tls13CipherSuite, secret: &hkdf::Prk) -> Self {
        Self::Encrypted(EncryptedReadRecordLayer::new(suite, secret))
    }

    /// Extract the next complete record from `buf`, if any.
    pub fn read(&mut self, buf: &mut BufChain) -> Result<Option<PlainRecord>, Error> {
        match self {
            Self::Plaintext(layer) => layer.read(buf),
            Self::Encrypted(layer) => layer.read(buf),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Plaintext(_) => 0,
            Self::Encrypted(layer) => layer.seq(),
        }
    }
}

pub struct EncryptedWriteRecordLayer {
    cipher: RecordCipher,
    seq: u64,

    /// Pad inner plaintexts up to a multiple of this size; zero disables.
    pub padding: usize,
}

impl EncryptedWriteRecordLayer {
    pub fn new(suite: &'static Tls13CipherSuite, secret: &hkdf::Prk) -> Self {
        Self {
            cipher: RecordCipher::new(suite, secret),
            seq: 0,
            padding: 0,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn write(&mut self, typ: ContentType, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if payload.len() > MAX_FRAGMENT_LEN {
            return Err(Error::EncryptError);
        }
        if self.seq >= SEQ_HARD_LIMIT {
            return Err(Error::EncryptError);
        }

        let mut inner = Vec::with_capacity(payload.len() + 1);
        inner.extend_from_slice(payload);
        inner.push(typ.into());
        if self.padding > 1 {
            let padded = Ord::min(
                (inner.len() + self.padding - 1) / self.padding * self.padding,
                MAX_FRAGMENT_LEN + 1,
            );
            inner.resize(padded, 0x00);
        }

        let total_len = inner.len() + self.cipher.key.tag_len();
        let header = make_header(ContentType::ApplicationData, total_len);
        let nonce = make_nonce(&self.cipher.iv, self.seq);
        let aad = BufChain::from_vec(header.to_vec());

        let sealed = aead::encrypt(&self.cipher.key, BufChain::from_vec(inner), &aad, &nonce)?;
        self.seq += 1;

        let mut wire = Vec::with_capacity(HEADER_SIZE + total_len);
        wire.extend_from_slice(&header);
        wire.extend_from_slice(&sealed.to_vec());
        Ok(wire)
    }
}

pub struct PlaintextWriteRecordLayer;

impl PlaintextWriteRecordLayer {
    fn write(&mut self, typ: ContentType, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if payload.len() > MAX_FRAGMENT_LEN {
            return Err(Error::EncryptError);
        }
        let mut wire = Vec::with_capacity(HEADER_SIZE + payload.len());
        wire.extend_from_slice(&make_header(typ, payload.len()));
        wire.extend_from_slice(payload);
        Ok(wire)
    }
}

/// The write direction: unprotected, or protected under an installed key.
pub enum WriteRecordLayer {
    Plaintext(PlaintextWriteRecordLayer),
    Encrypted(EncryptedWriteRecordLayer),
}

impl WriteRecordLayer {
    pub fn plaintext() -> Self {
        Self::Plaintext(PlaintextWriteRecordLayer)
    }

    pub fn encrypted(suite: &'static Tls13CipherSuite, secret: &hkdf::Prk) -> Self {
        Self::Encrypted(EncryptedWriteRecordLayer::new(suite, secret))
    }

    /// Frame (and protect, if keys are installed) one record.
    pub fn write(&mut self, typ: ContentType, payload: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Plaintext(layer) => layer.write(typ, payload),
            Self::Encrypted(layer) => layer.write(typ, payload),
        }
    }

    /// Frame `data`, fragmenting into maximum-sized records.
    pub fn write_chunked(&mut self, typ: ContentType, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut wire = Vec::new();
        for chunk in data.chunks(MAX_FRAGMENT_LEN) {
            wire.extend_from_slice(&self.write(typ, chunk)?);
        }
        Ok(wire)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }

    pub fn seq(&self) -> u64 {
        match self {
            Self::Plaintext(_) => 0,
            Self::Encrypted(layer) => layer.seq(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::TLS13_AES_128_GCM_SHA256;

    fn secret(b: u8) -> hkdf::Prk {
        hkdf::Prk::new_less_safe(ring::hkdf::HKDF_SHA256, &[b; 32])
    }

    #[test]
    fn round_trip_and_sequence_numbers() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut write = WriteRecordLayer::encrypted(suite, &secret(1));
        let mut read = ReadRecordLayer::encrypted(suite, &secret(1));

        let mut buf = BufChain::new();
        for i in 0..3u8 {
            let wire = write
                .write(ContentType::ApplicationData, &[i; 100])
                .unwrap();
            buf.append(BufChain::from_vec(wire));
        }
        assert_eq!(write.seq(), 3);

        for i in 0..3u8 {
            let record = read.read(&mut buf).unwrap().unwrap();
            assert_eq!(record.typ, ContentType::ApplicationData);
            assert_eq!(record.payload, vec![i; 100]);
        }
        assert_eq!(read.seq(), 3);
        assert!(read.read(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_records_wait_for_data() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut write = WriteRecordLayer::encrypted(suite, &secret(2));
        let mut read = ReadRecordLayer::encrypted(suite, &secret(2));

        let wire = write
            .write(ContentType::ApplicationData, b"split me")
            .unwrap();

        let mut buf = BufChain::new();
        buf.append(BufChain::from_vec(wire[..3].to_vec()));
        assert!(read.read(&mut buf).unwrap().is_none());

        buf.append(BufChain::from_vec(wire[3..10].to_vec()));
        assert!(read.read(&mut buf).unwrap().is_none());

        buf.append(BufChain::from_vec(wire[10..].to_vec()));
        let record = read.read(&mut buf).unwrap().unwrap();
        assert_eq!(record.payload, b"split me");
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut write = WriteRecordLayer::encrypted(suite, &secret(3));
        let mut read = ReadRecordLayer::encrypted(suite, &secret(4));

        let wire = write
            .write(ContentType::ApplicationData, b"hello")
            .unwrap();
        let mut buf = BufChain::from_vec(wire);
        assert_eq!(read.read(&mut buf), Err(Error::DecryptError));
    }

    #[test]
    fn trial_decryption_skips_undecryptable_records() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut early_write = WriteRecordLayer::encrypted(suite, &secret(5));
        let mut hs_write = WriteRecordLayer::encrypted(suite, &secret(6));

        let mut read = match ReadRecordLayer::encrypted(suite, &secret(6)) {
            ReadRecordLayer::Encrypted(mut layer) => {
                layer.enable_trial_decryption(1024);
                ReadRecordLayer::Encrypted(layer)
            }
            _ => unreachable!(),
        };

        let mut buf = BufChain::new();
        buf.append(BufChain::from_vec(
            early_write
                .write(ContentType::ApplicationData, b"early data")
                .unwrap(),
        ));
        buf.append(BufChain::from_vec(
            hs_write
                .write(ContentType::Handshake, b"real message")
                .unwrap(),
        ));

        let record = read.read(&mut buf).unwrap().unwrap();
        assert_eq!(record.typ, ContentType::Handshake);
        assert_eq!(record.payload, b"real message");
        // the skipped record did not consume a sequence number
        assert_eq!(read.seq(), 1);
    }

    #[test]
    fn padding_is_stripped() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut write = match WriteRecordLayer::encrypted(suite, &secret(7)) {
            WriteRecordLayer::Encrypted(mut layer) => {
                layer.padding = 64;
                WriteRecordLayer::Encrypted(layer)
            }
            _ => unreachable!(),
        };
        let mut read = ReadRecordLayer::encrypted(suite, &secret(7));

        let wire = write
            .write(ContentType::ApplicationData, b"tiny")
            .unwrap();
        // 4 bytes payload + 1 type byte padded to 64, plus header and tag
        assert_eq!(wire.len(), HEADER_SIZE + 64 + 16);

        let mut buf = BufChain::from_vec(wire);
        let record = read.read(&mut buf).unwrap().unwrap();
        assert_eq!(record.payload, b"tiny");
    }

    #[test]
    fn chunked_writes_fragment() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut write = WriteRecordLayer::encrypted(suite, &secret(8));
        let mut read = ReadRecordLayer::encrypted(suite, &secret(8));

        let data = vec![0x5a; MAX_FRAGMENT_LEN + 100];
        let wire = write
            .write_chunked(ContentType::ApplicationData, &data)
            .unwrap();
        assert_eq!(write.seq(), 2);

        let mut buf = BufChain::from_vec(wire);
        let first = read.read(&mut buf).unwrap().unwrap();
        let second = read.read(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload.len(), MAX_FRAGMENT_LEN);
        assert_eq!(second.payload.len(), 100);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let mut read = ReadRecordLayer::encrypted(&TLS13_AES_128_GCM_SHA256, &secret(9));
        let mut header = vec![0x17, 0x03, 0x03];
        header.extend_from_slice(&(MAX_ENCRYPTED_LEN as u16 + 1).to_be_bytes());
        let mut buf = BufChain::from_vec(header);
        assert_eq!(
            read.read(&mut buf),
            Err(Error::PeerSentOversizedRecord)
        );
    }
}
