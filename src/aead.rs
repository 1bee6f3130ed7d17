//! AEAD over chained buffers.
//!
//! This is the record protection kernel: encrypt and decrypt a fragmented
//! byte chain with associated data, managing tag placement and choosing
//! between in-place and copied output.  A single receive allocation often
//! backs several records, so fragments arrive aliased; we unshare the
//! minimum necessary.

use crate::buffer::{BufChain, Fragment};
use crate::error::Error;
use crate::suites::AeadAlgorithm;

use openssl::symm::{Crypter, Mode};
use zeroize::Zeroize;

/// Maximum number of shared fragments we will unshare individually.
/// Beyond this, one full-length copy is cheaper.
pub const MAX_SHARED_IN_CHAIN: usize = 4;

const BLOCK: usize = 16;

/// Chunk size for cipher updates; a multiple of the block size.
const MAX_CHUNK: usize = 4080;

/// One direction's AEAD key material, bound to its algorithm.
///
/// Exclusively owned by one direction of one connection.
pub struct AeadKey {
    alg: &'static AeadAlgorithm,
    key: Vec<u8>,
}

impl AeadKey {
    pub fn new(alg: &'static AeadAlgorithm, key: Vec<u8>) -> Self {
        debug_assert_eq!(key.len(), alg.key_len);
        Self { alg, key }
    }

    pub fn algorithm(&self) -> &'static AeadAlgorithm {
        self.alg
    }

    pub fn tag_len(&self) -> usize {
        self.alg.tag_len
    }

    fn crypter(&self, mode: Mode, iv: &[u8; 12]) -> Result<Crypter, Error> {
        let mut crypter = Crypter::new(self.alg.cipher(), mode, &self.key, Some(iv))
            .map_err(|_| Error::General("cipher init failed".to_string()))?;
        crypter.pad(false);
        Ok(crypter)
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Where the transform reads from and writes to.
///
/// `InPlace` overwrites the input chain; writes never run ahead of reads
/// because a cipher update emits at most as many bytes as it consumed.
enum Workspace {
    InPlace(BufChain),
    Split { input: BufChain, output: BufChain },
}

impl Workspace {
    fn read_at(&self, pos: usize, out: &mut [u8]) -> usize {
        match self {
            Self::InPlace(chain) => chain.read_at(pos, out),
            Self::Split { input, .. } => input.read_at(pos, out),
        }
    }

    fn write_at(&mut self, pos: usize, src: &[u8]) -> Result<(), Error> {
        let ok = match self {
            Self::InPlace(chain) => chain.write_at(pos, src),
            Self::Split { output, .. } => output.write_at(pos, src),
        };
        match ok {
            true => Ok(()),
            false => Err(Error::General("output buffer unwritable".to_string())),
        }
    }

    fn into_output(self) -> BufChain {
        match self {
            Self::InPlace(chain) => chain,
            Self::Split { output, .. } => output,
        }
    }

    fn output_mut(&mut self) -> &mut BufChain {
        match self {
            Self::InPlace(chain) => chain,
            Self::Split { output, .. } => output,
        }
    }
}

/// Prepare a possibly-aliased chain for the transform.
///
/// No shared fragments: operate in place.  Up to [`MAX_SHARED_IN_CHAIN`]
/// shared fragments: unshare exactly those, then operate in place.  More:
/// allocate one output chain of the full input length.
fn fixup_shared(mut chain: BufChain, input_len: usize) -> Workspace {
    match chain.shared_fragments() {
        0 => Workspace::InPlace(chain),
        n if n <= MAX_SHARED_IN_CHAIN => {
            for frag in chain.fragments_mut() {
                frag.unshare();
            }
            Workspace::InPlace(chain)
        }
        _ => {
            let mut output = BufChain::new();
            output.push(Fragment::zeroed(input_len));
            Workspace::Split {
                input: chain,
                output,
            }
        }
    }
}

/// Run `crypter` over `input_len` bytes in 16-byte block steps.
///
/// The cipher may buffer a trailing partial block internally; the caller
/// flushes it at finalisation.  Returns (bytes written, bytes consumed).
fn transform_blocks(
    crypter: &mut Crypter,
    ws: &mut Workspace,
    input_len: usize,
) -> Result<(usize, usize), Error> {
    let mut in_buf = [0u8; MAX_CHUNK];
    let mut out_buf = [0u8; MAX_CHUNK + BLOCK];
    let mut read_pos = 0;
    let mut write_pos = 0;

    while read_pos < input_len {
        let remaining = input_len - read_pos;
        let chunk = if remaining < BLOCK {
            remaining
        } else {
            Ord::min(remaining - remaining % BLOCK, MAX_CHUNK)
        };

        let got = ws.read_at(read_pos, &mut in_buf[..chunk]);
        debug_assert_eq!(got, chunk);
        let written = crypter
            .update(&in_buf[..chunk], &mut out_buf)
            .map_err(|_| Error::General("cipher update failed".to_string()))?;
        if written > 0 {
            ws.write_at(write_pos, &out_buf[..written])?;
        }
        write_pos += written;
        read_pos += chunk;
    }

    Ok((write_pos, read_pos))
}

/// Run `crypter` over `input_len` bytes; output length equals input length
/// and nothing is buffered for finalisation.
fn transform_stream(
    crypter: &mut Crypter,
    ws: &mut Workspace,
    input_len: usize,
) -> Result<(usize, usize), Error> {
    let mut in_buf = [0u8; MAX_CHUNK];
    let mut out_buf = [0u8; MAX_CHUNK + BLOCK];
    let mut read_pos = 0;
    let mut write_pos = 0;

    while read_pos < input_len {
        let chunk = Ord::min(input_len - read_pos, MAX_CHUNK);
        let got = ws.read_at(read_pos, &mut in_buf[..chunk]);
        debug_assert_eq!(got, chunk);
        let written = crypter
            .update(&in_buf[..chunk], &mut out_buf)
            .map_err(|_| Error::General("cipher update failed".to_string()))?;
        if written > 0 {
            ws.write_at(write_pos, &out_buf[..written])?;
        }
        write_pos += written;
        read_pos += chunk;
    }

    Ok((write_pos, read_pos))
}

fn feed_aad(crypter: &mut Crypter, aad: &BufChain) -> Result<(), Error> {
    for frag in aad.fragments() {
        crypter
            .aad_update(frag.bytes())
            .map_err(|_| Error::General("aad update failed".to_string()))?;
    }
    Ok(())
}

/// Flush the cipher's trailing block, writing directly into the output
/// chain's remaining extent if it fits, otherwise via a stack block
/// appended to the chain.
fn flush_final(
    crypter: &mut Crypter,
    ws: &mut Workspace,
    write_pos: usize,
    output_len: usize,
) -> Result<(), Error> {
    let mut block = [0u8; 2 * BLOCK];
    let n = crypter
        .finalize(&mut block)
        .map_err(|_| Error::General("cipher finalise failed".to_string()))?;
    if n == 0 {
        return Ok(());
    }
    if n <= output_len - write_pos {
        ws.write_at(write_pos, &block[..n])
    } else {
        ws.output_mut().append_tail(&block[..n]);
        Ok(())
    }
}

/// Encrypt `plaintext` with `aad`, producing a chain of
/// `plaintext.len() + tag_len` bytes with the tag at the tail.
///
/// Fails only on misuse (input beyond 31-bit length) or cipher library
/// failure.
pub fn encrypt(
    key: &AeadKey,
    plaintext: BufChain,
    aad: &BufChain,
    iv: &[u8; 12],
) -> Result<BufChain, Error> {
    let input_len = plaintext.len();
    if input_len > i32::MAX as usize {
        return Err(Error::EncryptError);
    }

    let mut ws = fixup_shared(plaintext, input_len);
    let mut crypter = key.crypter(Mode::Encrypt, iv)?;
    feed_aad(&mut crypter, aad)?;

    let (write_pos, _) = if key.alg.block_mode {
        transform_blocks(&mut crypter, &mut ws, input_len)?
    } else {
        transform_stream(&mut crypter, &mut ws, input_len)?
    };
    flush_final(&mut crypter, &mut ws, write_pos, input_len)?;

    let mut tag = vec![0u8; key.alg.tag_len];
    crypter
        .get_tag(&mut tag)
        .map_err(|_| Error::General("tag retrieval failed".to_string()))?;

    let mut output = ws.into_output();
    output.append_tail(&tag);
    Ok(output)
}

/// Decrypt `ciphertext` (whose last `tag_len` bytes are the tag) with
/// `aad`.  Authentication failure yields `Ok(None)`; only library failures
/// are errors.
pub fn decrypt(
    key: &AeadKey,
    mut ciphertext: BufChain,
    aad: &BufChain,
    iv: &[u8; 12],
) -> Result<Option<BufChain>, Error> {
    let tag_len = key.alg.tag_len;
    if ciphertext.len() < tag_len {
        return Ok(None);
    }
    let tag = ciphertext.split_off_tail(tag_len);
    let input_len = ciphertext.len();

    let mut ws = fixup_shared(ciphertext, input_len);
    let mut crypter = key.crypter(Mode::Decrypt, iv)?;

    // GCM accepts the expected tag up front; the stream construction takes
    // it after the updates.
    if key.alg.block_mode {
        crypter
            .set_tag(&tag)
            .map_err(|_| Error::General("tag set failed".to_string()))?;
    }

    feed_aad(&mut crypter, aad)?;

    let (write_pos, _) = if key.alg.block_mode {
        transform_blocks(&mut crypter, &mut ws, input_len)?
    } else {
        transform_stream(&mut crypter, &mut ws, input_len)?
    };

    if !key.alg.block_mode {
        crypter
            .set_tag(&tag)
            .map_err(|_| Error::General("tag set failed".to_string()))?;
    }

    let mut block = [0u8; 2 * BLOCK];
    let n = match crypter.finalize(&mut block) {
        Ok(n) => n,
        Err(_) => return Ok(None),
    };
    if n > 0 {
        if n <= input_len - write_pos {
            ws.write_at(write_pos, &block[..n])?;
        } else {
            ws.output_mut().append_tail(&block[..n]);
        }
    }

    Ok(Some(ws.into_output()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suites::{AEAD_AES_128_GCM, AEAD_AES_256_GCM, AEAD_CHACHA20_POLY1305};

    fn test_key(alg: &'static AeadAlgorithm) -> AeadKey {
        AeadKey::new(alg, (0..alg.key_len as u8).collect())
    }

    fn aad() -> BufChain {
        BufChain::from_vec(vec![0x17, 0x03, 0x03, 0x01, 0x00])
    }

    const IV: [u8; 12] = [0x42; 12];

    fn roundtrip(alg: &'static AeadAlgorithm) {
        let key = test_key(alg);
        let plain: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

        let sealed = encrypt(&key, BufChain::from_vec(plain.clone()), &aad(), &IV).unwrap();
        assert_eq!(sealed.len(), plain.len() + alg.tag_len);

        let opened = decrypt(&key, sealed, &aad(), &IV)
            .unwrap()
            .expect("authentic");
        assert_eq!(opened.to_vec(), plain);
    }

    #[test]
    fn roundtrip_all_algorithms() {
        roundtrip(&AEAD_AES_128_GCM);
        roundtrip(&AEAD_AES_256_GCM);
        roundtrip(&AEAD_CHACHA20_POLY1305);
    }

    #[test]
    fn tampering_fails_authentication() {
        let key = test_key(&AEAD_AES_128_GCM);
        let sealed = encrypt(&key, BufChain::from_vec(vec![1, 2, 3, 4]), &aad(), &IV).unwrap();

        let mut bytes = sealed.to_vec();
        bytes[0] ^= 0x80;
        assert!(decrypt(&key, BufChain::from_vec(bytes), &aad(), &IV)
            .unwrap()
            .is_none());

        // tag bytes too
        let mut bytes = sealed.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(decrypt(&key, BufChain::from_vec(bytes), &aad(), &IV)
            .unwrap()
            .is_none());

        // and wrong aad
        let wrong_aad = BufChain::from_vec(vec![0u8; 5]);
        assert!(decrypt(&key, sealed, &wrong_aad, &IV)
            .unwrap()
            .is_none());
    }

    #[test]
    fn matches_one_shot_aead() {
        // Cross-check the chunked transform against ring's one-shot sealing.
        let key = test_key(&AEAD_AES_128_GCM);
        let plain: Vec<u8> = (0..100u8).collect();
        let sealed = encrypt(&key, BufChain::from_vec(plain.clone()), &aad(), &IV).unwrap();

        let ring_key = ring::aead::LessSafeKey::new(
            ring::aead::UnboundKey::new(&ring::aead::AES_128_GCM, &(0..16u8).collect::<Vec<_>>())
                .unwrap(),
        );
        let mut ring_sealed = plain;
        ring_key
            .seal_in_place_append_tag(
                ring::aead::Nonce::assume_unique_for_key(IV),
                ring::aead::Aad::from(aad().to_vec()),
                &mut ring_sealed,
            )
            .unwrap();
        assert_eq!(sealed.to_vec(), ring_sealed);
    }

    fn fragmented(payload: &[u8], pieces: usize) -> BufChain {
        let mut chain = BufChain::new();
        let size = (payload.len() + pieces - 1) / pieces;
        for part in payload.chunks(size) {
            chain.push(Fragment::new(part.to_vec()));
        }
        chain
    }

    #[test]
    fn shared_fragments_unshared_individually() {
        let key = test_key(&AEAD_AES_128_GCM);
        let payload: Vec<u8> = (0..256u32).map(|i| i as u8).collect();

        let chain = fragmented(&payload, 3);
        let alias = chain.clone();
        assert_eq!(chain.shared_fragments(), 3);

        let sealed = encrypt(&key, chain, &aad(), &IV).unwrap();

        // the aliased original is untouched
        assert_eq!(alias.to_vec(), payload);

        // and the result matches encrypting an unshared flat buffer
        let flat = encrypt(&key, BufChain::from_vec(payload), &aad(), &IV).unwrap();
        assert_eq!(sealed.to_vec(), flat.to_vec());
    }

    #[test]
    fn many_shared_fragments_copy_out_of_place() {
        // 4096-byte payload split over six shared fragments: more than the
        // unshare limit, so the kernel must allocate a single fresh output.
        let key = test_key(&AEAD_AES_128_GCM);
        let payload: Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();

        let chain = fragmented(&payload, 6);
        assert_eq!(chain.num_fragments(), 6);
        let alias = chain.clone();
        assert!(chain.shared_fragments() > MAX_SHARED_IN_CHAIN);

        let sealed = encrypt(&key, chain, &aad(), &IV).unwrap();
        assert_eq!(sealed.len(), 4096 + 16);

        // result written into a fresh allocation, not the aliased input
        assert_eq!(alias.to_vec(), payload);

        let flat = encrypt(&key, BufChain::from_vec(payload), &aad(), &IV).unwrap();
        assert_eq!(sealed.to_vec(), flat.to_vec());
    }

    #[test]
    fn decrypt_of_fragmented_ciphertext() {
        let key = test_key(&AEAD_CHACHA20_POLY1305);
        let payload: Vec<u8> = (0..777u32).map(|i| i as u8).collect();
        let sealed = encrypt(&key, BufChain::from_vec(payload.clone()), &aad(), &IV).unwrap();

        // re-fragment the wire bytes and alias them, as a receive path does
        let chain = fragmented(&sealed.to_vec(), 4);
        let _alias = chain.clone();
        let opened = decrypt(&key, chain, &aad(), &IV)
            .unwrap()
            .expect("authentic");
        assert_eq!(opened.to_vec(), payload);
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let key = test_key(&AEAD_AES_128_GCM);
        assert!(decrypt(&key, BufChain::from_vec(vec![0u8; 8]), &aad(), &IV)
            .unwrap()
            .is_none());
    }
}
