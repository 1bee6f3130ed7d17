use crate::msgs::enums::CipherSuite;

use openssl::symm;

/// Bulk symmetric encryption scheme used by a cipher suite.
pub struct AeadAlgorithm {
    /// Key length in bytes.
    pub key_len: usize,

    /// Authentication tag length in bytes.
    pub tag_len: usize,

    /// Whether the cipher is operated in 16-byte block steps.
    ///
    /// AES-GCM's underlying block cipher may buffer up to one block of
    /// input inside the cipher context; ChaCha20-Poly1305 writes output
    /// byte-for-byte.
    pub block_mode: bool,

    cipher: fn() -> symm::Cipher,
}

impl AeadAlgorithm {
    pub(crate) fn cipher(&self) -> symm::Cipher {
        (self.cipher)()
    }
}

pub static AEAD_AES_128_GCM: AeadAlgorithm = AeadAlgorithm {
    key_len: 16,
    tag_len: 16,
    block_mode: true,
    cipher: symm::Cipher::aes_128_gcm,
};

pub static AEAD_AES_256_GCM: AeadAlgorithm = AeadAlgorithm {
    key_len: 32,
    tag_len: 16,
    block_mode: true,
    cipher: symm::Cipher::aes_256_gcm,
};

pub static AEAD_CHACHA20_POLY1305: AeadAlgorithm = AeadAlgorithm {
    key_len: 32,
    tag_len: 16,
    block_mode: false,
    cipher: symm::Cipher::chacha20_poly1305,
};

/// A TLS 1.3 cipher suite supported by seltzer.
pub struct Tls13CipherSuite {
    /// The TLS enumeration naming this cipher suite.
    pub suite: CipherSuite,

    /// How to complete HKDF with the suite's hash function.
    pub hkdf_algorithm: ring::hkdf::Algorithm,

    /// How to do bulk encryption.
    pub aead: &'static AeadAlgorithm,
}

impl Tls13CipherSuite {
    /// The hash function underlying this suite's HKDF and transcript.
    pub fn hash_algorithm(&self) -> &'static ring::digest::Algorithm {
        self.hkdf_algorithm
            .hmac_algorithm()
            .digest_algorithm()
    }

    /// Can a ticket issued under `prev` be resumed under this suite?
    ///
    /// RFC 8446 requires only that the hash functions agree.
    pub fn can_resume_from(&self, prev: &Tls13CipherSuite) -> bool {
        self.hash_algorithm() == prev.hash_algorithm()
    }
}

impl PartialEq for Tls13CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
    }
}

impl core::fmt::Debug for Tls13CipherSuite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tls13CipherSuite")
            .field("suite", &self.suite)
            .finish()
    }
}

/// TLS 1.3 with AES-128-GCM and SHA-256.
pub static TLS13_AES_128_GCM_SHA256: Tls13CipherSuite = Tls13CipherSuite {
    suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
    hkdf_algorithm: ring::hkdf::HKDF_SHA256,
    aead: &AEAD_AES_128_GCM,
};

/// TLS 1.3 with AES-256-GCM and SHA-384.
pub static TLS13_AES_256_GCM_SHA384: Tls13CipherSuite = Tls13CipherSuite {
    suite: CipherSuite::TLS13_AES_256_GCM_SHA384,
    hkdf_algorithm: ring::hkdf::HKDF_SHA384,
    aead: &AEAD_AES_256_GCM,
};

/// TLS 1.3 with ChaCha20-Poly1305 and SHA-256.
pub static TLS13_CHACHA20_POLY1305_SHA256: Tls13CipherSuite = Tls13CipherSuite {
    suite: CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    hkdf_algorithm: ring::hkdf::HKDF_SHA256,
    aead: &AEAD_CHACHA20_POLY1305,
};

/// A list of all the cipher suites supported by seltzer, in preference order.
pub static ALL_CIPHER_SUITES: [&Tls13CipherSuite; 3] = [
    &TLS13_AES_128_GCM_SHA256,
    &TLS13_AES_256_GCM_SHA384,
    &TLS13_CHACHA20_POLY1305_SHA256,
];

/// Find the first suite in `ours` (server preference order) that the client
/// also offered.
pub fn choose_ciphersuite_preferring_server(
    client_suites: &[CipherSuite],
    ours: &[&'static Tls13CipherSuite],
) -> Option<&'static Tls13CipherSuite> {
    ours.iter()
        .find(|suite| client_suites.contains(&suite.suite))
        .copied()
}

/// Return the suite description for `suite`, if we support it.
pub fn lookup_suite(
    suite: CipherSuite,
    ours: &[&'static Tls13CipherSuite],
) -> Option<&'static Tls13CipherSuite> {
    ours.iter()
        .find(|scs| scs.suite == suite)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_preference_wins() {
        let client = [
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
            CipherSuite::TLS13_AES_128_GCM_SHA256,
        ];
        let chosen = choose_ciphersuite_preferring_server(&client, &ALL_CIPHER_SUITES).unwrap();
        assert_eq!(chosen.suite, CipherSuite::TLS13_AES_128_GCM_SHA256);
    }

    #[test]
    fn no_overlap() {
        let client = [CipherSuite::TLS13_AES_128_CCM_SHA256];
        assert!(choose_ciphersuite_preferring_server(&client, &ALL_CIPHER_SUITES).is_none());
    }

    #[test]
    fn resumption_requires_same_hash() {
        assert!(TLS13_AES_128_GCM_SHA256.can_resume_from(&TLS13_CHACHA20_POLY1305_SHA256));
        assert!(!TLS13_AES_256_GCM_SHA384.can_resume_from(&TLS13_AES_128_GCM_SHA256));
    }
}
