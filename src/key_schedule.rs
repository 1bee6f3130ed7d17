use crate::error::Error;
use crate::msgs::base::PayloadU8;
use crate::suites::AeadAlgorithm;

/// Key schedule maintenance for TLS 1.3
use ring::{
    digest::{self, Digest},
    hkdf::{self, KeyType as _},
    hmac,
};

/// The kinds of secret we can extract from `KeySchedule`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SecretKind {
    ResumptionPskBinderKey,
    ClientEarlyTrafficSecret,
    EarlyExporterMasterSecret,
    ClientHandshakeTrafficSecret,
    ServerHandshakeTrafficSecret,
    ClientApplicationTrafficSecret,
    ServerApplicationTrafficSecret,
    ExporterMasterSecret,
    ResumptionMasterSecret,
    DerivedSecret,
}

impl SecretKind {
    fn to_bytes(self) -> &'static [u8] {
        use self::SecretKind::*;
        match self {
            ResumptionPskBinderKey => b"res binder",
            ClientEarlyTrafficSecret => b"c e traffic",
            EarlyExporterMasterSecret => b"e exp master",
            ClientHandshakeTrafficSecret => b"c hs traffic",
            ServerHandshakeTrafficSecret => b"s hs traffic",
            ClientApplicationTrafficSecret => b"c ap traffic",
            ServerApplicationTrafficSecret => b"s ap traffic",
            ExporterMasterSecret => b"exp master",
            ResumptionMasterSecret => b"res master",
            DerivedSecret => b"derived",
        }
    }
}

/// This is the TLS 1.3 key schedule.  It stores the current secret and
/// the type of hash.  This isn't used directly; but only through the
/// typestates.
struct KeySchedule {
    current: hkdf::Prk,
    algorithm: hkdf::Algorithm,
}

// We express the state of a contained KeySchedule using these
// typestates.  This means we can write code that cannot accidentally
// (e.g.) encrypt application data using a KeySchedule solely constructed
// with an empty or trivial secret, or extract the wrong kind of secrets
// at a given point.

/// KeySchedule for early data stage.
pub struct KeyScheduleEarly {
    ks: KeySchedule,
}

impl KeyScheduleEarly {
    pub fn new(algorithm: hkdf::Algorithm, secret: &[u8]) -> Self {
        Self {
            ks: KeySchedule::new(algorithm, secret),
        }
    }

    pub fn client_early_traffic_secret(&self, hs_hash: &Digest) -> hkdf::Prk {
        self.ks
            .derive(self.ks.algorithm, SecretKind::ClientEarlyTrafficSecret, hs_hash.as_ref())
    }

    pub fn early_exporter_master_secret(&self, hs_hash: &Digest) -> Vec<u8> {
        self.ks
            .derive_raw(SecretKind::EarlyExporterMasterSecret, hs_hash.as_ref())
    }

    pub fn resumption_psk_binder_key_and_sign_verify_data(&self, hs_hash: &Digest) -> hmac::Tag {
        let resumption_psk_binder_key = self
            .ks
            .derive_for_empty_hash(SecretKind::ResumptionPskBinderKey);
        self.ks
            .sign_verify_data(&resumption_psk_binder_key, hs_hash)
    }
}

/// Pre-handshake key schedule
///
/// The inner `KeySchedule` is either constructed without any secrets based
/// on the HKDF algorithm, or is extracted from a `KeyScheduleEarly`.  This
/// can then be advanced into a `KeyScheduleHandshake`.
pub struct KeySchedulePreHandshake {
    ks: KeySchedule,
}

impl KeySchedulePreHandshake {
    pub fn new(algorithm: hkdf::Algorithm) -> Self {
        Self {
            ks: KeySchedule::new_with_empty_secret(algorithm),
        }
    }

    pub fn into_handshake(mut self, shared_secret: &[u8]) -> KeyScheduleHandshakeStart {
        self.ks.input_secret(shared_secret);
        KeyScheduleHandshakeStart { ks: self.ks }
    }
}

impl From<KeyScheduleEarly> for KeySchedulePreHandshake {
    fn from(KeyScheduleEarly { ks }: KeyScheduleEarly) -> Self {
        Self { ks }
    }
}

/// KeySchedule during the handshake, before the handshake traffic secrets
/// are derived.
pub struct KeyScheduleHandshakeStart {
    ks: KeySchedule,
}

impl KeyScheduleHandshakeStart {
    pub fn derive_handshake_secrets(
        self,
        hs_hash: &Digest,
    ) -> (KeyScheduleHandshake, hkdf::Prk, hkdf::Prk) {
        let client_secret: hkdf::Prk = self.ks.derive(
            self.ks.algorithm,
            SecretKind::ClientHandshakeTrafficSecret,
            hs_hash.as_ref(),
        );

        let server_secret: hkdf::Prk = self.ks.derive(
            self.ks.algorithm,
            SecretKind::ServerHandshakeTrafficSecret,
            hs_hash.as_ref(),
        );

        let new = KeyScheduleHandshake {
            ks: self.ks,
            client_handshake_traffic_secret: client_secret.clone(),
            server_handshake_traffic_secret: server_secret.clone(),
        };

        (new, client_secret, server_secret)
    }
}

pub struct KeyScheduleHandshake {
    ks: KeySchedule,
    client_handshake_traffic_secret: hkdf::Prk,
    server_handshake_traffic_secret: hkdf::Prk,
}

impl KeyScheduleHandshake {
    pub fn sign_server_finish(&self, hs_hash: &Digest) -> hmac::Tag {
        self.ks
            .sign_finish(&self.server_handshake_traffic_secret, hs_hash)
    }

    pub fn client_key(&self) -> &hkdf::Prk {
        &self.client_handshake_traffic_secret
    }

    /// Raw client handshake traffic secret, for the connection state's
    /// export surface.
    pub fn client_handshake_secret_bytes(&self, hs_hash: &Digest) -> Vec<u8> {
        self.ks
            .derive_raw(SecretKind::ClientHandshakeTrafficSecret, hs_hash.as_ref())
    }

    pub fn into_traffic_with_client_finished_pending(
        self,
        hs_hash: &Digest,
    ) -> (
        KeyScheduleTrafficWithClientFinishedPending,
        hkdf::Prk,
        hkdf::Prk,
    ) {
        let traffic = KeyScheduleTraffic::new(self.ks, hs_hash);

        let client_secret = traffic
            .current_client_traffic_secret
            .clone();
        let server_secret = traffic
            .current_server_traffic_secret
            .clone();

        let new = KeyScheduleTrafficWithClientFinishedPending {
            handshake_client_traffic_secret: self.client_handshake_traffic_secret,
            traffic,
        };

        (new, client_secret, server_secret)
    }
}

/// KeySchedule during traffic stage, retaining the ability to calculate the
/// client's finished verify_data.  The traffic stage key schedule can be
/// extracted from it through signing the client finished hash.
pub struct KeyScheduleTrafficWithClientFinishedPending {
    handshake_client_traffic_secret: hkdf::Prk,
    traffic: KeyScheduleTraffic,
}

impl KeyScheduleTrafficWithClientFinishedPending {
    pub fn client_key(&self) -> &hkdf::Prk {
        &self.handshake_client_traffic_secret
    }

    /// Raw exporter master secret, available as soon as the server
    /// Finished is sent.
    pub fn exporter_master_secret_bytes(&self, hs_hash: &Digest) -> Vec<u8> {
        self.traffic
            .exporter_master_secret_bytes(hs_hash)
    }

    pub fn sign_client_finish(self, hs_hash: &Digest) -> (KeyScheduleTraffic, hmac::Tag) {
        let tag = self
            .traffic
            .ks
            .sign_finish(&self.handshake_client_traffic_secret, hs_hash);

        (self.traffic, tag)
    }
}

/// KeySchedule during traffic stage.  All traffic & exporter keys are
/// guaranteed to be available.
pub struct KeyScheduleTraffic {
    ks: KeySchedule,
    current_client_traffic_secret: hkdf::Prk,
    current_server_traffic_secret: hkdf::Prk,
    current_exporter_secret: hkdf::Prk,
}

impl KeyScheduleTraffic {
    fn new(mut ks: KeySchedule, hs_hash: &Digest) -> Self {
        ks.input_empty();

        let current_client_traffic_secret = ks.derive(
            ks.algorithm,
            SecretKind::ClientApplicationTrafficSecret,
            hs_hash.as_ref(),
        );

        let current_server_traffic_secret = ks.derive(
            ks.algorithm,
            SecretKind::ServerApplicationTrafficSecret,
            hs_hash.as_ref(),
        );

        let current_exporter_secret = ks.derive(
            ks.algorithm,
            SecretKind::ExporterMasterSecret,
            hs_hash.as_ref(),
        );

        Self {
            ks,
            current_client_traffic_secret,
            current_server_traffic_secret,
            current_exporter_secret,
        }
    }

    /// Raw exporter master secret, for the connection state's export
    /// surface.
    pub fn exporter_master_secret_bytes(&self, hs_hash: &Digest) -> Vec<u8> {
        self.ks
            .derive_raw(SecretKind::ExporterMasterSecret, hs_hash.as_ref())
    }

    pub fn client_secret(&self) -> &hkdf::Prk {
        &self.current_client_traffic_secret
    }

    pub fn server_secret(&self) -> &hkdf::Prk {
        &self.current_server_traffic_secret
    }

    pub fn next_server_application_traffic_secret(&mut self) -> hkdf::Prk {
        let secret = self
            .ks
            .derive_next(&self.current_server_traffic_secret);
        self.current_server_traffic_secret = secret.clone();
        secret
    }

    pub fn next_client_application_traffic_secret(&mut self) -> hkdf::Prk {
        let secret = self
            .ks
            .derive_next(&self.current_client_traffic_secret);
        self.current_client_traffic_secret = secret.clone();
        secret
    }

    /// Raw resumption master secret over the full transcript.
    pub fn resumption_master_secret(&self, hs_hash: &Digest) -> Vec<u8> {
        self.ks
            .derive_raw(SecretKind::ResumptionMasterSecret, hs_hash.as_ref())
    }

    /// The PSK to seal into a ticket with `nonce`, per RFC 8446 section
    /// 4.6.1.
    pub fn derive_ticket_psk(&self, resumption_master_secret: &[u8], nonce: &[u8]) -> Vec<u8> {
        let rms: hkdf::Prk =
            hkdf::Prk::new_less_safe(self.ks.algorithm, resumption_master_secret);
        let payload: PayloadU8 = hkdf_expand(
            &rms,
            SecretLen(self.ks.algorithm.len()),
            b"resumption",
            nonce,
        );
        payload.into_inner()
    }

    pub fn export_keying_material(
        &self,
        out: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.ks
            .export_keying_material(&self.current_exporter_secret, out, label, context)
    }
}

impl KeySchedule {
    fn new(algorithm: hkdf::Algorithm, secret: &[u8]) -> Self {
        let zeroes = [0u8; digest::MAX_OUTPUT_LEN];
        let salt = hkdf::Salt::new(algorithm, &zeroes[..algorithm.len()]);
        Self {
            current: salt.extract(secret),
            algorithm,
        }
    }

    fn new_with_empty_secret(algorithm: hkdf::Algorithm) -> Self {
        let zeroes = [0u8; digest::MAX_OUTPUT_LEN];
        Self::new(algorithm, &zeroes[..algorithm.len()])
    }

    /// Input the empty secret.
    fn input_empty(&mut self) {
        let zeroes = [0u8; digest::MAX_OUTPUT_LEN];
        self.input_secret(&zeroes[..self.algorithm.len()]);
    }

    /// Input the given secret.
    fn input_secret(&mut self, secret: &[u8]) {
        let salt: hkdf::Salt = self.derive_for_empty_hash(SecretKind::DerivedSecret);
        self.current = salt.extract(secret);
    }

    /// Derive a secret of given `kind`, using current handshake hash `hs_hash`.
    fn derive<T, L>(&self, key_type: L, kind: SecretKind, hs_hash: &[u8]) -> T
    where
        T: for<'a> From<hkdf::Okm<'a, L>>,
        L: hkdf::KeyType,
    {
        hkdf_expand(&self.current, key_type, kind.to_bytes(), hs_hash)
    }

    /// Derive a secret of given `kind` as raw bytes.
    fn derive_raw(&self, kind: SecretKind, hs_hash: &[u8]) -> Vec<u8> {
        self.derive::<PayloadU8, _>(SecretLen(self.algorithm.len()), kind, hs_hash)
            .into_inner()
    }

    /// Derive a secret of given `kind` using the hash of the empty string
    /// for the handshake hash.  Useful only for
    /// `SecretKind::ResumptionPskBinderKey` and
    /// `SecretKind::DerivedSecret`.
    fn derive_for_empty_hash<T>(&self, kind: SecretKind) -> T
    where
        T: for<'a> From<hkdf::Okm<'a, hkdf::Algorithm>>,
    {
        let digest_alg = self
            .algorithm
            .hmac_algorithm()
            .digest_algorithm();
        let empty_hash = digest::digest(digest_alg, &[]);
        self.derive(self.algorithm, kind, empty_hash.as_ref())
    }

    /// Sign the finished message consisting of `hs_hash` using a current
    /// traffic secret.
    fn sign_finish(&self, base_key: &hkdf::Prk, hs_hash: &Digest) -> hmac::Tag {
        self.sign_verify_data(base_key, hs_hash)
    }

    /// Sign the finished message consisting of `hs_hash` using the key material
    /// `base_key`.
    fn sign_verify_data(&self, base_key: &hkdf::Prk, hs_hash: &Digest) -> hmac::Tag {
        let hmac_alg = self.algorithm.hmac_algorithm();
        let hmac_key = hkdf_expand(base_key, hmac_alg, b"finished", &[]);
        hmac::sign(&hmac_key, hs_hash.as_ref())
    }

    /// Derive the next application traffic secret, returning it.
    fn derive_next(&self, base_key: &hkdf::Prk) -> hkdf::Prk {
        hkdf_expand(base_key, self.algorithm, b"traffic upd", &[])
    }

    fn export_keying_material(
        &self,
        current_exporter_secret: &hkdf::Prk,
        out: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        let digest_alg = self
            .algorithm
            .hmac_algorithm()
            .digest_algorithm();

        let h_empty = digest::digest(digest_alg, &[]);
        let secret: hkdf::Prk = hkdf_expand(
            current_exporter_secret,
            self.algorithm,
            label,
            h_empty.as_ref(),
        );

        let h_context = digest::digest(digest_alg, context.unwrap_or(&[]));

        hkdf_expand_info(
            &secret,
            SecretLen(out.len()),
            b"exporter",
            h_context.as_ref(),
            |okm| okm.fill(out),
        )
        .map_err(|_| Error::General("exporting too much".to_string()))
    }
}

pub(crate) fn hkdf_expand<T, L>(secret: &hkdf::Prk, key_type: L, label: &[u8], context: &[u8]) -> T
where
    T: for<'a> From<hkdf::Okm<'a, L>>,
    L: hkdf::KeyType,
{
    hkdf_expand_info(secret, key_type, label, context, |okm| okm.into())
}

fn hkdf_expand_info<F, T, L>(
    secret: &hkdf::Prk,
    key_type: L,
    label: &[u8],
    context: &[u8],
    f: F,
) -> T
where
    F: for<'b> FnOnce(hkdf::Okm<'b, L>) -> T,
    L: hkdf::KeyType,
{
    const LABEL_PREFIX: &[u8] = b"tls13 ";

    let output_len = u16::to_be_bytes(key_type.len() as u16);
    let label_len = u8::to_be_bytes((LABEL_PREFIX.len() + label.len()) as u8);
    let context_len = u8::to_be_bytes(context.len() as u8);

    let info = &[
        &output_len[..],
        &label_len[..],
        LABEL_PREFIX,
        label,
        &context_len[..],
        context,
    ];
    let okm = secret.expand(info, key_type).unwrap();

    f(okm)
}

/// An `hkdf::KeyType` for a secret of dynamic length.
pub(crate) struct SecretLen(pub(crate) usize);

impl hkdf::KeyType for SecretLen {
    fn len(&self) -> usize {
        self.0
    }
}

impl From<hkdf::Okm<'_, SecretLen>> for PayloadU8 {
    fn from(okm: hkdf::Okm<'_, SecretLen>) -> Self {
        let mut r = vec![0u8; okm.len().0];
        okm.fill(&mut r[..]).unwrap();
        Self::new(r)
    }
}

/// A write or read IV.
#[derive(Clone)]
pub struct Iv(pub(crate) [u8; 12]);

impl Iv {
    pub fn new(value: [u8; 12]) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &[u8; 12] {
        &self.0
    }
}

pub(crate) struct IvLen;

impl hkdf::KeyType for IvLen {
    fn len(&self) -> usize {
        12
    }
}

impl From<hkdf::Okm<'_, IvLen>> for Iv {
    fn from(okm: hkdf::Okm<'_, IvLen>) -> Self {
        let mut r = Self(Default::default());
        okm.fill(&mut r.0[..]).unwrap();
        r
    }
}

/// Derive the AEAD key and IV for `secret`, per RFC 8446 section 7.3.
pub fn derive_traffic_keys(secret: &hkdf::Prk, aead: &'static AeadAlgorithm) -> (Vec<u8>, Iv) {
    let key: PayloadU8 = hkdf_expand(secret, SecretLen(aead.key_len), b"key", &[]);
    let iv: Iv = hkdf_expand(secret, IvLen, b"iv", &[]);
    (key.into_inner(), iv)
}
