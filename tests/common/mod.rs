//! A minimal TLS 1.3 client used to drive the server under test.
//!
//! It performs just enough of the protocol to exercise every server
//! path: key share generation, the full key schedule, record protection,
//! PSK binders and 0-RTT.  It does not verify the server certificate.

#![allow(dead_code)]

use seltzer::internal::hash_hs::{HandshakeHash, HandshakeHashBuffer};
use seltzer::internal::key_schedule::{
    KeyScheduleEarly, KeyScheduleHandshake, KeySchedulePreHandshake, KeyScheduleTraffic,
    KeyScheduleTrafficWithClientFinishedPending,
};
use seltzer::internal::kx::{KeyExchange, SupportedKxGroup, SECP256R1, SECP384R1, X25519};
use seltzer::internal::record_layer::{ReadRecordLayer, WriteRecordLayer};
use seltzer::internal::verify;
use seltzer::msgs::base::{Payload, PayloadU16, PayloadU8};
use seltzer::msgs::codec::Codec;
use seltzer::msgs::enums::{
    Compression, ExtensionType, HandshakeType, KeyUpdateRequest, ServerNameType,
};
use seltzer::msgs::handshake::{
    CertificateEntry, CertificatePayloadTls13, ClientExtension, ClientHelloPayload,
    DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload, KeyShareEntry,
    NewSessionTicketPayloadTls13, PresharedKeyIdentity, PresharedKeyOffer, Random,
    ServerExtension, ServerHelloPayload, ServerName, ServerNamePayload, SessionId,
};
use seltzer::msgs::hsjoiner::HandshakeJoiner;
use seltzer::msgs::message::{Message, MessagePayload};
use seltzer::{
    Action, AlertDescription, AsyncRequest, AsyncResult, BufChain, Certificate, CertifiedKey,
    CipherSuite, ContentType, Error, NamedGroup, PeerCert, PrivateKey, ProtocolVersion,
    PskKeyExchangeMode, ServerConfig, ServerConnection, SignatureScheme, TicketStore,
    Tls13CipherSuite, TLS13_AES_128_GCM_SHA256,
};

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};

use std::sync::Arc;
use std::time::SystemTime;

pub const TEST_ALPN_H2: &[u8] = b"h2";
pub const TEST_ALPN_HTTP11: &[u8] = b"http/1.1";

/// Make a server identity: an opaque "certificate" and an Ed25519 key.
///
/// The certificate bytes are never parsed by the core, so any value
/// works; verification is the driver's business.
pub fn server_identity() -> CertifiedKey {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    let key = seltzer::any_supported_type(&PrivateKey(pkcs8.as_ref().to_vec())).unwrap();
    CertifiedKey::new(vec![Certificate(b"test server certificate".to_vec())], key)
}

/// A client identity for client-auth tests.  The "certificate" carries
/// the raw Ed25519 public key, which the test verifier understands.
pub struct ClientIdentity {
    pub keypair: Ed25519KeyPair,
    pub chain: Vec<Certificate>,
}

impl ClientIdentity {
    pub fn new() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let keypair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8.as_ref()).unwrap();
        let chain = vec![Certificate(keypair.public_key().as_ref().to_vec())];
        Self { keypair, chain }
    }
}

/// The driver-side verified-certificate handle: the raw public key from
/// the test chain.
#[derive(Debug)]
pub struct TestPeerCert {
    chain: Vec<Certificate>,
}

impl PeerCert for TestPeerCert {
    fn verify_signature(
        &self,
        scheme: SignatureScheme,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        if scheme != SignatureScheme::ED25519 {
            return Err(Error::General("unexpected scheme".to_string()));
        }
        UnparsedPublicKey::new(&ED25519, &self.chain[0].0)
            .verify(message, signature)
            .map_err(|_| Error::General("bad signature".to_string()))
    }

    fn chain(&self) -> &[Certificate] {
        &self.chain
    }
}

/// Resolve the server's outstanding async request the way a driver
/// would, using the given ticket store.
pub fn answer_request(request: &AsyncRequest, store: &dyn TicketStore) -> AsyncResult {
    match request {
        AsyncRequest::TicketLookup { identity } => AsyncResult::Ticket(store.lookup(identity)),
        AsyncRequest::Sign { signer, message } => AsyncResult::Signature(signer.sign(message)),
        AsyncRequest::VerifyClientCert { chain } => {
            AsyncResult::ClientCert(Ok(Arc::new(TestPeerCert {
                chain: chain.clone(),
            })))
        }
        AsyncRequest::StoreTicket { state } => {
            AsyncResult::TicketStored(store.store(state.clone()))
        }
    }
}

/// Feed `input` to the server and resolve every suspension, collecting
/// all resulting actions.
pub fn drive(
    server: &mut ServerConnection,
    store: &dyn TicketStore,
    input: Vec<u8>,
) -> Result<Vec<Action>, Error> {
    let mut actions = server.read_tls(BufChain::from_vec(input))?;
    loop {
        let result = match server.pending_request() {
            Some(request) => answer_request(request, store),
            None => return Ok(actions),
        };
        actions.extend(server.resume(result)?);
    }
}

/// Collect all `WriteToSocket` bytes from a batch of actions.
pub fn wire_bytes(actions: &[Action]) -> Vec<u8> {
    let mut out = Vec::new();
    for action in actions {
        if let Action::WriteToSocket(bytes) = action {
            out.extend_from_slice(bytes);
        }
    }
    out
}

pub fn delivered_data(actions: &[Action]) -> Vec<u8> {
    let mut out = Vec::new();
    for action in actions {
        if let Action::DeliverAppData(bytes) = action {
            out.extend_from_slice(bytes);
        }
    }
    out
}

pub fn handshake_reported(actions: &[Action]) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, Action::ReportHandshakeSuccess))
}

pub fn early_success_reported(actions: &[Action]) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, Action::ReportEarlyHandshakeSuccess))
}

pub fn end_of_data_reported(actions: &[Action]) -> bool {
    actions
        .iter()
        .any(|a| matches!(a, Action::EndOfData))
}

pub fn reported_error(actions: &[Action]) -> Option<(Option<AlertDescription>, Error)> {
    actions.iter().find_map(|a| match a {
        Action::ReportError { alert, error } => Some((*alert, error.clone())),
        _ => None,
    })
}

fn kx_group(group: NamedGroup) -> &'static SupportedKxGroup {
    match group {
        NamedGroup::X25519 => &X25519,
        NamedGroup::secp256r1 => &SECP256R1,
        NamedGroup::secp384r1 => &SECP384R1,
        _ => panic!("unsupported test group {group:?}"),
    }
}

/// A resumption ticket as the client remembers it.
#[derive(Clone)]
pub struct ClientTicket {
    pub identity: Vec<u8>,
    pub secret: Vec<u8>,
    pub age_add: u32,
    pub received: SystemTime,
    pub max_early_data: u32,
    pub cipher_suite: CipherSuite,
}

/// What the test client should offer.
pub struct ClientOptions {
    pub groups: Vec<NamedGroup>,
    pub share_group: NamedGroup,
    pub alpn: Vec<Vec<u8>>,
    pub sni: Option<&'static str>,
    pub ticket: Option<ClientTicket>,
    pub offer_early_data: bool,
    pub identity: Option<ClientIdentity>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            groups: vec![NamedGroup::X25519],
            share_group: NamedGroup::X25519,
            alpn: vec![TEST_ALPN_H2.to_vec(), TEST_ALPN_HTTP11.to_vec()],
            sni: Some("localhost"),
            ticket: None,
            offer_early_data: false,
            identity: None,
        }
    }
}

/// What the client observed while processing a server flight.
#[derive(Default)]
pub struct ProcessResult {
    pub messages: Vec<HandshakeType>,
    pub alerts: Vec<Vec<u8>>,
    pub retry_group: Option<NamedGroup>,
    pub early_data_accepted: bool,
    pub server_finished: bool,
    pub server_cert: Vec<Certificate>,
}

/// The test client.
pub struct TestClient {
    pub options: ClientOptions,
    suite: &'static Tls13CipherSuite,
    kx: Option<KeyExchange>,
    transcript_buffer: Option<HandshakeHashBuffer>,
    transcript: Option<HandshakeHash>,

    read: ReadRecordLayer,
    write: Option<WriteRecordLayer>,
    hs_schedule: Option<KeyScheduleHandshake>,
    pending_client_finished: Option<KeyScheduleTrafficWithClientFinishedPending>,
    traffic: Option<KeyScheduleTraffic>,

    early_write: Option<WriteRecordLayer>,
    early_schedule: Option<KeyScheduleEarly>,

    deframe: BufChain,
    joiner: HandshakeJoiner,
    saw_certificate_request: bool,

    pub negotiated_alpn: Option<Vec<u8>>,
    pub tickets: Vec<ClientTicket>,
    pub received_app_data: Vec<u8>,
}

impl TestClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            suite: &TLS13_AES_128_GCM_SHA256,
            kx: None,
            transcript_buffer: Some(HandshakeHashBuffer::new()),
            transcript: None,
            read: ReadRecordLayer::plaintext(),
            write: None,
            hs_schedule: None,
            pending_client_finished: None,
            traffic: None,
            early_write: None,
            early_schedule: None,
            deframe: BufChain::new(),
            joiner: HandshakeJoiner::new(),
            saw_certificate_request: false,
            negotiated_alpn: None,
            tickets: Vec::new(),
            received_app_data: Vec::new(),
        }
    }

    fn hash_alg(&self) -> &'static ring::digest::Algorithm {
        self.suite.hash_algorithm()
    }

    fn transcript_hash_given(&self, extra: &[u8]) -> ring::digest::Digest {
        match (&self.transcript, &self.transcript_buffer) {
            (Some(transcript), _) => transcript.hash_given(extra),
            (None, Some(buffer)) => buffer.hash_given(self.hash_alg(), extra),
            _ => unreachable!(),
        }
    }

    fn transcript_add(&mut self, encoded: &[u8]) {
        match (&mut self.transcript, &mut self.transcript_buffer) {
            (Some(transcript), _) => {
                transcript.add(encoded);
            }
            (None, Some(buffer)) => buffer.add(encoded),
            _ => unreachable!(),
        }
    }

    /// Build and frame the ClientHello; also sets up 0-RTT keys if the
    /// options ask for early data.
    pub fn client_hello(&mut self) -> Vec<u8> {
        let kx = KeyExchange::start(kx_group(self.options.share_group)).unwrap();

        let mut extensions = vec![
            ClientExtension::SupportedVersions(vec![ProtocolVersion::TLSv1_3]),
            ClientExtension::NamedGroups(self.options.groups.clone()),
            ClientExtension::SignatureAlgorithms(vec![
                SignatureScheme::ED25519,
                SignatureScheme::ECDSA_NISTP256_SHA256,
            ]),
            ClientExtension::KeyShare(vec![KeyShareEntry::new(
                self.options.share_group,
                kx.pubkey.as_ref(),
            )]),
            ClientExtension::PresharedKeyModes(vec![PskKeyExchangeMode::PSK_DHE_KE]),
        ];

        if let Some(sni) = self.options.sni {
            extensions.insert(
                0,
                ClientExtension::ServerName(vec![ServerName {
                    typ: ServerNameType::HostName,
                    payload: ServerNamePayload::HostName(PayloadU16::new(
                        sni.as_bytes().to_vec(),
                    )),
                }]),
            );
        }

        if !self.options.alpn.is_empty() {
            extensions.push(ClientExtension::Protocols(
                self.options
                    .alpn
                    .iter()
                    .map(|proto| PayloadU8::new(proto.clone()))
                    .collect(),
            ));
        }

        if self.options.offer_early_data && self.options.ticket.is_some() {
            extensions.push(ClientExtension::EarlyData);
        }

        // psk extension must be last
        if let Some(ticket) = self.options.ticket.clone() {
            let age_ms = SystemTime::now()
                .duration_since(ticket.received)
                .unwrap_or_default()
                .as_millis() as u32;
            let obfuscated_age = age_ms.wrapping_add(ticket.age_add);
            extensions.push(ClientExtension::PresharedKey(PresharedKeyOffer::new(
                PresharedKeyIdentity::new(ticket.identity.clone(), obfuscated_age),
                vec![0u8; self.hash_alg().output_len],
            )));
        }

        let mut hello = ClientHelloPayload {
            client_version: ProtocolVersion::TLSv1_2,
            random: Random::new().unwrap(),
            session_id: SessionId::random().unwrap(),
            cipher_suites: vec![self.suite.suite],
            compression_methods: vec![Compression::Null],
            extensions,
        };

        // compute the real binder over the truncated encoding
        if let Some(ticket) = self.options.ticket.clone() {
            let early = KeyScheduleEarly::new(self.suite.hkdf_algorithm, &ticket.secret);
            let hmp = HandshakeMessagePayload {
                typ: HandshakeType::ClientHello,
                payload: HandshakePayload::ClientHello(hello.clone()),
            };
            let truncated = hmp.encoding_for_binder_signing();
            let binder_hash = self.transcript_hash_given(&truncated);
            let binder = early.resumption_psk_binder_key_and_sign_verify_data(&binder_hash);

            if let Some(ClientExtension::PresharedKey(offer)) = hello.extensions.last_mut() {
                offer.binders[0] = PayloadU8::new(binder.as_ref().to_vec());
            }
            self.early_schedule = Some(early);
        }

        let hmp = HandshakeMessagePayload {
            typ: HandshakeType::ClientHello,
            payload: HandshakePayload::ClientHello(hello),
        };
        let encoded = hmp.get_encoding();
        self.transcript_add(&encoded);

        // early traffic keys hang off the ClientHello hash
        if self.options.offer_early_data {
            if let Some(early) = &self.early_schedule {
                let chlo_hash = self.transcript_hash_given(&[]);
                let early_secret = early.client_early_traffic_secret(&chlo_hash);
                self.early_write =
                    Some(WriteRecordLayer::encrypted(self.suite, &early_secret));
            }
        }

        self.kx = Some(kx);

        let mut plaintext = WriteRecordLayer::plaintext();
        plaintext
            .write(ContentType::Handshake, &encoded)
            .unwrap()
    }

    /// Encrypt 0-RTT application data.
    pub fn early_data(&mut self, data: &[u8]) -> Vec<u8> {
        self.early_write
            .as_mut()
            .expect("early keys not set up")
            .write(ContentType::ApplicationData, data)
            .unwrap()
    }

    /// End the early data stream.  EndOfEarlyData travels under the early
    /// traffic key and joins the transcript.
    pub fn end_of_early_data(&mut self) -> Vec<u8> {
        let hmp = HandshakeMessagePayload {
            typ: HandshakeType::EndOfEarlyData,
            payload: HandshakePayload::EndOfEarlyData,
        };
        let encoded = hmp.get_encoding();
        self.transcript_add(&encoded);
        self.early_write
            .as_mut()
            .expect("early keys not set up")
            .write(ContentType::Handshake, &encoded)
            .unwrap()
    }

    /// Process a server flight, recording what was seen.
    pub fn process_server_flight(&mut self, bytes: Vec<u8>) -> ProcessResult {
        self.deframe.append(BufChain::from_vec(bytes));
        let mut result = ProcessResult::default();

        loop {
            let record = match self.read.read(&mut self.deframe) {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => panic!("client failed to read record: {err:?}"),
            };

            match record.typ {
                ContentType::ChangeCipherSpec => continue,
                ContentType::Alert => {
                    result.alerts.push(record.payload.clone());
                    continue;
                }
                ContentType::ApplicationData => {
                    self.received_app_data
                        .extend_from_slice(&record.payload);
                    continue;
                }
                ContentType::Handshake => {}
                typ => panic!("client got unexpected record {typ:?}"),
            }

            self.joiner.take_record(&record.payload).unwrap();
            while let Some(message) = self.joiner.next_message().unwrap() {
                self.process_handshake(message, &mut result);
            }
        }

        result
    }

    fn process_handshake(&mut self, message: Message, result: &mut ProcessResult) {
        let (parsed, encoded) = match message.payload {
            MessagePayload::Handshake { parsed, encoded } => (parsed, encoded),
            _ => unreachable!(),
        };
        result.messages.push(parsed.typ);

        match parsed.payload {
            HandshakePayload::ServerHello(sh) => self.process_server_hello(&sh, &encoded),
            HandshakePayload::HelloRetryRequest(hrr) => {
                // transcript substitution for our first ClientHello
                let buffer = self
                    .transcript_buffer
                    .take()
                    .expect("two HelloRetryRequests");
                let mut transcript = buffer.start_hash(self.hash_alg());
                transcript.rollup_for_hrr();
                transcript.add(&encoded);
                self.transcript = Some(transcript);
                result.retry_group = hrr.requested_key_share_group();
            }
            HandshakePayload::EncryptedExtensions(extensions) => {
                self.transcript_add(&encoded);
                for ext in &extensions {
                    if let ServerExtension::Protocols(protos) = ext {
                        self.negotiated_alpn = Some(protos[0].0.clone());
                    }
                    if ext.get_type() == ExtensionType::EarlyData {
                        result.early_data_accepted = true;
                    }
                }
            }
            HandshakePayload::CertificateRequestTls13(_) => {
                self.saw_certificate_request = true;
                self.transcript_add(&encoded);
            }
            HandshakePayload::CertificateTls13(payload) => {
                result.server_cert = payload.convert();
                self.transcript_add(&encoded);
            }
            HandshakePayload::CertificateVerify(_) => {
                self.transcript_add(&encoded);
            }
            HandshakePayload::Finished(payload) => {
                self.process_server_finished(&payload, &encoded);
                result.server_finished = true;
            }
            HandshakePayload::NewSessionTicketTls13(nst) => {
                self.process_ticket(&nst);
            }
            HandshakePayload::KeyUpdate(request) => {
                self.process_key_update(request);
            }
            other => panic!("client got unexpected handshake message {other:?}"),
        }
    }

    fn process_server_hello(&mut self, sh: &ServerHelloPayload, encoded: &[u8]) {
        let mut transcript = match self.transcript.take() {
            Some(transcript) => transcript,
            None => self
                .transcript_buffer
                .take()
                .unwrap()
                .start_hash(self.hash_alg()),
        };
        transcript.add(encoded);

        let share = sh.key_share().expect("server sent no key share");
        let kxr = self
            .kx
            .take()
            .unwrap()
            .complete(&share.payload.0)
            .expect("key exchange failed");

        let pre = match (sh.psk_index(), self.early_schedule.take()) {
            (Some(0), Some(early)) => KeySchedulePreHandshake::from(early),
            _ => KeySchedulePreHandshake::new(self.suite.hkdf_algorithm),
        };

        let hs_hash = transcript.current_hash();
        let (schedule, client_secret, server_secret) = pre
            .into_handshake(&kxr.shared_secret)
            .derive_handshake_secrets(&hs_hash);

        self.read = ReadRecordLayer::encrypted(self.suite, &server_secret);
        self.write = Some(WriteRecordLayer::encrypted(self.suite, &client_secret));
        self.hs_schedule = Some(schedule);
        self.transcript = Some(transcript);
    }

    fn process_server_finished(&mut self, payload: &Payload, encoded: &[u8]) {
        let schedule = self
            .hs_schedule
            .take()
            .expect("server finished with no handshake keys");

        // check the server's finished MAC
        let transcript = self.transcript.as_mut().unwrap();
        let expect = schedule.sign_server_finish(&transcript.current_hash());
        assert_eq!(
            expect.as_ref(),
            payload.0.as_slice(),
            "server Finished verify_data mismatch"
        );
        transcript.add(encoded);

        let hash_at_server_fin = transcript.current_hash();
        let (pending, _client_ap, server_ap) =
            schedule.into_traffic_with_client_finished_pending(&hash_at_server_fin);

        // the server's application traffic begins after its Finished
        self.read = ReadRecordLayer::encrypted(self.suite, &server_ap);
        self.pending_client_finished = Some(pending);
    }

    fn process_ticket(&mut self, nst: &NewSessionTicketPayloadTls13) {
        let traffic = self
            .traffic
            .as_ref()
            .expect("ticket before handshake completion");
        let transcript = self.transcript.as_ref().unwrap();
        let rms = traffic.resumption_master_secret(&transcript.current_hash());
        let secret = traffic.derive_ticket_psk(&rms, &nst.nonce.0);

        self.tickets.push(ClientTicket {
            identity: nst.ticket.0.clone(),
            secret,
            age_add: nst.age_add,
            received: SystemTime::now(),
            max_early_data: nst.max_early_data_size().unwrap_or(0),
            cipher_suite: self.suite.suite,
        });
    }

    fn process_key_update(&mut self, request: KeyUpdateRequest) {
        assert_eq!(request, KeyUpdateRequest::UpdateNotRequested);
        let schedule = self
            .traffic
            .as_mut()
            .expect("key update before traffic keys");
        let next = schedule.next_server_application_traffic_secret();
        self.read = ReadRecordLayer::encrypted(self.suite, &next);
    }

    /// Produce the client's authentication messages (if requested) and
    /// Finished, switching this client to traffic keys.
    pub fn client_finished(&mut self) -> Vec<u8> {
        let mut write = self.write.take().expect("no handshake write keys");
        let mut out = Vec::new();

        if self.saw_certificate_request {
            let identity = self
                .options
                .identity
                .take()
                .expect("server requested client auth without a test identity");

            let entries = identity
                .chain
                .iter()
                .cloned()
                .map(CertificateEntry::new)
                .collect();
            let cert = HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::CertificateTls13(CertificatePayloadTls13::new(entries)),
            };
            let encoded = cert.get_encoding();
            self.transcript_add(&encoded);
            out.extend(write.write(ContentType::Handshake, &encoded).unwrap());

            let message = verify::construct_tls13_client_verify_message(
                &self.transcript.as_ref().unwrap().current_hash(),
            );
            let sig = identity.keypair.sign(&message);
            let cv = HandshakeMessagePayload {
                typ: HandshakeType::CertificateVerify,
                payload: HandshakePayload::CertificateVerify(DigitallySignedStruct::new(
                    SignatureScheme::ED25519,
                    sig.as_ref().to_vec(),
                )),
            };
            let encoded = cv.get_encoding();
            self.transcript_add(&encoded);
            out.extend(write.write(ContentType::Handshake, &encoded).unwrap());
        }

        let pending = self
            .pending_client_finished
            .take()
            .expect("server finished not yet seen");
        let transcript = self.transcript.as_mut().unwrap();
        let (traffic, tag) = pending.sign_client_finish(&transcript.current_hash());

        let fin = HandshakeMessagePayload {
            typ: HandshakeType::Finished,
            payload: HandshakePayload::Finished(Payload::new(tag.as_ref().to_vec())),
        };
        let encoded = fin.get_encoding();
        transcript.add(&encoded);
        out.extend(write.write(ContentType::Handshake, &encoded).unwrap());

        // switch to application traffic keys
        self.write = Some(WriteRecordLayer::encrypted(
            self.suite,
            traffic.client_secret(),
        ));
        self.traffic = Some(traffic);

        out
    }

    /// A correct Finished with a KeyUpdate coalesced into the same
    /// handshake-key record, which must not survive the key change.
    pub fn client_finished_coalesced_with_key_update(&mut self) -> Vec<u8> {
        let mut write = self.write.take().expect("no handshake write keys");

        let pending = self
            .pending_client_finished
            .take()
            .expect("server finished not yet seen");
        let transcript = self.transcript.as_mut().unwrap();
        let (_traffic, tag) = pending.sign_client_finish(&transcript.current_hash());

        let fin = HandshakeMessagePayload {
            typ: HandshakeType::Finished,
            payload: HandshakePayload::Finished(Payload::new(tag.as_ref().to_vec())),
        };
        let mut body = fin.get_encoding();
        let key_update = HandshakeMessagePayload {
            typ: HandshakeType::KeyUpdate,
            payload: HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateNotRequested),
        };
        body.extend_from_slice(&key_update.get_encoding());

        write.write(ContentType::Handshake, &body).unwrap()
    }

    /// A tampered Finished: correct length, one bit flipped.
    pub fn client_finished_bad_mac(&mut self) -> Vec<u8> {
        let mut write = self.write.take().expect("no handshake write keys");

        let pending = self
            .pending_client_finished
            .take()
            .expect("server finished not yet seen");
        let transcript = self.transcript.as_mut().unwrap();
        let (_traffic, tag) = pending.sign_client_finish(&transcript.current_hash());

        let mut bad = tag.as_ref().to_vec();
        bad[0] ^= 0x01;
        let fin = HandshakeMessagePayload {
            typ: HandshakeType::Finished,
            payload: HandshakePayload::Finished(Payload::new(bad)),
        };
        write
            .write(ContentType::Handshake, &fin.get_encoding())
            .unwrap()
    }

    /// Encrypt application data under the client traffic keys.
    pub fn app_data(&mut self, data: &[u8]) -> Vec<u8> {
        self.write
            .as_mut()
            .expect("no traffic keys")
            .write(ContentType::ApplicationData, data)
            .unwrap()
    }

    /// Encrypt a close_notify alert under the client traffic keys.
    pub fn close_notify(&mut self) -> Vec<u8> {
        self.write
            .as_mut()
            .expect("no traffic keys")
            .write(ContentType::Alert, &[0x01, 0x00])
            .unwrap()
    }

    /// Encrypt a KeyUpdate requesting the server update too, then ratchet
    /// our own write keys.
    pub fn key_update_requested(&mut self) -> Vec<u8> {
        let hmp = HandshakeMessagePayload {
            typ: HandshakeType::KeyUpdate,
            payload: HandshakePayload::KeyUpdate(KeyUpdateRequest::UpdateRequested),
        };
        let wire = self
            .write
            .as_mut()
            .expect("no traffic keys")
            .write(ContentType::Handshake, &hmp.get_encoding())
            .unwrap();

        let schedule = self.traffic.as_mut().unwrap();
        let next = schedule.next_client_application_traffic_secret();
        self.write = Some(WriteRecordLayer::encrypted(self.suite, &next));
        wire
    }
}

/// A config whose collaborators are all in-memory test doubles.
pub fn test_config() -> (ServerConfig, Arc<seltzer::handy::ServerSessionMemoryCache>) {
    let store = Arc::new(seltzer::handy::ServerSessionMemoryCache::new(32));
    let mut config = ServerConfig::new(Arc::new(seltzer::handy::AlwaysResolvesChain::new(
        server_identity(),
    )));
    config.alpn_protocols = vec![TEST_ALPN_HTTP11.to_vec(), TEST_ALPN_H2.to_vec()];
    (config, store)
}
