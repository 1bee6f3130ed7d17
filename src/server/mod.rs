//! Server-side TLS 1.3 connection machinery.

use crate::buffer::BufChain;
use crate::error::{Error, PeerMisbehaved};
use crate::key::Certificate;
use crate::kx::SupportedKxGroup;
use crate::msgs::alert::AlertMessagePayload;
use crate::msgs::codec::Codec;
use crate::msgs::enums::{
    AlertDescription, AlertLevel, CipherSuite, ContentType, ExtensionType, HandshakeType,
    NamedGroup, ProtocolVersion, PskKeyExchangeMode, SignatureScheme,
};
use crate::msgs::handshake::{ClientHelloPayload, Random, ServerExtension};
use crate::msgs::hsjoiner::HandshakeJoiner;
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist::ResumptionState;
use crate::record_layer::{EncryptedReadRecordLayer, ReadRecordLayer, WriteRecordLayer};
use crate::sign::{CertifiedKey, Signer};
use crate::suites::Tls13CipherSuite;
use crate::verify::PeerCert;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

macro_rules! require_handshake_msg {
    ($m:expr, $handshake_type:path, $payload_type:path) => {
        match &$m.payload {
            crate::msgs::message::MessagePayload::Handshake {
                parsed:
                    crate::msgs::handshake::HandshakeMessagePayload {
                        payload: $payload_type(body),
                        ..
                    },
                ..
            } => Ok(body),
            _ => Err(crate::error::Error::InappropriateHandshakeMessage {
                expect_types: vec![$handshake_type],
                got_type: $m.handshake_type_received(),
            }),
        }
    };
}

pub mod handy;
mod hs;
mod tls13;

impl Message {
    pub(crate) fn handshake_type_received(&self) -> HandshakeType {
        match &self.payload {
            MessagePayload::Handshake { parsed, .. } => parsed.typ,
            _ => HandshakeType::Unknown(0),
        }
    }
}

/// The current stage of a connection, fixed by the last transition.
///
/// `Closed` and `Error` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakePhase {
    Uninitialized,
    ExpectingClientHello,
    ExpectingCertificate,
    ExpectingCertificateVerify,
    AcceptingEarlyData,
    ExpectingFinished,
    AcceptingData,
    ExpectingCloseNotify,
    Closed,
    Error,
}

/// How the PSK negotiation on this connection went.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PskType {
    NotAttempted,
    Rejected,
    Resumption,
    External,
}

/// Which key exchange flow was used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyExchangeType {
    None,
    Normal,
    HelloRetry,
}

/// How the early-data offer on this connection went.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EarlyDataType {
    NotAttempted,
    Rejected,
    Accepted,
    Replay,
}

/// The replay cache's verdict on a PSK binder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplayCacheResult {
    Accepted,
    Duplicate,
    Unknown,
}

/// What a transition asks the driver to do.
///
/// Actions of one transition are applied in emission order; key installs
/// are internal to the connection and always precede any `WriteToSocket`
/// that uses the new key.
#[derive(Debug)]
pub enum Action {
    /// Send these bytes to the peer.
    WriteToSocket(Vec<u8>),

    /// Both directions carry application traffic keys; the handshake is
    /// complete.
    ReportHandshakeSuccess,

    /// Early data was accepted; data may flow before the client Finished.
    ReportEarlyHandshakeSuccess,

    /// Plaintext application data from the peer.
    DeliverAppData(Vec<u8>),

    /// The connection failed.  `alert` is what should go on the wire (it
    /// has already been written if the record layer was usable).
    ReportError {
        alert: Option<AlertDescription>,
        error: Error,
    },

    /// The peer closed the connection cleanly.
    EndOfData,

    /// Nothing more can happen until more bytes arrive.
    WaitForData,
}

/// An asynchronous operation a transition is suspended on.
///
/// The connection refuses further input until the driver answers with
/// [`ServerConnection::resume`].
pub enum AsyncRequest {
    /// Look up a session ticket; answer with `AsyncResult::Ticket`.
    TicketLookup { identity: Vec<u8> },

    /// Verify the client's certificate chain; answer with
    /// `AsyncResult::ClientCert`.
    VerifyClientCert { chain: Vec<Certificate> },

    /// Produce a signature over `message` with `signer`; answer with
    /// `AsyncResult::Signature`.
    Sign {
        signer: Box<dyn Signer>,
        message: Vec<u8>,
    },

    /// Store resumption state, producing an opaque ticket; answer with
    /// `AsyncResult::TicketStored`.
    StoreTicket { state: ResumptionState },
}

impl fmt::Debug for AsyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TicketLookup { identity } => f
                .debug_struct("TicketLookup")
                .field("identity_len", &identity.len())
                .finish(),
            Self::VerifyClientCert { chain } => f
                .debug_struct("VerifyClientCert")
                .field("chain_len", &chain.len())
                .finish(),
            Self::Sign { message, .. } => f
                .debug_struct("Sign")
                .field("message_len", &message.len())
                .finish(),
            Self::StoreTicket { .. } => f.debug_struct("StoreTicket").finish(),
        }
    }
}

/// The driver's answer to an [`AsyncRequest`].
#[derive(Debug)]
pub enum AsyncResult {
    Ticket(Option<ResumptionState>),
    ClientCert(Result<Arc<dyn PeerCert>, Error>),
    Signature(Result<Vec<u8>, Error>),
    TicketStored(Option<Vec<u8>>),
}

/// How this server treats client authentication.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientAuthPolicy {
    /// Never request a client certificate.
    Off,

    /// Request one; `mandatory` controls whether an empty Certificate
    /// message fails the handshake.
    Requested { mandatory: bool },
}

/// How the certificate resolver sees the ClientHello.
pub struct ClientHello<'a> {
    pub server_name: Option<&'a str>,
    pub signature_schemes: &'a [SignatureScheme],
    pub alpn: Option<Vec<&'a [u8]>>,
}

/// Chooses the server identity to present to a client.
pub trait ResolvesServerCert: Send + Sync {
    /// Choose a certificate chain and matching key given our view of the
    /// ClientHello.  `None` aborts the handshake.
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>>;
}

/// Anti-replay for early data, shared across connections.
pub trait ReplayCache: Send + Sync {
    /// Record `binder` and report whether it has been seen before.
    fn check(&self, binder: &[u8]) -> ReplayCacheResult;
}

/// Application hook judging whether the token sealed into a ticket still
/// permits early data.
pub trait AppTokenValidator: Send + Sync {
    fn validate(&self, state: &ResumptionState) -> bool;
}

/// Session ticket persistence, shared across connections.
///
/// The connection core never calls this directly: lookups and stores are
/// surfaced as [`AsyncRequest`]s so the driver may run them wherever it
/// likes.  This trait is the natural shape for a driver-side
/// implementation, and [`handy::ServerSessionMemoryCache`] provides one.
pub trait TicketStore: Send + Sync {
    fn lookup(&self, identity: &[u8]) -> Option<ResumptionState>;
    fn store(&self, state: ResumptionState) -> Option<Vec<u8>>;
}

/// Supplies additional EncryptedExtensions entries.  Shared and immutable
/// after installation.
pub trait ServerExtensionsHook: Send + Sync {
    fn encrypted_extensions(&self, hello: &ClientHelloPayload) -> Vec<ServerExtension>;
}

/// ClientHello facts captured for diagnostics.  Not guaranteed to be
/// present, and never consulted for correctness.
#[derive(Clone, Debug, Default)]
pub struct HandshakeLogging {
    pub client_legacy_version: Option<ProtocolVersion>,
    pub client_supported_versions: Vec<ProtocolVersion>,
    pub client_ciphers: Vec<CipherSuite>,
    pub client_extensions: Vec<ExtensionType>,
    pub client_sni: Option<String>,
    pub client_supported_groups: Vec<NamedGroup>,
    pub client_key_shares: Vec<NamedGroup>,
    pub client_key_exchange_modes: Vec<PskKeyExchangeMode>,
    pub client_signature_algorithms: Vec<SignatureScheme>,
    pub client_session_id_sent: Option<bool>,
    pub client_random: Option<Random>,
}

/// Common configuration for a set of server sessions.
pub struct ServerConfig {
    /// List of ciphersuites, in preference order.
    pub cipher_suites: Vec<&'static Tls13CipherSuite>,

    /// List of supported key exchange groups, in preference order.
    pub kx_groups: Vec<&'static SupportedKxGroup>,

    /// Protocol names we support, most preferred first.  If empty we don't
    /// do ALPN.
    pub alpn_protocols: Vec<Vec<u8>>,

    /// How to choose our server identity.
    pub cert_resolver: Arc<dyn ResolvesServerCert>,

    /// Whether to request client authentication.
    pub client_auth: ClientAuthPolicy,

    /// Early data permitted per resumed connection; zero disables 0-RTT.
    pub max_early_data_size: u32,

    /// How many session tickets to issue after each handshake.
    pub send_tickets: usize,

    /// Advertised ticket lifetime, in seconds.
    pub ticket_lifetime: u32,

    /// Emit a compatibility change_cipher_spec record after ServerHello.
    pub send_ccs: bool,

    /// Pad outgoing records up to a multiple of this size; zero disables.
    pub record_padding: usize,

    /// Anti-replay for early data.
    pub replay_cache: Arc<dyn ReplayCache>,

    /// Early-data admission hook.
    pub app_token_validator: Arc<dyn AppTokenValidator>,

    /// Producer of extra EncryptedExtensions entries.
    pub extensions_hook: Option<Arc<dyn ServerExtensionsHook>>,
}

impl ServerConfig {
    /// A config with safe defaults: all supported suites and groups, no
    /// ALPN, no client auth, no early data, one ticket.
    pub fn new(cert_resolver: Arc<dyn ResolvesServerCert>) -> Self {
        Self {
            cipher_suites: crate::suites::ALL_CIPHER_SUITES.to_vec(),
            kx_groups: crate::kx::ALL_KX_GROUPS.to_vec(),
            alpn_protocols: Vec::new(),
            cert_resolver,
            client_auth: ClientAuthPolicy::Off,
            max_early_data_size: 0,
            send_tickets: 1,
            ticket_lifetime: 6 * 60 * 60,
            send_ccs: true,
            record_padding: 0,
            replay_cache: Arc::new(handy::NoReplayProtection),
            app_token_validator: Arc::new(handy::AcceptAnyAppToken),
            extensions_hook: None,
        }
    }
}

/// Everything a connection knows outside the per-phase state structs.
///
/// Negotiated parameters are populated exactly once, at the transition
/// that decides them, and never change afterwards.
pub(crate) struct CommonState {
    pub(crate) phase: HandshakePhase,

    pub(crate) version: Option<ProtocolVersion>,
    pub(crate) suite: Option<&'static Tls13CipherSuite>,
    pub(crate) named_group: Option<NamedGroup>,
    pub(crate) sig_scheme: Option<SignatureScheme>,
    pub(crate) psk_type: Option<PskType>,
    pub(crate) psk_mode: Option<PskKeyExchangeMode>,
    pub(crate) key_exchange_type: Option<KeyExchangeType>,
    pub(crate) early_data_type: Option<EarlyDataType>,
    pub(crate) alpn: Option<Vec<u8>>,
    pub(crate) replay_cache_result: Option<ReplayCacheResult>,

    pub(crate) read_record_layer: ReadRecordLayer,
    pub(crate) write_record_layer: WriteRecordLayer,

    // The handshake read record layer, parked here while accepting early
    // data.
    pub(crate) handshake_read_record_layer: Option<EncryptedReadRecordLayer>,

    pub(crate) joiner: HandshakeJoiner,

    pub(crate) server_cert: Option<Arc<Vec<Certificate>>>,
    pub(crate) client_cert: Option<Arc<dyn PeerCert>>,

    pub(crate) client_handshake_secret: Option<Vec<u8>>,
    pub(crate) resumption_master_secret: Option<Vec<u8>>,
    pub(crate) early_exporter_master_secret: Option<Vec<u8>>,
    pub(crate) exporter_master_secret: Option<Vec<u8>>,

    pub(crate) handshake_logging: Option<HandshakeLogging>,
    pub(crate) handshake_time: Option<SystemTime>,
    pub(crate) client_clock_skew_ms: Option<i64>,
    pub(crate) sni: Option<String>,

    pub(crate) early_data_remaining: u32,
}

impl CommonState {
    fn new() -> Self {
        Self {
            phase: HandshakePhase::Uninitialized,
            version: None,
            suite: None,
            named_group: None,
            sig_scheme: None,
            psk_type: None,
            psk_mode: None,
            key_exchange_type: None,
            early_data_type: None,
            alpn: None,
            replay_cache_result: None,
            read_record_layer: ReadRecordLayer::plaintext(),
            write_record_layer: WriteRecordLayer::plaintext(),
            handshake_read_record_layer: None,
            joiner: HandshakeJoiner::new(),
            server_cert: None,
            client_cert: None,
            client_handshake_secret: None,
            resumption_master_secret: None,
            early_exporter_master_secret: None,
            exporter_master_secret: None,
            handshake_logging: None,
            handshake_time: None,
            client_clock_skew_ms: None,
            sni: None,
            early_data_remaining: 0,
        }
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        !matches!(
            self.phase,
            HandshakePhase::AcceptingData
                | HandshakePhase::ExpectingCloseNotify
                | HandshakePhase::Closed
                | HandshakePhase::Error
        )
    }

    /// Handshake messages must not span a key change (RFC 8446 section
    /// 5.1): any buffered handshake bytes at a key install were received
    /// under the outgoing keys.
    pub(crate) fn check_aligned_handshake(&self) -> Result<(), Error> {
        match self.joiner.is_mid_message() {
            true => Err(PeerMisbehaved::KeyEpochWithPendingFragment.into()),
            false => Ok(()),
        }
    }
}

/// Populate a decided-once field; a second write means a transition bug.
pub(crate) fn set_once<T>(slot: &mut Option<T>, value: T) {
    debug_assert!(slot.is_none());
    *slot = Some(value);
}

/// What a transition hands back: the next state, or a suspension awaiting
/// an asynchronous collaborator.
pub(crate) enum NextState {
    Advance(Box<dyn State>),
    Suspend(Pending),
}

pub(crate) type NextStateOrError = Result<NextState, Error>;

/// A suspended transition: the request the driver must answer, and the
/// continuation that finishes the transition.
pub(crate) struct Pending {
    pub(crate) request: AsyncRequest,
    pub(crate) resume: Box<dyn FnOnce(&mut Context<'_>, AsyncResult) -> NextStateOrError + Send>,
}

pub(crate) trait State: Send {
    fn handle(self: Box<Self>, cx: &mut Context<'_>, message: Message) -> NextStateOrError;

    /// The application asked for a (further) session ticket.
    fn send_ticket(self: Box<Self>, _cx: &mut Context<'_>) -> NextStateOrError {
        Err(Error::HandshakeNotComplete)
    }

    fn export_keying_material(
        &self,
        _output: &mut [u8],
        _label: &[u8],
        _context: Option<&[u8]>,
    ) -> Result<(), Error> {
        Err(Error::HandshakeNotComplete)
    }
}

/// Per-transition working context.
pub(crate) struct Context<'a> {
    pub(crate) common: &'a mut CommonState,
    pub(crate) config: &'a Arc<ServerConfig>,
    pub(crate) actions: &'a mut Vec<Action>,
}

impl Context<'_> {
    /// Frame and queue one message for the peer, under whatever protection
    /// the write record layer currently has.
    pub(crate) fn send_msg(&mut self, m: &Message) -> Result<(), Error> {
        let mut body = Vec::new();
        m.payload.encode(&mut body);
        let wire = self
            .common
            .write_record_layer
            .write(m.payload.content_type(), &body)?;
        self.actions.push(Action::WriteToSocket(wire));
        Ok(())
    }
}

/// A single server-side TLS 1.3 connection.
///
/// The driver feeds wire bytes in with [`read_tls`], performs any
/// [`AsyncRequest`] surfaced by [`pending_request`], and applies the
/// returned [`Action`]s in order.
///
/// [`read_tls`]: ServerConnection::read_tls
/// [`pending_request`]: ServerConnection::pending_request
pub struct ServerConnection {
    config: Arc<ServerConfig>,
    common: CommonState,
    state: Option<Box<dyn State>>,
    pending: Option<Pending>,
    deframe: BufChain,

    // Actions held back while a transition is suspended; released in
    // emission order when it completes.
    staged: Vec<Action>,
}

impl ServerConnection {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            common: CommonState::new(),
            state: None,
            pending: None,
            deframe: BufChain::new(),
            staged: Vec::new(),
        }
    }

    /// Begin accepting a connection; the next event must be a ClientHello.
    pub fn accept(&mut self) -> Result<(), Error> {
        if self.common.phase != HandshakePhase::Uninitialized {
            return Err(Error::General("accept() called twice".to_string()));
        }
        self.common.phase = HandshakePhase::ExpectingClientHello;
        self.state = Some(Box::new(hs::ExpectClientHello::new()));
        Ok(())
    }

    /// The asynchronous operation the connection is suspended on, if any.
    pub fn pending_request(&self) -> Option<&AsyncRequest> {
        self.pending.as_ref().map(|p| &p.request)
    }

    /// Feed bytes received from the peer.
    pub fn read_tls(&mut self, input: impl Into<BufChain>) -> Result<Vec<Action>, Error> {
        if self.pending.is_some() {
            return Err(Error::OperationPending);
        }
        self.deframe.append(input.into());
        self.process_buffered()
    }

    /// Complete the outstanding asynchronous operation.
    pub fn resume(&mut self, result: AsyncResult) -> Result<Vec<Action>, Error> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| Error::General("no outstanding operation".to_string()))?;

        let mut actions = std::mem::take(&mut self.staged);
        let mut cx = Context {
            common: &mut self.common,
            config: &self.config,
            actions: &mut actions,
        };
        let outcome = (pending.resume)(&mut cx, result);
        self.apply_outcome(outcome, &mut actions);

        if self.pending.is_some() {
            self.staged = actions;
            return Ok(Vec::new());
        }

        // the resumed transition may have unblocked buffered input
        self.staged = actions;
        self.process_buffered()
    }

    /// Write application data to the peer.
    ///
    /// Permitted from the moment our application write keys are installed
    /// (after our Finished is sent), which allows data to accompany the
    /// first flight on resumed connections.
    pub fn write_app_data(&mut self, data: &[u8]) -> Result<Vec<Action>, Error> {
        if self.pending.is_some() {
            return Err(Error::OperationPending);
        }
        match self.common.phase {
            HandshakePhase::AcceptingEarlyData
            | HandshakePhase::ExpectingCertificate
            | HandshakePhase::ExpectingCertificateVerify
            | HandshakePhase::ExpectingFinished
            | HandshakePhase::AcceptingData => {}
            _ => return Err(Error::HandshakeNotComplete),
        }

        let wire = self
            .common
            .write_record_layer
            .write_chunked(ContentType::ApplicationData, data)?;
        Ok(vec![Action::WriteToSocket(wire)])
    }

    /// Close the write direction with a close_notify alert.
    pub fn send_close_notify(&mut self) -> Result<Vec<Action>, Error> {
        if self.pending.is_some() {
            return Err(Error::OperationPending);
        }
        if self.common.phase != HandshakePhase::AcceptingData {
            return Err(Error::HandshakeNotComplete);
        }

        let mut actions = Vec::new();
        self.queue_alert(AlertLevel::Warning, AlertDescription::CloseNotify, &mut actions);
        self.common.phase = HandshakePhase::ExpectingCloseNotify;
        Ok(actions)
    }

    /// Issue one further session ticket.
    pub fn send_new_session_ticket(&mut self) -> Result<Vec<Action>, Error> {
        if self.pending.is_some() {
            return Err(Error::OperationPending);
        }
        let state = self
            .state
            .take()
            .ok_or(Error::HandshakeNotComplete)?;

        let mut actions = Vec::new();
        let mut cx = Context {
            common: &mut self.common,
            config: &self.config,
            actions: &mut actions,
        };
        let outcome = state.send_ticket(&mut cx);
        self.apply_outcome(outcome, &mut actions);

        if self.pending.is_some() {
            self.staged = actions;
            return Ok(Vec::new());
        }
        Ok(actions)
    }

    /// RFC 8446 section 7.5 exported keying material.
    pub fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        match &self.state {
            Some(state) => state.export_keying_material(output, label, context),
            None => Err(Error::HandshakeNotComplete),
        }
    }

    fn process_buffered(&mut self) -> Result<Vec<Action>, Error> {
        let mut actions = std::mem::take(&mut self.staged);

        loop {
            if matches!(
                self.common.phase,
                HandshakePhase::Closed | HandshakePhase::Error
            ) {
                // terminal; discard the rest of the input
                self.deframe = BufChain::new();
                break;
            }
            if self.pending.is_some() {
                // suspended: hold both input and actions
                self.staged = actions;
                return Ok(Vec::new());
            }

            // a record may carry several handshake messages; drain the
            // joiner before framing the next record
            match self.common.joiner.next_message() {
                Ok(Some(message)) => {
                    if let Err(err) = self.deliver_to_state(message, &mut actions) {
                        self.fail(err, &mut actions);
                        break;
                    }
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    self.fail(err, &mut actions);
                    break;
                }
            }

            let record = match self.common.read_record_layer.read(&mut self.deframe) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    if self.common.is_handshaking() {
                        actions.push(Action::WaitForData);
                    }
                    break;
                }
                Err(err) => {
                    self.fail(err, &mut actions);
                    break;
                }
            };

            if let Err(err) = self.dispatch_record(record.typ, record.payload, &mut actions) {
                self.fail(err, &mut actions);
                break;
            }
        }

        Ok(actions)
    }

    fn dispatch_record(
        &mut self,
        typ: ContentType,
        payload: Vec<u8>,
        actions: &mut Vec<Action>,
    ) -> Result<(), Error> {
        // a fractured handshake message admits no interleaving
        if typ != ContentType::Handshake && self.common.joiner.is_mid_message() {
            return Err(PeerMisbehaved::MessageInterleavedWithHandshakeMessage.into());
        }

        match typ {
            ContentType::ChangeCipherSpec => {
                // middlebox compatibility; tolerated during the handshake
                if self.common.is_handshaking() {
                    log::trace!("ignoring compatibility change_cipher_spec");
                    Ok(())
                } else {
                    Err(Error::InappropriateMessage {
                        expect_types: vec![ContentType::ApplicationData],
                        got_type: typ,
                    })
                }
            }
            ContentType::Alert => self.handle_alert(&payload, actions),
            ContentType::Handshake => {
                if self.common.phase == HandshakePhase::ExpectingCloseNotify {
                    // we are draining towards close; ignore
                    return Ok(());
                }
                // joined messages are delivered by the caller's loop
                self.common.joiner.take_record(&payload)
            }
            ContentType::ApplicationData => {
                if self.common.phase == HandshakePhase::ExpectingCloseNotify {
                    return Ok(());
                }
                let message = Message {
                    version: ProtocolVersion::TLSv1_3,
                    payload: MessagePayload::ApplicationData(crate::msgs::base::Payload(payload)),
                };
                self.deliver_to_state(message, actions)
            }
            _ => Err(Error::InappropriateMessage {
                expect_types: vec![
                    ContentType::Handshake,
                    ContentType::ApplicationData,
                    ContentType::Alert,
                ],
                got_type: typ,
            }),
        }
    }

    fn deliver_to_state(
        &mut self,
        message: Message,
        actions: &mut Vec<Action>,
    ) -> Result<(), Error> {
        let state = match self.state.take() {
            Some(state) => state,
            None => {
                return Err(Error::InappropriateMessage {
                    expect_types: vec![],
                    got_type: message.payload.content_type(),
                })
            }
        };

        let mut cx = Context {
            common: &mut self.common,
            config: &self.config,
            actions,
        };
        let outcome = state.handle(&mut cx, message);
        match outcome {
            Ok(NextState::Advance(next)) => {
                self.state = Some(next);
                Ok(())
            }
            Ok(NextState::Suspend(pending)) => {
                self.pending = Some(pending);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn apply_outcome(&mut self, outcome: NextStateOrError, actions: &mut Vec<Action>) {
        match outcome {
            Ok(NextState::Advance(next)) => {
                self.state = Some(next);
            }
            Ok(NextState::Suspend(pending)) => {
                self.pending = Some(pending);
            }
            Err(err) => self.fail(err, actions),
        }
    }

    fn handle_alert(&mut self, payload: &[u8], actions: &mut Vec<Action>) -> Result<(), Error> {
        let alert = AlertMessagePayload::read_bytes(payload)?;
        log::trace!("received alert {:?}", alert);

        if alert.description == AlertDescription::CloseNotify {
            if self.common.phase == HandshakePhase::AcceptingData {
                self.queue_alert(AlertLevel::Warning, AlertDescription::CloseNotify, actions);
            }
            actions.push(Action::EndOfData);
            self.common.phase = HandshakePhase::Closed;
            self.state = None;
            return Ok(());
        }

        if alert.level == AlertLevel::Warning {
            log::warn!("peer sent warning alert {:?}", alert.description);
            return Ok(());
        }

        Err(Error::AlertReceived(alert.description))
    }

    /// Transition to the terminal error state: send the mapped alert if
    /// the wire is still usable, and report the failure.
    fn fail(&mut self, error: Error, actions: &mut Vec<Action>) {
        let alert = AlertDescription::try_from(&error).ok();

        if let Some(alert) = alert {
            self.queue_alert(AlertLevel::Fatal, alert, actions);
        }

        actions.push(Action::ReportError { alert, error });
        self.common.phase = HandshakePhase::Error;
        self.state = None;
        self.pending = None;
    }

    fn queue_alert(
        &mut self,
        level: AlertLevel,
        description: AlertDescription,
        actions: &mut Vec<Action>,
    ) {
        let alert = AlertMessagePayload { level, description };
        if let Ok(wire) = self
            .common
            .write_record_layer
            .write(ContentType::Alert, &alert.get_encoding())
        {
            actions.push(Action::WriteToSocket(wire));
        }
    }
}

// Read-only views of negotiated state.
impl ServerConnection {
    pub fn phase(&self) -> HandshakePhase {
        self.common.phase
    }

    pub fn is_handshaking(&self) -> bool {
        self.common.is_handshaking()
    }

    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.common.version
    }

    pub fn negotiated_cipher_suite(&self) -> Option<&'static Tls13CipherSuite> {
        self.common.suite
    }

    pub fn negotiated_group(&self) -> Option<NamedGroup> {
        self.common.named_group
    }

    pub fn signature_scheme(&self) -> Option<SignatureScheme> {
        self.common.sig_scheme
    }

    pub fn psk_type(&self) -> Option<PskType> {
        self.common.psk_type
    }

    pub fn psk_mode(&self) -> Option<PskKeyExchangeMode> {
        self.common.psk_mode
    }

    pub fn key_exchange_type(&self) -> Option<KeyExchangeType> {
        self.common.key_exchange_type
    }

    pub fn early_data_type(&self) -> Option<EarlyDataType> {
        self.common.early_data_type
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.common.alpn.as_deref()
    }

    pub fn replay_cache_result(&self) -> Option<ReplayCacheResult> {
        self.common.replay_cache_result
    }

    pub fn sni_hostname(&self) -> Option<&str> {
        self.common.sni.as_deref()
    }

    pub fn server_cert(&self) -> Option<&Arc<Vec<Certificate>>> {
        self.common.server_cert.as_ref()
    }

    pub fn client_cert(&self) -> Option<&Arc<dyn PeerCert>> {
        self.common.client_cert.as_ref()
    }

    /// How far the client's clock appeared to be from ours, judged from
    /// the PSK ticket age.  Negative if the client is behind.
    pub fn client_clock_skew_ms(&self) -> Option<i64> {
        self.common.client_clock_skew_ms
    }

    /// When the handshake that authenticated this connection happened.
    /// For resumed connections, the time of the original handshake.
    pub fn handshake_time(&self) -> Option<SystemTime> {
        self.common.handshake_time
    }

    pub fn handshake_logging(&self) -> Option<&HandshakeLogging> {
        self.common.handshake_logging.as_ref()
    }

    pub fn early_exporter_master_secret(&self) -> Option<&[u8]> {
        self.common
            .early_exporter_master_secret
            .as_deref()
    }

    pub fn exporter_master_secret(&self) -> Option<&[u8]> {
        self.common.exporter_master_secret.as_deref()
    }
}
