use crate::error::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
use crate::hash_hs::{HandshakeHash, HandshakeHashBuffer};
use crate::key_schedule::{KeyScheduleEarly, KeyScheduleHandshake, KeySchedulePreHandshake};
use crate::kx::KeyExchange;
use crate::msgs::base::Payload;
use crate::msgs::enums::{
    Compression, HandshakeType, NamedGroup, ProtocolVersion, PskKeyExchangeMode, SignatureScheme,
};
use crate::msgs::handshake::{
    CertReqExtension, CertificateEntry, CertificatePayloadTls13, CertificateRequestPayloadTls13,
    ClientHelloPayload, DigitallySignedStruct, HandshakeMessagePayload, HandshakePayload,
    HelloRetryExtension, HelloRetryRequest, KeyShareEntry, Random, ServerExtension, SessionId,
};
use crate::msgs::message::{ChangeCipherSpecPayload, Message, MessagePayload};
use crate::msgs::persist::ResumptionState;
use crate::record_layer::{EncryptedReadRecordLayer, ReadRecordLayer, WriteRecordLayer};
use crate::server::tls13::{AcceptEarlyData, ExpectCertificate, ExpectFinished, HandshakeDetails};
use crate::server::{
    set_once, AsyncRequest, AsyncResult, Context, EarlyDataType, HandshakeLogging, HandshakePhase,
    KeyExchangeType, NextState, NextStateOrError, Pending, PskType, ReplayCacheResult, State,
};
use crate::sign::CertifiedKey;
use crate::suites::{self, Tls13CipherSuite};
use crate::verify;

use log::{debug, trace};
use ring::constant_time;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Schemes we are willing to verify in a client CertificateVerify.
pub(super) static CLIENT_AUTH_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PSS_SHA256,
    SignatureScheme::RSA_PSS_SHA384,
    SignatureScheme::RSA_PSS_SHA512,
];

pub(crate) enum HandshakeHashOrBuffer {
    Buffer(HandshakeHashBuffer),
    Hash(HandshakeHash),
}

pub(crate) struct ExpectClientHello {
    transcript: HandshakeHashOrBuffer,
    done_retry: bool,
    retry_group: Option<NamedGroup>,
}

impl ExpectClientHello {
    pub(crate) fn new() -> Self {
        Self {
            transcript: HandshakeHashOrBuffer::Buffer(HandshakeHashBuffer::new()),
            done_retry: false,
            retry_group: None,
        }
    }
}

fn capture_logging(client_hello: &ClientHelloPayload) -> HandshakeLogging {
    HandshakeLogging {
        client_legacy_version: Some(client_hello.client_version),
        client_supported_versions: client_hello
            .versions_extension()
            .map(<[ProtocolVersion]>::to_vec)
            .unwrap_or_default(),
        client_ciphers: client_hello.cipher_suites.clone(),
        client_extensions: client_hello
            .extensions
            .iter()
            .map(|ext| ext.get_type())
            .collect(),
        client_sni: client_hello.sni_hostname(),
        client_supported_groups: client_hello
            .namedgroups_extension()
            .map(<[NamedGroup]>::to_vec)
            .unwrap_or_default(),
        client_key_shares: client_hello
            .keyshare_extension()
            .map(|shares| shares.iter().map(|share| share.group).collect())
            .unwrap_or_default(),
        client_key_exchange_modes: client_hello
            .psk_modes()
            .map(<[PskKeyExchangeMode]>::to_vec)
            .unwrap_or_default(),
        client_signature_algorithms: client_hello
            .sigalgs_extension()
            .map(<[SignatureScheme]>::to_vec)
            .unwrap_or_default(),
        client_session_id_sent: Some(!client_hello.session_id.is_empty()),
        client_random: Some(client_hello.random),
    }
}

impl State for ExpectClientHello {
    fn handle(self: Box<Self>, cx: &mut Context<'_>, m: Message) -> NextStateOrError {
        require_handshake_msg!(m, HandshakeType::ClientHello, HandshakePayload::ClientHello)?;
        let (parsed, encoded_ch) = match &m.payload {
            MessagePayload::Handshake { parsed, encoded } => (parsed.clone(), encoded.clone()),
            _ => unreachable!(),
        };
        let client_hello = match &parsed.payload {
            HandshakePayload::ClientHello(ch) => ch.clone(),
            _ => unreachable!(),
        };
        trace!("we got a clienthello {client_hello:?}");

        if client_hello.compression_methods != [Compression::Null] {
            return Err(PeerIncompatible::NullCompressionRequired.into());
        }
        if client_hello.has_duplicate_extension() {
            return Err(PeerMisbehaved::DuplicateClientHelloExtensions.into());
        }

        cx.common.handshake_logging = Some(capture_logging(&client_hello));

        // supported_versions must name TLS 1.3
        match client_hello.versions_extension() {
            Some(versions) if versions.contains(&ProtocolVersion::TLSv1_3) => {}
            Some(_) => return Err(PeerIncompatible::Tls13RequiredByConfiguration.into()),
            None => return Err(PeerIncompatible::SupportedVersionsExtensionRequired.into()),
        }

        let sni = client_hello.sni_hostname();
        if self.done_retry {
            if cx.common.sni != sni {
                return Err(PeerMisbehaved::ServerNameDifferedOnRetry.into());
            }
        } else {
            cx.common.sni = sni;
        }

        let suite = suites::choose_ciphersuite_preferring_server(
            &client_hello.cipher_suites,
            &cx.config.cipher_suites,
        )
        .ok_or(PeerIncompatible::NoCipherSuitesInCommon)?;
        debug!("decided upon suite {suite:?}");

        match cx.common.suite {
            None => set_once(&mut cx.common.suite, suite),
            Some(previous) if previous.suite == suite.suite => {}
            Some(_) => return Err(PeerMisbehaved::HandshakeHashVariedAfterRetry.into()),
        }

        let mut transcript = match self.transcript {
            HandshakeHashOrBuffer::Buffer(buffer) => buffer.start_hash(suite.hash_algorithm()),
            HandshakeHashOrBuffer::Hash(hash) if hash.algorithm() == suite.hash_algorithm() => hash,
            HandshakeHashOrBuffer::Hash(_) => {
                return Err(PeerMisbehaved::HandshakeHashVariedAfterRetry.into());
            }
        };

        let groups_ext = client_hello
            .namedgroups_extension()
            .ok_or(InvalidMessage::MissingKeyExchange)?;
        let shares_ext = client_hello
            .keyshare_extension()
            .ok_or(PeerMisbehaved::MissingKeyShare)?;
        if client_hello.has_keyshare_extension_with_duplicates() {
            return Err(PeerMisbehaved::DuplicateKeyShareEntries.into());
        }

        // choose a share that we support
        let chosen_share = cx
            .config
            .kx_groups
            .iter()
            .find_map(|group| {
                shares_ext
                    .iter()
                    .find(|share| share.group == group.name)
            });

        let chosen_share = match chosen_share {
            Some(share) => share.clone(),
            None => {
                // We don't have a suitable key share.  Choose a suitable
                // group and send a HelloRetryRequest.
                if self.done_retry {
                    return Err(PeerMisbehaved::RefusedToFollowHelloRetryRequest.into());
                }

                let retry_group = cx
                    .config
                    .kx_groups
                    .iter()
                    .find(|group| groups_ext.contains(&group.name))
                    .ok_or(PeerIncompatible::NoKxGroupsInCommon)?;

                set_once(&mut cx.common.key_exchange_type, KeyExchangeType::HelloRetry);

                transcript.add(&encoded_ch);
                emit_hello_retry_request(
                    &mut transcript,
                    suite,
                    cx,
                    &client_hello.session_id,
                    retry_group.name,
                )?;
                emit_fake_ccs(cx)?;

                return Ok(NextState::Advance(Box::new(ExpectClientHello {
                    transcript: HandshakeHashOrBuffer::Hash(transcript),
                    done_retry: true,
                    retry_group: Some(retry_group.name),
                })));
            }
        };

        if self.done_retry && Some(chosen_share.group) != self.retry_group {
            return Err(PeerMisbehaved::WrongGroupForKeyShare.into());
        }

        let mut sig_schemes = client_hello
            .sigalgs_extension()
            .ok_or(PeerIncompatible::SignatureAlgorithmsExtensionRequired)?
            .to_vec();
        sig_schemes.retain(SignatureScheme::supported_in_tls13);

        // ALPN: our preference order decides
        let mut alpn = None;
        if let Some(their_protocols) = client_hello.alpn_extension() {
            alpn = cx
                .config
                .alpn_protocols
                .iter()
                .find(|ours| {
                    their_protocols
                        .iter()
                        .any(|theirs| &theirs.0 == *ours)
                })
                .cloned();
            if let Some(protocol) = &alpn {
                debug!("chosen ALPN protocol {protocol:?}");
            } else if !cx.config.alpn_protocols.is_empty() {
                return Err(Error::NoApplicationProtocol);
            }
        }
        if let Some(protocol) = &alpn {
            set_once(&mut cx.common.alpn, protocol.clone());
        }

        let server_key = cx
            .config
            .cert_resolver
            .resolve(crate::server::ClientHello {
                server_name: cx.common.sni.as_deref(),
                signature_schemes: &sig_schemes,
                alpn: client_hello
                    .alpn_extension()
                    .map(|protos| {
                        protos
                            .iter()
                            .map(|proto| proto.0.as_slice())
                            .collect()
                    }),
            })
            .ok_or(Error::NoSuitableCertificate)?;

        let handling = CompleteClientHelloHandling {
            transcript,
            suite,
            chosen_share,
            session_id: client_hello.session_id,
            sig_schemes,
            alpn,
            server_key,
            done_retry: self.done_retry,
            client_hello: client_hello.clone(),
            encoded_ch,
        };

        // PSK resumption wants a ticket store round-trip
        let psk_offer = match client_hello.psk() {
            Some(offer) => offer,
            None => {
                set_once(&mut cx.common.psk_type, PskType::NotAttempted);
                let early = match client_hello.early_data_extension_offered() {
                    true => EarlyDataType::Rejected,
                    false => EarlyDataType::NotAttempted,
                };
                set_once(&mut cx.common.early_data_type, early);
                return handling.into_flight(cx, None);
            }
        };

        if !client_hello.check_psk_ext_is_last() {
            return Err(PeerMisbehaved::PskExtensionMustBeLast.into());
        }
        if psk_offer.binders.is_empty() {
            return Err(PeerMisbehaved::MissingBinderInPskExtension.into());
        }
        if psk_offer.binders.len() != psk_offer.identities.len() {
            return Err(PeerMisbehaved::PskExtensionWithMismatchedIdsAndBinders.into());
        }

        // a psk offer without key exchange modes is illegal; modes that
        // exclude DHE merely decline resumption
        if client_hello.psk_modes().is_none() {
            return Err(PeerMisbehaved::MissingPskModesExtension.into());
        }

        if !client_hello.psk_mode_offered(PskKeyExchangeMode::PSK_DHE_KE) {
            debug!("client unwilling to resume, DHE_KE not offered");
            set_once(&mut cx.common.psk_type, PskType::Rejected);
            let early = match client_hello.early_data_extension_offered() {
                true => EarlyDataType::Rejected,
                false => EarlyDataType::NotAttempted,
            };
            set_once(&mut cx.common.early_data_type, early);
            return handling.into_flight(cx, None);
        }

        // We attempt only the first offered identity.
        let identity = psk_offer.identities[0].identity.0.clone();
        let binder = psk_offer.binders[0].0.clone();
        let obfuscated_age = psk_offer.identities[0].obfuscated_ticket_age;
        let truncated_ch = parsed.encoding_for_binder_signing();

        Ok(NextState::Suspend(Pending {
            request: AsyncRequest::TicketLookup { identity },
            resume: Box::new(move |cx, result| {
                let resumption = match result {
                    AsyncResult::Ticket(resumption) => resumption,
                    _ => return Err(Error::General("mismatched resume result".to_string())),
                };
                handling.with_resumption(cx, resumption, binder, obfuscated_age, truncated_ch)
            }),
        }))
    }
}

/// An accepted PSK, ready to seed the key schedule.
struct AcceptedPsk {
    early_schedule: KeyScheduleEarly,
    resumption: ResumptionState,
}

/// Everything decided by ClientHello validation, carried through the
/// ticket-lookup and signing suspensions to flight emission.
struct CompleteClientHelloHandling {
    transcript: HandshakeHash,
    suite: &'static Tls13CipherSuite,
    chosen_share: KeyShareEntry,
    session_id: SessionId,
    sig_schemes: Vec<SignatureScheme>,
    alpn: Option<Vec<u8>>,
    server_key: Arc<CertifiedKey>,
    done_retry: bool,
    client_hello: ClientHelloPayload,
    encoded_ch: Vec<u8>,
}

impl CompleteClientHelloHandling {
    fn with_resumption(
        self,
        cx: &mut Context<'_>,
        resumption: Option<ResumptionState>,
        binder: Vec<u8>,
        obfuscated_age: u32,
        truncated_ch: Vec<u8>,
    ) -> NextStateOrError {
        let early_offered = self
            .client_hello
            .early_data_extension_offered();

        let resumption = match resumption.filter(|res| self.can_resume(cx, res)) {
            Some(res) => res,
            None => {
                debug!("no resumable session for offered psk");
                set_once(&mut cx.common.psk_type, PskType::Rejected);
                let early = match early_offered {
                    true => EarlyDataType::Rejected,
                    false => EarlyDataType::NotAttempted,
                };
                set_once(&mut cx.common.early_data_type, early);
                return self.into_flight(cx, None);
            }
        };

        // The binder proves the client holds the PSK and binds it to this
        // ClientHello; a wrong binder is fatal.
        let early_schedule = KeyScheduleEarly::new(self.suite.hkdf_algorithm, &resumption.secret.0);
        let binder_hash = self.transcript.hash_given(&truncated_ch);
        let expected_binder =
            early_schedule.resumption_psk_binder_key_and_sign_verify_data(&binder_hash);
        if constant_time::verify_slices_are_equal(expected_binder.as_ref(), &binder).is_err() {
            return Err(PeerMisbehaved::IncorrectBinder.into());
        }

        let now_ms = unix_time_ms();
        let client_age_ms = i64::from(obfuscated_age.wrapping_sub(resumption.ticket_age_add));
        let server_age_ms = now_ms.saturating_sub(resumption.issued_unix_ms) as i64;
        set_once(
            &mut cx.common.client_clock_skew_ms,
            client_age_ms - server_age_ms,
        );

        if server_age_ms > i64::from(cx.config.ticket_lifetime) * 1000 {
            debug!("ticket has expired");
            set_once(&mut cx.common.psk_type, PskType::Rejected);
            let early = match early_offered {
                true => EarlyDataType::Rejected,
                false => EarlyDataType::NotAttempted,
            };
            set_once(&mut cx.common.early_data_type, early);
            return self.into_flight(cx, None);
        }

        set_once(&mut cx.common.psk_type, PskType::Resumption);
        set_once(&mut cx.common.psk_mode, PskKeyExchangeMode::PSK_DHE_KE);
        set_once(
            &mut cx.common.handshake_time,
            UNIX_EPOCH + Duration::from_millis(resumption.handshake_time_ms),
        );

        let early = match early_offered {
            false => EarlyDataType::NotAttempted,
            true if self.done_retry => EarlyDataType::Rejected,
            true if !self.early_data_compatible(cx, &resumption) => EarlyDataType::Rejected,
            true => {
                let verdict = cx.config.replay_cache.check(&binder);
                set_once(&mut cx.common.replay_cache_result, verdict);
                if verdict == ReplayCacheResult::Duplicate {
                    debug!("rejecting replayed early data");
                    EarlyDataType::Replay
                } else if !cx
                    .config
                    .app_token_validator
                    .validate(&resumption)
                {
                    debug!("app token rejected early data");
                    EarlyDataType::Rejected
                } else {
                    EarlyDataType::Accepted
                }
            }
        };
        set_once(&mut cx.common.early_data_type, early);

        self.into_flight(
            cx,
            Some(AcceptedPsk {
                early_schedule,
                resumption,
            }),
        )
    }

    fn can_resume(&self, cx: &Context<'_>, resumption: &ResumptionState) -> bool {
        let prev_suite =
            match suites::lookup_suite(resumption.cipher_suite, &cx.config.cipher_suites) {
                Some(prev) => prev,
                None => return false,
            };
        resumption.version == ProtocolVersion::TLSv1_3 && self.suite.can_resume_from(prev_suite)
    }

    /// RFC 8446 section 4.2.10: early data additionally requires the first
    /// offered PSK, the exact cipher suite, and the same ALPN protocol.
    fn early_data_compatible(&self, cx: &Context<'_>, resumption: &ResumptionState) -> bool {
        cx.config.max_early_data_size > 0
            && resumption.max_early_data > 0
            && resumption.cipher_suite == self.suite.suite
            && resumption.alpn() == self.alpn.as_deref()
    }

    fn into_flight(mut self, cx: &mut Context<'_>, psk: Option<AcceptedPsk>) -> NextStateOrError {
        self.transcript.add(&self.encoded_ch);
        let chlo_hash = self.transcript.current_hash();

        // Do key exchange
        let kxr = KeyExchange::choose(self.chosen_share.group, &cx.config.kx_groups)
            .and_then(KeyExchange::start)
            .and_then(|kx| kx.complete(&self.chosen_share.payload.0))
            .ok_or(PeerMisbehaved::InvalidKeyShare)?;

        set_once(&mut cx.common.version, ProtocolVersion::TLSv1_3);
        set_once(&mut cx.common.named_group, self.chosen_share.group);
        if cx.common.key_exchange_type.is_none() {
            set_once(&mut cx.common.key_exchange_type, KeyExchangeType::Normal);
        }
        set_once(
            &mut cx.common.server_cert,
            Arc::new(self.server_key.cert.clone()),
        );

        let mut extensions = vec![
            ServerExtension::KeyShare(KeyShareEntry::new(
                self.chosen_share.group,
                kxr.pubkey.as_ref(),
            )),
            ServerExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
        ];
        if psk.is_some() {
            extensions.push(ServerExtension::PresharedKey(0));
        }

        let sh = Message {
            version: ProtocolVersion::TLSv1_2,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::ServerHello,
                payload: HandshakePayload::ServerHello(
                    crate::msgs::handshake::ServerHelloPayload {
                        legacy_version: ProtocolVersion::TLSv1_2,
                        random: Random::new()?,
                        session_id: self.session_id,
                        cipher_suite: self.suite.suite,
                        compression_method: Compression::Null,
                        extensions,
                    },
                ),
            }),
        };
        trace!("sending server hello {sh:?}");
        add_to_transcript(&mut self.transcript, &sh);
        cx.send_msg(&sh)?;

        if cx.config.send_ccs && !self.done_retry {
            emit_fake_ccs(cx)?;
        }

        // Advance the key schedule past ServerHello and install the
        // handshake keys; everything further is under them.  No handshake
        // bytes may straddle the read-key change.
        cx.common.check_aligned_handshake()?;
        let early_accepted = cx.common.early_data_type == Some(EarlyDataType::Accepted);
        let pre_handshake = match &psk {
            Some(accepted) => KeySchedulePreHandshake::from(KeyScheduleEarly::new(
                self.suite.hkdf_algorithm,
                &accepted.resumption.secret.0,
            )),
            None => KeySchedulePreHandshake::new(self.suite.hkdf_algorithm),
        };

        let hs_hash = self.transcript.current_hash();
        let (key_schedule, client_secret, server_secret) = pre_handshake
            .into_handshake(&kxr.shared_secret)
            .derive_handshake_secrets(&hs_hash);

        set_once(
            &mut cx.common.client_handshake_secret,
            key_schedule.client_handshake_secret_bytes(&hs_hash),
        );

        cx.common.write_record_layer = WriteRecordLayer::encrypted(self.suite, &server_secret);

        let mut handshake_read = EncryptedReadRecordLayer::new(self.suite, &client_secret);
        if early_accepted {
            let accepted = psk
                .as_ref()
                .ok_or_else(|| Error::General("early data without psk".to_string()))?;
            let early_secret = accepted
                .early_schedule
                .client_early_traffic_secret(&chlo_hash);
            set_once(
                &mut cx.common.early_exporter_master_secret,
                accepted
                    .early_schedule
                    .early_exporter_master_secret(&chlo_hash),
            );
            cx.common.early_data_remaining = Ord::min(
                cx.config.max_early_data_size,
                accepted.resumption.max_early_data,
            );

            // Park the handshake read keys; reads use the early traffic
            // key until EndOfEarlyData.
            cx.common.handshake_read_record_layer = Some(handshake_read);
            cx.common.read_record_layer = ReadRecordLayer::encrypted(self.suite, &early_secret);
        } else {
            if self
                .client_hello
                .early_data_extension_offered()
            {
                // rejected early data arrives under a key we never
                // installed; skip those records rather than fail
                let budget = match &psk {
                    Some(accepted) => Ord::max(
                        cx.config.max_early_data_size,
                        accepted.resumption.max_early_data,
                    ),
                    None => cx.config.max_early_data_size,
                };
                handshake_read.enable_trial_decryption(budget as usize + 1024);
            }
            cx.common.read_record_layer = ReadRecordLayer::Encrypted(handshake_read);
        }

        self.emit_encrypted_extensions(cx, early_accepted)?;

        if psk.is_some() {
            return self.finish_flight(cx, key_schedule, early_accepted);
        }

        let client_auth = self.emit_certificate_req(cx)?;
        self.emit_certificate(cx)?;

        // CertificateVerify needs the private key; suspend while the
        // signature is produced.
        let signer = self
            .server_key
            .key
            .choose_scheme(&self.sig_schemes)
            .ok_or(PeerIncompatible::NoSignatureSchemesInCommon)?;
        set_once(&mut cx.common.sig_scheme, signer.scheme());
        let scheme = signer.scheme();
        let message = verify::construct_tls13_server_verify_message(&self.transcript.current_hash());

        Ok(NextState::Suspend(Pending {
            request: AsyncRequest::Sign { signer, message },
            resume: Box::new(move |cx, result| {
                let sig = match result {
                    AsyncResult::Signature(sig) => sig?,
                    _ => return Err(Error::General("mismatched resume result".to_string())),
                };
                self.emit_certificate_verify(cx, scheme, sig)?;
                self.finish_flight_with_auth(cx, key_schedule, client_auth)
            }),
        }))
    }

    fn emit_encrypted_extensions(
        &mut self,
        cx: &mut Context<'_>,
        early_accepted: bool,
    ) -> Result<(), Error> {
        let mut extensions = Vec::new();
        if let Some(protocol) = &self.alpn {
            extensions.push(ServerExtension::make_alpn(protocol));
        }
        if early_accepted {
            extensions.push(ServerExtension::EarlyData);
        }
        if cx.common.sni.is_some() && cx.common.psk_type != Some(PskType::Resumption) {
            extensions.push(ServerExtension::ServerNameAck);
        }
        if let Some(hook) = &cx.config.extensions_hook {
            extensions.extend(hook.encrypted_extensions(&self.client_hello));
        }

        let ee = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::EncryptedExtensions,
                payload: HandshakePayload::EncryptedExtensions(extensions),
            }),
        };
        trace!("sending encrypted extensions {ee:?}");
        add_to_transcript(&mut self.transcript, &ee);
        cx.send_msg(&ee)
    }

    fn emit_certificate_req(&mut self, cx: &mut Context<'_>) -> Result<bool, Error> {
        if cx.config.client_auth == crate::server::ClientAuthPolicy::Off {
            return Ok(false);
        }

        let cr = CertificateRequestPayloadTls13 {
            context: crate::msgs::base::PayloadU8::empty(),
            extensions: vec![CertReqExtension::SignatureAlgorithms(
                CLIENT_AUTH_SCHEMES.to_vec(),
            )],
        };

        let m = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::CertificateRequest,
                payload: HandshakePayload::CertificateRequestTls13(cr),
            }),
        };
        trace!("sending certificate request {m:?}");
        add_to_transcript(&mut self.transcript, &m);
        cx.send_msg(&m)?;
        Ok(true)
    }

    fn emit_certificate(&mut self, cx: &mut Context<'_>) -> Result<(), Error> {
        let entries = self
            .server_key
            .cert
            .iter()
            .cloned()
            .map(CertificateEntry::new)
            .collect();

        let c = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::Certificate,
                payload: HandshakePayload::CertificateTls13(CertificatePayloadTls13::new(entries)),
            }),
        };
        trace!("sending certificate");
        add_to_transcript(&mut self.transcript, &c);
        cx.send_msg(&c)
    }

    fn emit_certificate_verify(
        &mut self,
        cx: &mut Context<'_>,
        scheme: SignatureScheme,
        sig: Vec<u8>,
    ) -> Result<(), Error> {
        let m = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::CertificateVerify,
                payload: HandshakePayload::CertificateVerify(DigitallySignedStruct::new(
                    scheme, sig,
                )),
            }),
        };
        trace!("sending certificate-verify");
        add_to_transcript(&mut self.transcript, &m);
        cx.send_msg(&m)
    }

    fn finish_flight(
        self,
        cx: &mut Context<'_>,
        key_schedule: KeyScheduleHandshake,
        early_accepted: bool,
    ) -> NextStateOrError {
        self.finish_flight_inner(cx, key_schedule, early_accepted, false)
    }

    fn finish_flight_with_auth(
        self,
        cx: &mut Context<'_>,
        key_schedule: KeyScheduleHandshake,
        client_auth: bool,
    ) -> NextStateOrError {
        self.finish_flight_inner(cx, key_schedule, false, client_auth)
    }

    fn finish_flight_inner(
        mut self,
        cx: &mut Context<'_>,
        key_schedule: KeyScheduleHandshake,
        early_accepted: bool,
        client_auth: bool,
    ) -> NextStateOrError {
        let verify_data = key_schedule.sign_server_finish(&self.transcript.current_hash());
        let fin = Message {
            version: ProtocolVersion::TLSv1_3,
            payload: MessagePayload::handshake(HandshakeMessagePayload {
                typ: HandshakeType::Finished,
                payload: HandshakePayload::Finished(Payload::new(verify_data.as_ref().to_vec())),
            }),
        };
        trace!("sending finished");
        add_to_transcript(&mut self.transcript, &fin);
        cx.send_msg(&fin)?;

        // Move to application data keys.  The read key change is deferred
        // until the client Finished is received and validated.
        let hash_at_server_fin = self.transcript.current_hash();
        let (key_schedule, _client_secret, server_secret) =
            key_schedule.into_traffic_with_client_finished_pending(&hash_at_server_fin);

        let mut write_layer = crate::record_layer::EncryptedWriteRecordLayer::new(
            self.suite,
            &server_secret,
        );
        write_layer.padding = cx.config.record_padding;
        cx.common.write_record_layer = WriteRecordLayer::Encrypted(write_layer);

        set_once(
            &mut cx.common.exporter_master_secret,
            key_schedule.exporter_master_secret_bytes(&hash_at_server_fin),
        );

        if cx.common.handshake_time.is_none() {
            cx.common.handshake_time = Some(SystemTime::now());
        }

        let details = HandshakeDetails {
            transcript: self.transcript,
            suite: self.suite,
            key_schedule,
            send_tickets: cx.config.send_tickets,
        };

        if early_accepted {
            cx.common.phase = HandshakePhase::AcceptingEarlyData;
            cx.actions
                .push(crate::server::Action::ReportEarlyHandshakeSuccess);
            Ok(NextState::Advance(Box::new(AcceptEarlyData { details })))
        } else if client_auth {
            cx.common.phase = HandshakePhase::ExpectingCertificate;
            Ok(NextState::Advance(Box::new(ExpectCertificate { details })))
        } else {
            cx.common.phase = HandshakePhase::ExpectingFinished;
            Ok(NextState::Advance(Box::new(ExpectFinished { details })))
        }
    }
}

pub(super) fn add_to_transcript(transcript: &mut HandshakeHash, m: &Message) {
    if let MessagePayload::Handshake { encoded, .. } = &m.payload {
        transcript.add(encoded);
    }
}

fn emit_fake_ccs(cx: &mut Context<'_>) -> Result<(), Error> {
    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::ChangeCipherSpec(ChangeCipherSpecPayload),
    };
    cx.send_msg(&m)
}

fn emit_hello_retry_request(
    transcript: &mut HandshakeHash,
    suite: &'static Tls13CipherSuite,
    cx: &mut Context<'_>,
    session_id: &SessionId,
    group: NamedGroup,
) -> Result<(), Error> {
    let req = HelloRetryRequest {
        legacy_version: ProtocolVersion::TLSv1_2,
        session_id: *session_id,
        cipher_suite: suite.suite,
        extensions: vec![
            HelloRetryExtension::KeyShare(group),
            HelloRetryExtension::SupportedVersions(ProtocolVersion::TLSv1_3),
        ],
    };

    let m = Message {
        version: ProtocolVersion::TLSv1_2,
        payload: MessagePayload::handshake(HandshakeMessagePayload {
            typ: HandshakeType::HelloRetryRequest,
            payload: HandshakePayload::HelloRetryRequest(req),
        }),
    };

    trace!("requesting retry {m:?}");
    transcript.rollup_for_hrr();
    add_to_transcript(transcript, &m);
    cx.send_msg(&m)
}

pub(super) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
