use crate::error::{Error, InvalidMessage, PeerMisbehaved};
use crate::hash_hs::HandshakeHash;
use crate::key_schedule::{KeyScheduleTraffic, KeyScheduleTrafficWithClientFinishedPending};
use crate::msgs::base::{PayloadU16, PayloadU8};
use crate::msgs::enums::{HandshakeType, KeyUpdateRequest, ProtocolVersion};
use crate::msgs::handshake::{
    HandshakeMessagePayload, HandshakePayload, NewSessionTicketExtension,
    NewSessionTicketPayloadTls13,
};
use crate::msgs::message::{Message, MessagePayload};
use crate::msgs::persist::ResumptionState;
use crate::rand;
use crate::record_layer::{EncryptedWriteRecordLayer, ReadRecordLayer, WriteRecordLayer};
use crate::server::hs::{add_to_transcript, unix_time_ms, CLIENT_AUTH_SCHEMES};
use crate::server::{
    set_once, Action, AsyncRequest, AsyncResult, ClientAuthPolicy, Context, HandshakePhase,
    NextState, NextStateOrError, Pending, State,
};
use crate::suites::Tls13CipherSuite;
use crate::verify;

use log::trace;

use std::time::UNIX_EPOCH;

/// What every post-ServerHello state carries.
pub(crate) struct HandshakeDetails {
    pub(crate) transcript: HandshakeHash,
    pub(crate) suite: &'static Tls13CipherSuite,
    pub(crate) key_schedule: KeyScheduleTrafficWithClientFinishedPending,
    pub(crate) send_tickets: usize,
}

pub(crate) struct AcceptEarlyData {
    pub(crate) details: HandshakeDetails,
}

impl AcceptEarlyData {
    /// Move reads back onto the parked handshake keys.
    fn restore_handshake_read(
        cx: &mut Context<'_>,
        trial_skip: bool,
    ) -> Result<crate::record_layer::EncryptedReadRecordLayer, Error> {
        cx.common.check_aligned_handshake()?;
        let mut layer = cx
            .common
            .handshake_read_record_layer
            .take()
            .ok_or_else(|| Error::General("no parked handshake read keys".to_string()))?;
        if trial_skip {
            layer.enable_trial_decryption(cx.config.max_early_data_size as usize + 1024);
        }
        Ok(layer)
    }
}

impl State for AcceptEarlyData {
    fn handle(self: Box<Self>, cx: &mut Context<'_>, m: Message) -> NextStateOrError {
        if let MessagePayload::ApplicationData(payload) = &m.payload {
            let len = payload.0.len() as u32;
            return match cx.common.early_data_remaining.checked_sub(len) {
                Some(remaining) => {
                    cx.common.early_data_remaining = remaining;
                    cx.actions
                        .push(Action::DeliverAppData(payload.0.clone()));
                    Ok(NextState::Advance(self))
                }
                None => {
                    // limit exhausted: reject the remainder of the early
                    // data and wait for the client Finished
                    trace!("early data limit exceeded; rejecting remainder");
                    let layer = Self::restore_handshake_read(cx, true)?;
                    cx.common.read_record_layer = ReadRecordLayer::Encrypted(layer);
                    cx.common.phase = HandshakePhase::ExpectingFinished;
                    Ok(NextState::Advance(Box::new(ExpectFinished {
                        details: self.details,
                    })))
                }
            };
        }

        require_end_of_early_data(&m)?;

        let mut details = self.details;
        add_to_transcript(&mut details.transcript, &m);

        let layer = Self::restore_handshake_read(cx, false)?;
        cx.common.read_record_layer = ReadRecordLayer::Encrypted(layer);
        cx.common.phase = HandshakePhase::ExpectingFinished;
        Ok(NextState::Advance(Box::new(ExpectFinished { details })))
    }
}

fn require_end_of_early_data(m: &Message) -> Result<(), Error> {
    match &m.payload {
        MessagePayload::Handshake { parsed, .. }
            if parsed.typ == HandshakeType::EndOfEarlyData =>
        {
            Ok(())
        }
        _ => Err(Error::InappropriateHandshakeMessage {
            expect_types: vec![HandshakeType::EndOfEarlyData],
            got_type: m.handshake_type_received(),
        }),
    }
}

pub(crate) struct ExpectCertificate {
    pub(crate) details: HandshakeDetails,
}

impl State for ExpectCertificate {
    fn handle(self: Box<Self>, cx: &mut Context<'_>, m: Message) -> NextStateOrError {
        let cert_payload = require_handshake_msg!(
            m,
            HandshakeType::Certificate,
            HandshakePayload::CertificateTls13
        )?;

        if !cert_payload.context.0.is_empty() {
            return Err(InvalidMessage::InvalidCertRequest.into());
        }

        // We sent no CertificateRequest extensions warranting these.
        if cert_payload.any_entry_has_extension() {
            return Err(PeerMisbehaved::BadCertChainExtensions.into());
        }

        let chain = cert_payload.convert();
        let mut details = self.details;
        add_to_transcript(&mut details.transcript, &m);

        if chain.is_empty() {
            let mandatory = matches!(
                cx.config.client_auth,
                ClientAuthPolicy::Requested { mandatory: true }
            );
            if mandatory {
                return Err(Error::NoCertificatesPresented);
            }

            trace!("client auth requested but no certificate supplied");
            cx.common.phase = HandshakePhase::ExpectingFinished;
            return Ok(NextState::Advance(Box::new(ExpectFinished { details })));
        }

        cx.common.phase = HandshakePhase::ExpectingCertificateVerify;
        Ok(NextState::Advance(Box::new(ExpectCertificateVerify {
            details,
            unverified_cert_chain: chain,
        })))
    }
}

pub(crate) struct ExpectCertificateVerify {
    details: HandshakeDetails,

    // Held only between Certificate and CertificateVerify; becomes the
    // connection's client certificate once the signature checks out.
    unverified_cert_chain: Vec<crate::key::Certificate>,
}

impl State for ExpectCertificateVerify {
    fn handle(self: Box<Self>, _cx: &mut Context<'_>, m: Message) -> NextStateOrError {
        let dss = require_handshake_msg!(
            m,
            HandshakeType::CertificateVerify,
            HandshakePayload::CertificateVerify
        )?
        .clone();

        if !CLIENT_AUTH_SCHEMES.contains(&dss.scheme) {
            return Err(PeerMisbehaved::SignedHandshakeWithUnadvertisedSigScheme.into());
        }

        let mut details = self.details;
        let handshake_hash = details.transcript.current_hash();
        let message = verify::construct_tls13_client_verify_message(&handshake_hash);
        let encoded = match &m.payload {
            MessagePayload::Handshake { encoded, .. } => encoded.clone(),
            _ => unreachable!(),
        };

        Ok(NextState::Suspend(Pending {
            request: AsyncRequest::VerifyClientCert {
                chain: self.unverified_cert_chain,
            },
            resume: Box::new(move |cx, result| {
                let peer = match result {
                    AsyncResult::ClientCert(peer) => peer?,
                    _ => return Err(Error::General("mismatched resume result".to_string())),
                };

                peer.verify_signature(dss.scheme, &message, &dss.sig.0)
                    .map_err(|_| PeerMisbehaved::InvalidClientCertificateSignature)?;
                trace!("client CertificateVerify OK");

                set_once(&mut cx.common.client_cert, peer);
                details.transcript.add(&encoded);
                cx.common.phase = HandshakePhase::ExpectingFinished;
                Ok(NextState::Advance(Box::new(ExpectFinished { details })))
            }),
        }))
    }
}

pub(crate) struct ExpectFinished {
    pub(crate) details: HandshakeDetails,
}

impl State for ExpectFinished {
    fn handle(self: Box<Self>, cx: &mut Context<'_>, m: Message) -> NextStateOrError {
        let finished =
            require_handshake_msg!(m, HandshakeType::Finished, HandshakePayload::Finished)?;

        let HandshakeDetails {
            mut transcript,
            suite,
            key_schedule,
            send_tickets,
        } = self.details;

        let handshake_hash = transcript.current_hash();
        let (key_schedule, expect_verify_data) = key_schedule.sign_client_finish(&handshake_hash);

        verify::verify_finished(&expect_verify_data, &finished.0).map_err(|_| {
            log::warn!("finished wrong");
            Error::from(PeerMisbehaved::IncorrectFinished)
        })?;

        // nb. future derivations include the client Finished, but not the
        // application data keying.
        add_to_transcript(&mut transcript, &m);

        cx.common.check_aligned_handshake()?;

        // Install keying to read future messages.
        cx.common.read_record_layer = ReadRecordLayer::encrypted(suite, key_schedule.client_secret());

        let resumption_master_secret =
            key_schedule.resumption_master_secret(&transcript.current_hash());
        set_once(
            &mut cx.common.resumption_master_secret,
            resumption_master_secret,
        );

        cx.common.phase = HandshakePhase::AcceptingData;
        cx.actions.push(Action::ReportHandshakeSuccess);

        emit_tickets(cx, Traffic { suite, key_schedule }, send_tickets)
    }
}

// --- Process traffic ---
pub(crate) struct Traffic {
    suite: &'static Tls13CipherSuite,
    key_schedule: KeyScheduleTraffic,
}

impl Traffic {
    fn handle_key_update(
        mut self: Box<Self>,
        cx: &mut Context<'_>,
        kur: KeyUpdateRequest,
    ) -> NextStateOrError {
        cx.common.check_aligned_handshake()?;

        match kur {
            KeyUpdateRequest::UpdateNotRequested => {}
            KeyUpdateRequest::UpdateRequested => {
                // our own update goes out under the old key, then the
                // write direction ratchets
                let m = Message::build_key_update_notify();
                cx.send_msg(&m)?;

                let next_write = self
                    .key_schedule
                    .next_server_application_traffic_secret();
                let mut layer = EncryptedWriteRecordLayer::new(self.suite, &next_write);
                layer.padding = cx.config.record_padding;
                cx.common.write_record_layer = WriteRecordLayer::Encrypted(layer);
            }
            _ => return Err(InvalidMessage::InvalidKeyUpdate.into()),
        }

        // Update our read-side keys.
        let next_read = self
            .key_schedule
            .next_client_application_traffic_secret();
        cx.common.read_record_layer = ReadRecordLayer::encrypted(self.suite, &next_read);

        Ok(NextState::Advance(self))
    }
}

impl State for Traffic {
    fn handle(self: Box<Self>, cx: &mut Context<'_>, m: Message) -> NextStateOrError {
        if let MessagePayload::ApplicationData(payload) = &m.payload {
            cx.actions
                .push(Action::DeliverAppData(payload.0.clone()));
            return Ok(NextState::Advance(self));
        }

        let kur =
            require_handshake_msg!(m, HandshakeType::KeyUpdate, HandshakePayload::KeyUpdate)?;
        self.handle_key_update(cx, *kur)
    }

    fn send_ticket(self: Box<Self>, cx: &mut Context<'_>) -> NextStateOrError {
        emit_tickets(cx, *self, 1)
    }

    fn export_keying_material(
        &self,
        output: &mut [u8],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<(), Error> {
        self.key_schedule
            .export_keying_material(output, label, context)
    }
}

/// Issue `remaining` session tickets, suspending once per ticket while the
/// store seals it.
fn emit_tickets(cx: &mut Context<'_>, state: Traffic, remaining: usize) -> NextStateOrError {
    if remaining == 0 {
        return Ok(NextState::Advance(Box::new(state)));
    }

    let resumption_master_secret = cx
        .common
        .resumption_master_secret
        .clone()
        .ok_or_else(|| Error::General("ticket requested before client finished".to_string()))?;

    let nonce = rand::random_vec(32)?;
    let age_add = rand::random_u32()?;
    let secret = state
        .key_schedule
        .derive_ticket_psk(&resumption_master_secret, &nonce);

    let handshake_time_ms = cx
        .common
        .handshake_time
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(unix_time_ms);

    let resumption = ResumptionState {
        version: ProtocolVersion::TLSv1_3,
        cipher_suite: state.suite.suite,
        secret: PayloadU8::new(secret),
        issued_unix_ms: unix_time_ms(),
        ticket_age_add: age_add,
        alpn: PayloadU8::new(cx.common.alpn.clone().unwrap_or_default()),
        max_early_data: cx.config.max_early_data_size,
        handshake_time_ms,
        app_token: PayloadU16::empty(),
    };

    let lifetime = cx.config.ticket_lifetime;
    let max_early_data = cx.config.max_early_data_size;

    Ok(NextState::Suspend(Pending {
        request: AsyncRequest::StoreTicket { state: resumption },
        resume: Box::new(move |cx, result| {
            let ticket = match result {
                AsyncResult::TicketStored(ticket) => ticket,
                _ => return Err(Error::General("mismatched resume result".to_string())),
            };

            let ticket = match ticket {
                Some(ticket) => ticket,
                None => {
                    trace!("resumption not available; not issuing ticket");
                    return Ok(NextState::Advance(Box::new(state)));
                }
            };

            let mut payload =
                NewSessionTicketPayloadTls13::new(lifetime, age_add, nonce, ticket);
            if max_early_data > 0 {
                payload
                    .exts
                    .push(NewSessionTicketExtension::EarlyData(max_early_data));
            }

            let m = Message {
                version: ProtocolVersion::TLSv1_3,
                payload: MessagePayload::handshake(HandshakeMessagePayload {
                    typ: HandshakeType::NewSessionTicket,
                    payload: HandshakePayload::NewSessionTicketTls13(payload),
                }),
            };
            trace!("sending new ticket");
            cx.send_msg(&m)?;

            emit_tickets(cx, state, remaining - 1)
        }),
    }))
}
