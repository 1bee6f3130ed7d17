//! # seltzer
//!
//! seltzer is a server-side TLS 1.3 protocol core written in Rust.  It
//! implements the RFC 8446 server handshake as a sans-IO state machine:
//! the caller owns the sockets and the event loop, feeds wire bytes in,
//! answers the asynchronous collaborator requests (ticket store,
//! certificate verification, signing), and applies the emitted actions.
//!
//! ## Design
//!
//! - The handshake is a set of typed states consuming decoded messages
//!   and emitting ordered [`Action`]s; negotiated parameters are decided
//!   exactly once and never change.
//! - Record protection runs over chained, reference-counted buffers so a
//!   receive path can hand over one allocation holding several records;
//!   the AEAD kernel unshares only what it must.
//! - Private-key operations, ticket storage and certificate verification
//!   are suspension points: the connection parks mid-transition and
//!   resumes when the driver delivers the result.
//!
//! ## Non-features
//!
//! Client-side handshaking, TLS 1.2 and earlier, DTLS, and X.509
//! processing (certificates are opaque bytes here; verification is a
//! collaborator's job).

#![allow(clippy::new_without_default)]

// log for free.
#[allow(unused_imports)]
#[macro_use]
extern crate log;

#[allow(missing_docs)]
pub mod msgs;

mod aead;
mod buffer;
mod error;
mod hash_hs;
mod key;
mod key_schedule;
mod kx;
mod rand;
mod record_layer;
mod server;
mod sign;
mod suites;
mod verify;

pub use crate::buffer::{BufChain, Fragment};
pub use crate::error::{Error, InvalidMessage, PeerIncompatible, PeerMisbehaved};
pub use crate::key::{Certificate, PrivateKey};
pub use crate::kx::{SupportedKxGroup, ALL_KX_GROUPS, SECP256R1, SECP384R1, X25519};
pub use crate::msgs::enums::{
    AlertDescription, CipherSuite, ContentType, HandshakeType, NamedGroup, ProtocolVersion,
    PskKeyExchangeMode, SignatureScheme,
};
pub use crate::msgs::persist::ResumptionState;
pub use crate::server::handy;
pub use crate::server::{
    Action, AppTokenValidator, AsyncRequest, AsyncResult, ClientAuthPolicy, ClientHello,
    EarlyDataType, HandshakeLogging, HandshakePhase, KeyExchangeType, PskType, ReplayCache,
    ReplayCacheResult, ResolvesServerCert, ServerConfig, ServerConnection, ServerExtensionsHook,
    TicketStore,
};
pub use crate::sign::{
    any_ecdsa_type, any_eddsa_type, any_supported_type, CertifiedKey, SignError, Signer,
    SigningKey,
};
pub use crate::suites::{
    AeadAlgorithm, Tls13CipherSuite, ALL_CIPHER_SUITES, TLS13_AES_128_GCM_SHA256,
    TLS13_AES_256_GCM_SHA384, TLS13_CHACHA20_POLY1305_SHA256,
};
pub use crate::verify::PeerCert;

/// Items for use in test rigs and interoperability harnesses.  Not
/// covered by semver.
#[doc(hidden)]
pub mod internal {
    pub mod aead {
        pub use crate::aead::*;
    }
    pub mod hash_hs {
        pub use crate::hash_hs::*;
    }
    pub mod key_schedule {
        pub use crate::key_schedule::*;
    }
    pub mod kx {
        pub use crate::kx::*;
    }
    pub mod record_layer {
        pub use crate::record_layer::*;
    }
    pub mod verify {
        pub use crate::verify::*;
    }
}
