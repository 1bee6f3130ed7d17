//! Default, simple implementations of the server collaborator traits.

use crate::msgs::persist::ResumptionState;
use crate::rand;
use crate::server::{
    AppTokenValidator, ClientHello, ReplayCache, ReplayCacheResult, ResolvesServerCert,
    TicketStore,
};
use crate::sign::CertifiedKey;

use crate::msgs::codec::Codec;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Something which never resolves a certificate.
pub struct FailResolveChain;

impl ResolvesServerCert for FailResolveChain {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        None
    }
}

/// Something which always resolves to the same cert chain.
pub struct AlwaysResolvesChain(Arc<CertifiedKey>);

impl AlwaysResolvesChain {
    pub fn new(certified_key: CertifiedKey) -> Self {
        Self(Arc::new(certified_key))
    }
}

impl ResolvesServerCert for AlwaysResolvesChain {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// A replay cache that never reports a duplicate.
///
/// With this in place, accepted early data is replayable; suitable only
/// when the application tolerates that.
pub struct NoReplayProtection;

impl ReplayCache for NoReplayProtection {
    fn check(&self, _binder: &[u8]) -> ReplayCacheResult {
        ReplayCacheResult::Unknown
    }
}

/// An in-memory replay cache remembering every binder it has seen.
///
/// Unbounded; real deployments want a time-windowed structure.
#[derive(Default)]
pub struct MemoryReplayCache {
    seen: Mutex<std::collections::HashSet<Vec<u8>>>,
}

impl MemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayCache for MemoryReplayCache {
    fn check(&self, binder: &[u8]) -> ReplayCacheResult {
        let mut seen = self.seen.lock().unwrap();
        match seen.insert(binder.to_vec()) {
            true => ReplayCacheResult::Unknown,
            false => ReplayCacheResult::Duplicate,
        }
    }
}

/// An app-token validator that accepts everything.
pub struct AcceptAnyAppToken;

impl AppTokenValidator for AcceptAnyAppToken {
    fn validate(&self, _state: &ResumptionState) -> bool {
        true
    }
}

/// An in-memory session ticket store.
///
/// Tickets are random identities mapped to stored state; lookup consumes
/// the entry, so each ticket resumes at most once.
pub struct ServerSessionMemoryCache {
    max_entries: usize,
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl ServerSessionMemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl TicketStore for ServerSessionMemoryCache {
    fn lookup(&self, identity: &[u8]) -> Option<ResumptionState> {
        let plain = self
            .entries
            .lock()
            .unwrap()
            .remove(identity)?;
        ResumptionState::read_bytes(&plain).ok()
    }

    fn store(&self, state: ResumptionState) -> Option<Vec<u8>> {
        let identity = rand::random_vec(32).ok()?;
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries {
            return None;
        }
        entries.insert(identity.clone(), state.get_encoding());
        Some(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::base::{PayloadU16, PayloadU8};
    use crate::msgs::enums::{CipherSuite, ProtocolVersion};

    fn sample_state() -> ResumptionState {
        ResumptionState {
            version: ProtocolVersion::TLSv1_3,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            secret: PayloadU8::new(vec![1; 32]),
            issued_unix_ms: 0,
            ticket_age_add: 0,
            alpn: PayloadU8::empty(),
            max_early_data: 0,
            handshake_time_ms: 0,
            app_token: PayloadU16::empty(),
        }
    }

    #[test]
    fn memory_cache_is_single_use() {
        let cache = ServerSessionMemoryCache::new(4);
        let ticket = cache.store(sample_state()).unwrap();
        assert!(cache.lookup(&ticket).is_some());
        assert!(cache.lookup(&ticket).is_none());
    }

    #[test]
    fn memory_cache_respects_capacity() {
        let cache = ServerSessionMemoryCache::new(1);
        assert!(cache.store(sample_state()).is_some());
        assert!(cache.store(sample_state()).is_none());
    }

    #[test]
    fn replay_cache_reports_duplicates() {
        let cache = MemoryReplayCache::new();
        assert_eq!(cache.check(b"binder"), ReplayCacheResult::Unknown);
        assert_eq!(cache.check(b"binder"), ReplayCacheResult::Duplicate);
        assert_eq!(cache.check(b"other"), ReplayCacheResult::Unknown);
    }
}
