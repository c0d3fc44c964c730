//! Ready-made capability implementations covering common deployments.

use alloc::vec::Vec;
use core::fmt::Debug;
use std::collections::HashSet;
use std::sync::Mutex;

use pki_types::CertificateDer;

use crate::crypto::cipher::{AeadKey, NONCE_LEN, TAG_LEN};
use crate::crypto::provider;
use crate::crypto::{random_array, SigningKey};
use crate::enums::{NamedGroup, SignatureScheme};
use crate::error::{CertificateError, Error};
use crate::log::debug;
use crate::msgs::codec::Codec;
use crate::server::config::{
    AppTokenValidator, CertManager, CertVerifier, ReplayCache, ReplayCacheResult, ResumptionState,
    SelectedCert, TicketCipher, TimeProvider,
};
use crate::sync::Arc;

/// Stateless tickets sealed under a random in-process AES-256-GCM key.
///
/// Tickets do not survive a restart, which suits single-process
/// deployments; distributed deployments implement [`TicketCipher`] over a
/// shared key store instead.
pub struct AeadTicketer {
    key: AeadKey,
}

impl AeadTicketer {
    pub fn new() -> Self {
        // failure to source randomness here would fail every handshake
        // later anyway
        let key = random_array::<32>(&provider::RANDOM)
            .map(|bytes| AeadKey::from_slice(&bytes))
            .unwrap_or_else(|_| AeadKey::from_slice(&[0; 32]));
        Self { key }
    }
}

impl Default for AeadTicketer {
    fn default() -> Self {
        Self::new()
    }
}

impl TicketCipher for AeadTicketer {
    fn encrypt(&self, state: &ResumptionState) -> Option<Vec<u8>> {
        let nonce = random_array::<NONCE_LEN>(&provider::RANDOM).ok()?;
        let cipher = &crate::crypto::aead::gcm::AES_256_GCM;

        let mut body = state.get_encoding();
        let mut op = crate::crypto::cipher::AeadCipher::encrypter(cipher, &self.key, &nonce);
        op.update_in_place(&mut body);
        let tag = op.finish();

        let mut ticket = Vec::with_capacity(NONCE_LEN + body.len() + TAG_LEN);
        ticket.extend_from_slice(&nonce);
        ticket.extend_from_slice(&body);
        ticket.extend_from_slice(&tag);
        Some(ticket)
    }

    fn decrypt(&self, ticket: &[u8]) -> Option<ResumptionState> {
        if ticket.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let nonce: [u8; NONCE_LEN] = ticket[..NONCE_LEN].try_into().ok()?;
        let tag: [u8; TAG_LEN] = ticket[ticket.len() - TAG_LEN..].try_into().ok()?;
        let mut body = ticket[NONCE_LEN..ticket.len() - TAG_LEN].to_vec();

        let cipher = &crate::crypto::aead::gcm::AES_256_GCM;
        let mut op = crate::crypto::cipher::AeadCipher::decrypter(cipher, &self.key, &nonce);
        op.update_in_place(&mut body);
        op.finish(&tag).ok()?;

        ResumptionState::read_bytes(&body).ok()
    }
}

/// A replay cache that trusts every offer.
///
/// Suitable when 0-RTT is disabled, or when the application tolerates
/// replay for its early data.
#[derive(Debug)]
pub struct NoneReplayCache;

impl ReplayCache for NoneReplayCache {
    fn check(&self, _psk_identity: &[u8]) -> ReplayCacheResult {
        ReplayCacheResult::NotReplay
    }
}

/// An in-memory replay cache: a PSK identity seen once is a replay
/// afterwards.
///
/// Single-process only; a fleet fronted by one cache would use a shared
/// store behind the same trait.
pub struct MemoryReplayCache {
    seen: Mutex<HashSet<Vec<u8>>>,
}

impl MemoryReplayCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for MemoryReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayCache for MemoryReplayCache {
    fn check(&self, psk_identity: &[u8]) -> ReplayCacheResult {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            // a poisoned cache cannot vouch for anything
            Err(_) => return ReplayCacheResult::MaybeReplay,
        };
        match seen.insert(psk_identity.to_vec()) {
            true => ReplayCacheResult::NotReplay,
            false => ReplayCacheResult::Replay,
        }
    }
}

/// Accepts every application token.
#[derive(Debug)]
pub struct AlwaysValidTokenValidator;

impl AppTokenValidator for AlwaysValidTokenValidator {
    fn validate(&self, _state: &ResumptionState) -> bool {
        true
    }
}

/// Unix time from the system clock.
#[derive(Debug)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn current_time_millis(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Serves one credential regardless of SNI.
pub struct SingleCertManager {
    chain: Vec<CertificateDer<'static>>,
    signer: Arc<dyn SigningKey>,
}

impl SingleCertManager {
    pub fn new(cert: (Vec<CertificateDer<'static>>, Arc<dyn SigningKey>)) -> Self {
        Self {
            chain: cert.0,
            signer: cert.1,
        }
    }
}

impl CertManager for SingleCertManager {
    fn get_cert(
        &self,
        sni: Option<&str>,
        sig_schemes: &[SignatureScheme],
        _groups: &[NamedGroup],
    ) -> Result<SelectedCert, Error> {
        debug!("selecting sole credential (sni {sni:?})");
        self.signer
            .choose_scheme(sig_schemes)
            .ok_or(Error::PeerIncompatible(
                crate::error::PeerIncompatible::NoSignatureSchemesInCommon,
            ))?;
        Ok(SelectedCert {
            chain: self.chain.clone(),
            signer: self.signer.clone(),
        })
    }
}

/// A verifier for chains whose leaf "certificate" is a bare SEC1
/// ECDSA-P256 public key.
///
/// X.509 parsing lives outside this library; this adapter is what the test
/// suites and examples plug in.
#[derive(Debug)]
pub struct RawKeyVerifier;

impl CertVerifier for RawKeyVerifier {
    fn verify_chain(&self, chain: &[CertificateDer<'_>]) -> Result<(), Error> {
        match chain.first() {
            Some(leaf) if !leaf.as_ref().is_empty() => Ok(()),
            _ => Err(CertificateError::BadCertificate.into()),
        }
    }

    fn verify_signature(
        &self,
        scheme: SignatureScheme,
        message: &[u8],
        end_entity: &CertificateDer<'_>,
        signature: &[u8],
    ) -> Result<(), Error> {
        if scheme != SignatureScheme::ECDSA_NISTP256_SHA256 {
            return Err(CertificateError::BadSignature.into());
        }
        provider::sign::verify_ecdsa_p256(end_entity.as_ref(), message, signature)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        alloc::vec![SignatureScheme::ECDSA_NISTP256_SHA256]
    }
}

/// A fresh raw-key credential for tests and examples: the "chain" is the
/// signer's SEC1 public key.
pub fn test_cert() -> (Vec<CertificateDer<'static>>, Arc<dyn SigningKey>) {
    let signer = provider::sign::EcdsaP256Signer::generate();
    let chain = alloc::vec![CertificateDer::from(signer.public_key())];
    (chain, Arc::new(signer))
}

/// A time provider pinned to a settable instant, for deterministic ticket
/// age tests.
#[derive(Debug)]
pub struct FixedTimeProvider(pub core::sync::atomic::AtomicU64);

impl FixedTimeProvider {
    pub fn at(millis: u64) -> Self {
        Self(core::sync::atomic::AtomicU64::new(millis))
    }

    pub fn advance(&self, millis: u64) {
        self.0
            .fetch_add(millis, core::sync::atomic::Ordering::Relaxed);
    }
}

impl TimeProvider for FixedTimeProvider {
    fn current_time_millis(&self) -> u64 {
        self.0.load(core::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{CipherSuite, ProtocolVersion};

    fn sample_state() -> ResumptionState {
        ResumptionState {
            version: ProtocolVersion::TLSv1_3,
            cipher_suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
            secret: alloc::vec![7; 32],
            alpn: None,
            issued_at: 1000,
            lifetime: 3600,
            age_add: 42,
            max_early_data_size: 0,
            app_token: Vec::new(),
            client_cert_chain: None,
        }
    }

    #[test]
    fn tickets_round_trip() {
        let ticketer = AeadTicketer::new();
        let ticket = ticketer.encrypt(&sample_state()).unwrap();
        let state = ticketer.decrypt(&ticket).unwrap();
        assert_eq!(state.secret, alloc::vec![7; 32]);
        assert_eq!(state.age_add, 42);
    }

    #[test]
    fn tampered_ticket_rejected() {
        let ticketer = AeadTicketer::new();
        let mut ticket = ticketer.encrypt(&sample_state()).unwrap();
        let n = ticket.len();
        ticket[n / 2] ^= 1;
        assert!(ticketer.decrypt(&ticket).is_none());
    }

    #[test]
    fn foreign_key_ticket_rejected() {
        let a = AeadTicketer::new();
        let b = AeadTicketer::new();
        let ticket = a.encrypt(&sample_state()).unwrap();
        assert!(b.decrypt(&ticket).is_none());
    }

    #[test]
    fn memory_replay_cache_flags_second_use() {
        let cache = MemoryReplayCache::new();
        assert_eq!(cache.check(b"id-1"), ReplayCacheResult::NotReplay);
        assert_eq!(cache.check(b"id-1"), ReplayCacheResult::Replay);
        assert_eq!(cache.check(b"id-2"), ReplayCacheResult::NotReplay);
    }
}
