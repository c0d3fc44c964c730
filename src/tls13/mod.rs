use alloc::vec::Vec;
use core::fmt;

use crate::crypto::cipher::AeadCipher;
use crate::crypto::{Hash, HashOutput, Hmac};
use crate::enums::CipherSuite;

pub(crate) mod key_schedule;

/// A TLS 1.3 cipher suite supported by this library.
pub struct Tls13CipherSuite {
    /// The suite's wire identifier.
    pub suite: CipherSuite,

    /// The suite's hash function, used for the transcript and HKDF.
    pub hash_provider: &'static dyn Hash,

    /// HMAC over the same hash, for HKDF and Finished computation.
    pub hmac_provider: &'static dyn Hmac,

    /// The record protection AEAD.
    pub aead: &'static dyn AeadCipher,
}

impl Tls13CipherSuite {
    /// Can a session using this suite resume from a session using `prev`?
    ///
    /// Suites sharing a hash share a key schedule, which is the only
    /// requirement.
    pub fn can_resume_from(&'static self, prev: CipherSuite, all: &[&'static Self]) -> bool {
        all.iter()
            .find(|s| s.suite == prev)
            .map(|prev| prev.hash_provider.algorithm() == self.hash_provider.algorithm())
            .unwrap_or_default()
    }
}

impl PartialEq for Tls13CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.suite == other.suite
    }
}

impl fmt::Debug for Tls13CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tls13CipherSuite")
            .field("suite", &self.suite)
            .finish()
    }
}

/// TLS13_AES_128_GCM_SHA256.
pub static TLS13_AES_128_GCM_SHA256: Tls13CipherSuite = Tls13CipherSuite {
    suite: CipherSuite::TLS13_AES_128_GCM_SHA256,
    hash_provider: &crate::crypto::provider::hash::SHA256,
    hmac_provider: &crate::crypto::provider::hmac::HMAC_SHA256,
    aead: &crate::crypto::aead::gcm::AES_128_GCM,
};

/// TLS13_AES_256_GCM_SHA384.
pub static TLS13_AES_256_GCM_SHA384: Tls13CipherSuite = Tls13CipherSuite {
    suite: CipherSuite::TLS13_AES_256_GCM_SHA384,
    hash_provider: &crate::crypto::provider::hash::SHA384,
    hmac_provider: &crate::crypto::provider::hmac::HMAC_SHA384,
    aead: &crate::crypto::aead::gcm::AES_256_GCM,
};

/// TLS13_CHACHA20_POLY1305_SHA256.
pub static TLS13_CHACHA20_POLY1305_SHA256: Tls13CipherSuite = Tls13CipherSuite {
    suite: CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
    hash_provider: &crate::crypto::provider::hash::SHA256,
    hmac_provider: &crate::crypto::provider::hmac::HMAC_SHA256,
    aead: &crate::crypto::aead::chacha::CHACHA20_POLY1305,
};

/// All suites this library implements, in default preference order.
pub static ALL_CIPHER_SUITES: &[&Tls13CipherSuite] = &[
    &TLS13_AES_128_GCM_SHA256,
    &TLS13_AES_256_GCM_SHA384,
    &TLS13_CHACHA20_POLY1305_SHA256,
];

/// Constructs the signature message specified in section 4.4.3 of RFC8446.
pub(crate) fn construct_client_verify_message(handshake_hash: &HashOutput) -> Vec<u8> {
    construct_verify_message(handshake_hash, b"TLS 1.3, client CertificateVerify\x00")
}

/// Constructs the signature message specified in section 4.4.3 of RFC8446.
pub(crate) fn construct_server_verify_message(handshake_hash: &HashOutput) -> Vec<u8> {
    construct_verify_message(handshake_hash, b"TLS 1.3, server CertificateVerify\x00")
}

fn construct_verify_message(
    handshake_hash: &HashOutput,
    context_string_with_0: &[u8],
) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.resize(64, 0x20u8);
    msg.extend_from_slice(context_string_with_0);
    msg.extend_from_slice(handshake_hash.as_ref());
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumption_requires_matching_hash() {
        assert!(TLS13_AES_128_GCM_SHA256.can_resume_from(
            CipherSuite::TLS13_CHACHA20_POLY1305_SHA256,
            ALL_CIPHER_SUITES
        ));
        assert!(!TLS13_AES_256_GCM_SHA384
            .can_resume_from(CipherSuite::TLS13_AES_128_GCM_SHA256, ALL_CIPHER_SUITES));
        assert!(!TLS13_AES_128_GCM_SHA256
            .can_resume_from(CipherSuite::Unknown(0x9999), ALL_CIPHER_SUITES));
    }

    #[test]
    fn verify_message_layout() {
        let hash = crate::crypto::provider::hash::SHA256.compute(b"x");
        let msg = construct_server_verify_message(&hash);
        assert_eq!(msg.len(), 64 + 34 + 32);
        assert!(msg[..64].iter().all(|b| *b == 0x20));
        assert_eq!(&msg[64..97], b"TLS 1.3, server CertificateVerify\x00");
    }
}
