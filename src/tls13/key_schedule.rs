//! Key schedule maintenance for TLS 1.3.
//!
//! The state machine drives this through labeled operations and never sees
//! HKDF directly.  The scheduler holds one *extract* secret at a time
//! (early → handshake → master) and remembers the traffic secrets it has
//! derived so they can be fetched later by kind.

use alloc::vec::Vec;

use zeroize::Zeroize;

use crate::crypto::cipher::{AeadKey, Iv, NONCE_LEN};
use crate::crypto::hkdf::{Expander, Extractor, OkmBlock};
use crate::crypto::{HashOutput, Hmac};
use crate::error::Error;
use crate::tls13::Tls13CipherSuite;

/// The kinds of secret we can derive or fetch from a [`KeyScheduler`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SecretKind {
    ResumptionPskBinderKey,
    ClientEarlyTrafficSecret,
    EarlyExporterMasterSecret,
    ClientHandshakeTrafficSecret,
    ServerHandshakeTrafficSecret,
    ClientApplicationTrafficSecret,
    ServerApplicationTrafficSecret,
    ExporterMasterSecret,
    ResumptionMasterSecret,
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
        }
    }
}

/// Which extraction the scheduler last performed.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Early,
    Handshake,
    Master,
    Cleared,
}

/// The TLS 1.3 key schedule for one connection.
pub(crate) struct KeyScheduler {
    suite: &'static Tls13CipherSuite,
    current: OkmBlock,
    stage: Stage,
    derived: Vec<(SecretKind, OkmBlock)>,
}

impl KeyScheduler {
    /// Start a schedule with no PSK: the early secret is extracted from
    /// zeroes.
    pub(crate) fn new(suite: &'static Tls13CipherSuite) -> Self {
        Self::with_psk(suite, &alloc::vec![0u8; suite.hash_provider.output_len()])
    }

    /// Start a schedule whose early secret is extracted from `psk`.
    pub(crate) fn with_psk(suite: &'static Tls13CipherSuite, psk: &[u8]) -> Self {
        let current = Extractor::no_salt(suite.hmac_provider)
            .extract(psk)
            .expand_block(&[]);
        Self {
            suite,
            current,
            stage: Stage::Early,
            derived: Vec::new(),
        }
    }

    pub(crate) fn suite(&self) -> &'static Tls13CipherSuite {
        self.suite
    }

    fn expander(&self) -> Expander {
        Expander::from_okm(&self.current, self.suite.hmac_provider)
    }

    /// `Derive-Secret(current, "derived", "")` then extract with `ikm`.
    fn advance(&mut self, ikm: &[u8], next: Stage) {
        let empty_hash = self.suite.hash_provider.compute(b"");
        let salt = hkdf_expand_label_inner(&self.expander(), b"derived", empty_hash.as_ref());
        self.current = Extractor::with_salt(self.suite.hmac_provider, salt.as_ref())
            .extract(ikm)
            .expand_block(&[]);
        self.stage = next;
    }

    /// Mix the (EC)DHE shared secret in, moving to the handshake secret.
    pub(crate) fn derive_handshake_secret(&mut self, shared: &[u8]) {
        debug_assert_eq!(self.stage, Stage::Early);
        self.advance(shared, Stage::Handshake);
    }

    /// Move from the handshake secret to the master secret.
    pub(crate) fn derive_master_secret(&mut self) {
        debug_assert_eq!(self.stage, Stage::Handshake);
        let zeroes = alloc::vec![0u8; self.suite.hash_provider.output_len()];
        self.advance(&zeroes, Stage::Master);
    }

    /// `Derive-Secret(current, label(kind), transcript)`, remembered for
    /// [`Self::get_secret`].
    pub(crate) fn derive_traffic_secret(
        &mut self,
        kind: SecretKind,
        transcript: &HashOutput,
    ) -> OkmBlock {
        let secret =
            hkdf_expand_label_inner(&self.expander(), kind.to_bytes(), transcript.as_ref());
        self.derived.push((kind, secret.clone()));
        secret
    }

    /// A previously derived secret, by kind.
    pub(crate) fn get_secret(&self, kind: SecretKind) -> Option<&OkmBlock> {
        self.derived
            .iter()
            .rev()
            .find(|(k, _)| *k == kind)
            .map(|(_, s)| s)
    }

    /// The binder key for resumption PSK binders.
    ///
    /// Only valid before the handshake secret is derived.
    pub(crate) fn resumption_binder_key(&self) -> OkmBlock {
        debug_assert_eq!(self.stage, Stage::Early);
        let empty_hash = self.suite.hash_provider.compute(b"");
        hkdf_expand_label_inner(
            &self.expander(),
            SecretKind::ResumptionPskBinderKey.to_bytes(),
            empty_hash.as_ref(),
        )
    }

    /// Expand a traffic secret into its AEAD key and IV.
    pub(crate) fn get_traffic_key(&self, secret: &OkmBlock) -> (AeadKey, Iv) {
        let expander = Expander::from_okm(secret, self.suite.hmac_provider);

        let mut key = alloc::vec![0u8; self.suite.aead.key_len()];
        hkdf_expand_label_slice(&expander, b"key", &[], &mut key);
        let aead_key = AeadKey::from_slice(&key);
        key.zeroize();

        let mut iv = [0u8; NONCE_LEN];
        hkdf_expand_label_slice(&expander, b"iv", &[], &mut iv);

        (aead_key, Iv::from(iv))
    }

    /// The PSK a future session will resume with, bound to a ticket nonce.
    pub(crate) fn resumption_psk(&self, nonce: &[u8]) -> Result<OkmBlock, Error> {
        let base = self
            .get_secret(SecretKind::ResumptionMasterSecret)
            .ok_or_else(|| Error::General("resumption master secret not derived".into()))?;
        Ok(hkdf_expand_label_block(
            base,
            self.suite.hmac_provider,
            b"resumption",
            nonce,
        ))
    }

    /// Forget the extract secret.  Traffic secrets already derived remain
    /// fetchable; no further derivations are possible.
    pub(crate) fn clear_master_secret(&mut self) {
        self.current = OkmBlock::new(&[]);
        self.stage = Stage::Cleared;
    }
}

/// The next-generation traffic secret after a KeyUpdate.
pub(crate) fn next_traffic_secret(
    secret: &OkmBlock,
    hmac: &'static dyn Hmac,
) -> OkmBlock {
    hkdf_expand_label_block(secret, hmac, b"traffic upd", &[])
}

/// `HKDF-Expand-Label` producing one hash-sized block.
pub(crate) fn hkdf_expand_label_block(
    secret: &OkmBlock,
    hmac: &'static dyn Hmac,
    label: &[u8],
    context: &[u8],
) -> OkmBlock {
    hkdf_expand_label_inner(&Expander::from_okm(secret, hmac), label, context)
}

fn hkdf_expand_label_inner(
    expander: &Expander,
    label: &[u8],
    context: &[u8],
) -> OkmBlock {
    let out_len = (expander.block_len() as u16).to_be_bytes();
    let label_len = [(6 + label.len()) as u8];
    let context_len = [context.len() as u8];

    expander.expand_block(&[
        &out_len,
        &label_len,
        b"tls13 ",
        label,
        &context_len,
        context,
    ])
}

/// `HKDF-Expand-Label` filling `output`, for key/iv expansion.
pub(crate) fn hkdf_expand_label_slice(
    expander: &Expander,
    label: &[u8],
    context: &[u8],
    output: &mut [u8],
) {
    let out_len = (output.len() as u16).to_be_bytes();
    let label_len = [(6 + label.len()) as u8];
    let context_len = [context.len() as u8];

    // output is always far below the HKDF limit here
    let _ = expander.expand_slice(
        &[
            &out_len,
            &label_len,
            b"tls13 ",
            label,
            &context_len,
            context,
        ],
        output,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls13::TLS13_AES_128_GCM_SHA256;

    /// Key schedule walk-through from RFC 8448 section 3 (simple 1-RTT).
    #[test]
    fn rfc8448_handshake_secrets() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut ks = KeyScheduler::new(suite);

        let shared_secret = [
            0x8b, 0xd4, 0x05, 0x4f, 0xb5, 0x5b, 0x9d, 0x63, 0xfd, 0xfb, 0xac, 0xf9, 0xf0, 0x4b,
            0x9f, 0x0d, 0x35, 0xe6, 0xd6, 0x3f, 0x53, 0x75, 0x63, 0xef, 0xd4, 0x62, 0x72, 0x90,
            0x0f, 0x89, 0x49, 0x2d,
        ];
        ks.derive_handshake_secret(&shared_secret);

        // transcript hash of ClientHello..ServerHello from the RFC trace
        let hello_hash = HashOutput::new(&[
            0x86, 0x0c, 0x06, 0xed, 0xc0, 0x78, 0x58, 0xee, 0x8e, 0x78, 0xf0, 0xe7, 0x42, 0x8c,
            0x58, 0xed, 0xd6, 0xb4, 0x3f, 0x2c, 0xa3, 0xe6, 0xe9, 0x5f, 0x02, 0xed, 0x06, 0x3c,
            0xf0, 0xe1, 0xca, 0xd8,
        ]);

        let c_hs =
            ks.derive_traffic_secret(SecretKind::ClientHandshakeTrafficSecret, &hello_hash);
        assert_eq!(
            c_hs.as_ref(),
            &[
                0xb3, 0xed, 0xdb, 0x12, 0x6e, 0x06, 0x7f, 0x35, 0xa7, 0x80, 0xb3, 0xab, 0xf4, 0x5e,
                0x2d, 0x8f, 0x3b, 0x1a, 0x95, 0x07, 0x38, 0xf5, 0x2e, 0x96, 0x00, 0x74, 0x6a, 0x0e,
                0x27, 0xa5, 0x5a, 0x21,
            ]
        );

        let s_hs =
            ks.derive_traffic_secret(SecretKind::ServerHandshakeTrafficSecret, &hello_hash);
        assert_eq!(
            s_hs.as_ref(),
            &[
                0xb6, 0x7b, 0x7d, 0x69, 0x0c, 0xc1, 0x6c, 0x4e, 0x75, 0xe5, 0x42, 0x13, 0xcb, 0x2d,
                0x37, 0xb4, 0xe9, 0xc9, 0x12, 0xbc, 0xde, 0xd9, 0x10, 0x5d, 0x42, 0xbe, 0xfd, 0x59,
                0xd3, 0x91, 0xad, 0x38,
            ]
        );

        // server handshake write key and iv, same trace
        let (key, iv) = ks.get_traffic_key(&s_hs);
        assert_eq!(
            key.as_ref(),
            &[
                0x3f, 0xce, 0x51, 0x60, 0x09, 0xc2, 0x17, 0x27, 0xd0, 0xf2, 0xe4, 0xe8, 0x6e, 0xe4,
                0x03, 0xbc,
            ]
        );
        assert_eq!(
            iv.0,
            [0x5d, 0x31, 0x3e, 0xb2, 0x67, 0x12, 0x76, 0xee, 0x13, 0x00, 0x0b, 0x30]
        );
    }

    #[test]
    fn secrets_are_remembered_by_kind() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut ks = KeyScheduler::new(suite);
        ks.derive_handshake_secret(&[0xab; 32]);
        let transcript = suite.hash_provider.compute(b"transcript");
        let derived =
            ks.derive_traffic_secret(SecretKind::ClientHandshakeTrafficSecret, &transcript);
        assert_eq!(
            ks.get_secret(SecretKind::ClientHandshakeTrafficSecret)
                .unwrap()
                .as_ref(),
            derived.as_ref()
        );
        assert!(ks
            .get_secret(SecretKind::ExporterMasterSecret)
            .is_none());
    }

    #[test]
    fn cleared_schedule_keeps_derived_secrets() {
        let suite = &TLS13_AES_128_GCM_SHA256;
        let mut ks = KeyScheduler::new(suite);
        ks.derive_handshake_secret(&[0x11; 32]);
        ks.derive_master_secret();
        let transcript = suite.hash_provider.compute(b"full transcript");
        ks.derive_traffic_secret(SecretKind::ResumptionMasterSecret, &transcript);
        ks.clear_master_secret();
        assert!(ks.resumption_psk(&[0, 1]).is_ok());
    }
}
