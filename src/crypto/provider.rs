//! The default cryptographic provider, built from pure-Rust primitive
//! crates.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::enums::NamedGroup;
use crate::error::Error;

use super::{ActiveKeyExchange, SecureRandom, SharedSecret, SupportedKxGroup};

/// The process-default randomness source.
pub static RANDOM: OsRandom = OsRandom;

/// [`SecureRandom`] over the operating system's generator.
#[derive(Debug)]
pub struct OsRandom;

impl SecureRandom for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), Error> {
        use rand_core::RngCore;
        rand_core::OsRng
            .try_fill_bytes(buf)
            .map_err(|_| Error::FailedToGetRandomBytes)
    }
}

pub mod hash {
    use sha2::Digest;

    use super::*;
    use crate::crypto::{Hash, HashAlgorithm, HashContext, HashOutput};

    /// SHA-256.
    pub static SHA256: Sha256Hash = Sha256Hash;

    /// SHA-384.
    pub static SHA384: Sha384Hash = Sha384Hash;

    #[derive(Debug)]
    pub struct Sha256Hash;

    impl Hash for Sha256Hash {
        fn algorithm(&self) -> HashAlgorithm {
            HashAlgorithm::SHA256
        }

        fn output_len(&self) -> usize {
            32
        }

        fn start(&self) -> Box<dyn HashContext> {
            Box::new(Sha256Context(sha2::Sha256::new()))
        }

        fn compute(&self, data: &[u8]) -> HashOutput {
            HashOutput::new(sha2::Sha256::digest(data).as_slice())
        }
    }

    struct Sha256Context(sha2::Sha256);

    impl HashContext for Sha256Context {
        fn update(&mut self, data: &[u8]) {
            self.0.update(data);
        }

        fn fork(&self) -> Box<dyn HashContext> {
            Box::new(Sha256Context(self.0.clone()))
        }

        fn fork_finish(&self) -> HashOutput {
            HashOutput::new(self.0.clone().finalize().as_slice())
        }

        fn finish(self: Box<Self>) -> HashOutput {
            HashOutput::new(self.0.finalize().as_slice())
        }
    }

    #[derive(Debug)]
    pub struct Sha384Hash;

    impl Hash for Sha384Hash {
        fn algorithm(&self) -> HashAlgorithm {
            HashAlgorithm::SHA384
        }

        fn output_len(&self) -> usize {
            48
        }

        fn start(&self) -> Box<dyn HashContext> {
            Box::new(Sha384Context(sha2::Sha384::new()))
        }

        fn compute(&self, data: &[u8]) -> HashOutput {
            HashOutput::new(sha2::Sha384::digest(data).as_slice())
        }
    }

    struct Sha384Context(sha2::Sha384);

    impl HashContext for Sha384Context {
        fn update(&mut self, data: &[u8]) {
            self.0.update(data);
        }

        fn fork(&self) -> Box<dyn HashContext> {
            Box::new(Sha384Context(self.0.clone()))
        }

        fn fork_finish(&self) -> HashOutput {
            HashOutput::new(self.0.clone().finalize().as_slice())
        }

        fn finish(self: Box<Self>) -> HashOutput {
            HashOutput::new(self.0.finalize().as_slice())
        }
    }
}

pub mod hmac {
    use ::hmac::{Hmac as HmacImpl, Mac};
    use sha2::{Sha256, Sha384};

    use super::*;
    use crate::crypto::{Hmac, HmacKey, Tag};

    /// HMAC-SHA256.
    pub static HMAC_SHA256: Sha256Hmac = Sha256Hmac;

    /// HMAC-SHA384.
    pub static HMAC_SHA384: Sha384Hmac = Sha384Hmac;

    #[derive(Debug)]
    pub struct Sha256Hmac;

    impl Hmac for Sha256Hmac {
        fn with_key(&self, key: &[u8]) -> Box<dyn HmacKey> {
            Box::new(Sha256HmacKey(key.to_vec()))
        }

        fn hash_output_len(&self) -> usize {
            32
        }
    }

    struct Sha256HmacKey(Vec<u8>);

    impl HmacKey for Sha256HmacKey {
        fn sign_concat(&self, first: &[u8], middle: &[&[u8]], last: &[u8]) -> Tag {
            // key length is unrestricted for HMAC
            let mut mac = HmacImpl::<Sha256>::new_from_slice(&self.0).unwrap();
            mac.update(first);
            for m in middle {
                mac.update(m);
            }
            mac.update(last);
            Tag::new(mac.finalize().into_bytes().as_slice())
        }

        fn tag_len(&self) -> usize {
            32
        }
    }

    #[derive(Debug)]
    pub struct Sha384Hmac;

    impl Hmac for Sha384Hmac {
        fn with_key(&self, key: &[u8]) -> Box<dyn HmacKey> {
            Box::new(Sha384HmacKey(key.to_vec()))
        }

        fn hash_output_len(&self) -> usize {
            48
        }
    }

    struct Sha384HmacKey(Vec<u8>);

    impl HmacKey for Sha384HmacKey {
        fn sign_concat(&self, first: &[u8], middle: &[&[u8]], last: &[u8]) -> Tag {
            let mut mac = HmacImpl::<Sha384>::new_from_slice(&self.0).unwrap();
            mac.update(first);
            for m in middle {
                mac.update(m);
            }
            mac.update(last);
            Tag::new(mac.finalize().into_bytes().as_slice())
        }

        fn tag_len(&self) -> usize {
            48
        }
    }
}

pub mod kx {
    use super::*;

    /// All key exchange groups the default provider implements, in
    /// preference order.
    pub static ALL_KX_GROUPS: &[&'static dyn SupportedKxGroup] = &[&X25519, &SECP256R1];

    /// X25519.
    pub static X25519: X25519Group = X25519Group;

    #[derive(Debug)]
    pub struct X25519Group;

    impl SupportedKxGroup for X25519Group {
        fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error> {
            let secret = x25519_dalek::StaticSecret::random_from_rng(rand_core::OsRng);
            let pub_key = x25519_dalek::PublicKey::from(&secret);
            Ok(Box::new(X25519Active {
                secret,
                pub_key: pub_key.to_bytes(),
            }))
        }

        fn name(&self) -> NamedGroup {
            NamedGroup::X25519
        }
    }

    struct X25519Active {
        secret: x25519_dalek::StaticSecret,
        pub_key: [u8; 32],
    }

    impl ActiveKeyExchange for X25519Active {
        fn complete(self: Box<Self>, peer_pub_key: &[u8]) -> Result<SharedSecret, Error> {
            let peer: [u8; 32] = peer_pub_key
                .try_into()
                .map_err(|_| Error::General("invalid x25519 peer share".into()))?;
            let shared = self
                .secret
                .diffie_hellman(&x25519_dalek::PublicKey::from(peer));
            if !shared.was_contributory() {
                return Err(Error::General("x25519 peer share was not contributory".into()));
            }
            Ok(SharedSecret::new(shared.as_bytes().to_vec()))
        }

        fn pub_key(&self) -> &[u8] {
            &self.pub_key
        }

        fn group(&self) -> NamedGroup {
            NamedGroup::X25519
        }
    }

    /// secp256r1, uncompressed points only.
    pub static SECP256R1: Secp256r1Group = Secp256r1Group;

    #[derive(Debug)]
    pub struct Secp256r1Group;

    impl SupportedKxGroup for Secp256r1Group {
        fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error> {
            let secret = p256::ecdh::EphemeralSecret::random(&mut rand_core::OsRng);
            let pub_key = p256::EncodedPoint::from(secret.public_key())
                .as_bytes()
                .to_vec();
            Ok(Box::new(Secp256r1Active { secret, pub_key }))
        }

        fn name(&self) -> NamedGroup {
            NamedGroup::secp256r1
        }
    }

    struct Secp256r1Active {
        secret: p256::ecdh::EphemeralSecret,
        pub_key: Vec<u8>,
    }

    impl ActiveKeyExchange for Secp256r1Active {
        fn complete(self: Box<Self>, peer_pub_key: &[u8]) -> Result<SharedSecret, Error> {
            let peer = p256::PublicKey::from_sec1_bytes(peer_pub_key)
                .map_err(|_| Error::General("invalid secp256r1 peer share".into()))?;
            let shared = self.secret.diffie_hellman(&peer);
            Ok(SharedSecret::new(
                shared.raw_secret_bytes().as_slice().to_vec(),
            ))
        }

        fn pub_key(&self) -> &[u8] {
            &self.pub_key
        }

        fn group(&self) -> NamedGroup {
            NamedGroup::secp256r1
        }
    }
}

pub mod sign {
    use p256::ecdsa::signature::Signer;

    use super::*;
    use crate::crypto::SigningKey;
    use crate::enums::SignatureScheme;

    /// An ECDSA-P256-SHA256 signing key.
    ///
    /// This is the signer the bundled test certificate machinery uses;
    /// production deployments provide their own [`SigningKey`].
    pub struct EcdsaP256Signer {
        key: p256::ecdsa::SigningKey,
    }

    impl EcdsaP256Signer {
        /// Generate a fresh random key.
        pub fn generate() -> Self {
            Self {
                key: p256::ecdsa::SigningKey::random(&mut rand_core::OsRng),
            }
        }

        /// The corresponding public key, SEC1 uncompressed.
        pub fn public_key(&self) -> Vec<u8> {
            p256::EncodedPoint::from(self.key.verifying_key())
                .as_bytes()
                .to_vec()
        }
    }

    impl Debug for EcdsaP256Signer {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("EcdsaP256Signer").finish()
        }
    }

    impl SigningKey for EcdsaP256Signer {
        fn choose_scheme(&self, offered: &[SignatureScheme]) -> Option<SignatureScheme> {
            offered
                .iter()
                .find(|s| **s == SignatureScheme::ECDSA_NISTP256_SHA256)
                .copied()
        }

        fn sign(&self, scheme: SignatureScheme, message: &[u8]) -> Result<Vec<u8>, Error> {
            if scheme != SignatureScheme::ECDSA_NISTP256_SHA256 {
                return Err(Error::General("unsupported signature scheme".into()));
            }
            let sig: p256::ecdsa::Signature = self.key.sign(message);
            Ok(sig.to_der().as_bytes().to_vec())
        }
    }

    /// Verify an ECDSA-P256-SHA256 signature over `message`.
    pub fn verify_ecdsa_p256(
        public_key_sec1: &[u8],
        message: &[u8],
        signature_der: &[u8],
    ) -> Result<(), Error> {
        use p256::ecdsa::signature::Verifier;
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key_sec1)
            .map_err(|_| Error::General("invalid verifying key".into()))?;
        let sig = p256::ecdsa::Signature::from_der(signature_der)
            .map_err(|_| Error::General("malformed signature".into()))?;
        key.verify(message, &sig)
            .map_err(|_| crate::error::CertificateError::BadSignature.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Hash, Hmac};

    #[test]
    fn sha256_known_answer() {
        let out = hash::SHA256.compute(b"abc");
        assert_eq!(
            out.as_ref()[..4],
            [0xba, 0x78, 0x16, 0xbf],
        );
        assert_eq!(hash::SHA256.output_len(), 32);
        assert_eq!(hash::SHA384.output_len(), 48);
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut ctx = hash::SHA384.start();
        ctx.update(b"hello ");
        let fork = ctx.fork();
        ctx.update(b"world");
        assert_eq!(
            ctx.finish().as_ref(),
            hash::SHA384.compute(b"hello world").as_ref()
        );
        assert_eq!(
            fork.finish().as_ref(),
            hash::SHA384.compute(b"hello ").as_ref()
        );
    }

    #[test]
    fn hmac_sign_concat_ordering() {
        let key = hmac::HMAC_SHA256.with_key(b"key");
        let joined = key.sign(&[b"abc", b"def"]);
        let single = key.sign(&[b"abcdef"]);
        assert_eq!(joined.as_ref(), single.as_ref());
    }

    #[test]
    fn x25519_agreement() {
        let a = kx::X25519.start().unwrap();
        let b = kx::X25519.start().unwrap();
        let a_pub = a.pub_key().to_vec();
        let b_pub = b.pub_key().to_vec();
        let s1 = a.complete(&b_pub).unwrap();
        let s2 = b.complete(&a_pub).unwrap();
        assert_eq!(s1.secret_bytes(), s2.secret_bytes());
    }

    #[test]
    fn secp256r1_agreement() {
        let a = kx::SECP256R1.start().unwrap();
        let b = kx::SECP256R1.start().unwrap();
        let a_pub = a.pub_key().to_vec();
        let b_pub = b.pub_key().to_vec();
        let s1 = a.complete(&b_pub).unwrap();
        let s2 = b.complete(&a_pub).unwrap();
        assert_eq!(s1.secret_bytes(), s2.secret_bytes());
    }

    #[test]
    fn ecdsa_sign_verify() {
        use crate::crypto::SigningKey;
        use crate::enums::SignatureScheme;

        let signer = sign::EcdsaP256Signer::generate();
        let scheme = signer
            .choose_scheme(&[SignatureScheme::ECDSA_NISTP256_SHA256])
            .unwrap();
        let sig = signer.sign(scheme, b"transcript").unwrap();
        assert!(sign::verify_ecdsa_p256(&signer.public_key(), b"transcript", &sig).is_ok());
        assert!(sign::verify_ecdsa_p256(&signer.public_key(), b"tampered", &sig).is_err());
    }
}
