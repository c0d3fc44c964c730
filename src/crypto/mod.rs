//! Cryptographic capability boundaries.
//!
//! The protocol engine never calls a primitive directly: everything it needs
//! is expressed as one of the traits here, and a default provider built from
//! pure-Rust primitive crates lives in [`provider`].

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::enums::NamedGroup;
use crate::error::Error;

pub(crate) mod aead;
pub mod cipher;
pub mod hkdf;
pub mod provider;

pub use crate::msgs::enums::HashAlgorithm;

/// A source of cryptographically secure randomness.
pub trait SecureRandom: Send + Sync + Debug {
    /// Fill `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), Error>;
}

pub(crate) fn random_array<const N: usize>(
    random: &dyn SecureRandom,
) -> Result<[u8; N], Error> {
    let mut out = [0u8; N];
    random.fill(&mut out)?;
    Ok(out)
}

/// Describes a single cryptographic hash function.
pub trait Hash: Send + Sync {
    /// Which hash function this is, eg `HashAlgorithm::SHA256`.
    fn algorithm(&self) -> HashAlgorithm;

    /// The length in bytes of this hash function's output.
    fn output_len(&self) -> usize;

    /// Start an incremental computation.
    fn start(&self) -> Box<dyn HashContext>;

    /// Hash `data` in one shot.
    fn compute(&self, data: &[u8]) -> HashOutput;
}

/// Largest supported hash output (SHA-512).
pub(crate) const HASH_MAX_OUTPUT: usize = 64;

/// A hash output, stored as a value.
#[derive(Clone)]
pub struct HashOutput {
    buf: [u8; HASH_MAX_OUTPUT],
    used: usize,
}

impl HashOutput {
    /// Build an output from a slice of no more than `HASH_MAX_OUTPUT` bytes.
    pub fn new(bytes: &[u8]) -> Self {
        let mut output = Self {
            buf: [0u8; HASH_MAX_OUTPUT],
            used: bytes.len(),
        };
        output.buf[..bytes.len()].copy_from_slice(bytes);
        output
    }
}

impl AsRef<[u8]> for HashOutput {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl Debug for HashOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        crate::msgs::base::hex(f, self.as_ref())
    }
}

/// An incremental hash computation.
pub trait HashContext: Send + Sync {
    /// Add `data` to the computation.
    fn update(&mut self, data: &[u8]);

    /// Fork the computation, producing another context with the same prefix.
    fn fork(&self) -> Box<dyn HashContext>;

    /// Finish a copy of the computation, leaving this one usable.
    fn fork_finish(&self) -> HashOutput;

    /// Terminate and finish the computation.
    fn finish(self: Box<Self>) -> HashOutput;
}

/// A concrete HMAC implementation, reified with a hash function.
///
/// One object implements this trait for HMAC-SHA256, another for
/// HMAC-SHA384, and so on.
pub trait Hmac: Send + Sync {
    /// Prepare to use `key` as an HMAC key.
    fn with_key(&self, key: &[u8]) -> Box<dyn HmacKey>;

    /// The output length of the underlying hash function.
    fn hash_output_len(&self) -> usize;
}

/// Largest supported HMAC tag (SHA-512).
pub(crate) const HMAC_MAX_TAG: usize = 64;

/// An HMAC tag, stored as a value.
#[derive(Clone)]
pub struct Tag {
    buf: [u8; HMAC_MAX_TAG],
    used: usize,
}

impl Tag {
    /// Build a tag by copying a byte slice of up to `HMAC_MAX_TAG` bytes.
    pub fn new(bytes: &[u8]) -> Self {
        let mut tag = Self {
            buf: [0u8; HMAC_MAX_TAG],
            used: bytes.len(),
        };
        tag.buf[..bytes.len()].copy_from_slice(bytes);
        tag
    }
}

impl AsRef<[u8]> for Tag {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl Drop for Tag {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.buf.zeroize();
    }
}

/// An HMAC key ready for use.
///
/// The algorithm is implicit in the `Hmac` object that produced the key.
pub trait HmacKey: Send + Sync {
    /// Calculate a tag over `data` -- a slice of byte slices.
    fn sign(&self, data: &[&[u8]]) -> Tag {
        self.sign_concat(&[], data, &[])
    }

    /// Calculate a tag over the concatenation of `first`, the items in
    /// `middle`, and `last`.
    fn sign_concat(&self, first: &[u8], middle: &[&[u8]], last: &[u8]) -> Tag;

    /// The length of this key's tags.
    fn tag_len(&self) -> usize;
}

/// A supported key exchange group.
///
/// The dynamic half starts an exchange, producing an [`ActiveKeyExchange`].
pub trait SupportedKxGroup: Send + Sync + Debug {
    /// Start a key exchange: generate an ephemeral private key.
    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, Error>;

    /// The group this object implements.
    fn name(&self) -> NamedGroup;
}

/// An in-progress key exchange, holding the ephemeral private key.
pub trait ActiveKeyExchange: Send + Sync {
    /// Complete the exchange against the peer's public share, consuming the
    /// private key and yielding the shared secret.
    fn complete(self: Box<Self>, peer_pub_key: &[u8]) -> Result<SharedSecret, Error>;

    /// Our public share, to be sent to the peer.
    fn pub_key(&self) -> &[u8];

    /// The group of this exchange.
    fn group(&self) -> NamedGroup;
}

/// The result of a key exchange, zeroized on drop.
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn secret_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.0.zeroize();
    }
}

/// A key that can sign the server's CertificateVerify message.
///
/// Certificate selection hands one of these out; the engine only ever calls
/// `choose_scheme` followed by `sign`.
pub trait SigningKey: Send + Sync + Debug {
    /// Choose a scheme from the client's offered list, or decline.
    fn choose_scheme(
        &self,
        offered: &[crate::enums::SignatureScheme],
    ) -> Option<crate::enums::SignatureScheme>;

    /// Sign `message` under the previously chosen `scheme`.
    fn sign(
        &self,
        scheme: crate::enums::SignatureScheme,
        message: &[u8],
    ) -> Result<Vec<u8>, Error>;
}
