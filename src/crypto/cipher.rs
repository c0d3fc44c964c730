//! The AEAD boundary and record protection over chained buffers.
//!
//! Ciphers here are *incremental*: a record's plaintext or ciphertext is a
//! chain of segments, fed to the primitive one segment at a time.  The
//! functions in this module own the buffer policy: uniquely-owned chains are
//! transformed in place, shared chains are copied.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::Debug;

use zeroize::Zeroize;

use crate::buffer::{Buf, BufChain};
use crate::error::Error;
use crate::msgs::codec::put_u64;

/// Size of TLS nonces (incorrectly termed "IV" in standard) for all
/// supported ciphersuites (AES-GCM, Chacha20Poly1305).
pub(crate) const NONCE_LEN: usize = 12;

/// Authentication tag size for all supported ciphersuites.
pub(crate) const TAG_LEN: usize = 16;

/// Segments of a record chain that may be individually unshared during
/// decryption before we give up and copy the whole chain.  Transport buffers
/// typically contribute exactly one shared segment per record.
const MAX_SHARED_SEGMENTS: usize = 4;

/// A write or read IV.
pub struct Iv(pub(crate) [u8; NONCE_LEN]);

impl From<[u8; NONCE_LEN]> for Iv {
    fn from(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }
}

impl Iv {
    pub(crate) fn copy(value: &[u8]) -> Self {
        debug_assert_eq!(value.len(), NONCE_LEN);
        let mut iv = Self([0u8; NONCE_LEN]);
        iv.0.copy_from_slice(value);
        iv
    }
}

/// Combine an `Iv` and sequence number to produce a unique nonce.
///
/// This is `iv ^ seq` where `seq` is encoded as a 96-bit big-endian integer.
pub fn make_nonce(iv: &Iv, seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    put_u64(seq, &mut nonce[4..]);

    nonce
        .iter_mut()
        .zip(iv.0.iter())
        .for_each(|(nonce, iv)| {
            *nonce ^= *iv;
        });

    nonce
}

/// Largest possible AEAD key in the ciphersuites we support.
const MAX_AEAD_KEY_LEN: usize = 32;

/// A key for an AEAD algorithm.
///
/// This is a value type for a byte string up to `MAX_AEAD_KEY_LEN` bytes in
/// length.
pub struct AeadKey {
    buf: [u8; MAX_AEAD_KEY_LEN],
    used: usize,
}

impl AeadKey {
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() <= MAX_AEAD_KEY_LEN);
        let mut key = Self {
            buf: [0u8; MAX_AEAD_KEY_LEN],
            used: bytes.len(),
        };
        key.buf[..bytes.len()].copy_from_slice(bytes);
        key
    }
}

impl AsRef<[u8]> for AeadKey {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.used]
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}

/// How an AEAD feeds its primitive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AeadMode {
    /// Arbitrary-length updates (stream ciphers, unrestricted AEADs).
    Stream,
    /// The primitive consumes whole blocks of this size; partial input at a
    /// segment boundary is buffered until the next segment completes it.
    Block(usize),
}

/// An AEAD algorithm usable for record protection.
pub trait AeadCipher: Send + Sync + Debug {
    /// Length in bytes of keys for this cipher.
    fn key_len(&self) -> usize;

    /// How this cipher's primitive is driven.
    fn mode(&self) -> AeadMode;

    /// Begin encrypting one record.
    fn encrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadEncryptOp>;

    /// Begin decrypting one record.
    fn decrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadDecryptOp>;
}

/// One in-flight AEAD encryption.
///
/// All associated data must be fed before the first `update`.  Updates are
/// length-preserving; any block buffering is internal to the operation.
pub trait AeadEncryptOp {
    fn aad(&mut self, data: &[u8]);

    /// Encrypt `input` into `output` (same length).
    fn update(&mut self, input: &[u8], output: &mut [u8]);

    /// Encrypt `data` in place.
    fn update_in_place(&mut self, data: &mut [u8]);

    /// Finish, producing the authentication tag.
    fn finish(self: Box<Self>) -> [u8; TAG_LEN];
}

/// One in-flight AEAD decryption.  Mirror image of [`AeadEncryptOp`]; the
/// tag is verified by `finish`.
pub trait AeadDecryptOp {
    fn aad(&mut self, data: &[u8]);

    fn update(&mut self, input: &[u8], output: &mut [u8]);

    fn update_in_place(&mut self, data: &mut [u8]);

    /// Verify `tag`; failure means the record must be discarded unread.
    fn finish(self: Box<Self>, tag: &[u8; TAG_LEN]) -> Result<(), Error>;
}

/// Encrypt a chained plaintext, appending the tag.
///
/// When the chain is uniquely owned it is encrypted in place and reused; the
/// tag lands in the final segment's tailroom when there is room, otherwise in
/// a newly chained tag segment.  A shared chain is read-only input: output is
/// a fresh single segment sized `headroom + len + tag`, with the headroom
/// left for the caller to prepend a record header without another
/// allocation.
pub(crate) fn encrypt_chain(
    cipher: &dyn AeadCipher,
    key: &AeadKey,
    nonce: &[u8; NONCE_LEN],
    aad: &BufChain,
    mut plaintext: BufChain,
    headroom: usize,
) -> BufChain {
    let mut op = cipher.encrypter(key, nonce);
    for seg in aad.iter() {
        op.aad(seg.bytes());
    }

    if !plaintext.is_shared() {
        for seg in plaintext.iter_mut() {
            // guaranteed by the chain-level sharing check above
            let bytes = seg.bytes_mut().unwrap();
            op.update_in_place(bytes);
        }
        let tag = op.finish();
        // lands in the last segment's tailroom when possible, else chains a
        // fresh tag segment
        plaintext.extend_from_slice(&tag);
        plaintext
    } else {
        let mut out = Buf::with_headroom(headroom + plaintext.len() + TAG_LEN, headroom);
        let mut scratch = alloc::vec![0u8; 0];
        for seg in plaintext.iter() {
            scratch.resize(seg.len(), 0);
            op.update(seg.bytes(), &mut scratch);
            let ok = out.extend_from_slice(&scratch);
            debug_assert!(ok);
        }
        let tag = op.finish();
        let ok = out.extend_from_slice(&tag);
        debug_assert!(ok);
        BufChain::from_buf(out)
    }
}

/// Decrypt a chained ciphertext (tag at the end of the chain).
///
/// A chain with no shared segments is decrypted in place.  Up to
/// `MAX_SHARED_SEGMENTS` individually-shared segments are privately copied
/// and the rest decrypted in place; beyond that, the whole chain is copied.
/// Any failure is reported as a bare [`Error::DecryptError`].
pub(crate) fn decrypt_chain(
    cipher: &dyn AeadCipher,
    key: &AeadKey,
    nonce: &[u8; NONCE_LEN],
    aad: &BufChain,
    mut ciphertext: BufChain,
) -> Result<BufChain, Error> {
    if ciphertext.len() < TAG_LEN {
        return Err(Error::DecryptError);
    }

    let mut tag = [0u8; TAG_LEN];
    ciphertext.split_off_tail(&mut tag);

    let mut op = cipher.decrypter(key, nonce);
    for seg in aad.iter() {
        op.aad(seg.bytes());
    }

    let shared = ciphertext
        .iter()
        .filter(|seg| seg.is_shared())
        .count();

    if shared > MAX_SHARED_SEGMENTS {
        let mut out = Buf::with_capacity(ciphertext.len());
        let mut scratch = alloc::vec![0u8; 0];
        for seg in ciphertext.iter() {
            scratch.resize(seg.len(), 0);
            op.update(seg.bytes(), &mut scratch);
            let ok = out.extend_from_slice(&scratch);
            debug_assert!(ok);
        }
        op.finish(&tag)?;
        return Ok(BufChain::from_buf(out));
    }

    for seg in ciphertext.iter_mut() {
        seg.unshare();
        match seg.bytes_mut() {
            Some(bytes) => op.update_in_place(bytes),
            None => return Err(Error::DecryptError),
        }
    }
    op.finish(&tag)?;
    Ok(ciphertext)
}

/// A received protected record: header fields plus the undecrypted body.
pub(crate) struct InboundOpaqueRecord {
    pub(crate) header: [u8; 5],
    pub(crate) payload: BufChain,
}

/// A protected record ready for the wire.
pub(crate) struct OutboundOpaqueRecord {
    pub(crate) payload: BufChain,
}

/// Objects with this trait protect outgoing record payloads.
pub(crate) trait MessageEncrypter: Send + Sync {
    fn encrypt(
        &mut self,
        payload: BufChain,
        inner_type: crate::enums::ContentType,
        seq: u64,
    ) -> Result<OutboundOpaqueRecord, Error>;
}

/// Objects with this trait recover incoming record payloads.
pub(crate) trait MessageDecrypter: Send + Sync {
    /// Returns the inner plaintext, still carrying the inner content type
    /// byte and padding; the record layer strips those.
    fn decrypt(&mut self, record: InboundOpaqueRecord, seq: u64) -> Result<BufChain, Error>;
}

/// TLS 1.3 record protection: inner plaintext is `payload || type || pad`,
/// AAD is the record header.
pub(crate) struct Tls13MessageEncrypter {
    pub(crate) cipher: &'static dyn AeadCipher,
    pub(crate) key: AeadKey,
    pub(crate) iv: Iv,
}

impl MessageEncrypter for Tls13MessageEncrypter {
    fn encrypt(
        &mut self,
        mut payload: BufChain,
        inner_type: crate::enums::ContentType,
        seq: u64,
    ) -> Result<OutboundOpaqueRecord, Error> {
        payload.extend_from_slice(&[u8::from(inner_type)]);
        let total = payload.len() + TAG_LEN;

        let mut header = Vec::with_capacity(5);
        header.push(u8::from(crate::enums::ContentType::ApplicationData));
        header.extend(u16::from(crate::enums::ProtocolVersion::TLSv1_2).to_be_bytes());
        header.extend((total as u16).to_be_bytes());
        let aad = BufChain::from(header.clone());

        let nonce = make_nonce(&self.iv, seq);
        let mut body = encrypt_chain(self.cipher, &self.key, &nonce, &aad, payload, header.len());

        // the shared-input path allocated headroom for exactly this
        body.prepend_slice(&header);
        Ok(OutboundOpaqueRecord { payload: body })
    }
}

/// Mirror image of [`Tls13MessageEncrypter`].
pub(crate) struct Tls13MessageDecrypter {
    pub(crate) cipher: &'static dyn AeadCipher,
    pub(crate) key: AeadKey,
    pub(crate) iv: Iv,
}

impl MessageDecrypter for Tls13MessageDecrypter {
    fn decrypt(&mut self, record: InboundOpaqueRecord, seq: u64) -> Result<BufChain, Error> {
        let aad = BufChain::copy_of(&record.header);
        let nonce = make_nonce(&self.iv, seq);
        decrypt_chain(self.cipher, &self.key, &nonce, &aad, record.payload)
    }
}
