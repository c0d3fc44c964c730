//! Incremental AES-GCM composed from the `aes`, `ctr` and `ghash` crates.
//!
//! The composition is the standard one: a CTR keystream whose zeroth block
//! masks the GHASH output.  Driving the pieces directly (rather than through
//! a one-shot AEAD facade) is what lets record protection feed a record in
//! per-segment pieces.

use alloc::boxed::Box;

use aes::cipher::{typenum::U16, BlockCipher, BlockEncrypt, BlockSizeUser, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;

use super::BlockQueue;
use crate::crypto::cipher::{
    AeadCipher, AeadDecryptOp, AeadEncryptOp, AeadKey, AeadMode, NONCE_LEN, TAG_LEN,
};
use crate::error::Error;

/// AES-128-GCM.
pub(crate) static AES_128_GCM: Gcm128 = Gcm128;

/// AES-256-GCM.
pub(crate) static AES_256_GCM: Gcm256 = Gcm256;

#[derive(Debug)]
pub(crate) struct Gcm128;

#[derive(Debug)]
pub(crate) struct Gcm256;

impl AeadCipher for Gcm128 {
    fn key_len(&self) -> usize {
        16
    }

    fn mode(&self) -> AeadMode {
        AeadMode::Block(16)
    }

    fn encrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadEncryptOp> {
        Box::new(GcmOp::<Aes128>::new(key.as_ref(), nonce))
    }

    fn decrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadDecryptOp> {
        Box::new(GcmOp::<Aes128>::new(key.as_ref(), nonce))
    }
}

impl AeadCipher for Gcm256 {
    fn key_len(&self) -> usize {
        32
    }

    fn mode(&self) -> AeadMode {
        AeadMode::Block(16)
    }

    fn encrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadEncryptOp> {
        Box::new(GcmOp::<Aes256>::new(key.as_ref(), nonce))
    }

    fn decrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadDecryptOp> {
        Box::new(GcmOp::<Aes256>::new(key.as_ref(), nonce))
    }
}

/// One GCM operation: encrypt and decrypt differ only in which side of the
/// keystream GHASH sees, handled in the trait impls below.
struct GcmOp<C>
where
    C: BlockCipher + BlockEncrypt + KeyInit + Clone + BlockSizeUser<BlockSize = U16>,
{
    ctr: ctr::Ctr32BE<C>,
    ghash: GHash,
    queue: BlockQueue,
    tag_mask: [u8; TAG_LEN],
    aad_len: u64,
    msg_len: u64,
    aad_open: bool,
}

impl<C> GcmOp<C>
where
    C: BlockCipher + BlockEncrypt + KeyInit + Clone + BlockSizeUser<BlockSize = U16>,
{
    fn new(key: &[u8], nonce: &[u8; NONCE_LEN]) -> Self {
        let block_cipher = C::new_from_slice(key).unwrap();

        // GHASH key is the encryption of the zero block.
        let mut h = ghash::Key::default();
        block_cipher.encrypt_block(&mut h);

        // Counter block zero masks the tag; data starts at block one.
        let mut j0 = [0u8; 16];
        j0[..NONCE_LEN].copy_from_slice(nonce);
        j0[15] = 1;
        let mut ctr = ctr::Ctr32BE::<C>::new_from_slices(key, &j0).unwrap();
        let mut tag_mask = [0u8; TAG_LEN];
        ctr.apply_keystream(&mut tag_mask);

        Self {
            ctr,
            ghash: GHash::new(&h),
            queue: BlockQueue::new(),
            tag_mask,
            aad_len: 0,
            msg_len: 0,
            aad_open: true,
        }
    }

    fn feed_aad(&mut self, data: &[u8]) {
        debug_assert!(self.aad_open);
        self.aad_len += data.len() as u64;
        let ghash = &mut self.ghash;
        self.queue
            .feed(data, |block| ghash.update(&[(*block).into()]));
    }

    /// Zero-pad any partial AAD block before ciphertext starts.
    fn close_aad(&mut self) {
        if self.aad_open {
            let ghash = &mut self.ghash;
            self.queue
                .pad_flush(|block| ghash.update(&[(*block).into()]));
            self.aad_open = false;
        }
    }

    fn feed_ciphertext(&mut self, data: &[u8]) {
        self.close_aad();
        self.msg_len += data.len() as u64;
        let ghash = &mut self.ghash;
        self.queue
            .feed(data, |block| ghash.update(&[(*block).into()]));
    }

    fn compute_tag(mut self) -> [u8; TAG_LEN] {
        self.close_aad();
        let ghash = &mut self.ghash;
        self.queue
            .pad_flush(|block| ghash.update(&[(*block).into()]));

        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&(self.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.msg_len * 8).to_be_bytes());
        self.ghash.update(&[lengths.into()]);

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(self.ghash.finalize().as_slice());
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }
}

impl<C> AeadEncryptOp for GcmOp<C>
where
    C: BlockCipher + BlockEncrypt + KeyInit + Clone + Send + Sync + BlockSizeUser<BlockSize = U16>,
{
    fn aad(&mut self, data: &[u8]) {
        self.feed_aad(data);
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) {
        output.copy_from_slice(input);
        AeadEncryptOp::update_in_place(self, output);
    }

    fn update_in_place(&mut self, data: &mut [u8]) {
        self.ctr.apply_keystream(data);
        self.feed_ciphertext(data);
    }

    fn finish(self: Box<Self>) -> [u8; TAG_LEN] {
        self.compute_tag()
    }
}

impl<C> AeadDecryptOp for GcmOp<C>
where
    C: BlockCipher + BlockEncrypt + KeyInit + Clone + Send + Sync + BlockSizeUser<BlockSize = U16>,
{
    fn aad(&mut self, data: &[u8]) {
        self.feed_aad(data);
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) {
        // GHASH sees the ciphertext
        self.feed_ciphertext(input);
        output.copy_from_slice(input);
        self.ctr.apply_keystream(output);
    }

    fn update_in_place(&mut self, data: &mut [u8]) {
        self.feed_ciphertext(data);
        self.ctr.apply_keystream(data);
    }

    fn finish(self: Box<Self>, tag: &[u8; TAG_LEN]) -> Result<(), Error> {
        let expect = self.compute_tag();
        match expect.ct_eq(tag).into() {
            true => Ok(()),
            false => Err(Error::DecryptError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_shot_encrypt(
        cipher: &dyn AeadCipher,
        key: &[u8],
        nonce: &[u8; 12],
        aad: &[u8],
        plaintext: &[u8],
    ) -> (Vec<u8>, [u8; 16]) {
        let key = AeadKey::from_slice(key);
        let mut op = cipher.encrypter(&key, nonce);
        op.aad(aad);
        let mut out = plaintext.to_vec();
        op.update_in_place(&mut out);
        (out, op.finish())
    }

    /// NIST GCM test vector (128-bit key, 96-bit IV, with AAD).
    #[test]
    fn aes128_gcm_reference_vector() {
        let key = [
            0xfe, 0xff, 0xe9, 0x92, 0x86, 0x65, 0x73, 0x1c, 0x6d, 0x6a, 0x8f, 0x94, 0x67, 0x30,
            0x83, 0x08,
        ];
        let nonce = [
            0xca, 0xfe, 0xba, 0xbe, 0xfa, 0xce, 0xdb, 0xad, 0xde, 0xca, 0xf8, 0x88,
        ];
        let plaintext = [
            0xd9, 0x31, 0x32, 0x25, 0xf8, 0x84, 0x06, 0xe5, 0xa5, 0x59, 0x09, 0xc5, 0xaf, 0xf5,
            0x26, 0x9a, 0x86, 0xa7, 0xa9, 0x53, 0x15, 0x34, 0xf7, 0xda, 0x2e, 0x4c, 0x30, 0x3d,
            0x8a, 0x31, 0x8a, 0x72, 0x1c, 0x3c, 0x0c, 0x95, 0x95, 0x68, 0x09, 0x53, 0x2f, 0xcf,
            0x0e, 0x24, 0x49, 0xa6, 0xb5, 0x25, 0xb1, 0x6a, 0xed, 0xf5, 0xaa, 0x0d, 0xe6, 0x57,
            0xba, 0x63, 0x7b, 0x39,
        ];
        let aad = [
            0xfe, 0xed, 0xfa, 0xce, 0xde, 0xad, 0xbe, 0xef, 0xfe, 0xed, 0xfa, 0xce, 0xde, 0xad,
            0xbe, 0xef, 0xab, 0xad, 0xda, 0xd2,
        ];
        let expect_ct = [
            0x42, 0x83, 0x1e, 0xc2, 0x21, 0x77, 0x74, 0x24, 0x4b, 0x72, 0x21, 0xb7, 0x84, 0xd0,
            0xd4, 0x9c, 0xe3, 0xaa, 0x21, 0x2f, 0x2c, 0x02, 0xa4, 0xe0, 0x35, 0xc1, 0x7e, 0x23,
            0x29, 0xac, 0xa1, 0x2e, 0x21, 0xd5, 0x14, 0xb2, 0x54, 0x66, 0x93, 0x1c, 0x7d, 0x8f,
            0x6a, 0x5a, 0xac, 0x84, 0xaa, 0x05, 0x1b, 0xa3, 0x0b, 0x39, 0x6a, 0x0a, 0xac, 0x97,
            0x3d, 0x58, 0xe0, 0x91,
        ];
        let expect_tag = [
            0x5b, 0xc9, 0x4f, 0xbc, 0x32, 0x21, 0xa5, 0xdb, 0x94, 0xfa, 0xe9, 0x5a, 0xe7, 0x12,
            0x1a, 0x47,
        ];

        let (ct, tag) = one_shot_encrypt(&AES_128_GCM, &key, &nonce, &aad, &plaintext);
        assert_eq!(ct, expect_ct);
        assert_eq!(tag, expect_tag);
    }

    #[test]
    fn split_updates_match_one_shot() {
        let key = AeadKey::from_slice(&[7u8; 16]);
        let nonce = [3u8; 12];
        let aad = b"header bytes";
        let data: Vec<u8> = (0u8..=200).collect();

        let (whole, whole_tag) =
            one_shot_encrypt(&AES_128_GCM, &[7u8; 16], &nonce, aad, &data);

        // feed in ragged pieces, splitting AAD too
        let mut op = AES_128_GCM.encrypter(&key, &nonce);
        op.aad(&aad[..5]);
        op.aad(&aad[5..]);
        let mut pieced = Vec::new();
        for chunk in data.chunks(13) {
            let mut out = vec![0u8; chunk.len()];
            op.update(chunk, &mut out);
            pieced.extend_from_slice(&out);
        }
        let tag = op.finish();

        assert_eq!(pieced, whole);
        assert_eq!(tag, whole_tag);
    }

    #[test]
    fn decrypt_round_trip_and_tamper() {
        let key = AeadKey::from_slice(&[9u8; 32]);
        let nonce = [1u8; 12];
        let mut data = b"attack at dawn".to_vec();

        let mut enc = AES_256_GCM.encrypter(&key, &nonce);
        enc.aad(b"ad");
        enc.update_in_place(&mut data);
        let tag = enc.finish();

        let mut dec = AES_256_GCM.decrypter(&key, &nonce);
        dec.aad(b"ad");
        let mut plain = data.clone();
        dec.update_in_place(&mut plain);
        assert!(dec.finish(&tag).is_ok());
        assert_eq!(plain, b"attack at dawn");

        // flip one ciphertext bit
        let mut dec = AES_256_GCM.decrypter(&key, &nonce);
        dec.aad(b"ad");
        let mut tampered = data.clone();
        tampered[3] ^= 0x01;
        dec.update_in_place(&mut tampered);
        assert!(dec.finish(&tag).is_err());

        // flip one AAD bit
        let mut dec = AES_256_GCM.decrypter(&key, &nonce);
        dec.aad(b"aD");
        let mut plain = data;
        dec.update_in_place(&mut plain);
        assert!(dec.finish(&tag).is_err());
    }
}
