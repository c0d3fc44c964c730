//! Incremental ChaCha20-Poly1305 composed from the `chacha20` and
//! `poly1305` crates, per RFC 8439.

use alloc::boxed::Box;

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use poly1305::universal_hash::{KeyInit, UniversalHash};
use poly1305::Poly1305;
use subtle::ConstantTimeEq;

use super::BlockQueue;
use crate::crypto::cipher::{
    AeadCipher, AeadDecryptOp, AeadEncryptOp, AeadKey, AeadMode, NONCE_LEN, TAG_LEN,
};
use crate::error::Error;

/// ChaCha20-Poly1305.
pub(crate) static CHACHA20_POLY1305: ChaCha20Poly1305 = ChaCha20Poly1305;

#[derive(Debug)]
pub(crate) struct ChaCha20Poly1305;

impl AeadCipher for ChaCha20Poly1305 {
    fn key_len(&self) -> usize {
        32
    }

    fn mode(&self) -> AeadMode {
        AeadMode::Stream
    }

    fn encrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadEncryptOp> {
        Box::new(ChaChaOp::new(key.as_ref(), nonce))
    }

    fn decrypter(&self, key: &AeadKey, nonce: &[u8; NONCE_LEN]) -> Box<dyn AeadDecryptOp> {
        Box::new(ChaChaOp::new(key.as_ref(), nonce))
    }
}

struct ChaChaOp {
    cipher: ChaCha20,
    mac: Poly1305,
    queue: BlockQueue,
    aad_len: u64,
    msg_len: u64,
    aad_open: bool,
}

impl ChaChaOp {
    fn new(key: &[u8], nonce: &[u8; NONCE_LEN]) -> Self {
        let mut cipher = ChaCha20::new_from_slices(key, nonce).unwrap();

        // The one-time Poly1305 key is the head of keystream block zero;
        // record data starts at block one.
        let mut otk = [0u8; 32];
        cipher.apply_keystream(&mut otk);
        cipher.seek(64u64);

        Self {
            cipher,
            mac: Poly1305::new_from_slice(&otk).unwrap(),
            queue: BlockQueue::new(),
            aad_len: 0,
            msg_len: 0,
            aad_open: true,
        }
    }

    fn feed_aad(&mut self, data: &[u8]) {
        debug_assert!(self.aad_open);
        self.aad_len += data.len() as u64;
        let mac = &mut self.mac;
        self.queue
            .feed(data, |block| mac.update(&[(*block).into()]));
    }

    fn close_aad(&mut self) {
        if self.aad_open {
            let mac = &mut self.mac;
            self.queue
                .pad_flush(|block| mac.update(&[(*block).into()]));
            self.aad_open = false;
        }
    }

    fn feed_ciphertext(&mut self, data: &[u8]) {
        self.close_aad();
        self.msg_len += data.len() as u64;
        let mac = &mut self.mac;
        self.queue
            .feed(data, |block| mac.update(&[(*block).into()]));
    }

    fn compute_tag(mut self) -> [u8; TAG_LEN] {
        self.close_aad();
        let mac = &mut self.mac;
        self.queue
            .pad_flush(|block| mac.update(&[(*block).into()]));

        // RFC 8439 lengths block: little-endian, unlike GCM
        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&self.aad_len.to_le_bytes());
        lengths[8..].copy_from_slice(&self.msg_len.to_le_bytes());
        self.mac.update(&[lengths.into()]);

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(self.mac.finalize().as_slice());
        tag
    }
}

impl AeadEncryptOp for ChaChaOp {
    fn aad(&mut self, data: &[u8]) {
        self.feed_aad(data);
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) {
        output.copy_from_slice(input);
        AeadEncryptOp::update_in_place(self, output);
    }

    fn update_in_place(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
        self.feed_ciphertext(data);
    }

    fn finish(self: Box<Self>) -> [u8; TAG_LEN] {
        self.compute_tag()
    }
}

impl AeadDecryptOp for ChaChaOp {
    fn aad(&mut self, data: &[u8]) {
        self.feed_aad(data);
    }

    fn update(&mut self, input: &[u8], output: &mut [u8]) {
        self.feed_ciphertext(input);
        output.copy_from_slice(input);
        self.cipher.apply_keystream(output);
    }

    fn update_in_place(&mut self, data: &mut [u8]) {
        self.feed_ciphertext(data);
        self.cipher.apply_keystream(data);
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

    /// RFC 8439 section 2.8.2 test vector.
    #[test]
    fn rfc8439_vector() {
        let key: Vec<u8> = (0x80u8..=0x9f).collect();
        let nonce = [
            0x07, 0x00, 0x00, 0x00, 0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47,
        ];
        let aad = [
            0x50, 0x51, 0x52, 0x53, 0xc0, 0xc1, 0xc2, 0xc3, 0xc4, 0xc5, 0xc6, 0xc7,
        ];
        let plaintext = b"Ladies and Gentlemen of the class of '99: \
If I could offer you only one tip for the future, sunscreen would be it.";
        let expect_tag = [
            0x1a, 0xe1, 0x0b, 0x59, 0x4f, 0x09, 0xe2, 0x6a, 0x7e, 0x90, 0x2e, 0xcb, 0xd0, 0x60,
            0x06, 0x91,
        ];

        let key = AeadKey::from_slice(&key);
        let mut op = CHACHA20_POLY1305.encrypter(&key, &nonce);
        op.aad(&aad);
        let mut ct = plaintext.to_vec();
        op.update_in_place(&mut ct);
        let tag = op.finish();

        assert_eq!(ct[..4], [0xd3, 0x1a, 0x8d, 0x34]);
        assert_eq!(tag, expect_tag);

        let mut dec = CHACHA20_POLY1305.decrypter(&key, &nonce);
        dec.aad(&aad);
        let mut plain = ct;
        dec.update_in_place(&mut plain);
        assert!(dec.finish(&tag).is_ok());
        assert_eq!(&plain, plaintext);
    }

    #[test]
    fn tag_rejects_bit_flips() {
        let key = AeadKey::from_slice(&[0x42; 32]);
        let nonce = [9u8; 12];

        let mut op = CHACHA20_POLY1305.encrypter(&key, &nonce);
        op.aad(b"aad");
        let mut ct = b"payload".to_vec();
        op.update_in_place(&mut ct);
        let mut tag = op.finish();
        tag[0] ^= 0x80;

        let mut dec = CHACHA20_POLY1305.decrypter(&key, &nonce);
        dec.aad(b"aad");
        let mut plain = ct;
        dec.update_in_place(&mut plain);
        assert!(dec.finish(&tag).is_err());
    }
}
