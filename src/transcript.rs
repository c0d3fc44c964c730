use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem;

use crate::crypto::{Hash, HashContext, HashOutput, Hmac, Tag};
use crate::enums::HandshakeType;
use crate::tls13::key_schedule::hkdf_expand_label_block;

/// Early-stage buffering of handshake payloads.
///
/// Until a cipher suite is negotiated the hash function is unknown, so
/// messages are buffered verbatim and replayed into the real hash later.
#[derive(Clone, Default)]
pub(crate) struct HandshakeContextBuffer {
    buffer: Vec<u8>,
}

impl HandshakeContextBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Buffer an encoded handshake message.
    pub(crate) fn append(&mut self, buf: &[u8]) {
        self.buffer.extend_from_slice(buf);
    }

    /// The digest if we were to also hash `extra`.
    pub(crate) fn digest_given(&self, provider: &'static dyn Hash, extra: &[u8]) -> HashOutput {
        let mut ctx = provider.start();
        ctx.update(&self.buffer);
        ctx.update(extra);
        ctx.finish()
    }

    /// The suite is now known; switch to incremental hashing.
    pub(crate) fn start_hash(self, provider: &'static dyn Hash) -> HandshakeContext {
        let mut ctx = provider.start();
        ctx.update(&self.buffer);
        HandshakeContext { provider, ctx }
    }
}

/// The rolling transcript hash over handshake messages in wire order.
///
/// Also computes Finished verify_data, which binds a traffic secret to the
/// transcript.
pub(crate) struct HandshakeContext {
    provider: &'static dyn Hash,
    ctx: Box<dyn HashContext>,
}

impl HandshakeContext {
    /// Hash an encoded handshake message.
    pub(crate) fn append(&mut self, buf: &[u8]) {
        self.ctx.update(buf);
    }

    /// The digest if we were to also hash `extra`.
    pub(crate) fn digest_given(&self, extra: &[u8]) -> HashOutput {
        let mut ctx = self.ctx.fork();
        ctx.update(extra);
        ctx.finish()
    }

    /// The current transcript digest.
    pub(crate) fn current_digest(&self) -> HashOutput {
        self.ctx.fork_finish()
    }

    /// Replace the transcript so far with its `message_hash` summary.
    ///
    /// A HelloRetryRequest restarts the transcript as
    /// `message_hash || length || Hash(ClientHello1)` so both sides agree on
    /// a fixed-size stand-in for the first flight.
    pub(crate) fn rollup_for_retry(&mut self) {
        let old_ctx = mem::replace(&mut self.ctx, self.provider.start());
        let old_hash = old_ctx.finish();

        let mut synthetic = Vec::with_capacity(4 + self.provider.output_len());
        synthetic.push(u8::from(HandshakeType::MessageHash));
        synthetic.extend_from_slice(&[0, 0, self.provider.output_len() as u8]);
        synthetic.extend_from_slice(old_hash.as_ref());
        self.append(&synthetic);
    }

    /// Finished verify_data for the current transcript under `base_key`.
    ///
    /// `base_key` is a traffic secret; the finished key is expanded from it
    /// and MACs the current digest.
    pub(crate) fn finished_mac(
        &self,
        base_key: &crate::crypto::hkdf::OkmBlock,
        hmac: &'static dyn Hmac,
    ) -> Tag {
        let finished_key = hkdf_expand_label_block(base_key, hmac, b"finished", &[]);
        hmac.with_key(finished_key.as_ref())
            .sign(&[self.current_digest().as_ref()])
    }

    /// The hashing algorithm in use.
    pub(crate) fn algorithm(&self) -> crate::crypto::HashAlgorithm {
        self.provider.algorithm()
    }
}

impl Clone for HandshakeContext {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider,
            ctx: self.ctx.fork(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::hash::SHA256;

    #[test]
    fn hashes_incrementally() {
        let mut buffer = HandshakeContextBuffer::new();
        buffer.append(b"hello");
        let mut ctx = buffer.start_hash(&SHA256);
        ctx.append(b"world");
        assert_eq!(
            ctx.current_digest().as_ref(),
            SHA256.compute(b"helloworld").as_ref()
        );
    }

    #[test]
    fn digest_given_does_not_disturb() {
        let mut ctx = HandshakeContextBuffer::new().start_hash(&SHA256);
        ctx.append(b"one");
        let with_extra = ctx.digest_given(b"two");
        assert_eq!(
            with_extra.as_ref(),
            SHA256.compute(b"onetwo").as_ref()
        );
        assert_eq!(
            ctx.current_digest().as_ref(),
            SHA256.compute(b"one").as_ref()
        );
    }

    #[test]
    fn retry_rollup_matches_manual_construction() {
        let mut ctx = HandshakeContextBuffer::new().start_hash(&SHA256);
        ctx.append(b"client hello one");
        ctx.rollup_for_retry();

        let mut expected = alloc::vec![0xfe, 0x00, 0x00, 32];
        expected.extend_from_slice(SHA256.compute(b"client hello one").as_ref());
        assert_eq!(
            ctx.current_digest().as_ref(),
            SHA256.compute(&expected).as_ref()
        );
    }

    #[test]
    fn clones_diverge() {
        let mut ctx = HandshakeContextBuffer::new().start_hash(&SHA256);
        ctx.append(b"shared");
        let mut fork = ctx.clone();
        fork.append(b"fork");
        assert_ne!(
            ctx.current_digest().as_ref(),
            fork.current_digest().as_ref()
        );
    }
}
