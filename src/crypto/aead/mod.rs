//! Incremental AEAD implementations for the default provider.
//!
//! Both ciphers keep the record-protection contract of
//! [`crate::crypto::cipher`]: associated data first, then any number of
//! length-preserving updates, then a finish that emits or checks the tag.

pub(crate) mod chacha;
pub(crate) mod gcm;

/// Accumulates byte input into whole 16-byte blocks.
///
/// Universal-hash primitives consume whole blocks; segment boundaries land
/// anywhere.  Leftover bytes from one feed are held until the next feed
/// completes the block.
pub(super) struct BlockQueue {
    buf: [u8; 16],
    used: usize,
}

impl BlockQueue {
    pub(super) fn new() -> Self {
        Self {
            buf: [0u8; 16],
            used: 0,
        }
    }

    /// Feed `data`, passing each completed block to `process`.
    pub(super) fn feed(&mut self, mut data: &[u8], mut process: impl FnMut(&[u8; 16])) {
        if self.used > 0 {
            let take = core::cmp::min(16 - self.used, data.len());
            self.buf[self.used..self.used + take].copy_from_slice(&data[..take]);
            self.used += take;
            data = &data[take..];
            if self.used == 16 {
                process(&self.buf);
                self.used = 0;
            }
        }

        let mut chunks = data.chunks_exact(16);
        for chunk in &mut chunks {
            process(chunk.try_into().unwrap());
        }

        let rest = chunks.remainder();
        self.buf[..rest.len()].copy_from_slice(rest);
        self.used = rest.len();
    }

    /// Flush a final partial block, zero-padded, if any input is pending.
    pub(super) fn pad_flush(&mut self, mut process: impl FnMut(&[u8; 16])) {
        if self.used > 0 {
            self.buf[self.used..].fill(0);
            process(&self.buf);
            self.used = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BlockQueue;

    #[test]
    fn blocks_reassemble_across_feeds() {
        let mut collected = Vec::new();
        let mut queue = BlockQueue::new();
        let data: Vec<u8> = (0u8..48).collect();

        for chunk in data.chunks(7) {
            queue.feed(chunk, |block| collected.extend_from_slice(block));
        }
        queue.pad_flush(|block| collected.extend_from_slice(block));

        assert_eq!(collected.len(), 48);
        assert_eq!(collected, data);
    }

    #[test]
    fn partial_tail_is_padded() {
        let mut collected = Vec::new();
        let mut queue = BlockQueue::new();
        queue.feed(&[0xaa; 5], |block| collected.extend_from_slice(block));
        assert!(collected.is_empty());
        queue.pad_flush(|block| collected.extend_from_slice(block));
        assert_eq!(collected.len(), 16);
        assert_eq!(&collected[..5], &[0xaa; 5]);
        assert_eq!(&collected[5..], &[0; 11]);
    }
}
