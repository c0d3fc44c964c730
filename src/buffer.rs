use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use crate::sync::Arc;

/// One segment of a scatter-gather buffer.
///
/// A `Buf` is a window `[start, end)` into a fixed-capacity refcounted
/// allocation.  Bytes before the window are headroom, bytes after it are
/// tailroom.  Cloning a `Buf` shares the allocation; a shared segment can be
/// read but not written until it is unshared.
pub struct Buf {
    storage: Arc<[u8]>,
    start: usize,
    end: usize,
}

impl Buf {
    /// An empty segment with `capacity` bytes of tailroom.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_headroom(capacity, 0)
    }

    /// An empty segment whose window starts `headroom` bytes into the
    /// allocation, leaving room to prepend later without copying.
    pub fn with_headroom(capacity: usize, headroom: usize) -> Self {
        debug_assert!(headroom <= capacity);
        Self {
            storage: Arc::from(alloc::vec![0u8; capacity].into_boxed_slice()),
            start: headroom,
            end: headroom,
        }
    }

    /// A full segment holding a copy of `data`, with no head- or tailroom.
    pub fn copy_of(data: &[u8]) -> Self {
        Self {
            storage: Arc::from(data.to_vec().into_boxed_slice()),
            start: 0,
            end: data.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn headroom(&self) -> usize {
        self.start
    }

    pub fn tailroom(&self) -> usize {
        self.storage.len() - self.end
    }

    /// Whether the underlying allocation is referenced by any other segment.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.storage) > 1
    }

    pub fn bytes(&self) -> &[u8] {
        &self.storage[self.start..self.end]
    }

    /// Mutable view of the window.  `None` while the allocation is shared.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        let (start, end) = (self.start, self.end);
        Arc::get_mut(&mut self.storage).map(|s| &mut s[start..end])
    }

    /// Append `data` into tailroom.  Fails (returning false) when shared or
    /// out of room.
    pub fn extend_from_slice(&mut self, data: &[u8]) -> bool {
        if self.tailroom() < data.len() {
            return false;
        }
        let end = self.end;
        match Arc::get_mut(&mut self.storage) {
            Some(s) => {
                s[end..end + data.len()].copy_from_slice(data);
                self.end += data.len();
                true
            }
            None => false,
        }
    }

    /// Move the window start backwards into headroom, exposing `n` bytes.
    pub fn prepend(&mut self, n: usize) {
        debug_assert!(n <= self.start);
        self.start -= n;
    }

    pub fn trim_start(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start += n;
    }

    pub fn trim_end(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.end -= n;
    }

    /// A second segment over the same allocation, restricted to
    /// `[at, len)` of this window.  Both segments become shared.
    pub(crate) fn share_from(&self, at: usize) -> Self {
        debug_assert!(at <= self.len());
        Self {
            storage: self.storage.clone(),
            start: self.start + at,
            end: self.end,
        }
    }

    /// Replace a shared allocation with a private copy of exactly the
    /// window (no spare room is retained).
    pub fn unshare(&mut self) {
        if self.is_shared() {
            *self = Self::copy_of(self.bytes());
        }
    }
}

impl Clone for Buf {
    /// Sharing clone: both segments reference the same allocation.
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

impl fmt::Debug for Buf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .field("shared", &self.is_shared())
            .finish()
    }
}

/// An ordered chain of [`Buf`] segments.
///
/// Supports O(1) splicing at segment granularity.  Splitting inside a
/// segment shares that segment's allocation between the two sides, which is
/// how a transport buffer holding several TLS records ends up contributing
/// exactly one shared segment per record.
#[derive(Clone, Debug, Default)]
pub struct BufChain {
    segments: VecDeque<Buf>,
    len: usize,
}

impl BufChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_buf(buf: Buf) -> Self {
        let len = buf.len();
        let mut segments = VecDeque::with_capacity(1);
        segments.push_back(buf);
        Self { segments, len }
    }

    /// A single-segment chain holding a copy of `data`.
    pub fn copy_of(data: &[u8]) -> Self {
        Self::from_buf(Buf::copy_of(data))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// True if any segment's allocation is shared.
    pub fn is_shared(&self) -> bool {
        self.segments.iter().any(Buf::is_shared)
    }

    pub fn push_back(&mut self, buf: Buf) {
        self.len += buf.len();
        self.segments.push_back(buf);
    }

    pub fn push_front(&mut self, buf: Buf) {
        self.len += buf.len();
        self.segments.push_front(buf);
    }

    /// Prepend `data`, using the first segment's headroom when it is
    /// uniquely owned, falling back to a fresh segment.
    pub fn prepend_slice(&mut self, data: &[u8]) {
        if let Some(front) = self.segments.front_mut() {
            if !front.is_shared() && front.headroom() >= data.len() {
                front.prepend(data.len());
                // unique ownership was checked just above
                front.bytes_mut().unwrap()[..data.len()].copy_from_slice(data);
                self.len += data.len();
                return;
            }
        }
        self.push_front(Buf::copy_of(data));
    }

    pub fn pop_front(&mut self) -> Option<Buf> {
        let buf = self.segments.pop_front()?;
        self.len -= buf.len();
        Some(buf)
    }

    /// Move all of `other`'s segments onto the end of this chain.
    pub fn append(&mut self, other: &mut Self) {
        self.len += other.len;
        other.len = 0;
        self.segments.append(&mut other.segments);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buf> {
        self.segments.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Buf> {
        self.segments.iter_mut()
    }

    /// Copy the whole chain into one contiguous vector.
    pub fn copy_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for seg in &self.segments {
            out.extend_from_slice(seg.bytes());
        }
        out
    }

    /// Copy the first `n` bytes without consuming them.
    pub(crate) fn peek(&self, n: usize, out: &mut [u8]) -> bool {
        if self.len < n {
            return false;
        }
        let mut filled = 0;
        for seg in &self.segments {
            if filled == n {
                break;
            }
            let take = core::cmp::min(n - filled, seg.len());
            out[filled..filled + take].copy_from_slice(&seg.bytes()[..take]);
            filled += take;
        }
        filled == n
    }

    /// Detach the first `n` bytes as a new chain.
    ///
    /// Whole leading segments are moved across without touching their
    /// allocations; a split that lands inside a segment shares that one
    /// segment between the two chains.
    pub fn split_to(&mut self, n: usize) -> Self {
        debug_assert!(n <= self.len);
        let mut front = Self::new();
        let mut remaining = n;
        while remaining > 0 {
            let seg_len = self.segments.front().map(Buf::len).unwrap_or(0);
            if seg_len <= remaining {
                let seg = self.segments.pop_front().unwrap();
                self.len -= seg_len;
                remaining -= seg_len;
                front.push_back(seg);
            } else {
                let seg = self.segments.front_mut().unwrap();
                let mut head = seg.clone();
                head.trim_end(seg_len - remaining);
                seg.trim_start(remaining);
                self.len -= remaining;
                remaining = 0;
                front.push_back(head);
            }
        }
        front
    }

    /// Drop the first `n` bytes.
    pub fn advance(&mut self, n: usize) {
        let _ = self.split_to(n);
    }

    /// Drop the last `n` bytes, copying them into `out`.
    pub(crate) fn split_off_tail(&mut self, out: &mut [u8]) -> bool {
        let n = out.len();
        if self.len < n {
            return false;
        }
        let mut remaining = n;
        while remaining > 0 {
            let seg = self.segments.back_mut().unwrap();
            let take = core::cmp::min(seg.len(), remaining);
            let bytes = seg.bytes();
            out[remaining - take..remaining].copy_from_slice(&bytes[bytes.len() - take..]);
            seg.trim_end(take);
            self.len -= take;
            remaining -= take;
            if seg.is_empty() {
                self.segments.pop_back();
            }
        }
        true
    }

    /// Append `data`, filling the last segment's tailroom first when it is
    /// uniquely owned, then chaining a fresh segment for the rest.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let mut rest = data;
        if let Some(back) = self.segments.back_mut() {
            if !back.is_shared() {
                let take = core::cmp::min(back.tailroom(), rest.len());
                if take > 0 && back.extend_from_slice(&rest[..take]) {
                    self.len += take;
                    rest = &rest[take..];
                }
            }
        }
        if !rest.is_empty() {
            self.push_back(Buf::copy_of(rest));
        }
    }
}

impl From<Vec<u8>> for BufChain {
    fn from(data: Vec<u8>) -> Self {
        let len = data.len();
        Self::from_buf(Buf {
            storage: Arc::from(data.into_boxed_slice()),
            start: 0,
            end: len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::prelude::v1::*;

    #[test]
    fn window_accounting() {
        let mut buf = Buf::with_headroom(16, 4);
        assert_eq!(buf.headroom(), 4);
        assert_eq!(buf.tailroom(), 12);
        assert!(buf.extend_from_slice(b"hello"));
        assert_eq!(buf.bytes(), b"hello");
        assert_eq!(buf.tailroom(), 7);
        buf.prepend(2);
        assert_eq!(buf.len(), 7);
        buf.trim_start(2);
        buf.trim_end(1);
        assert_eq!(buf.bytes(), b"hell");
    }

    #[test]
    fn sharing_blocks_writes() {
        let mut buf = Buf::copy_of(b"abcdef");
        assert!(!buf.is_shared());
        assert!(buf.bytes_mut().is_some());

        let other = buf.clone();
        assert!(buf.is_shared());
        assert!(other.is_shared());
        assert!(buf.bytes_mut().is_none());

        drop(other);
        assert!(!buf.is_shared());
        buf.unshare();
        assert!(buf.bytes_mut().is_some());
    }

    #[test]
    fn unshare_copies_window_only() {
        let buf = Buf::copy_of(b"abcdef");
        let mut tail = buf.share_from(2);
        assert!(tail.is_shared());
        tail.unshare();
        assert!(!tail.is_shared());
        assert_eq!(tail.bytes(), b"cdef");
        assert_eq!(buf.bytes(), b"abcdef");
    }

    #[test]
    fn split_moves_whole_segments_without_sharing() {
        let mut chain = BufChain::new();
        chain.push_back(Buf::copy_of(b"aaaa"));
        chain.push_back(Buf::copy_of(b"bbbb"));
        let front = chain.split_to(4);
        assert_eq!(front.copy_to_vec(), b"aaaa");
        assert_eq!(chain.copy_to_vec(), b"bbbb");
        assert!(!front.is_shared());
        assert!(!chain.is_shared());
    }

    #[test]
    fn split_inside_segment_shares_it() {
        let mut chain = BufChain::copy_of(b"aaaabbbb");
        let front = chain.split_to(4);
        assert_eq!(front.copy_to_vec(), b"aaaa");
        assert_eq!(chain.copy_to_vec(), b"bbbb");
        assert!(front.is_shared());
        assert!(chain.is_shared());
    }

    #[test]
    fn peek_and_tail_split() {
        let mut chain = BufChain::new();
        chain.push_back(Buf::copy_of(b"0123"));
        chain.push_back(Buf::copy_of(b"4567"));
        let mut head = [0u8; 5];
        assert!(chain.peek(5, &mut head));
        assert_eq!(&head, b"01234");
        assert_eq!(chain.len(), 8);

        let mut tail = [0u8; 6];
        assert!(chain.split_off_tail(&mut tail));
        assert_eq!(&tail, b"234567");
        assert_eq!(chain.copy_to_vec(), b"01");
    }

    #[test]
    fn prepend_prefers_headroom() {
        let mut seg = Buf::with_headroom(16, 4);
        assert!(seg.extend_from_slice(b"body"));
        let mut chain = BufChain::from_buf(seg);
        chain.prepend_slice(b"hdr!");
        assert_eq!(chain.copy_to_vec(), b"hdr!body");
        assert_eq!(chain.segment_count(), 1);

        // no headroom: a new segment carries the prefix
        let mut chain = BufChain::copy_of(b"body");
        chain.prepend_slice(b"hdr!");
        assert_eq!(chain.copy_to_vec(), b"hdr!body");
        assert_eq!(chain.segment_count(), 2);
    }

    #[test]
    fn extend_prefers_tailroom() {
        let mut chain = BufChain::new();
        let mut seg = Buf::with_capacity(8);
        assert!(seg.extend_from_slice(b"abc"));
        chain.push_back(seg);
        chain.extend_from_slice(b"defghijk");
        assert_eq!(chain.copy_to_vec(), b"abcdefghijk");
        assert_eq!(chain.segment_count(), 2);
    }
}
