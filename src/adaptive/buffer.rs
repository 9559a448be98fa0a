//! Byte buffers as pooled objects.

use bytes::BytesMut;

use super::{AdaptivePool, Recyclable};

/// Read/write buffer pool used by connection handlers.
pub type BufferPool = AdaptivePool<BytesMut>;

impl Recyclable for Vec<u8> {
    fn with_size_hint(size: usize) -> Self {
        Vec::with_capacity(size)
    }

    fn pool_size(&self) -> usize {
        self.len()
    }

    fn footprint(&self) -> usize {
        self.capacity()
    }

    fn reset(&mut self) {
        self.clear();
    }
}

impl Recyclable for BytesMut {
    fn with_size_hint(size: usize) -> Self {
        BytesMut::with_capacity(size)
    }

    fn pool_size(&self) -> usize {
        self.len()
    }

    fn footprint(&self) -> usize {
        self.capacity()
    }

    fn reset(&mut self) {
        self.clear();
    }
}
