use std::sync::Arc;

use super::Block;

/// Walks a block entry by entry in offset-table order. The current key and
/// value range are cached and refreshed on every reposition.
pub struct BlockIterator {
    // reference to the block
    block: Arc<Block>,
    // copy of the key at the iterator position
    key: Vec<u8>,
    // the value range within the block data
    value_range: (usize, usize),
    // the current index at the iterator position
    idx: usize,
}

impl BlockIterator {
    fn new(block: Arc<Block>) -> Self {
        Self {
            block,
            key: Vec::new(),
            value_range: (0, 0),
            idx: 0,
        }
    }

    /// position at the first entry.
    pub fn create_and_seek_to_first(block: Arc<Block>) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to_first();
        iter
    }

    /// position at a numeric index; past-the-end yields an end iterator.
    pub fn create_and_seek_to_idx(block: Arc<Block>, idx: usize) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to(idx);
        iter
    }

    /// position at the first entry whose key is >= `key`.
    pub fn create_and_seek_to_key(block: Arc<Block>, key: &[u8]) -> Self {
        let mut iter = Self::new(block);
        iter.seek_to_key(key);
        iter
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.block.data[self.value_range.0..self.value_range.1]
    }

    pub fn is_valid(&self) -> bool {
        self.idx < self.block.offsets.len()
    }

    pub fn seek_to_first(&mut self) {
        self.seek_to(0);
    }

    /// seek to a specific index, invalidating the cached entry when the
    /// index falls outside the block.
    fn seek_to(&mut self, idx: usize) {
        self.idx = idx;
        if idx >= self.block.offsets.len() {
            self.key.clear();
            self.value_range = (0, 0);
            return;
        }
        let offset = self.block.offsets[idx] as usize;
        self.seek_to_offset(offset);
    }

    /// refresh the cached entry from the given byte offset.
    fn seek_to_offset(&mut self, offset: usize) {
        self.key.clear();
        self.key.extend_from_slice(self.block.key_at(offset));
        self.value_range = self.block.value_range_at(offset);
    }

    /// find the first entry with key >= `key` (or become an end iterator).
    pub fn seek_to_key(&mut self, key: &[u8]) {
        let (mut lo, mut hi) = (0usize, self.block.offsets.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.block.key_at(self.block.offsets[mid] as usize) < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.seek_to(lo);
    }

    /// move to the next entry.
    pub fn next(&mut self) {
        if self.is_valid() {
            self.seek_to(self.idx + 1);
        }
    }
}
