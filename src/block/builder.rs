use bytes::BufMut;

use super::Block;
use super::SIZEOF_U16;

/// Builds a block
pub struct BlockBuilder {
    /// all key-value pairs (serialized) in the block.
    data: Vec<u8>,
    /// offsets of each k-v entry
    offsets: Vec<u16>,
    /// capacity the encoded block should stay under
    block_size: usize,
}

impl BlockBuilder {
    /// creates a new block builder
    pub fn new(block_size: usize) -> Self {
        Self {
            data: Vec::new(),
            offsets: Vec::new(),
            block_size,
        }
    }

    /// size of the block once encoded: data, offset table, entry count
    fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * SIZEOF_U16 + SIZEOF_U16
    }

    /// Adds a k-v pair (entry) to the block, returns false when the block is
    /// full. The very first entry is admitted no matter its size.
    #[must_use]
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> bool {
        assert!(key.len() <= u16::MAX as usize, "key is too long");
        assert!(value.len() <= u16::MAX as usize, "value is too long");

        // each entry costs its payload plus three u16s: key_len, value_len
        // and its slot in the offset table.
        let add_on = key.len() + value.len() + SIZEOF_U16 * 3;
        if self.estimated_size() + add_on > self.block_size && !self.is_empty() {
            return false;
        }

        self.offsets.push(self.data.len() as u16);
        self.data.put_u16_le(key.len() as u16);
        self.data.put_slice(key);
        self.data.put_u16_le(value.len() as u16);
        self.data.put_slice(value);

        true
    }

    /// check whether the builder holds no entries yet.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// finalize the builder into a block.
    pub fn build(self) -> Block {
        if self.is_empty() {
            panic!("block should not be empty!")
        }
        Block {
            data: self.data,
            offsets: self.offsets,
        }
    }
}
