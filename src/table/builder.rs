use crate::block::builder::BlockBuilder;
use crate::lsm_storage::BlockCache;
use anyhow::{bail, Result};
use bytes::BufMut;

use super::{BlockMeta, FileObject, SsTable};
use std::{path::Path, sync::Arc};

/// Builds an SsTable from key-value pairs arriving in non-decreasing key
/// order.
pub struct SsTableBuilder {
    // Builder fields
    builder: BlockBuilder,
    block_size: usize,
    // Key range of the block being built
    first_key: Vec<u8>,
    last_key: Vec<u8>,
    // Encoded blocks, each followed by its crc32
    data: Vec<u8>,
    // Metadata fields
    pub(crate) meta: Vec<BlockMeta>,
}

impl SsTableBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            builder: BlockBuilder::new(block_size),
            block_size,
            first_key: Vec::new(),
            last_key: Vec::new(),
            data: Vec::new(),
            meta: Vec::new(),
        }
    }

    /*-----------Executors (core functional API)--------------*/

    /// adds a key-value pair to the SsTable, rotating to a fresh block when
    /// the current one is full
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        if self.first_key.is_empty() {
            self.first_key = key.to_vec();
        }

        if self.builder.add(key, value) {
            self.last_key.clear();
            self.last_key.extend_from_slice(key);
            return;
        }

        self.finish_block();

        assert!(self.builder.add(key, value));
        self.first_key = key.to_vec();
        self.last_key = key.to_vec();
    }

    /// builds the SSTable and writes it to the given path
    pub fn build(
        mut self,
        id: usize,
        block_cache: Option<Arc<BlockCache>>,
        path: impl AsRef<Path>,
    ) -> Result<SsTable> {
        self.finish_block();
        if self.meta.is_empty() {
            bail!("cannot build an SST with no entries");
        }
        let mut buf = self.data;
        let meta_offset = buf.len();
        BlockMeta::encode_block_meta(&self.meta, &mut buf);
        buf.put_u32_le(meta_offset as u32);
        let file = FileObject::create(path.as_ref(), buf)?;
        Ok(SsTable {
            id,
            file,
            first_key: self.meta.first().unwrap().first_key.clone(),
            last_key: self.meta.last().unwrap().last_key.clone(),
            block_meta: self.meta,
            block_meta_offset: meta_offset,
            block_cache,
        })
    }

    /*-----------------Accessor------------------*/

    /// the bytes buffered so far; metadata is small enough to ignore
    pub fn estimated_size(&self) -> usize {
        self.data.len()
    }

    /*----------------Modificator------------------*/

    /// Finalize the block being built: encode it, append it with its crc32,
    /// and record its envelope.
    fn finish_block(&mut self) {
        if self.builder.is_empty() {
            return;
        }
        let builder = std::mem::replace(&mut self.builder, BlockBuilder::new(self.block_size));
        let encoded_block = builder.build().encode();
        self.meta.push(BlockMeta {
            offset: self.data.len(),
            first_key: std::mem::take(&mut self.first_key).into(),
            last_key: std::mem::take(&mut self.last_key).into(),
        });
        let checksum = crc32fast::hash(&encoded_block);
        self.data.extend(encoded_block);
        self.data.put_u32_le(checksum);
    }

    #[cfg(test)]
    pub(crate) fn build_for_test(self, path: impl AsRef<Path>) -> Result<SsTable> {
        self.build(0, None, path)
    }
}
