pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::SsTableBuilder;
pub use iterator::SsTableIterator;

use crate::block::{Block, SIZEOF_U16, SIZEOF_U32};
use crate::lsm_storage::BlockCache;
use anyhow::{anyhow, bail, Result};
use bytes::{Buf, BufMut, Bytes};
use std::{fs::File, path::Path, sync::Arc};

/*
 * An SST file (all integers little-endian):
 * -----------------------------------------------------------------------
 * |          Block Section          |  Meta Section |       Extra        |
 * -----------------------------------------------------------------------
 * | block + crc32 | ... | block + crc32 |  metadata  | meta offset (32)  |
 * -----------------------------------------------------------------------
 *
 * The meta section is:
 * ---------------------------------------------------------------
 * | num_entries (32) | MetaEntry | ... | MetaEntry | crc32 (32)  |
 * ---------------------------------------------------------------
 * where the hash covers the entries only, not num_entries, and each
 * MetaEntry is:
 * ----------------------------------------------------------------------------------------
 * | offset (32) | first_key_len (16) | first_key | last_key_len (16) | last_key |
 * ----------------------------------------------------------------------------------------
 */

/// Envelope of one serialized block: where it starts in the file and the key
/// range it covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    pub(crate) offset: usize,
    pub(crate) first_key: Bytes,
    pub(crate) last_key: Bytes,
}

impl BlockMeta {
    pub fn encode_block_meta(block_meta: &[BlockMeta], buf: &mut Vec<u8>) {
        // calculate the estimated size of the encoded data.
        let mut estimated_size = SIZEOF_U32;
        for meta in block_meta {
            estimated_size += SIZEOF_U32;
            estimated_size += SIZEOF_U16 + meta.first_key.len();
            estimated_size += SIZEOF_U16 + meta.last_key.len();
        }
        // size of the checksum
        estimated_size += SIZEOF_U32;

        // reserve space in the buffer to improve perf.
        buf.reserve(estimated_size);
        let original_len = buf.len();
        buf.put_u32_le(block_meta.len() as u32);

        for meta in block_meta {
            buf.put_u32_le(meta.offset as u32);
            buf.put_u16_le(meta.first_key.len() as u16);
            buf.put_slice(&meta.first_key);
            buf.put_u16_le(meta.last_key.len() as u16);
            buf.put_slice(&meta.last_key);
        }
        buf.put_u32_le(crc32fast::hash(&buf[original_len + SIZEOF_U32..]));
        assert_eq!(estimated_size, buf.len() - original_len)
    }

    pub fn decode_block_meta(mut buf: &[u8]) -> Result<Vec<BlockMeta>> {
        if buf.len() < SIZEOF_U32 * 2 {
            bail!("block meta section is too short");
        }
        let num = buf.get_u32_le() as usize;
        let checksum = crc32fast::hash(&buf[..buf.remaining() - SIZEOF_U32]);
        let mut block_meta = Vec::with_capacity(num);
        for _ in 0..num {
            if buf.remaining() < SIZEOF_U32 + SIZEOF_U16 {
                bail!("block meta entry is truncated");
            }
            let offset = buf.get_u32_le() as usize;
            let first_key_len = buf.get_u16_le() as usize;
            if buf.remaining() < first_key_len + SIZEOF_U16 {
                bail!("block meta entry is truncated");
            }
            let first_key = buf.copy_to_bytes(first_key_len);
            let last_key_len = buf.get_u16_le() as usize;
            if buf.remaining() < last_key_len + SIZEOF_U32 {
                bail!("block meta entry is truncated");
            }
            let last_key = buf.copy_to_bytes(last_key_len);
            block_meta.push(BlockMeta {
                offset,
                first_key,
                last_key,
            });
        }
        if buf.remaining() != SIZEOF_U32 {
            bail!("trailing bytes after block meta entries");
        }
        if buf.get_u32_le() != checksum {
            bail!("meta checksum mismatched");
        }
        Ok(block_meta)
    }
}

/// A file object: a named, immutable byte region with positional reads.
/// The handle is `None` for metadata-only tables, which cannot be read.
pub struct FileObject(Option<File>, u64);

impl FileObject {
    pub fn create(path: &Path, data: Vec<u8>) -> Result<Self> {
        std::fs::write(path, &data)?;
        File::open(path)?.sync_all()?;
        Ok(FileObject(
            Some(File::options().read(true).write(false).open(path)?),
            data.len() as u64,
        ))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::options().read(true).write(false).open(path)?;
        let size = file.metadata()?.len();
        Ok(FileObject(Some(file), size))
    }

    pub(crate) fn meta_only(size: u64) -> Self {
        FileObject(None, size)
    }

    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        use std::os::unix::fs::FileExt;
        let file = self
            .0
            .as_ref()
            .ok_or_else(|| anyhow!("file handle carries metadata only"))?;
        let mut data = vec![0; len as usize];
        file.read_exact_at(&mut data[..], offset)?;
        Ok(data)
    }

    pub fn size(&self) -> u64 {
        self.1
    }
}

/// An SSTable is a file format used for storing key-value pairs sorted by
/// keys.
pub struct SsTable {
    // the actual storage unit of SsTable.
    pub(crate) file: FileObject,
    // the meta entries that locate the data blocks.
    pub(crate) block_meta: Vec<BlockMeta>,
    // where the meta section starts within `file`.
    pub(crate) block_meta_offset: usize,
    id: usize,
    block_cache: Option<Arc<BlockCache>>,
    first_key: Bytes,
    last_key: Bytes,
}

impl SsTable {
    /// Open an SSTable from a file: walk the trailer to the meta section,
    /// decode it, and remember the key range it spans.
    pub fn open(id: usize, block_cache: Option<Arc<BlockCache>>, file: FileObject) -> Result<Self> {
        let len = file.size();
        if len < SIZEOF_U32 as u64 {
            bail!("SST file is too small to hold a meta offset");
        }
        let raw_meta_offset = file.read(len - SIZEOF_U32 as u64, SIZEOF_U32 as u64)?;
        let block_meta_offset = (&raw_meta_offset[..]).get_u32_le() as u64;
        if block_meta_offset > len - SIZEOF_U32 as u64 {
            bail!("meta offset points past the file end");
        }
        let raw_meta = file.read(block_meta_offset, len - SIZEOF_U32 as u64 - block_meta_offset)?;
        let block_meta = BlockMeta::decode_block_meta(&raw_meta[..])?;
        let (first_key, last_key) = match (block_meta.first(), block_meta.last()) {
            (Some(first), Some(last)) => (first.first_key.clone(), last.last_key.clone()),
            _ => bail!("SST holds no blocks"),
        };
        Ok(Self {
            file,
            block_meta,
            block_meta_offset: block_meta_offset as usize,
            id,
            block_cache,
            first_key,
            last_key,
        })
    }

    /// A handle carrying only envelope metadata, for index listings. No
    /// reads are possible through it.
    pub fn create_with_meta_only(
        id: usize,
        file_size: u64,
        first_key: Bytes,
        last_key: Bytes,
    ) -> Self {
        Self {
            file: FileObject::meta_only(file_size),
            block_meta: Vec::new(),
            block_meta_offset: 0,
            id,
            block_cache: None,
            first_key,
            last_key,
        }
    }

    /// Read one block from disk, verifying its trailing crc32.
    pub fn read_block(&self, block_idx: usize) -> Result<Arc<Block>> {
        let Some(meta) = self.block_meta.get(block_idx) else {
            bail!("block index {} out of range", block_idx);
        };
        let offset = meta.offset as u64;
        let end = if block_idx + 1 < self.block_meta.len() {
            self.block_meta[block_idx + 1].offset as u64
        } else {
            self.block_meta_offset as u64
        };
        if end < offset + SIZEOF_U32 as u64 {
            bail!("block span in SST is too small");
        }
        let raw = self.file.read(offset, end - offset)?;
        Ok(Arc::new(Block::decode(&raw, true)?))
    }

    /// Read a block through the cache when one is configured.
    pub fn read_block_cached(&self, block_idx: usize) -> Result<Arc<Block>> {
        if let Some(ref block_cache) = self.block_cache {
            let blk = block_cache
                .try_get_with((self.id, block_idx), || self.read_block(block_idx))
                .map_err(|e| anyhow!("{}", e))?;
            Ok(blk)
        } else {
            self.read_block(block_idx)
        }
    }

    /// Locate the block that may contain `key`: left when the key sorts
    /// below a block's first key, right when above its last key. Keys
    /// falling in the gap between two blocks land on the following block.
    pub fn find_block_idx(&self, key: &[u8]) -> Result<usize> {
        let (first, last) = match (self.block_meta.first(), self.block_meta.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => bail!("SST holds no blocks"),
        };
        if key < first.first_key.as_ref() || key > last.last_key.as_ref() {
            bail!("key is outside the SST key range");
        }
        let (mut lo, mut hi) = (0usize, self.block_meta.len() - 1);
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let meta = &self.block_meta[mid];
            if key < meta.first_key.as_ref() {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            } else if key > meta.last_key.as_ref() {
                lo = mid + 1;
            } else {
                return Ok(mid);
            }
        }
        Ok(lo)
    }

    pub fn first_key(&self) -> &Bytes {
        &self.first_key
    }

    pub fn last_key(&self) -> &Bytes {
        &self.last_key
    }

    pub fn num_of_blocks(&self) -> usize {
        self.block_meta.len()
    }

    pub fn table_size(&self) -> u64 {
        self.file.size()
    }

    pub fn sst_id(&self) -> usize {
        self.id
    }
}
