pub mod builder;
pub mod iterator;


use anyhow::{bail, Result};
use bytes::{Buf, BufMut, Bytes};

pub(crate) const SIZEOF_U16: usize = std::mem::size_of::<u16>();
pub(crate) const SIZEOF_U32: usize = std::mem::size_of::<u32>();

/// A sorted run of key-value entries plus an offset table locating each one.
///
/// Layout of an encoded block (all integers little-endian):
///
/// ```text
/// | entry | ... | entry | offset (2B) | ... | offset (2B) | count (2B) |
/// ```
///
/// with each entry being
///
/// ```text
/// | key_len (2B) | key | value_len (2B) | value |
/// ```
pub struct Block {
    pub(crate) data: Vec<u8>,
    pub(crate) offsets: Vec<u16>,
}

impl Block {
    pub fn encode(&self) -> Bytes {
        // add data itself.
        let mut buf = self.data.clone();
        let offsets_len = self.offsets.len();
        // add offsets one by one.
        for offset in &self.offsets {
            buf.put_u16_le(*offset);
        }
        // add the number of entries.
        buf.put_u16_le(offsets_len as u16);
        buf.into()
    }

    /// The reverse of `encode`. When `with_hash` is set the buffer carries a
    /// trailing crc32 of the encoding, which is checked and stripped first.
    pub fn decode(data: &[u8], with_hash: bool) -> Result<Self> {
        let payload = if with_hash {
            if data.len() < SIZEOF_U32 {
                bail!("block is too short to carry a checksum");
            }
            let (payload, stored) = data.split_at(data.len() - SIZEOF_U32);
            let stored = (&stored[..]).get_u32_le();
            if crc32fast::hash(payload) != stored {
                bail!("block checksum mismatched");
            }
            payload
        } else {
            data
        };

        if payload.len() < SIZEOF_U16 {
            bail!("encoded block is shorter than its entry count");
        }
        // 1. the number of entries in the block.
        let entry_offsets_len = (&payload[payload.len() - SIZEOF_U16..]).get_u16_le() as usize;
        if payload.len() < SIZEOF_U16 + entry_offsets_len * SIZEOF_U16 {
            bail!(
                "encoded block cannot hold {} offset entries",
                entry_offsets_len
            );
        }
        let data_end = payload.len() - SIZEOF_U16 - entry_offsets_len * SIZEOF_U16;
        let offsets_raw = &payload[data_end..payload.len() - SIZEOF_U16];
        // 2. the offsets.
        let offsets = offsets_raw
            .chunks(SIZEOF_U16)
            .map(|mut x| x.get_u16_le())
            .collect();
        // 3. the data (kv pairs).
        let data = payload[0..data_end].to_vec();
        Ok(Self { data, offsets })
    }

    pub fn first_key(&self) -> &[u8] {
        if self.offsets.is_empty() {
            return &[];
        }
        self.key_at(self.offsets[0] as usize)
    }

    /// Binary-search the offset table for an exact key match.
    pub fn get_value_binary(&self, key: &[u8]) -> Option<&[u8]> {
        if self.offsets.is_empty() {
            return None;
        }
        let (mut lo, mut hi) = (0usize, self.offsets.len() - 1);
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let offset = self.offsets[mid] as usize;
            match self.key_at(offset).cmp(key) {
                std::cmp::Ordering::Equal => {
                    let (start, end) = self.value_range_at(offset);
                    return Some(&self.data[start..end]);
                }
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => {
                    if mid == 0 {
                        return None;
                    }
                    hi = mid - 1;
                }
            }
        }
        None
    }

    pub(crate) fn key_at(&self, offset: usize) -> &[u8] {
        let key_len = (&self.data[offset..offset + SIZEOF_U16]).get_u16_le() as usize;
        &self.data[offset + SIZEOF_U16..offset + SIZEOF_U16 + key_len]
    }

    pub(crate) fn value_range_at(&self, offset: usize) -> (usize, usize) {
        let key_len = (&self.data[offset..offset + SIZEOF_U16]).get_u16_le() as usize;
        let value_len_at = offset + SIZEOF_U16 + key_len;
        let value_len = (&self.data[value_len_at..value_len_at + SIZEOF_U16]).get_u16_le() as usize;
        let start = value_len_at + SIZEOF_U16;
        (start, start + value_len)
    }

    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }
}
