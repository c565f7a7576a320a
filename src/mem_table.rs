
use anyhow::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::iterators::merge_iterator::MergeIterator;
use crate::iterators::StorageIterator;
use crate::skiplist::{SkipList, SkipListIterator};
use crate::table::SsTableBuilder;

/// Data Structure 1: the in-memory tier of the engine, one writable
/// skiplist plus the frozen generations awaiting flush, newest first.
///
/// A delete is a put of the empty value (a tombstone); the layers below the
/// memtable only ever learn about it through that sentinel.
pub struct MemTable {
    inner: RwLock<MemTableInner>,
}

struct MemTableInner {
    active: Arc<SkipList>,
    // newest frozen generation at the front
    frozen: VecDeque<Arc<SkipList>>,
    frozen_bytes: usize,
}

impl MemTable {
    /*----------------MemTable creation and initialization------------*/
    pub fn create() -> Self {
        Self {
            inner: RwLock::new(MemTableInner {
                active: Arc::new(SkipList::create()),
                frozen: VecDeque::new(),
                frozen_bytes: 0,
            }),
        }
    }

    /*----------------CRUD API and data manipulation------------------*/

    pub fn put(&self, key: &[u8], value: &[u8]) {
        let inner = self.inner.write();
        inner.active.put(key, value);
    }

    /// tombstone write: mark the key deleted for every layer below.
    pub fn remove(&self, key: &[u8]) {
        let inner = self.inner.write();
        inner.active.put(key, b"");
    }

    /// The value from the newest generation that contains the key,
    /// tombstones included: `Some` holding the empty value means the key
    /// was deleted here and older layers must not be consulted.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let inner = self.inner.read();
        if let Some(value) = inner.active.get(key) {
            return Some(value);
        }
        for table in &inner.frozen {
            if let Some(value) = table.get(key) {
                return Some(value);
            }
        }
        None
    }

    /*----------------Generation management----------------------------*/

    /// Seal the active skiplist: it moves to the front of the frozen list
    /// and a fresh writable one takes its place.
    pub fn freeze_current_table(&self) {
        let mut inner = self.inner.write();
        let old = std::mem::replace(&mut inner.active, Arc::new(SkipList::create()));
        inner.frozen_bytes += old.size_bytes();
        inner.frozen.push_front(old);
        trace!(generations = inner.frozen.len(), "froze active table");
    }

    /// Drop every generation, frozen and active.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.frozen.clear();
        inner.frozen_bytes = 0;
        inner.active.clear();
    }

    /*----------------Flush----------------------------------------------*/

    /// Stream the merged, tombstone-free view into an SST builder.
    pub fn flush(&self, builder: &mut SsTableBuilder) -> Result<()> {
        let mut iter = self.iter()?;
        while iter.is_valid() {
            builder.add(iter.key(), iter.value());
            iter.next()?;
        }
        Ok(())
    }

    /*-----------------Sizes----------------------------------------------*/

    pub fn current_size(&self) -> usize {
        self.inner.read().active.size_bytes()
    }

    pub fn frozen_size(&self) -> usize {
        self.inner.read().frozen_bytes
    }

    pub fn total_size(&self) -> usize {
        let inner = self.inner.read();
        inner.active.size_bytes() + inner.frozen_bytes
    }

    /*-----------------Iteration-----------------------------------------*/

    /// Ordered merge over every generation, the active table first so the
    /// newest write wins equal keys.
    pub fn iter(&self) -> Result<MemTableIterator> {
        let inner = self.inner.read();
        let mut iters: Vec<Box<SkipListIterator>> = Vec::with_capacity(1 + inner.frozen.len());
        iters.push(Box::new(inner.active.iter()));
        for table in &inner.frozen {
            iters.push(Box::new(table.iter()));
        }
        MemTableIterator::new(MergeIterator::create(iters))
    }
}

/// Iterates the memtable as one strictly-increasing, tombstone-free stream:
/// the k-way merge keeps the newest generation's entry for every key, and
/// deleted keys are stepped over entirely.
pub struct MemTableIterator {
    inner: MergeIterator<SkipListIterator>,
}

impl MemTableIterator {
    fn new(inner: MergeIterator<SkipListIterator>) -> Result<Self> {
        let mut iter = Self { inner };
        iter.move_to_non_delete()?;
        Ok(iter)
    }

    // the merge already drains shadowed duplicates of the current key, so
    // stepping over empty values is enough to skip a whole tombstone cluster.
    fn move_to_non_delete(&mut self) -> Result<()> {
        while self.inner.is_valid() && self.inner.value().is_empty() {
            self.inner.next()?;
        }
        Ok(())
    }
}

impl StorageIterator for MemTableIterator {
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        self.inner.key()
    }

    fn value(&self) -> &[u8] {
        self.inner.value()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn next(&mut self) -> Result<()> {
        self.inner.next()?;
        self.move_to_non_delete()
    }

    fn number_of_iterators(&self) -> usize {
        self.inner.number_of_iterators()
    }
}
