
use anyhow::Result;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::{
    block::Block,
    iterators::merge_iterator::MergeIterator,
    iterators::two_merge_iterator::TwoMergeIterator,
    iterators::StorageIterator,
    lsm_iterator::{FusedIterator, LsmIterator},
    mem_table::MemTable,
    table::{SsTable, SsTableBuilder, SsTableIterator},
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

/// Cache for blocks read from disk, shared by every SST of one engine.
pub type BlockCache = moka::sync::Cache<(usize, usize), Arc<Block>>;

/// Stores the state of the storage engine: the in-memory tier plus every
/// L0 table flushed so far.
#[derive(Clone)]
pub struct LsmStorageState {
    // the in-memory tier (active + frozen generations)
    pub memtable: Arc<MemTable>,
    // L0 SSTs in flush order: oldest at the head, newest at the tail
    pub l0_sstables: Vec<usize>,
    // SST objects: map id (usize) to the loaded handle
    pub sstables: HashMap<usize, Arc<SsTable>>,
}

impl LsmStorageState {
    fn create() -> Self {
        Self {
            memtable: Arc::new(MemTable::create()),
            l0_sstables: Vec::new(),
            sstables: HashMap::new(),
        }
    }
}

/// Provide configurable options when initializing the engine.
#[derive(Clone, Debug)]
pub struct LsmStorageOptions {
    // target size of one SST block
    pub block_size: usize,
    // memtable byte size that triggers a flush
    pub mem_size_limit: usize,
}

impl Default for LsmStorageOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            mem_size_limit: 4 * 1024 * 1024,
        }
    }
}

fn key_within(user_key: &[u8], table_begin: &[u8], table_end: &[u8]) -> bool {
    table_begin <= user_key && user_key <= table_end
}

/// the core data structure of the LSM storage engine,
/// only visible inside the crate.
pub(crate) struct LsmStorageInner {
    // lock the state for concurrent r/w.
    pub(crate) state: Arc<RwLock<Arc<LsmStorageState>>>,
    // serializes flush and freeze against each other.
    pub(crate) state_lock: Mutex<()>,
    // the path to the storage location on the file system.
    path: PathBuf,
    // cache for data blocks read from disk.
    pub(crate) block_cache: Arc<BlockCache>,
    // generate unique ids for SSTables.
    next_sst_id: AtomicUsize,
    // configuration settings controlling the behavior of the LSM tree
    pub(crate) options: Arc<LsmStorageOptions>,
}

impl LsmStorageInner {
    pub(crate) fn open(path: impl AsRef<Path>, options: LsmStorageOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        info!(path = %path.display(), "opening lsm storage");
        Ok(Self {
            state: Arc::new(RwLock::new(Arc::new(LsmStorageState::create()))),
            state_lock: Mutex::new(()),
            path,
            block_cache: Arc::new(BlockCache::new(4096)),
            next_sst_id: AtomicUsize::new(0),
            options: Arc::new(options),
        })
    }

    // CRUD API

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        // 1. take a snapshot so the read never blocks writers.
        let snapshot = {
            let guard = self.state.read();
            Arc::clone(&guard)
        }; // drop global lock here

        // 2. the memtable answer is decisive, tombstones included.
        if let Some(value) = snapshot.memtable.get(key) {
            if value.is_empty() {
                // found tombstone, return key not exists
                return Ok(None);
            }
            return Ok(Some(value));
        }

        // 3. L0 tables, newest first; the first exact match wins.
        for id in snapshot.l0_sstables.iter().rev() {
            let table = snapshot.sstables[id].clone();
            if !key_within(key, table.first_key(), table.last_key()) {
                continue;
            }
            let iter = SsTableIterator::create_and_seek_to_key(table, key)?;
            if iter.is_valid() && iter.key() == key {
                if iter.value().is_empty() {
                    // found tombstone, return key not exists
                    return Ok(None);
                }
                return Ok(Some(Bytes::copy_from_slice(iter.value())));
            }
        }
        Ok(None)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        assert!(!key.is_empty(), "key should not be empty!");
        // the empty value is the tombstone sentinel; a record cannot carry it.
        assert!(!value.is_empty(), "value should not be empty!");
        let size;
        {
            let guard = self.state.read();
            guard.memtable.put(key, value);
            size = guard.memtable.total_size();
        }
        if size >= self.options.mem_size_limit {
            self.flush()?;
        }
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        assert!(!key.is_empty(), "key should not be empty!");
        let guard = self.state.read();
        guard.memtable.remove(key);
        Ok(())
    }

    // Freeze & Flush API

    pub fn force_freeze_memtable(&self) {
        let _state_lock = self.state_lock.lock();
        let guard = self.state.read();
        guard.memtable.freeze_current_table();
    }

    /// Drain the memtable into a brand-new L0 SST. The table is installed
    /// into the shared state before the memtable is cleared, so a concurrent
    /// reader sees every record in at least one of the two places.
    pub fn flush(&self) -> Result<()> {
        let _state_lock = self.state_lock.lock();

        let snapshot = {
            let guard = self.state.read();
            Arc::clone(&guard)
        };
        if snapshot.memtable.total_size() == 0 {
            return Ok(());
        }

        let sst_id = self.next_sst_id();
        let mut builder = SsTableBuilder::new(self.options.block_size);
        snapshot.memtable.flush(&mut builder)?;
        let sst = Arc::new(builder.build(
            sst_id,
            Some(self.block_cache.clone()),
            self.path_of_sst(sst_id),
        )?);

        {
            let mut guard = self.state.write();
            let mut state = guard.as_ref().clone();
            state.l0_sstables.push(sst_id);
            state.sstables.insert(sst_id, sst);
            *guard = Arc::new(state);
        }
        snapshot.memtable.clear();
        info!(sst_id, "flushed memtable to L0");
        Ok(())
    }

    // Scan API

    /// Ordered, tombstone-free view over the memtable and every L0 table.
    pub fn scan(&self) -> Result<FusedIterator<LsmIterator>> {
        let snapshot = {
            let guard = self.state.read();
            Arc::clone(&guard)
        };

        let mem_iter = snapshot.memtable.iter()?;
        let mut l0_iters = Vec::with_capacity(snapshot.l0_sstables.len());
        for id in snapshot.l0_sstables.iter().rev() {
            let table = snapshot.sstables[id].clone();
            l0_iters.push(Box::new(SsTableIterator::create_and_seek_to_first(table)?));
        }
        let inner = TwoMergeIterator::create(mem_iter, MergeIterator::create(l0_iters))?;
        Ok(FusedIterator::new(LsmIterator::new(inner)?))
    }

    // Inner util methods or functions

    pub(crate) fn next_sst_id(&self) -> usize {
        self.next_sst_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn path_of_sst(&self, id: usize) -> PathBuf {
        self.path.join(format!("sst_{}", id))
    }
}

/// The public face of the engine, a thin owner around the storage inner.
pub struct LsmStorage {
    pub(crate) inner: Arc<LsmStorageInner>,
}

impl LsmStorage {
    pub fn open(path: impl AsRef<Path>, options: LsmStorageOptions) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(LsmStorageInner::open(path, options)?),
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.inner.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(key, value)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    pub fn scan(&self) -> Result<FusedIterator<LsmIterator>> {
        self.inner.scan()
    }

    pub fn force_freeze_memtable(&self) {
        self.inner.force_freeze_memtable()
    }
}

impl Drop for LsmStorage {
    fn drop(&mut self) {
        // best-effort: the failure only surfaces in the log.
        if let Err(e) = self.inner.flush() {
            error!(error = %e, "flush on close failed");
        }
    }
}
