
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{RawRwLock, RwLock};
use rand::Rng;

use crate::iterators::StorageIterator;

/// Height cap for every node tower.
pub const MAX_LEVEL: usize = 16;

type Link = Option<Arc<Node>>;

/// A skiplist node. The key never changes after insertion; the value and the
/// forward links are only written while the list-level write lock is held, so
/// the per-field locks never see contention.
struct Node {
    key: Bytes,
    value: RwLock<Bytes>,
    forward: Vec<RwLock<Link>>,
}

impl Node {
    fn new(key: Bytes, value: Bytes, level: usize) -> Arc<Self> {
        Arc::new(Self {
            key,
            value: RwLock::new(value),
            forward: (0..level).map(|_| RwLock::new(None)).collect(),
        })
    }

    fn next(&self, level: usize) -> Link {
        self.forward[level].read().clone()
    }

    fn level(&self) -> usize {
        self.forward.len()
    }
}

struct SkipListInner {
    // sentinel; holds no data and compares below every real key
    head: Arc<Node>,
    // highest level currently in use
    current_level: usize,
    // sum of key.len() + value.len() over live entries
    size_bytes: usize,
}

impl SkipListInner {
    fn create() -> Self {
        Self {
            head: Node::new(Bytes::new(), Bytes::new(), MAX_LEVEL),
            current_level: 1,
            size_bytes: 0,
        }
    }
}

impl Drop for SkipListInner {
    // sever every link while walking the bottom level; letting a long chain
    // drop recursively would overflow the stack.
    fn drop(&mut self) {
        let mut node = self.head.forward[0].write().take();
        for slot in self.head.forward.iter().skip(1) {
            drop(slot.write().take());
        }
        while let Some(n) = node {
            node = n.forward[0].write().take();
            for slot in n.forward.iter().skip(1) {
                drop(slot.write().take());
            }
        }
    }
}

/// Data Structure 0: a concurrent ordered map, the storage inside a MemTable.
///
/// One reader-writer lock per list: `put`/`remove`/`clear` take it exclusive,
/// `get` takes it shared, and an iterator keeps it shared for its whole
/// lifetime so the nodes it walks can never be spliced out from under it.
pub struct SkipList {
    inner: Arc<RwLock<SkipListInner>>,
}

impl SkipList {
    pub fn create() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SkipListInner::create())),
        }
    }

    /// Draw the height of a new tower: start at 1 and keep flipping a fair
    /// coin, capped at `MAX_LEVEL`.
    fn random_level() -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Insert or update. An existing key has its value rewritten in place and
    /// the byte counter adjusted by the length delta.
    pub fn put(&self, key: &[u8], value: &[u8]) {
        let mut inner = self.inner.write();

        // predecessors per level; levels above current_level keep the head
        let mut update: Vec<Arc<Node>> = vec![inner.head.clone(); MAX_LEVEL];
        let mut x = inner.head.clone();
        for i in (0..inner.current_level).rev() {
            while let Some(next) = x.next(i) {
                if next.key.as_ref() < key {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x.clone();
        }

        if let Some(node) = update[0].next(0).filter(|n| n.key.as_ref() == key) {
            let mut slot = node.value.write();
            inner.size_bytes = inner.size_bytes + value.len() - slot.len();
            *slot = Bytes::copy_from_slice(value);
            return;
        }

        let level = Self::random_level();
        if level > inner.current_level {
            inner.current_level = level;
        }

        let node = Node::new(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
            level,
        );
        inner.size_bytes += key.len() + value.len();

        for i in 0..level {
            *node.forward[i].write() = update[i].next(i);
            *update[i].forward[i].write() = Some(node.clone());
        }
    }

    /// Classical descent from the highest active level, advancing while the
    /// next key is still below the probe.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let inner = self.inner.read();

        let mut x = inner.head.clone();
        for i in (0..inner.current_level).rev() {
            while let Some(next) = x.next(i) {
                if next.key.as_ref() < key {
                    x = next;
                } else {
                    break;
                }
            }
        }

        x.next(0)
            .filter(|n| n.key.as_ref() == key)
            .map(|n| n.value.read().clone())
    }

    /// Splice the node out of every level it participates in. A missing key
    /// leaves the list and the byte counter untouched.
    pub fn remove(&self, key: &[u8]) {
        let mut inner = self.inner.write();

        let mut update: Vec<Arc<Node>> = vec![inner.head.clone(); MAX_LEVEL];
        let mut x = inner.head.clone();
        for i in (0..inner.current_level).rev() {
            while let Some(next) = x.next(i) {
                if next.key.as_ref() < key {
                    x = next;
                } else {
                    break;
                }
            }
            update[i] = x.clone();
        }

        let Some(node) = update[0].next(0).filter(|n| n.key.as_ref() == key) else {
            return;
        };

        for i in 0..node.level() {
            let mut slot = update[i].forward[i].write();
            if !matches!(&*slot, Some(n) if Arc::ptr_eq(n, &node)) {
                break;
            }
            *slot = node.next(i);
        }

        inner.size_bytes -= node.key.len() + node.value.read().len();

        while inner.current_level > 1 && inner.head.next(inner.current_level - 1).is_none() {
            inner.current_level -= 1;
        }
    }

    /// Drop every entry and reset the byte counter.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = SkipListInner::create();
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.read().size_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().head.next(0).is_none()
    }

    /// All live entries in ascending key order, for a builder consumer.
    pub fn flush(&self) -> Vec<(Bytes, Bytes)> {
        let inner = self.inner.read();
        let mut data = Vec::new();
        let mut x = inner.head.next(0);
        while let Some(node) = x {
            data.push((node.key.clone(), node.value.read().clone()));
            x = node.next(0);
        }
        data
    }

    pub fn iter(&self) -> SkipListIterator {
        let guard = self.inner.read_arc();
        let current = guard.head.next(0);
        let item = SkipListIterator::node_to_item(current.as_ref());
        SkipListIterator {
            _guard: guard,
            current,
            item,
        }
    }
}

/// Walks level 0 in ascending key order. Owns a shared guard on the list so
/// writers stay out until the iterator is dropped.
pub struct SkipListIterator {
    _guard: ArcRwLockReadGuard<RawRwLock, SkipListInner>,
    current: Link,
    item: (Bytes, Bytes),
}

impl SkipListIterator {
    fn node_to_item(node: Option<&Arc<Node>>) -> (Bytes, Bytes) {
        node.map(|n| (n.key.clone(), n.value.read().clone()))
            .unwrap_or_default()
    }
}

impl StorageIterator for SkipListIterator {
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        &self.item.0
    }

    fn value(&self) -> &[u8] {
        &self.item.1
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> anyhow::Result<()> {
        if let Some(node) = self.current.take() {
            self.current = node.next(0);
        }
        self.item = Self::node_to_item(self.current.as_ref());
        Ok(())
    }
}
