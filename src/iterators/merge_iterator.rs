use anyhow::Result;

use super::StorageIterator;
use std::{
    cmp,
    collections::{binary_heap::PeekMut, BinaryHeap},
};

/// HeapWrapper pairs a boxed source iterator with its index in the input
/// vector. The index doubles as the priority among equal keys: sources are
/// handed over newest first, so the lowest index wins.
struct HeapWrapper<I: StorageIterator>(pub usize, pub Box<I>);

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>> PartialOrd for HeapWrapper<I> {
    #[allow(clippy::non_canonical_partial_ord_impl)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        match self.1.key().cmp(&other.1.key()) {
            // smaller keys are of higher priority (min-heap).
            cmp::Ordering::Greater => Some(cmp::Ordering::Greater),
            cmp::Ordering::Less => Some(cmp::Ordering::Less),
            // same key: the earlier source (newer generation) comes first.
            cmp::Ordering::Equal => self.0.partial_cmp(&other.0),
        }
        .map(|x| x.reverse())
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>> Ord for HeapWrapper<I> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.partial_cmp(other).unwrap()
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>> Eq for HeapWrapper<I> {}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>> PartialEq for HeapWrapper<I> {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other).unwrap() == cmp::Ordering::Equal
    }
}

/// Merges multiple ordered storage iterators into one ordered stream.
/// Equal keys are produced once, taking the entry from the lowest-index
/// source; the duplicates underneath are drained on `next`.
pub struct MergeIterator<I: StorageIterator> {
    iters: BinaryHeap<HeapWrapper<I>>,
    current: Option<HeapWrapper<I>>,
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>> MergeIterator<I> {
    pub fn create(iters: Vec<Box<I>>) -> Self {
        if iters.is_empty() {
            return Self {
                iters: BinaryHeap::new(),
                current: None,
            };
        }

        let mut heap = BinaryHeap::new();

        // if every source is exhausted, park the last one as current so the
        // merge reports invalid without special cases.
        if iters.iter().all(|x| !x.is_valid()) {
            let mut iters = iters;
            return Self {
                iters: heap,
                current: Some(HeapWrapper(0, iters.pop().unwrap())),
            };
        }

        for (idx, iter) in iters.into_iter().enumerate() {
            if iter.is_valid() {
                heap.push(HeapWrapper(idx, iter));
            }
        }

        let current = heap.pop().unwrap();
        Self {
            iters: heap,
            current: Some(current),
        }
    }
}

impl<I: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>> StorageIterator
    for MergeIterator<I>
{
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        self.current.as_ref().unwrap().1.key()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().unwrap().1.value()
    }

    fn is_valid(&self) -> bool {
        self.current
            .as_ref()
            .map(|x| x.1.is_valid())
            .unwrap_or(false)
    }

    fn next(&mut self) -> Result<()> {
        let current = self.current.as_mut().unwrap();
        // drain every source still sitting on the current key.
        while let Some(mut inner_iter) = self.iters.peek_mut() {
            debug_assert!(
                inner_iter.1.key() >= current.1.key(),
                "heap invariant violated"
            );
            if inner_iter.1.key() == current.1.key() {
                // case 1: an error occurred when advancing the duplicate.
                if let e @ Err(_) = inner_iter.1.next() {
                    PeekMut::pop(inner_iter);
                    return e;
                }
                // case 2: the duplicate is exhausted.
                if !inner_iter.1.is_valid() {
                    PeekMut::pop(inner_iter);
                }
            } else {
                break;
            }
        }

        current.1.next()?;

        if !current.1.is_valid() {
            if let Some(iter) = self.iters.pop() {
                *current = iter;
            }
            return Ok(());
        }

        if let Some(mut inner_iter) = self.iters.peek_mut() {
            if *current < *inner_iter {
                std::mem::swap(&mut *inner_iter, current);
            }
        }
        Ok(())
    }

    fn number_of_iterators(&self) -> usize {
        self.iters
            .iter()
            .map(|x| x.1.number_of_iterators())
            .sum::<usize>()
            + self
                .current
                .as_ref()
                .map(|x| x.1.number_of_iterators())
                .unwrap_or(0)
    }
}
