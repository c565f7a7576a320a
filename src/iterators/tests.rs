use anyhow::Result;
use bytes::Bytes;

use super::merge_iterator::MergeIterator;
use super::two_merge_iterator::TwoMergeIterator;
use super::StorageIterator;

#[derive(Clone)]
pub struct MockIterator {
    pub data: Vec<(Bytes, Bytes)>,
    pub index: usize,
}

impl MockIterator {
    pub fn new(data: Vec<(Bytes, Bytes)>) -> Self {
        Self { data, index: 0 }
    }
}

impl StorageIterator for MockIterator {
    type KeyType<'a> = &'a [u8];

    fn next(&mut self) -> Result<()> {
        if self.index < self.data.len() {
            self.index += 1;
        }
        Ok(())
    }

    fn key(&self) -> &[u8] {
        &self.data[self.index].0
    }

    fn value(&self) -> &[u8] {
        &self.data[self.index].1
    }

    fn is_valid(&self) -> bool {
        self.index < self.data.len()
    }
}

fn entry(key: &[u8], value: &[u8]) -> (Bytes, Bytes) {
    (Bytes::copy_from_slice(key), Bytes::copy_from_slice(value))
}

fn collect<I: for<'a> StorageIterator<KeyType<'a> = &'a [u8]>>(
    iter: &mut I,
) -> Vec<(Bytes, Bytes)> {
    let mut out = Vec::new();
    while iter.is_valid() {
        out.push(entry(iter.key(), iter.value()));
        iter.next().unwrap();
    }
    out
}

#[test]
fn test_merge_iterator_interleaved() {
    let i1 = MockIterator::new(vec![entry(b"a", b"1.1"), entry(b"c", b"1.2")]);
    let i2 = MockIterator::new(vec![entry(b"b", b"2.1"), entry(b"d", b"2.2")]);
    let mut merged = MergeIterator::create(vec![Box::new(i1), Box::new(i2)]);
    assert_eq!(
        collect(&mut merged),
        vec![
            entry(b"a", b"1.1"),
            entry(b"b", b"2.1"),
            entry(b"c", b"1.2"),
            entry(b"d", b"2.2"),
        ]
    );
}

#[test]
fn test_merge_iterator_lowest_index_wins() {
    let i1 = MockIterator::new(vec![entry(b"a", b"newest"), entry(b"b", b"1.2")]);
    let i2 = MockIterator::new(vec![entry(b"a", b"older"), entry(b"c", b"2.2")]);
    let i3 = MockIterator::new(vec![entry(b"a", b"oldest"), entry(b"b", b"shadowed")]);
    let mut merged = MergeIterator::create(vec![Box::new(i1), Box::new(i2), Box::new(i3)]);
    assert_eq!(
        collect(&mut merged),
        vec![
            entry(b"a", b"newest"),
            entry(b"b", b"1.2"),
            entry(b"c", b"2.2"),
        ]
    );
}

#[test]
fn test_merge_iterator_empty_inputs() {
    let merged: MergeIterator<MockIterator> = MergeIterator::create(vec![]);
    assert!(!merged.is_valid());

    let i1 = MockIterator::new(vec![]);
    let i2 = MockIterator::new(vec![entry(b"a", b"1")]);
    let mut merged = MergeIterator::create(vec![Box::new(i1), Box::new(i2)]);
    assert_eq!(collect(&mut merged), vec![entry(b"a", b"1")]);

    let i1 = MockIterator::new(vec![]);
    let i2 = MockIterator::new(vec![]);
    let merged = MergeIterator::create(vec![Box::new(i1), Box::new(i2)]);
    assert!(!merged.is_valid());
}

#[test]
fn test_merge_iterator_counts_sources() {
    let i1 = MockIterator::new(vec![entry(b"a", b"1")]);
    let i2 = MockIterator::new(vec![entry(b"b", b"2")]);
    let merged = MergeIterator::create(vec![Box::new(i1), Box::new(i2)]);
    assert_eq!(merged.number_of_iterators(), 2);
}

#[test]
fn test_two_merge_iterator_a_wins_ties() {
    let a = MockIterator::new(vec![entry(b"a", b"from_a"), entry(b"c", b"a.c")]);
    let b = MockIterator::new(vec![
        entry(b"a", b"from_b"),
        entry(b"b", b"b.b"),
        entry(b"c", b"b.c"),
    ]);
    let mut merged = TwoMergeIterator::create(a, b).unwrap();
    assert_eq!(
        collect(&mut merged),
        vec![
            entry(b"a", b"from_a"),
            entry(b"b", b"b.b"),
            entry(b"c", b"a.c"),
        ]
    );
}

#[test]
fn test_two_merge_iterator_one_side_empty() {
    let a = MockIterator::new(vec![]);
    let b = MockIterator::new(vec![entry(b"a", b"1"), entry(b"b", b"2")]);
    let mut merged = TwoMergeIterator::create(a, b).unwrap();
    assert_eq!(collect(&mut merged), vec![entry(b"a", b"1"), entry(b"b", b"2")]);

    let a = MockIterator::new(vec![entry(b"a", b"1")]);
    let b = MockIterator::new(vec![]);
    let mut merged = TwoMergeIterator::create(a, b).unwrap();
    assert_eq!(collect(&mut merged), vec![entry(b"a", b"1")]);

    let a = MockIterator::new(vec![]);
    let b = MockIterator::new(vec![]);
    let merged = TwoMergeIterator::create(a, b).unwrap();
    assert!(!merged.is_valid());
}
