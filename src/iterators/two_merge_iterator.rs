use anyhow::Result;

use super::StorageIterator;

/// Merges two iterators of different types into one. If the two iterators
/// have the same key, only produce the key once and prefer the entry from A.
pub struct TwoMergeIterator<A: StorageIterator, B: StorageIterator> {
    a: A,
    b: B,
    choose_a: bool,
}

impl<
        A: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
        B: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
    > TwoMergeIterator<A, B>
{
    fn choose_a(a: &A, b: &B) -> bool {
        if !a.is_valid() {
            return false;
        }
        if !b.is_valid() {
            return true;
        }
        a.key() < b.key()
    }

    // when both sides sit on the same key, B's entry is shadowed.
    fn skip_b(&mut self) -> Result<()> {
        if self.a.is_valid() && self.b.is_valid() && self.a.key() == self.b.key() {
            self.b.next()?;
        }
        Ok(())
    }

    pub fn create(a: A, b: B) -> Result<Self> {
        let mut iter = Self {
            a,
            b,
            choose_a: false,
        };
        iter.skip_b()?;
        iter.choose_a = Self::choose_a(&iter.a, &iter.b);
        Ok(iter)
    }
}

impl<
        A: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
        B: 'static + for<'a> StorageIterator<KeyType<'a> = &'a [u8]>,
    > StorageIterator for TwoMergeIterator<A, B>
{
    type KeyType<'a> = &'a [u8];

    fn key(&self) -> &[u8] {
        if self.choose_a {
            self.a.key()
        } else {
            self.b.key()
        }
    }

    fn value(&self) -> &[u8] {
        if self.choose_a {
            self.a.value()
        } else {
            self.b.value()
        }
    }

    fn is_valid(&self) -> bool {
        if self.choose_a {
            self.a.is_valid()
        } else {
            self.b.is_valid()
        }
    }

    fn next(&mut self) -> Result<()> {
        if self.choose_a {
            self.a.next()?;
        } else {
            self.b.next()?;
        }
        self.skip_b()?;
        self.choose_a = Self::choose_a(&self.a, &self.b);
        Ok(())
    }

    fn number_of_iterators(&self) -> usize {
        self.a.number_of_iterators() + self.b.number_of_iterators()
    }
}
