//! Read-only access shared by every range-addressed buffer.

use super::Chunk;
use crate::error::{DistError, Result};
use crate::range::Interval;
use std::iter::Zip;
use std::ops::Range;
use std::slice;

/// Elements paired with their global index.
pub type Indexed<'a, T> = Zip<Range<i64>, slice::Iter<'a, T>>;

/// A contiguous buffer whose slot `k` holds global index `range().from() + k`.
pub trait RangedList<T> {
    fn range(&self) -> Interval;

    fn as_slice(&self) -> &[T];

    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Bounds-checked access by global index.
    fn get(&self, index: i64) -> Result<&T> {
        let range = self.range();
        if !range.contains(index) {
            return Err(DistError::OutOfRange { index, range });
        }
        Ok(&self.as_slice()[(index - range.from()) as usize])
    }

    /// Zero-copy read-only view of `range`, which must lie inside this buffer.
    fn view(&self, range: Interval) -> Result<RangedSlice<'_, T>> {
        RangedSlice::new(self.range(), self.as_slice()).narrow(range)
    }

    /// Iterate `(global index, element)` pairs.
    fn indexed(&self) -> Indexed<'_, T> {
        self.range().indices().zip(self.as_slice().iter())
    }

    /// Copy into an owned chunk.
    fn to_chunk(&self) -> Result<Chunk<T>>
    where
        T: Clone,
    {
        Chunk::from_vec(self.range(), self.as_slice().to_vec())
    }
}

/// A borrowed, read-only window onto part of a ranged buffer.
#[derive(Debug)]
pub struct RangedSlice<'a, T> {
    range: Interval,
    data: &'a [T],
}

impl<T> Clone for RangedSlice<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RangedSlice<'_, T> {}

impl<'a, T> RangedSlice<'a, T> {
    pub(crate) fn new(range: Interval, data: &'a [T]) -> Self {
        debug_assert_eq!(range.size() as usize, data.len());
        Self { range, data }
    }

    /// Wrap `data` as the elements of `range`.
    pub fn try_new(range: Interval, data: &'a [T]) -> Result<Self> {
        if range.size() != data.len() as u64 {
            return Err(DistError::LengthMismatch {
                range,
                len: data.len(),
            });
        }
        Ok(Self { range, data })
    }

    /// Narrow to a sub-range, keeping the original borrow.
    pub fn narrow(self, range: Interval) -> Result<RangedSlice<'a, T>> {
        if !self.range.contains_range(&range) {
            return Err(DistError::RangeOutOfBounds {
                requested: range,
                range: self.range,
            });
        }
        let start = (range.from() - self.range.from()) as usize;
        let end = start + range.size() as usize;
        Ok(RangedSlice {
            range,
            data: &self.data[start..end],
        })
    }

    /// The underlying elements with the original borrow.
    pub fn elements(&self) -> &'a [T] {
        self.data
    }

    /// Element at `index` with the original borrow.
    pub fn at(&self, index: i64) -> Result<&'a T> {
        if !self.range.contains(index) {
            return Err(DistError::OutOfRange {
                index,
                range: self.range,
            });
        }
        Ok(&self.data[(index - self.range.from()) as usize])
    }
}

impl<T> RangedList<T> for RangedSlice<'_, T> {
    fn range(&self) -> Interval {
        self.range
    }

    fn as_slice(&self) -> &[T] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_narrow_and_get() {
        let data: Vec<i32> = (0..10).collect();
        let slice = RangedSlice::try_new(Interval::new(100, 110).unwrap(), &data).unwrap();
        let narrow = slice.narrow(Interval::new(103, 106).unwrap()).unwrap();
        assert_eq!(narrow.elements(), &[3, 4, 5]);
        assert_eq!(*narrow.get(105).unwrap(), 5);
        assert!(narrow.get(106).is_err());
        assert!(slice.narrow(Interval::new(95, 101).unwrap()).is_err());
    }

    #[test]
    fn test_slice_length_checked() {
        let data = [1, 2, 3];
        assert!(matches!(
            RangedSlice::try_new(Interval::new(0, 4).unwrap(), &data),
            Err(DistError::LengthMismatch { len: 3, .. })
        ));
    }

    #[test]
    fn test_indexed_pairs() {
        let data = ['a', 'b'];
        let slice = RangedSlice::try_new(Interval::new(7, 9).unwrap(), &data).unwrap();
        let pairs: Vec<(i64, char)> = slice.indexed().map(|(i, c)| (i, *c)).collect();
        assert_eq!(pairs, vec![(7, 'a'), (8, 'b')]);
    }
}
