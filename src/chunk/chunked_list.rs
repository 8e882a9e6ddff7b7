//! # Chunked list
//!
//! The set of chunks a place holds for one collection. Chunks are keyed by
//! their range in a sorted map, and ranges never overlap, so an index is
//! resolved with at most two lookups.

use super::storage::Chunk;
use super::view::{RangedList, RangedSlice};
use crate::error::{DistError, Result};
use crate::range::{coalesce, find_overlapping, overlapping, Interval};
use rayon::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct ChunkedList<T> {
    chunks: BTreeMap<Interval, Chunk<T>>,
    len: usize,
}

impl<T> Default for ChunkedList<T> {
    fn default() -> Self {
        Self {
            chunks: BTreeMap::new(),
            len: 0,
        }
    }
}

impl<T> ChunkedList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of elements over all chunks.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Insert a chunk whose range must not overlap any chunk already held.
    pub fn add(&mut self, chunk: Chunk<T>) -> Result<()> {
        let range = chunk.range();
        if let Some((existing, _)) = find_overlapping(&self.chunks, &range) {
            return Err(DistError::Overlap {
                range,
                existing: *existing,
            });
        }
        self.len += chunk.len();
        self.chunks.insert(range, chunk);
        Ok(())
    }

    /// Remove the chunk registered under exactly `range`.
    pub fn remove(&mut self, range: &Interval) -> Option<Chunk<T>> {
        let chunk = self.chunks.remove(range)?;
        self.len -= chunk.len();
        Some(chunk)
    }

    pub fn chunk(&self, range: &Interval) -> Option<&Chunk<T>> {
        self.chunks.get(range)
    }

    pub fn chunk_containing(&self, index: i64) -> Option<&Chunk<T>> {
        find_overlapping(&self.chunks, &Interval::singleton(index)).map(|(_, chunk)| chunk)
    }

    fn chunk_containing_mut(&mut self, index: i64) -> Option<&mut Chunk<T>> {
        let key = *find_overlapping(&self.chunks, &Interval::singleton(index))?.0;
        self.chunks.get_mut(&key)
    }

    pub fn contains(&self, index: i64) -> bool {
        self.chunk_containing(index).is_some()
    }

    pub fn get(&self, index: i64) -> Result<&T> {
        self.chunk_containing(index)
            .ok_or(DistError::NotLocal(index))?
            .get(index)
    }

    pub fn get_mut(&mut self, index: i64) -> Result<&mut T> {
        self.chunk_containing_mut(index)
            .ok_or(DistError::NotLocal(index))?
            .get_mut(index)
    }

    /// Replace the element at `index`, returning the previous value.
    pub fn set(&mut self, index: i64, value: T) -> Result<T> {
        self.chunk_containing_mut(index)
            .ok_or(DistError::NotLocal(index))?
            .set(index, value)
    }

    /// Ranges of the held chunks in ascending order.
    pub fn ranges(&self) -> Vec<Interval> {
        self.chunks.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk<T>> + '_ {
        self.chunks.values()
    }

    /// Chunks whose range overlaps `range`, in index order.
    pub fn overlapping(&self, range: Interval) -> impl Iterator<Item = &Chunk<T>> + '_ {
        overlapping(&self.chunks, range).map(|(_, chunk)| chunk)
    }

    /// First index of `range` not held by any chunk.
    fn first_gap(&self, range: Interval) -> Option<i64> {
        let mut cursor = range.from();
        for held in coalesce(self.overlapping(range).map(|c| c.range())) {
            if held.from() > cursor {
                return Some(cursor);
            }
            cursor = cursor.max(held.to());
        }
        (cursor < range.to()).then_some(cursor)
    }

    /// Check whether every index of `range` is held locally.
    pub fn covers(&self, range: Interval) -> bool {
        self.first_gap(range).is_none()
    }

    /// Cut the chunk holding `index` so that a chunk boundary falls on it.
    /// A no-op when `index` is already a boundary or not held.
    pub fn split_at(&mut self, index: i64) -> Result<()> {
        let Some((key, _)) = find_overlapping(&self.chunks, &Interval::singleton(index)) else {
            return Ok(());
        };
        let key = *key;
        if key.from() == index {
            return Ok(());
        }
        if let Some(chunk) = self.chunks.remove(&key) {
            let (head, tail) = chunk.split_at(index)?;
            self.chunks.insert(head.range(), head);
            self.chunks.insert(tail.range(), tail);
        }
        Ok(())
    }

    /// Split chunks so that `range` is exactly a union of whole chunks.
    pub fn isolate(&mut self, range: Interval) -> Result<()> {
        self.split_at(range.from())?;
        self.split_at(range.to())
    }

    /// Remove and return the chunks making up `range`, which must be fully held.
    pub fn take(&mut self, range: Interval) -> Result<Vec<Chunk<T>>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(missing) = self.first_gap(range) {
            return Err(DistError::NotLocal(missing));
        }
        self.isolate(range)?;
        let keys: Vec<Interval> = overlapping(&self.chunks, range)
            .map(|(key, _)| *key)
            .collect();
        Ok(keys.iter().filter_map(|key| self.remove(key)).collect())
    }

    /// Zero-copy view of `range`, which must lie inside a single chunk.
    pub fn view(&self, range: Interval) -> Result<RangedSlice<'_, T>> {
        self.chunk_containing(range.from())
            .ok_or(DistError::NotLocal(range.from()))?
            .view(range)
    }

    /// Visit every element in index order.
    pub fn for_each(&self, mut f: impl FnMut(i64, &T)) {
        for chunk in self.chunks.values() {
            for (index, value) in chunk.indexed() {
                f(index, value);
            }
        }
    }

    pub fn for_each_mut(&mut self, mut f: impl FnMut(i64, &mut T)) {
        for chunk in self.chunks.values_mut() {
            let from = chunk.range().from();
            for (offset, value) in chunk.iter_mut().enumerate() {
                f(from + offset as i64, value);
            }
        }
    }

    /// Visit every element, collecting each failure instead of stopping at
    /// the first one.
    pub fn try_for_each_collect(
        &self,
        mut f: impl FnMut(i64, &T) -> Result<()>,
    ) -> Vec<(i64, DistError)> {
        let mut failures = Vec::new();
        self.for_each(|index, value| {
            if let Err(err) = f(index, value) {
                failures.push((index, err));
            }
        });
        failures
    }

    /// Even split of the held indices into `parts` lists of sub-ranges.
    fn work_split(&self, parts: usize) -> Result<Vec<Vec<Interval>>> {
        Interval::split_list(parts.max(1), &self.ranges())
    }

    /// Visit every element on the rayon pool; each worker gets a disjoint,
    /// evenly sized share of the indices.
    pub fn parallel_for_each<F>(&self, parts: usize, f: F) -> Result<()>
    where
        T: Sync,
        F: Fn(i64, &T) + Sync + Send,
    {
        let groups = self.work_split(parts)?;
        groups.par_iter().try_for_each(|group| {
            for piece in group {
                for (index, value) in self.view(*piece)?.indexed() {
                    f(index, value);
                }
            }
            Ok(())
        })
    }

    /// Mutable counterpart of [`ChunkedList::parallel_for_each`].
    pub fn parallel_for_each_mut<F>(&mut self, parts: usize, f: F) -> Result<()>
    where
        T: Send,
        F: Fn(i64, &mut T) + Sync + Send,
    {
        let groups = self.work_split(parts)?;
        let mut work: Vec<Vec<(Interval, &mut [T])>> =
            groups.iter().map(|g| Vec::with_capacity(g.len())).collect();
        let mut pieces = groups
            .iter()
            .enumerate()
            .flat_map(|(g, list)| list.iter().map(move |piece| (g, *piece)))
            .peekable();

        // Pieces come out in index order, so each chunk is cut front to back.
        for chunk in self.chunks.values_mut() {
            let range = chunk.range();
            let mut rest: &mut [T] = chunk.as_mut_slice();
            while let Some((g, piece)) = pieces.next_if(|(_, p)| range.contains_range(p)) {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(piece.size() as usize);
                work[g].push((piece, head));
                rest = tail;
            }
        }

        work.into_par_iter().for_each(|segments| {
            for (piece, values) in segments {
                for (index, value) in piece.indices().zip(values.iter_mut()) {
                    f(index, value);
                }
            }
        });
        Ok(())
    }

    /// Fold each worker's share into its own accumulator; returns one
    /// accumulator per part, in index order.
    pub fn parallel_accumulate<A, I, F>(&self, parts: usize, init: I, fold: F) -> Result<Vec<A>>
    where
        T: Sync,
        A: Send,
        I: Fn() -> A + Sync + Send,
        F: Fn(&mut A, i64, &T) + Sync + Send,
    {
        let groups = self.work_split(parts)?;
        groups
            .par_iter()
            .map(|group| {
                let mut acc = init();
                for piece in group {
                    for (index, value) in self.view(*piece)?.indexed() {
                        fold(&mut acc, index, value);
                    }
                }
                Ok(acc)
            })
            .collect()
    }
}

impl<'a, T> IntoIterator for &'a ChunkedList<T> {
    type Item = &'a Chunk<T>;
    type IntoIter = std::collections::btree_map::Values<'a, Interval, Chunk<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn iv(from: i64, to: i64) -> Interval {
        Interval::new(from, to).unwrap()
    }

    fn list_with(ranges: &[(i64, i64)]) -> ChunkedList<i64> {
        let mut list = ChunkedList::new();
        for &(from, to) in ranges {
            list.add(Chunk::from_fn(iv(from, to), |i| i).unwrap()).unwrap();
        }
        list
    }

    #[test]
    fn test_add_rejects_overlap() {
        let mut list = list_with(&[(0, 10), (20, 30)]);
        let err = list
            .add(Chunk::from_fn(iv(5, 15), |i| i).unwrap())
            .unwrap_err();
        assert!(matches!(err, DistError::Overlap { existing, .. } if existing == iv(0, 10)));
        list.add(Chunk::from_fn(iv(10, 20), |i| i).unwrap()).unwrap();
        assert_eq!(list.len(), 30);
        assert_eq!(list.num_chunks(), 3);
    }

    #[test]
    fn test_get_and_set_route_to_chunk() {
        let mut list = list_with(&[(0, 10), (20, 30)]);
        assert_eq!(*list.get(25).unwrap(), 25);
        assert_eq!(list.set(25, -1).unwrap(), 25);
        assert_eq!(*list.get(25).unwrap(), -1);
        assert!(matches!(list.get(15), Err(DistError::NotLocal(15))));
    }

    #[test]
    fn test_indices_at_the_domain_edge_are_not_local() {
        let mut list = ChunkedList::new();
        list.add(Chunk::from_fn(iv(i64::MAX - 4, i64::MAX), |_| 1u8).unwrap())
            .unwrap();
        assert_eq!(*list.get(i64::MAX - 1).unwrap(), 1);
        assert!(matches!(list.get(i64::MAX), Err(DistError::NotLocal(i64::MAX))));
        assert!(matches!(list.set(i64::MAX, 0), Err(DistError::NotLocal(_))));
        assert!(!list.contains(i64::MAX));
        list.split_at(i64::MAX).unwrap();
        assert_eq!(list.num_chunks(), 1);
    }

    #[test]
    fn test_take_splits_at_bounds() {
        let mut list = list_with(&[(0, 10), (10, 20)]);
        let taken = list.take(iv(5, 15)).unwrap();
        let ranges: Vec<Interval> = taken.iter().map(|c| c.range()).collect();
        assert_eq!(ranges, vec![iv(5, 10), iv(10, 15)]);
        assert_eq!(list.ranges(), vec![iv(0, 5), iv(15, 20)]);
        assert_eq!(list.len(), 10);
        assert_eq!(taken[1].as_slice(), &[10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_take_requires_coverage() {
        let mut list = list_with(&[(0, 10), (12, 20)]);
        assert!(list.covers(iv(2, 8)));
        assert!(!list.covers(iv(8, 14)));
        assert!(matches!(list.take(iv(8, 14)), Err(DistError::NotLocal(10))));
        assert_eq!(list.ranges(), vec![iv(0, 10), iv(12, 20)]);
    }

    #[test]
    fn test_try_for_each_collect_reports_all_failures() {
        let list = list_with(&[(0, 10)]);
        let failures = list.try_for_each_collect(|index, _| {
            if index % 3 == 0 {
                Err(DistError::callback(format!("bad {index}")))
            } else {
                Ok(())
            }
        });
        let indices: Vec<i64> = failures.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_parallel_loops_cover_every_index() {
        let mut list = list_with(&[(0, 7), (10, 13), (40, 60)]);
        let sum = AtomicI64::new(0);
        list.parallel_for_each(4, |_, value| {
            sum.fetch_add(*value, Ordering::Relaxed);
        })
        .unwrap();
        let expected: i64 = (0..7).chain(10..13).chain(40..60).sum();
        assert_eq!(sum.load(Ordering::Relaxed), expected);

        list.parallel_for_each_mut(3, |index, value| *value = index * 2)
            .unwrap();
        assert_eq!(*list.get(45).unwrap(), 90);

        let partials = list
            .parallel_accumulate(5, || 0i64, |acc, _, value| *acc += *value)
            .unwrap();
        assert_eq!(partials.len(), 5);
        assert_eq!(partials.iter().sum::<i64>(), expected * 2);
    }

    #[test]
    fn test_parallel_with_more_parts_than_elements() {
        let mut list = list_with(&[(0, 2)]);
        list.parallel_for_each_mut(8, |_, value| *value += 1).unwrap();
        let mut seen = Vec::new();
        list.for_each(|i, v| seen.push((i, *v)));
        assert_eq!(seen, vec![(0, 1), (1, 2)]);
    }
}
