//! # Chunk
//!
//! A contiguous, exclusively owned buffer addressed by an [`Interval`].
//! Slot `k` of the buffer holds global index `range.from() + k`.

use super::view::{RangedList, RangedSlice};
use crate::config::MAX_CHUNK_ELEMENTS;
use crate::error::{DistError, Result};
use crate::range::Interval;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk<T> {
    range: Interval,
    elements: Vec<T>,
}

/// Reject empty ranges and ranges larger than `max` elements.
pub(crate) fn check_chunk_range(range: Interval, max: u64) -> Result<()> {
    if range.is_empty() {
        return Err(DistError::EmptyChunk(range));
    }
    if range.size() > max {
        return Err(DistError::ChunkTooLarge {
            range,
            size: range.size(),
            max,
        });
    }
    Ok(())
}

impl<T> Chunk<T> {
    /// A chunk over `range` filled with default values.
    pub fn new(range: Interval) -> Result<Self>
    where
        T: Default,
    {
        Self::from_fn(range, |_| T::default())
    }

    /// A chunk over `range` whose element at index `i` is `init(i)`.
    pub fn from_fn(range: Interval, init: impl FnMut(i64) -> T) -> Result<Self> {
        check_chunk_range(range, MAX_CHUNK_ELEMENTS)?;
        Ok(Self {
            range,
            elements: range.indices().map(init).collect(),
        })
    }

    /// Adopt `elements` as the contents of `range`.
    pub fn from_vec(range: Interval, elements: Vec<T>) -> Result<Self> {
        check_chunk_range(range, MAX_CHUNK_ELEMENTS)?;
        if range.size() != elements.len() as u64 {
            return Err(DistError::LengthMismatch {
                range,
                len: elements.len(),
            });
        }
        Ok(Self { range, elements })
    }

    /// Re-check the buffer invariants, e.g. after decoding from the wire.
    pub fn validate(&self) -> Result<()> {
        check_chunk_range(self.range, MAX_CHUNK_ELEMENTS)?;
        if self.range.size() != self.elements.len() as u64 {
            return Err(DistError::LengthMismatch {
                range: self.range,
                len: self.elements.len(),
            });
        }
        Ok(())
    }

    #[inline]
    fn offset(&self, index: i64) -> Result<usize> {
        if !self.range.contains(index) {
            return Err(DistError::OutOfRange {
                index,
                range: self.range,
            });
        }
        Ok((index - self.range.from()) as usize)
    }

    pub fn get_mut(&mut self, index: i64) -> Result<&mut T> {
        let offset = self.offset(index)?;
        Ok(&mut self.elements[offset])
    }

    /// Replace the element at `index`, returning the previous value.
    pub fn set(&mut self, index: i64, value: T) -> Result<T> {
        let slot = self.get_mut(index)?;
        Ok(std::mem::replace(slot, value))
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.elements
    }

    /// Mutable slots of `range`, which must lie inside this chunk.
    pub fn slice_mut(&mut self, range: Interval) -> Result<&mut [T]> {
        if !self.range.contains_range(&range) {
            return Err(DistError::RangeOutOfBounds {
                requested: range,
                range: self.range,
            });
        }
        let start = (range.from() - self.range.from()) as usize;
        Ok(&mut self.elements[start..start + range.size() as usize])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.elements.iter_mut()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.elements
    }

    /// Forward cursor positioned before the first element.
    pub fn cursor(&mut self) -> ChunkCursor<'_, T> {
        let position = self.range.from();
        ChunkCursor {
            chunk: self,
            position,
            last: None,
        }
    }

    /// Backward cursor positioned after the last element.
    pub fn cursor_back(&mut self) -> ChunkCursor<'_, T> {
        let position = self.range.to();
        ChunkCursor {
            chunk: self,
            position,
            last: None,
        }
    }

    /// Cut the chunk at `index`, which must be strictly inside the range.
    pub fn split_at(self, index: i64) -> Result<(Chunk<T>, Chunk<T>)> {
        if index <= self.range.from() || index >= self.range.to() {
            return Err(DistError::OutOfRange {
                index,
                range: self.range,
            });
        }
        let mut head = self.elements;
        let tail = head.split_off((index - self.range.from()) as usize);
        Ok((
            Chunk {
                range: Interval::clamped(self.range.from(), index),
                elements: head,
            },
            Chunk {
                range: Interval::clamped(index, self.range.to()),
                elements: tail,
            },
        ))
    }

    /// Materialized copy of `range`.
    pub fn sub_chunk(&self, range: Interval) -> Result<Chunk<T>>
    where
        T: Clone,
    {
        self.view(range)?.to_chunk()
    }

    /// This chunk itself when `range` matches it exactly, otherwise a
    /// materialized copy of `range`.
    pub fn sub_view(&self, range: Interval) -> Result<Cow<'_, Chunk<T>>>
    where
        T: Clone,
    {
        if range == self.range {
            return Ok(Cow::Borrowed(self));
        }
        Ok(Cow::Owned(self.sub_chunk(range)?))
    }

    /// Read-only view of the whole chunk.
    pub fn as_view(&self) -> RangedSlice<'_, T> {
        RangedSlice::new(self.range, &self.elements)
    }
}

impl<T> RangedList<T> for Chunk<T> {
    fn range(&self) -> Interval {
        self.range
    }

    fn as_slice(&self) -> &[T] {
        &self.elements
    }
}

impl<'a, T> IntoIterator for &'a Chunk<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// Bidirectional cursor over a chunk with in-place replacement of the last
/// element it yielded.
pub struct ChunkCursor<'a, T> {
    chunk: &'a mut Chunk<T>,
    /// Index of the element `next` would yield.
    position: i64,
    last: Option<i64>,
}

impl<T> ChunkCursor<'_, T> {
    pub fn has_next(&self) -> bool {
        self.position < self.chunk.range.to()
    }

    pub fn has_previous(&self) -> bool {
        self.position > self.chunk.range.from()
    }

    /// Index that the next call to `next` would yield.
    pub fn next_index(&self) -> i64 {
        self.position
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&T> {
        if !self.has_next() {
            return None;
        }
        let index = self.position;
        self.position += 1;
        self.last = Some(index);
        Some(&self.chunk.elements[(index - self.chunk.range.from()) as usize])
    }

    pub fn previous(&mut self) -> Option<&T> {
        if !self.has_previous() {
            return None;
        }
        self.position -= 1;
        let index = self.position;
        self.last = Some(index);
        Some(&self.chunk.elements[(index - self.chunk.range.from()) as usize])
    }

    /// Replace the element most recently returned by `next` or `previous`.
    pub fn set(&mut self, value: T) -> Result<T> {
        let index = self.last.ok_or_else(|| {
            DistError::IllegalState("cursor set called before next or previous".to_string())
        })?;
        self.chunk.set(index, value)
    }
}
