//! # Square chunk
//!
//! Two-dimensional analogue of [`Chunk`](super::Chunk): one buffer holding
//! every cell of a [`Rectangle`] in row-major order. Triangular rectangles
//! store only their cells, so rows have varying lengths.

use super::view::RangedSlice;
use crate::config::MAX_CHUNK_ELEMENTS;
use crate::error::{DistError, Result};
use crate::range::{Interval, Rectangle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareChunk<T> {
    rect: Rectangle,
    /// `row_offsets[k]` is the buffer offset of row `outer.from() + k`.
    row_offsets: Vec<usize>,
    elements: Vec<T>,
}

fn row_offsets(rect: &Rectangle) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(rect.outer().size() as usize + 1);
    let mut offset = 0usize;
    offsets.push(offset);
    for o in rect.outer().indices() {
        offset += rect.row_range(o).size() as usize;
        offsets.push(offset);
    }
    offsets
}

fn check_rectangle(rect: &Rectangle) -> Result<()> {
    let size = rect.size();
    if size == 0 {
        return Err(DistError::EmptyChunk(rect.outer()));
    }
    if size > MAX_CHUNK_ELEMENTS {
        return Err(DistError::ChunkTooLarge {
            range: rect.outer(),
            size,
            max: MAX_CHUNK_ELEMENTS,
        });
    }
    Ok(())
}

impl<T> SquareChunk<T> {
    pub fn new(rect: Rectangle) -> Result<Self>
    where
        T: Default,
    {
        Self::from_fn(rect, |_, _| T::default())
    }

    /// A square chunk whose cell `(o, i)` is `init(o, i)`.
    pub fn from_fn(rect: Rectangle, mut init: impl FnMut(i64, i64) -> T) -> Result<Self> {
        check_rectangle(&rect)?;
        let elements = rect.cells().map(|(o, i)| init(o, i)).collect();
        Ok(Self {
            rect,
            row_offsets: row_offsets(&rect),
            elements,
        })
    }

    pub fn rectangle(&self) -> Rectangle {
        self.rect
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn offset(&self, outer: i64, inner: i64) -> Result<usize> {
        if !self.rect.contains(outer, inner) {
            return Err(DistError::CellOutOfRange {
                outer,
                inner,
                rect: self.rect,
            });
        }
        let row = (outer - self.rect.outer().from()) as usize;
        let row_from = self.rect.row_range(outer).from();
        Ok(self.row_offsets[row] + (inner - row_from) as usize)
    }

    pub fn get(&self, outer: i64, inner: i64) -> Result<&T> {
        let offset = self.offset(outer, inner)?;
        Ok(&self.elements[offset])
    }

    pub fn get_mut(&mut self, outer: i64, inner: i64) -> Result<&mut T> {
        let offset = self.offset(outer, inner)?;
        Ok(&mut self.elements[offset])
    }

    pub fn set(&mut self, outer: i64, inner: i64, value: T) -> Result<T> {
        Ok(std::mem::replace(self.get_mut(outer, inner)?, value))
    }

    /// Cells of row `outer` as a view over the inner indices present in it.
    pub fn row(&self, outer: i64) -> Result<RangedSlice<'_, T>> {
        if !self.rect.outer().contains(outer) {
            return Err(DistError::OutOfRange {
                index: outer,
                range: self.rect.outer(),
            });
        }
        let row = (outer - self.rect.outer().from()) as usize;
        let data = &self.elements[self.row_offsets[row]..self.row_offsets[row + 1]];
        Ok(RangedSlice::new(self.rect.row_range(outer), data))
    }

    /// Visit every cell in row-major order.
    pub fn for_each(&self, mut f: impl FnMut(i64, i64, &T)) {
        for ((o, i), value) in self.rect.cells().zip(self.elements.iter()) {
            f(o, i, value);
        }
    }

    /// Visit rows in parallel; rows are divided into `parts` contiguous groups.
    ///
    /// `f` receives the outer index, the inner range of the row and its cells.
    pub fn parallel_for_each_row<F>(&mut self, parts: usize, f: F) -> Result<()>
    where
        T: Send,
        F: Fn(i64, Interval, &mut [T]) + Sync + Send,
    {
        let groups = self.rect.outer().split(parts.max(1))?;
        let rect = self.rect;
        let mut rest: &mut [T] = &mut self.elements;
        let mut work: Vec<Vec<(i64, Interval, &mut [T])>> = Vec::with_capacity(groups.len());
        for group in groups {
            let mut rows = Vec::with_capacity(group.size() as usize);
            for o in group.indices() {
                let row_range = rect.row_range(o);
                let (row, tail) = std::mem::take(&mut rest).split_at_mut(row_range.size() as usize);
                rows.push((o, row_range, row));
                rest = tail;
            }
            work.push(rows);
        }
        work.into_par_iter().for_each(|rows| {
            for (o, row_range, cells) in rows {
                f(o, row_range, cells);
            }
        });
        Ok(())
    }

    /// Materialized copy of the cells of `rect`, which must be covered by this chunk.
    pub fn sub_chunk(&self, rect: Rectangle) -> Result<SquareChunk<T>>
    where
        T: Clone,
    {
        if !self.rect.contains_rectangle(&rect) {
            return Err(DistError::RectangleOutOfBounds {
                requested: rect,
                rect: self.rect,
            });
        }
        check_rectangle(&rect)?;
        let elements = rect
            .cells()
            .map(|(o, i)| self.get(o, i).cloned())
            .collect::<Result<Vec<T>>>()?;
        Ok(SquareChunk {
            rect,
            row_offsets: row_offsets(&rect),
            elements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::RangedList;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn iv(from: i64, to: i64) -> Interval {
        Interval::new(from, to).unwrap()
    }

    #[test]
    fn test_full_square_access() {
        let rect = Rectangle::new(iv(0, 3), iv(10, 14));
        let mut square = SquareChunk::from_fn(rect, |o, i| o * 100 + i).unwrap();
        assert_eq!(square.len(), 12);
        assert_eq!(*square.get(2, 13).unwrap(), 213);
        assert_eq!(square.set(1, 10, 0).unwrap(), 110);
        assert_eq!(square.row(1).unwrap().as_slice(), &[0, 111, 112, 113]);
        assert!(matches!(
            square.get(3, 10),
            Err(DistError::CellOutOfRange { outer: 3, .. })
        ));
    }

    #[test]
    fn test_triangular_square_rows() {
        let rect = Rectangle::upper_triangle(iv(0, 4), iv(0, 4), 1);
        let square = SquareChunk::from_fn(rect, |o, i| (o, i)).unwrap();
        assert_eq!(square.len(), 6);
        assert_eq!(square.row(0).unwrap().range(), iv(1, 4));
        assert_eq!(*square.get(2, 3).unwrap(), (2, 3));
        assert!(square.get(2, 2).is_err());
        assert!(square.row(3).unwrap().is_empty());

        let mut visited = Vec::new();
        square.for_each(|o, i, value| {
            assert_eq!(*value, (o, i));
            visited.push((o, i));
        });
        assert_eq!(visited.len(), 6);
    }

    #[test]
    fn test_parallel_rows_touch_every_cell_once() {
        let rect = Rectangle::upper_triangle(iv(0, 50), iv(0, 50), 0);
        let mut square = SquareChunk::<u64>::new(rect).unwrap();
        let visits = AtomicU64::new(0);
        square
            .parallel_for_each_row(4, |o, row_range, cells| {
                assert_eq!(row_range.size() as usize, cells.len());
                for cell in cells.iter_mut() {
                    *cell += o as u64 + 1;
                }
                visits.fetch_add(cells.len() as u64, Ordering::Relaxed);
            })
            .unwrap();
        assert_eq!(visits.load(Ordering::Relaxed), rect.size());
        assert_eq!(*square.get(7, 30).unwrap(), 8);
    }

    #[test]
    fn test_sub_chunk() {
        let rect = Rectangle::new(iv(0, 5), iv(0, 5));
        let square = SquareChunk::from_fn(rect, |o, i| o * 10 + i).unwrap();
        let sub = square.sub_chunk(Rectangle::new(iv(1, 3), iv(2, 4))).unwrap();
        assert_eq!(sub.len(), 4);
        assert_eq!(*sub.get(2, 3).unwrap(), 23);
        assert!(square
            .sub_chunk(Rectangle::new(iv(4, 6), iv(0, 1)))
            .is_err());
    }
}
